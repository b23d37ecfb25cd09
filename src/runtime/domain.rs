//! The set of loaded modules and their load contexts.
//!
//! Loading assigns every module a [`ModuleId`] and every type, field and method a definition
//! token in preorder (types in definition order with nested types following their enclosing
//! type, members in declaration order). From then on structural references resolve to exact
//! [`MemberId`]s and [`TypeHandle`]s.
//!
//! # Thread Safety
//!
//! Modules live in a `SkipMap` keyed by id, with a `DashMap` name index and an atomic id counter,
//! so lookups never block and loads from several threads do not serialize on a lock. Loaded
//! modules are immutable and shared as `Arc`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;

use crate::{
    metadata::{
        identity::{LoadContextId, MemberId, ModuleId, TypeHandle},
        members::{FieldRef, MethodRef, MethodSig},
        module::{FieldDef, MethodDef, ModuleDef, TypeDef},
        token::Token,
        typesig::{TypeRef, TypeSig},
    },
    Error, Result,
};

/// Position of one type inside a loaded module.
#[derive(Debug, Clone)]
pub struct LoadedType {
    /// Reference naming the type, nested names joined with `/`
    pub type_ref: TypeRef,
    /// Definition token
    pub token: Token,
    /// Index path from [`ModuleDef::types`] through nested types
    path: Vec<usize>,
    /// Row of the first field
    first_field: u32,
    /// Row of the first method
    first_method: u32,
    /// Index of the enclosing type, `None` at top level
    pub enclosing: Option<usize>,
}

/// A module after loading, with its token tables.
#[derive(Debug)]
pub struct LoadedModule {
    /// Identity in the domain
    pub id: ModuleId,
    /// Load context the module belongs to
    pub context: LoadContextId,
    /// The loaded definition
    pub def: ModuleDef,
    types: Vec<LoadedType>,
    type_index: HashMap<String, usize>,
    /// Field row to owning type index
    field_owners: Vec<usize>,
    /// Method row to owning type index
    method_owners: Vec<usize>,
}

impl LoadedModule {
    fn new(id: ModuleId, context: LoadContextId, def: ModuleDef) -> Self {
        fn walk(
            type_ref: TypeRef,
            type_def: &TypeDef,
            path: Vec<usize>,
            enclosing: Option<usize>,
            module: &mut LoadedModule,
        ) {
            let index = module.types.len();
            module.types.push(LoadedType {
                type_ref: type_ref.clone(),
                token: Token::from_parts(Token::TYPEDEF, index as u32 + 1),
                path: path.clone(),
                first_field: module.field_owners.len() as u32 + 1,
                first_method: module.method_owners.len() as u32 + 1,
                enclosing,
            });
            module.type_index.insert(type_ref.full_name(), index);
            module.field_owners.extend(std::iter::repeat(index).take(type_def.fields.len()));
            module.method_owners.extend(std::iter::repeat(index).take(type_def.methods.len()));

            for (position, nested) in type_def.nested.iter().enumerate() {
                let mut nested_path = path.clone();
                nested_path.push(position);
                walk(type_ref.nested(&nested.name), nested, nested_path, Some(index), module);
            }
        }

        let mut module = LoadedModule {
            id,
            context,
            def: ModuleDef::new(def.name.clone()),
            types: Vec::new(),
            type_index: HashMap::new(),
            field_owners: Vec::new(),
            method_owners: Vec::new(),
        };
        for (position, type_def) in def.types.iter().enumerate() {
            let type_ref = def.type_ref(&type_def.namespace, &type_def.name);
            walk(type_ref, type_def, vec![position], None, &mut module);
        }
        module.def = def;
        module
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// All types in token order
    #[must_use]
    pub fn types(&self) -> &[LoadedType] {
        &self.types
    }

    /// Handle of the type at `index` in [`LoadedModule::types`]
    #[must_use]
    pub fn type_handle(&self, index: usize) -> TypeHandle {
        TypeHandle::new(self.id, self.types[index].token)
    }

    /// Index of a type by namespace-qualified name
    #[must_use]
    pub fn type_index(&self, full_name: &str) -> Option<usize> {
        self.type_index.get(full_name).copied()
    }

    /// Index of the type a handle names, if the handle belongs to this module
    #[must_use]
    pub fn index_of(&self, handle: TypeHandle) -> Option<usize> {
        if handle.module != self.id || handle.token.table() != Token::TYPEDEF {
            return None;
        }
        let index = (handle.token.row() as usize).checked_sub(1)?;
        (index < self.types.len()).then_some(index)
    }

    /// Definition of the type at `index`
    #[must_use]
    pub fn type_def(&self, index: usize) -> Option<&TypeDef> {
        let path = &self.types.get(index)?.path;
        let mut current = self.def.types.get(*path.first()?)?;
        for position in &path[1..] {
            current = current.nested.get(*position)?;
        }
        Some(current)
    }

    /// Field identities of the type at `index`
    pub fn field_ids(&self, index: usize) -> impl Iterator<Item = (MemberId, &FieldDef)> + '_ {
        let first = self.types.get(index).map_or(0, |t| t.first_field);
        self.type_def(index)
            .into_iter()
            .flat_map(|t| t.fields.iter())
            .enumerate()
            .map(move |(i, field)| (self.field_id(first + i as u32), field))
    }

    /// Method identities of the type at `index`
    pub fn method_ids(&self, index: usize) -> impl Iterator<Item = (MemberId, &MethodDef)> + '_ {
        let first = self.types.get(index).map_or(0, |t| t.first_method);
        self.type_def(index)
            .into_iter()
            .flat_map(|t| t.methods.iter())
            .enumerate()
            .map(move |(i, method)| (self.method_id(first + i as u32), method))
    }

    fn field_id(&self, row: u32) -> MemberId {
        MemberId::new(self.id, Token::from_parts(Token::FIELD, row))
    }

    fn method_id(&self, row: u32) -> MemberId {
        MemberId::new(self.id, Token::from_parts(Token::METHODDEF, row))
    }

    /// Field definition and owning type index of a field identity
    #[must_use]
    pub fn field(&self, id: MemberId) -> Option<(usize, &FieldDef)> {
        if id.module != self.id || !id.is_field() {
            return None;
        }
        let row = id.token.row();
        let owner = *self.field_owners.get((row as usize).checked_sub(1)?)?;
        let offset = row - self.types[owner].first_field;
        Some((owner, self.type_def(owner)?.fields.get(offset as usize)?))
    }

    /// Method definition and owning type index of a method identity
    #[must_use]
    pub fn method(&self, id: MemberId) -> Option<(usize, &MethodDef)> {
        if id.module != self.id || !id.is_method() {
            return None;
        }
        let row = id.token.row();
        let owner = *self.method_owners.get((row as usize).checked_sub(1)?)?;
        let offset = row - self.types[owner].first_method;
        Some((owner, self.type_def(owner)?.methods.get(offset as usize)?))
    }

    /// Identity of the method at `position` in the methods of the type at `index`
    #[must_use]
    pub fn method_at(&self, index: usize, position: usize) -> Option<MemberId> {
        let loaded = self.types.get(index)?;
        let count = self.type_def(index)?.methods.len();
        (position < count).then(|| self.method_id(loaded.first_method + position as u32))
    }

    /// Finds a field of the type at `index` by name
    #[must_use]
    pub fn find_field(&self, index: usize, name: &str) -> Option<MemberId> {
        self.field_ids(index).find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    /// Finds a method of the type at `index` by name and signature
    #[must_use]
    pub fn find_method(&self, index: usize, name: &str, sig: &MethodSig) -> Option<MemberId> {
        self.method_ids(index)
            .find(|(_, m)| m.name == name && signature_matches(&m.sig, sig))
            .map(|(id, _)| id)
    }
}

/// Returns true if two signatures declare the same method shape
#[must_use]
pub fn signature_matches(left: &MethodSig, right: &MethodSig) -> bool {
    left.has_this == right.has_this
        && left.generic_arity == right.generic_arity
        && left.params == right.params
        && left.return_type == right.return_type
}

#[derive(Debug, Clone, Copy)]
struct ContextInfo {
    collectible: bool,
}

/// The loaded modules of one sandbox host.
pub struct Domain {
    modules: SkipMap<ModuleId, Arc<LoadedModule>>,
    by_name: DashMap<String, ModuleId>,
    contexts: DashMap<LoadContextId, ContextInfo>,
    next_module: AtomicU32,
    next_context: AtomicU32,
}

impl Domain {
    /// Creates an empty domain with the default, non-collectible context
    #[must_use]
    pub fn new() -> Self {
        let contexts = DashMap::new();
        contexts.insert(LoadContextId::DEFAULT, ContextInfo { collectible: false });
        Domain {
            modules: SkipMap::new(),
            by_name: DashMap::new(),
            contexts,
            next_module: AtomicU32::new(1),
            next_context: AtomicU32::new(1),
        }
    }

    /// Creates a new load context. Collectible contexts can be unloaded
    pub fn create_context(&self, collectible: bool) -> LoadContextId {
        let id = LoadContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        self.contexts.insert(id, ContextInfo { collectible });
        id
    }

    /// Loads `module` into `context`
    ///
    /// # Errors
    /// Returns [`Error::DuplicateModule`] if a module of the same name is loaded, or
    /// [`Error::Error`] if the context does not exist.
    pub fn load(&self, module: ModuleDef, context: LoadContextId) -> Result<Arc<LoadedModule>> {
        if !self.contexts.contains_key(&context) {
            return Err(Error::Error(format!("load context {} does not exist", context.0)));
        }

        let id = ModuleId(self.next_module.fetch_add(1, Ordering::Relaxed));
        match self.by_name.entry(module.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(Error::DuplicateModule(module.name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let loaded = Arc::new(LoadedModule::new(id, context, module));
        self.modules.insert(id, loaded.clone());
        log::debug!(
            "loaded {} as {} into context {} ({} types)",
            loaded.name(),
            id,
            context.0,
            loaded.types.len()
        );
        Ok(loaded)
    }

    /// A loaded module by identity
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] if it is not loaded.
    pub fn module(&self, id: ModuleId) -> Result<Arc<LoadedModule>> {
        self.modules
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::ModuleNotFound(id))
    }

    /// A loaded module by name
    #[must_use]
    pub fn module_by_name(&self, name: &str) -> Option<Arc<LoadedModule>> {
        let id = *self.by_name.get(name)?;
        self.module(id).ok()
    }

    /// Number of loaded modules
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if nothing is loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Load context of a module
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] if it is not loaded.
    pub fn context_of(&self, id: ModuleId) -> Result<LoadContextId> {
        Ok(self.module(id)?.context)
    }

    /// Unloads every module of a collectible context and removes the context
    ///
    /// # Errors
    /// Returns [`Error::Error`] if the context does not exist or is not collectible.
    pub fn unload_context(&self, context: LoadContextId) -> Result<Vec<ModuleId>> {
        match self.contexts.get(&context).map(|info| info.collectible) {
            Some(true) => {}
            Some(false) => {
                return Err(Error::Error(format!("load context {} is not collectible", context.0)))
            }
            None => return Err(Error::Error(format!("load context {} does not exist", context.0))),
        }
        self.contexts.remove(&context);

        let unloaded: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|entry| entry.value().context == context)
            .map(|entry| *entry.key())
            .collect();
        for id in &unloaded {
            if let Some(entry) = self.modules.remove(id) {
                self.by_name.remove(entry.value().name());
            }
        }
        log::debug!("unloaded context {} ({} modules)", context.0, unloaded.len());
        Ok(unloaded)
    }

    /// Resolves a type signature to the definition it names.
    ///
    /// Instantiations resolve to their generic type definition.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for signatures that name no definition, or for types of
    /// modules that are not loaded.
    pub fn resolve_type(&self, sig: &TypeSig) -> Result<TypeHandle> {
        let type_ref = sig
            .type_ref()
            .ok_or_else(|| Error::TypeNotFound(sig.to_string()))?;
        let module = self
            .module_by_name(&type_ref.scope)
            .ok_or_else(|| Error::TypeNotFound(format!("{} in {}", type_ref, type_ref.scope)))?;
        let index = module
            .type_index(&type_ref.full_name())
            .ok_or_else(|| Error::TypeNotFound(format!("{} in {}", type_ref, type_ref.scope)))?;
        Ok(module.type_handle(index))
    }

    /// Resolves a field reference to its definition
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MemberNotFound`].
    pub fn resolve_field(&self, field: &FieldRef) -> Result<MemberId> {
        let (module, index) = self.locate(&field.declaring_type)?;
        module
            .find_field(index, &field.name)
            .ok_or_else(|| Error::MemberNotFound(field.to_string()))
    }

    /// Resolves a method reference to its definition, folding any instantiation
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] or [`Error::MemberNotFound`].
    pub fn resolve_method(&self, method: &MethodRef) -> Result<MemberId> {
        let definition = method.definition();
        let (module, index) = self.locate(&definition.declaring_type)?;
        module
            .find_method(index, &definition.name, &definition.sig)
            .ok_or_else(|| Error::MemberNotFound(method.to_string()))
    }

    /// Module and type index of a type handle
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] or [`Error::TypeNotFound`].
    pub fn type_entry(&self, handle: TypeHandle) -> Result<(Arc<LoadedModule>, usize)> {
        let module = self.module(handle.module)?;
        let index = module
            .index_of(handle)
            .ok_or_else(|| Error::TypeNotFound(format!("{} in {}", handle.token, handle.module)))?;
        Ok((module, index))
    }

    /// Structural reference to a loaded method
    ///
    /// # Errors
    /// Returns [`Error::InvalidMember`] if `id` names no loaded method.
    pub fn method_ref(&self, id: MemberId) -> Result<MethodRef> {
        let module = self.module(id.module)?;
        let (owner, method) = module.method(id).ok_or(Error::InvalidMember(id))?;
        Ok(MethodRef::new(
            TypeSig::of(module.types[owner].type_ref.clone()),
            method.name.clone(),
            method.sig.clone(),
        ))
    }

    /// Full name of a loaded type
    ///
    /// # Errors
    /// Returns [`Error::ModuleNotFound`] or [`Error::TypeNotFound`].
    pub fn type_name(&self, handle: TypeHandle) -> Result<String> {
        let (module, index) = self.type_entry(handle)?;
        Ok(module.types[index].type_ref.full_name())
    }

    /// Display name of a member and the full name of its declaring type
    ///
    /// # Errors
    /// Returns [`Error::InvalidMember`] if `id` names no loaded member.
    pub fn describe(&self, id: MemberId) -> Result<(String, String)> {
        let module = self.module(id.module)?;
        let (owner, name) = if let Some((owner, field)) = module.field(id) {
            (owner, field.name.clone())
        } else if let Some((owner, method)) = module.method(id) {
            let params: Vec<String> = method.sig.params.iter().map(ToString::to_string).collect();
            (owner, format!("{}({})", method.name, params.join(", ")))
        } else {
            return Err(Error::InvalidMember(id));
        };
        Ok((name, module.types[owner].type_ref.full_name()))
    }

    fn locate(&self, declaring_type: &TypeSig) -> Result<(Arc<LoadedModule>, usize)> {
        let handle = self.resolve_type(declaring_type)?;
        self.type_entry(handle)
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::members::{FieldAttributes, MethodAttributes};

    fn shared() -> ModuleDef {
        let outer = TypeDef::class("Shared", "Outer")
            .with_field(FieldDef::new("A", FieldAttributes::PUBLIC, TypeSig::I4))
            .with_nested(
                TypeDef::class("", "Inner")
                    .with_field(FieldDef::new("B", FieldAttributes::PUBLIC, TypeSig::I4))
                    .with_method(MethodDef::new(
                        "Get",
                        MethodAttributes::PUBLIC,
                        MethodSig::new_instance(TypeSig::I4, vec![]),
                    )),
            );
        let other = TypeDef::class("Shared", "Other")
            .with_field(FieldDef::new("C", FieldAttributes::PUBLIC, TypeSig::I4));
        ModuleDef::new("Shared").with_type(outer).with_type(other)
    }

    #[test]
    fn test_preorder_tokens() {
        let domain = Domain::new();
        let module = domain.load(shared(), LoadContextId::DEFAULT).unwrap();
        let names: Vec<String> = module.types().iter().map(|t| t.type_ref.full_name()).collect();
        assert_eq!(names, vec!["Shared.Outer", "Shared.Outer/Inner", "Shared.Other"]);

        let other = module.type_index("Shared.Other").unwrap();
        let c = module.find_field(other, "C").unwrap();
        assert_eq!(c.token, Token::from_parts(Token::FIELD, 3));
        assert_eq!(module.field(c).unwrap().1.name, "C");
    }

    #[test]
    fn test_resolve_members() {
        let domain = Domain::new();
        domain.load(shared(), LoadContextId::DEFAULT).unwrap();

        let inner = TypeSig::of(TypeRef::new("Shared", "Shared", "Outer/Inner"));
        let field = domain.resolve_field(&FieldRef::new(inner.clone(), "B", TypeSig::I4)).unwrap();
        let (name, declaring) = domain.describe(field).unwrap();
        assert_eq!((name.as_str(), declaring.as_str()), ("B", "Shared.Outer/Inner"));

        let get = MethodRef::new(inner, "Get", MethodSig::new_instance(TypeSig::I4, vec![]));
        assert!(domain.resolve_method(&get).is_ok());
        let wrong = MethodRef::new(get.declaring_type.clone(), "Get", MethodSig::new_static(TypeSig::I4, vec![]));
        assert!(matches!(domain.resolve_method(&wrong), Err(Error::MemberNotFound(_))));
    }

    #[test]
    fn test_duplicate_and_unload() {
        let domain = Domain::new();
        let context = domain.create_context(true);
        domain.load(shared(), context).unwrap();
        assert!(matches!(
            domain.load(shared(), LoadContextId::DEFAULT),
            Err(Error::DuplicateModule(_))
        ));

        assert!(domain.unload_context(LoadContextId::DEFAULT).is_err());
        assert_eq!(domain.unload_context(context).unwrap().len(), 1);
        assert!(domain.module_by_name("Shared").is_none());
        assert!(domain.is_empty());
    }
}
