//! Grant sets derived from loaded modules and types.
//!
//! A binding selects members of a loaded module by accessibility level and, optionally, by name
//! and signature. The result is a list of `(MemberId, MemberAccess)` grants that a
//! [`crate::policy::CasPolicyBuilder`] allows or denies. Fields are granted read access, plus
//! write access unless they are `initonly` or literal. Methods and constructors are granted call
//! access.

use std::collections::{hash_map, HashMap};

use crate::{
    metadata::{
        identity::MemberId,
        module::{MethodDef, TypeDef},
        typesig::TypeSig,
    },
    policy::{accessibility::Accessibility, grants::MemberAccess},
    runtime::LoadedModule,
    Error, Result,
};

/// Members of one type, and of its nested types, selected for a policy.
#[derive(Debug, Clone)]
pub struct TypeBinding<'m> {
    module: &'m LoadedModule,
    index: usize,
    grants: HashMap<MemberId, MemberAccess>,
}

impl<'m> TypeBinding<'m> {
    /// Binds the type at `index` of `module`, granting every member admitted at `accessibility`
    #[must_use]
    pub fn new(module: &'m LoadedModule, index: usize, accessibility: Accessibility) -> Self {
        let mut binding = TypeBinding {
            module,
            index,
            grants: HashMap::new(),
        };
        binding.add_members(index, accessibility);
        binding
    }

    /// Binds a type by namespace-qualified name, nested names joined with `/`
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the module defines no such type.
    pub fn by_name(module: &'m LoadedModule, full_name: &str, accessibility: Accessibility) -> Result<Self> {
        let index = module
            .type_index(full_name)
            .ok_or_else(|| Error::TypeNotFound(format!("{} in {}", full_name, module.name())))?;
        Ok(Self::new(module, index, accessibility))
    }

    /// Adds the only constructor admitted at `accessibility`
    ///
    /// # Errors
    /// Returns [`Error::Binding`] unless exactly one constructor qualifies.
    pub fn with_constructor(mut self, accessibility: Accessibility) -> Result<Self> {
        let candidates: Vec<MemberId> = self
            .methods()
            .filter(|(_, m)| is_instance_constructor(m) && accessibility.admits_method(m.flags))
            .map(|(id, _)| id)
            .collect();
        match candidates.as_slice() {
            [only] => {
                self.grant_method(*only);
                Ok(self)
            }
            _ => Err(Error::Binding(format!(
                "{} constructors of {} qualify, expected exactly one",
                candidates.len(),
                self.type_name()
            ))),
        }
    }

    /// Adds the constructor taking `params`
    ///
    /// # Errors
    /// Returns [`Error::Binding`] if no admitted constructor matches.
    pub fn with_constructor_params(mut self, params: &[TypeSig], accessibility: Accessibility) -> Result<Self> {
        let found = self.find_by_params(|m| is_instance_constructor(m), params, accessibility);
        match found {
            Some(id) => {
                self.grant_method(id);
                Ok(self)
            }
            None => Err(Error::Binding(format!(
                "no constructor of {} takes ({})",
                self.type_name(),
                display_params(params)
            ))),
        }
    }

    /// Adds the field named `name`
    ///
    /// # Errors
    /// Returns [`Error::Binding`] if it does not exist or is not admitted at `accessibility`.
    pub fn with_field(mut self, name: &str, accessibility: Accessibility) -> Result<Self> {
        let found = self
            .module
            .field_ids(self.index)
            .find(|(_, f)| f.name == name && accessibility.admits_field(f.flags))
            .map(|(id, f)| (id, MemberAccess::for_field(f)));
        match found {
            Some((id, access)) => {
                self.grant(id, access);
                Ok(self)
            }
            None => Err(Error::Binding(format!("no field {} in {}", name, self.type_name()))),
        }
    }

    /// Adds the first method named `name` admitted at `accessibility`
    ///
    /// # Errors
    /// Returns [`Error::Binding`] if there is none.
    pub fn with_method(mut self, name: &str, accessibility: Accessibility) -> Result<Self> {
        let found = self
            .methods()
            .find(|(_, m)| m.name == name && accessibility.admits_method(m.flags))
            .map(|(id, _)| id);
        match found {
            Some(id) => {
                self.grant_method(id);
                Ok(self)
            }
            None => Err(Error::Binding(format!("no method {} in {}", name, self.type_name()))),
        }
    }

    /// Adds the method named `name` taking `params`
    ///
    /// # Errors
    /// Returns [`Error::Binding`] if no admitted overload matches.
    pub fn with_method_params(mut self, name: &str, params: &[TypeSig], accessibility: Accessibility) -> Result<Self> {
        let found = self.find_by_params(|m| m.name == name, params, accessibility);
        match found {
            Some(id) => {
                self.grant_method(id);
                Ok(self)
            }
            None => Err(Error::Binding(format!(
                "no method {}({}) in {}",
                name,
                display_params(params),
                self.type_name()
            ))),
        }
    }

    /// The selected grants
    #[must_use]
    pub fn grants(&self) -> &HashMap<MemberId, MemberAccess> {
        &self.grants
    }

    /// Exact parameter match first, then a match with open instantiations folded to their
    /// generic type definition
    fn find_by_params(
        &self,
        select: impl Fn(&MethodDef) -> bool,
        params: &[TypeSig],
        accessibility: Accessibility,
    ) -> Option<MemberId> {
        let candidates: Vec<(MemberId, &MethodDef)> = self
            .methods()
            .filter(|(_, m)| select(m) && accessibility.admits_method(m.flags))
            .collect();
        candidates
            .iter()
            .find(|(_, m)| m.sig.params == params)
            .or_else(|| {
                candidates.iter().find(|(_, m)| {
                    m.sig.params.len() == params.len()
                        && m.sig
                            .params
                            .iter()
                            .zip(params)
                            .all(|(declared, wanted)| declared.generic_definition() == *wanted)
                })
            })
            .map(|(id, _)| *id)
    }

    fn methods(&self) -> impl Iterator<Item = (MemberId, &'m MethodDef)> + 'm {
        self.module.method_ids(self.index)
    }

    fn type_name(&self) -> String {
        self.module.types()[self.index].type_ref.full_name()
    }

    fn add_members(&mut self, index: usize, accessibility: Accessibility) {
        if accessibility == Accessibility::None {
            return;
        }
        let module = self.module;
        for (id, field) in module.field_ids(index) {
            if accessibility.admits_field(field.flags) {
                self.grant(id, MemberAccess::for_field(field));
            }
        }
        for (id, method) in module.method_ids(index) {
            if accessibility.admits_method(method.flags) {
                self.grant_method(id);
            }
        }

        let nested: Vec<usize> = module
            .types()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.enclosing == Some(index))
            .map(|(i, _)| i)
            .collect();
        for child in nested {
            if let Some(child_def) = module.type_def(child) {
                self.add_members(child, accessibility.for_nested(child_def.flags.visibility()));
            }
        }
    }

    fn grant(&mut self, id: MemberId, access: MemberAccess) {
        *self.grants.entry(id).or_default() |= access;
    }

    fn grant_method(&mut self, id: MemberId) {
        self.grant(id, MemberAccess::CALL);
    }
}

impl IntoIterator for TypeBinding<'_> {
    type Item = (MemberId, MemberAccess);
    type IntoIter = hash_map::IntoIter<MemberId, MemberAccess>;

    fn into_iter(self) -> Self::IntoIter {
        self.grants.into_iter()
    }
}

/// Members of every type of a module, selected for a policy.
#[derive(Debug, Clone, Default)]
pub struct ModuleBinding {
    grants: HashMap<MemberId, MemberAccess>,
}

impl ModuleBinding {
    /// Binds every top-level type of `module`, and their nested types, at `accessibility`
    #[must_use]
    pub fn new(module: &LoadedModule, accessibility: Accessibility) -> Self {
        let mut grants: HashMap<MemberId, MemberAccess> = HashMap::new();
        if accessibility == Accessibility::None {
            return ModuleBinding { grants };
        }

        for (index, loaded) in module.types().iter().enumerate() {
            if loaded.enclosing.is_some() {
                continue;
            }
            let Some(type_def) = module.type_def(index) else {
                continue;
            };
            let level = accessibility.for_top_level(type_def.flags.visibility(), is_class_like(type_def));
            for (id, access) in TypeBinding::new(module, index, level) {
                *grants.entry(id).or_default() |= access;
            }
        }
        ModuleBinding { grants }
    }

    /// The selected grants
    #[must_use]
    pub fn grants(&self) -> &HashMap<MemberId, MemberAccess> {
        &self.grants
    }
}

impl IntoIterator for ModuleBinding {
    type Item = (MemberId, MemberAccess);
    type IntoIter = hash_map::IntoIter<MemberId, MemberAccess>;

    fn into_iter(self) -> Self::IntoIter {
        self.grants.into_iter()
    }
}

fn is_instance_constructor(method: &MethodDef) -> bool {
    method.name == ".ctor" && !method.is_static()
}

/// Classes and types implementing an interface, as opposed to plain value types and interfaces
fn is_class_like(type_def: &TypeDef) -> bool {
    if !type_def.interfaces.is_empty() {
        return true;
    }
    if type_def.is_interface() {
        return false;
    }
    !type_def.base.as_ref().and_then(TypeSig::type_ref).is_some_and(|base| {
        base.namespace == "System" && (base.name == "ValueType" || base.name == "Enum")
    })
}

fn display_params(params: &[TypeSig]) -> String {
    params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
