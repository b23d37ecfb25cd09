//! The editable module representation consumed by instrumentation and loading.
//!
//! A [`ModuleDef`] is what the (external) binary loader produces: types with their fields,
//! methods and nested types, method bodies at instruction level. Instrumentation edits it in
//! place, adding guard types and static constructors, before it is handed to the
//! [`crate::runtime::Domain`].

use crate::{
    metadata::{
        members::{FieldAttributes, MethodAttributes, MethodRef, MethodSig, TypeAttributes},
        method::MethodBody,
        typesig::{TypeRef, TypeSig, NESTED_SEPARATOR},
    },
    Result,
};

/// An editable module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleDef {
    /// Module name, which is also the scope other modules reference it by
    pub name: String,
    /// Top-level types
    pub types: Vec<TypeDef>,
}

/// A type definition.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDef {
    /// Namespace, empty for nested types and the global namespace
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type flags
    pub flags: TypeAttributes,
    /// Base type, `None` for interfaces and the root object type
    pub base: Option<TypeSig>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeSig>,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Method definitions
    pub methods: Vec<MethodDef>,
    /// Nested type definitions
    pub nested: Vec<TypeDef>,
    /// Explicit overrides
    pub method_impls: Vec<MethodImpl>,
}

/// A field definition.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field flags
    pub flags: FieldAttributes,
    /// Field type
    pub field_type: TypeSig,
}

/// A method definition.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method flags
    pub flags: MethodAttributes,
    /// Signature
    pub sig: MethodSig,
    /// Body, `None` for abstract and runtime-provided methods
    pub body: Option<MethodBody>,
}

/// An explicit override: a method of this type implements `declaration`.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodImpl {
    /// Index of the implementing method in [`TypeDef::methods`]
    pub method: usize,
    /// The overridden or implemented method
    pub declaration: MethodRef,
}

impl ModuleDef {
    /// Creates an empty module
    pub fn new(name: impl Into<String>) -> Self {
        ModuleDef {
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// Adds a top-level type
    #[must_use]
    pub fn with_type(mut self, type_def: TypeDef) -> Self {
        self.types.push(type_def);
        self
    }

    /// Reference to a type of this module
    #[must_use]
    pub fn type_ref(&self, namespace: &str, name: &str) -> TypeRef {
        TypeRef::new(self.name.as_str(), namespace, name)
    }

    /// Finds a type by namespace and `/`-joined name
    #[must_use]
    pub fn find_type(&self, namespace: &str, name: &str) -> Option<&TypeDef> {
        let mut parts = name.split(NESTED_SEPARATOR);
        let first = parts.next()?;
        let mut current = self
            .types
            .iter()
            .find(|t| t.namespace == namespace && t.name == first)?;
        for part in parts {
            current = current.nested.iter().find(|t| t.name == part)?;
        }
        Some(current)
    }

    /// Returns true if any type in the namespace exists
    #[must_use]
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.types.iter().any(|t| t.namespace == namespace)
    }

    /// All types in definition order, nested types following their enclosing type
    #[must_use]
    pub fn all_types(&self) -> Vec<(TypeRef, &TypeDef)> {
        fn walk<'a>(type_ref: TypeRef, type_def: &'a TypeDef, out: &mut Vec<(TypeRef, &'a TypeDef)>) {
            out.push((type_ref.clone(), type_def));
            for nested in &type_def.nested {
                walk(type_ref.nested(&nested.name), nested, out);
            }
        }

        let mut out = Vec::new();
        for type_def in &self.types {
            walk(self.type_ref(&type_def.namespace, &type_def.name), type_def, &mut out);
        }
        out
    }

    /// Visits every method together with its declaring type reference
    ///
    /// # Errors
    /// Returns the first error produced by `visit`.
    pub fn for_each_method_mut<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&TypeRef, &mut MethodDef) -> Result<()>,
    {
        fn walk<F>(type_ref: &TypeRef, type_def: &mut TypeDef, visit: &mut F) -> Result<()>
        where
            F: FnMut(&TypeRef, &mut MethodDef) -> Result<()>,
        {
            for method in &mut type_def.methods {
                visit(type_ref, method)?;
            }
            for nested in &mut type_def.nested {
                walk(&type_ref.nested(&nested.name), nested, visit)?;
            }
            Ok(())
        }

        let scope = self.name.clone();
        for type_def in &mut self.types {
            let type_ref = TypeRef::new(scope.as_str(), type_def.namespace.as_str(), type_def.name.as_str());
            walk(&type_ref, type_def, &mut visit)?;
        }
        Ok(())
    }
}

impl TypeDef {
    /// Creates an empty type with the given flags
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, flags: TypeAttributes) -> Self {
        TypeDef {
            namespace: namespace.into(),
            name: name.into(),
            flags,
            base: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            method_impls: Vec::new(),
        }
    }

    /// Creates a public class deriving from `object`
    pub fn class(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef::new(namespace, name, TypeAttributes::PUBLIC).with_base(TypeSig::Object)
    }

    /// Creates a public interface
    pub fn interface(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef::new(
            namespace,
            name,
            TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        )
    }

    /// Sets the base type
    #[must_use]
    pub fn with_base(mut self, base: TypeSig) -> Self {
        self.base = Some(base);
        self
    }

    /// Adds an implemented interface
    #[must_use]
    pub fn with_interface(mut self, interface: TypeSig) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Adds a generic parameter
    #[must_use]
    pub fn with_generic_param(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    /// Adds a field
    #[must_use]
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a method
    #[must_use]
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Adds a nested type
    #[must_use]
    pub fn with_nested(mut self, nested: TypeDef) -> Self {
        self.nested.push(nested);
        self
    }

    /// Adds an explicit override of `declaration` by the method named `method`.
    ///
    /// Has no effect if no method of that name exists.
    #[must_use]
    pub fn with_method_impl(mut self, method: &str, declaration: MethodRef) -> Self {
        if let Some(index) = self.methods.iter().position(|m| m.name == method) {
            self.method_impls.push(MethodImpl {
                method: index,
                declaration,
            });
        }
        self
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.is_interface()
    }

    /// Finds a method by name
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Finds a field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl FieldDef {
    /// Creates a field definition
    pub fn new(name: impl Into<String>, flags: FieldAttributes, field_type: TypeSig) -> Self {
        FieldDef {
            name: name.into(),
            flags,
            field_type,
        }
    }
}

impl MethodDef {
    /// Creates a method definition without a body
    pub fn new(name: impl Into<String>, flags: MethodAttributes, sig: MethodSig) -> Self {
        MethodDef {
            name: name.into(),
            flags,
            sig,
            body: None,
        }
    }

    /// Creates a public instance constructor with the given parameters
    #[must_use]
    pub fn constructor(params: Vec<TypeSig>, body: MethodBody) -> Self {
        MethodDef::new(
            ".ctor",
            MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            MethodSig::new_instance(TypeSig::Void, params),
        )
        .with_body(body)
    }

    /// Creates a static constructor
    #[must_use]
    pub fn static_constructor(body: MethodBody) -> Self {
        MethodDef::new(
            ".cctor",
            MethodAttributes::PRIVATE
                | MethodAttributes::STATIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            MethodSig::new_static(TypeSig::Void, Vec::new()),
        )
        .with_body(body)
    }

    /// Attaches a body
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns true for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }
}
