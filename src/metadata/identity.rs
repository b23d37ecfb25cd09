//! Identities of loaded modules, types and members.
//!
//! Two flavors of member identity exist side by side:
//!
//! - [`MemberId`] is exact: the loaded module plus the definition token. It is what policies
//!   store and what guard checks compare against. Every reference to a member, through any
//!   generic instantiation and from any module, resolves to the same `MemberId`.
//! - [`SignatureHash`] is structural: declaring namespace and name, member name and parameter
//!   shape. It matches a method across independently compiled representations and is what the
//!   shim table is keyed on.
//!
//! All identities are small `Copy` values, never mutated and never persisted.

use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
};

use crate::metadata::{members::MethodRef, token::Token, typesig::TypeSig};

/// Identity of a module loaded into a [`crate::runtime::Domain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// Identity of a load context.
///
/// Modules sharing a load context form one trust domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadContextId(pub u32);

impl LoadContextId {
    /// The context trusted host modules are loaded into
    pub const DEFAULT: LoadContextId = LoadContextId(0);
}

/// Exact identity of a loaded field or method definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId {
    /// Module defining the member
    pub module: ModuleId,
    /// Definition token within that module
    pub token: Token,
}

impl MemberId {
    /// Creates a new member identity
    #[must_use]
    pub fn new(module: ModuleId, token: Token) -> Self {
        MemberId { module, token }
    }

    /// Returns true if this identity names a field
    #[must_use]
    pub fn is_field(&self) -> bool {
        self.token.table() == Token::FIELD
    }

    /// Returns true if this identity names a method
    #[must_use]
    pub fn is_method(&self) -> bool {
        self.token.table() == Token::METHODDEF
    }
}

/// Identity of a loaded type definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeHandle {
    /// Module defining the type
    pub module: ModuleId,
    /// Definition token within that module
    pub token: Token,
}

impl TypeHandle {
    /// Creates a new type handle
    #[must_use]
    pub fn new(module: ModuleId, token: Token) -> Self {
        TypeHandle { module, token }
    }
}

/// Structural hash of a method, stable across modules that reference it.
///
/// Built from the declaring namespace and simple type name, the method name and the namespace
/// and name of every parameter type. Bare generic parameters are skipped, so open and
/// instantiated references to the same generic method agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignatureHash(u64);

impl SignatureHash {
    /// Hash of a method given its declaring type name and parameter types
    #[must_use]
    pub fn of_method(
        declaring_namespace: &str,
        declaring_name: &str,
        name: &str,
        params: &[TypeSig],
    ) -> Self {
        let mut hasher = SignatureHasher::new()
            .add_fullname(declaring_namespace, declaring_name)
            .add_component(name);

        for param in params.iter().filter(|p| !p.is_generic_parameter()) {
            let (namespace, name) = param.namespace_and_name();
            hasher = hasher.add_fullname(&namespace, &name);
        }

        SignatureHash(hasher.finalize())
    }

    /// Hash of a method reference
    #[must_use]
    pub fn of_method_ref(method: &MethodRef) -> Self {
        let (namespace, name) = method.declaring_type.namespace_and_name();
        Self::of_method(&namespace, &name, &method.name, &method.sig.params)
    }

    /// The raw hash value
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Order-preserving hash builder using FNV-1a style mixing.
struct SignatureHasher {
    state: u64,
}

impl SignatureHasher {
    fn new() -> Self {
        SignatureHasher {
            state: 0xcbf2_9ce4_8422_2325_u64,
        }
    }

    fn mix(&mut self, value: u64) {
        self.state ^= value;
        self.state = self.state.wrapping_mul(0x0100_0000_01b3_u64);

        self.state ^= self.state >> 33;
        self.state = self.state.wrapping_mul(0xff51_afd7_ed55_8ccd_u64);
        self.state ^= self.state >> 33;
    }

    fn add_component<T: Hash + ?Sized>(mut self, component: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        component.hash(&mut hasher);
        self.mix(hasher.finish());
        self
    }

    fn add_fullname(self, namespace: &str, name: &str) -> Self {
        self.add_component(namespace).add_component(name)
    }

    fn finalize(self) -> u64 {
        self.state
    }
}
