//! Type references and structural type signatures.
//!
//! Member references inside instruction operands describe types structurally rather than through
//! loader handles: a [`TypeRef`] names a type by defining module (its *scope*), namespace and name,
//! and a [`TypeSig`] composes those into the full signature grammar used by fields, parameters and
//! locals (primitives, generic instantiations, generic parameters, arrays, by-refs and pointers).
//!
//! Generic parameters are positional. [`GenericContext`] maps positions to concrete types and is
//! applied recursively through compound signatures, which is how temporaries for instantiated
//! call sites get their concrete types.
//!
//! # Key Components
//!
//! - [`TypeRef`] - Scope, namespace and name of a type definition
//! - [`TypeSig`] - A full type signature
//! - [`GenericContext`] - Positional substitution of type and method generic parameters

use std::fmt;

/// Name of the core library scope that owns the primitive and runtime-handle types.
pub const CORE_LIBRARY: &str = "System.Runtime";

/// Separator between enclosing and nested type names.
pub const NESTED_SEPARATOR: char = '/';

/// A structural reference to a type definition.
///
/// Nested types carry their enclosing type names in [`TypeRef::name`], joined with `/`
/// (for example `Outer/Inner`), and share the namespace of the outermost type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef {
    /// Name of the module that defines the type
    pub scope: String,
    /// Namespace of the (outermost) type, empty for the global namespace
    pub namespace: String,
    /// Type name, `/`-joined for nested types
    pub name: String,
}

impl TypeRef {
    /// Creates a new type reference
    pub fn new(scope: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef {
            scope: scope.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a reference to a type of the core library
    pub fn core(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef::new(CORE_LIBRARY, namespace, name)
    }

    /// Returns a reference to a type nested in this one
    #[must_use]
    pub fn nested(&self, name: &str) -> TypeRef {
        TypeRef {
            scope: self.scope.clone(),
            namespace: self.namespace.clone(),
            name: format!("{}{}{}", self.name, NESTED_SEPARATOR, name),
        }
    }

    /// The namespace-qualified name, without the scope
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The innermost simple name
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.name
            .rsplit(NESTED_SEPARATOR)
            .next()
            .unwrap_or(&self.name)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// A type signature as it appears in field, parameter, return and local declarations.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    I,
    U,
    String,
    Object,
    TypedByRef,
    /// A class, interface or value type
    Type(TypeRef),
    /// A generic type instantiated with the given arguments
    GenericInst(TypeRef, Vec<TypeSig>),
    /// Generic parameter of the enclosing type, by position
    Var(u16),
    /// Generic parameter of the enclosing method, by position
    MVar(u16),
    /// Single-dimension zero-based array
    SzArray(Box<TypeSig>),
    /// Managed reference
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
}

impl TypeSig {
    /// Shorthand for `TypeSig::Type`
    #[must_use]
    pub fn of(type_ref: TypeRef) -> TypeSig {
        TypeSig::Type(type_ref)
    }

    /// Wraps this signature in a single-dimension array
    #[must_use]
    pub fn array(self) -> TypeSig {
        TypeSig::SzArray(Box::new(self))
    }

    /// Wraps this signature in a managed reference
    #[must_use]
    pub fn by_ref(self) -> TypeSig {
        TypeSig::ByRef(Box::new(self))
    }

    /// Returns true if a generic parameter appears anywhere in this signature
    #[must_use]
    pub fn contains_generic_parameter(&self) -> bool {
        match self {
            TypeSig::Var(_) | TypeSig::MVar(_) => true,
            TypeSig::GenericInst(_, args) => args.iter().any(TypeSig::contains_generic_parameter),
            TypeSig::SzArray(inner) | TypeSig::ByRef(inner) | TypeSig::Ptr(inner) => {
                inner.contains_generic_parameter()
            }
            _ => false,
        }
    }

    /// Returns true for a bare generic parameter
    #[must_use]
    pub fn is_generic_parameter(&self) -> bool {
        matches!(self, TypeSig::Var(_) | TypeSig::MVar(_))
    }

    /// The type definition this signature names, for class and instantiated signatures
    #[must_use]
    pub fn type_ref(&self) -> Option<&TypeRef> {
        match self {
            TypeSig::Type(type_ref) | TypeSig::GenericInst(type_ref, _) => Some(type_ref),
            _ => None,
        }
    }

    /// Module that defines the type this signature names.
    ///
    /// Built-in types such as `object`, `string` and the primitives belong to the core library.
    /// Arrays, by-refs, pointers and generic parameters name no definition and return `None`.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        match self {
            TypeSig::Type(type_ref) | TypeSig::GenericInst(type_ref, _) => Some(type_ref.scope.as_str()),
            TypeSig::Var(_) | TypeSig::MVar(_) | TypeSig::SzArray(_) | TypeSig::ByRef(_) | TypeSig::Ptr(_) => None,
            _ => Some(CORE_LIBRARY),
        }
    }

    /// Generic arguments of an instantiated signature, empty otherwise
    #[must_use]
    pub fn generic_args(&self) -> &[TypeSig] {
        match self {
            TypeSig::GenericInst(_, args) => args,
            _ => &[],
        }
    }

    /// Folds an open instantiation to its generic type definition.
    ///
    /// `List<!0>` becomes `List`, while closed instantiations such as `List<int32>` and all
    /// non-generic signatures are returned unchanged.
    #[must_use]
    pub fn generic_definition(&self) -> TypeSig {
        match self {
            TypeSig::GenericInst(type_ref, _) if self.contains_generic_parameter() => {
                TypeSig::Type(type_ref.clone())
            }
            _ => self.clone(),
        }
    }

    /// Namespace and simple name used for structural hashing
    #[must_use]
    pub fn namespace_and_name(&self) -> (String, String) {
        let primitive = |name: &str| ("System".to_string(), name.to_string());
        match self {
            TypeSig::Void => primitive("Void"),
            TypeSig::Boolean => primitive("Boolean"),
            TypeSig::Char => primitive("Char"),
            TypeSig::I1 => primitive("SByte"),
            TypeSig::U1 => primitive("Byte"),
            TypeSig::I2 => primitive("Int16"),
            TypeSig::U2 => primitive("UInt16"),
            TypeSig::I4 => primitive("Int32"),
            TypeSig::U4 => primitive("UInt32"),
            TypeSig::I8 => primitive("Int64"),
            TypeSig::U8 => primitive("UInt64"),
            TypeSig::R4 => primitive("Single"),
            TypeSig::R8 => primitive("Double"),
            TypeSig::I => primitive("IntPtr"),
            TypeSig::U => primitive("UIntPtr"),
            TypeSig::String => primitive("String"),
            TypeSig::Object => primitive("Object"),
            TypeSig::TypedByRef => primitive("TypedReference"),
            TypeSig::Type(type_ref) | TypeSig::GenericInst(type_ref, _) => {
                (type_ref.namespace.clone(), type_ref.simple_name().to_string())
            }
            TypeSig::Var(index) => (String::new(), format!("!{}", index)),
            TypeSig::MVar(index) => (String::new(), format!("!!{}", index)),
            TypeSig::SzArray(inner) => {
                let (namespace, name) = inner.namespace_and_name();
                (namespace, format!("{}[]", name))
            }
            TypeSig::ByRef(inner) => {
                let (namespace, name) = inner.namespace_and_name();
                (namespace, format!("{}&", name))
            }
            TypeSig::Ptr(inner) => {
                let (namespace, name) = inner.namespace_and_name();
                (namespace, format!("{}*", name))
            }
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => f.write_str("void"),
            TypeSig::Boolean => f.write_str("bool"),
            TypeSig::Char => f.write_str("char"),
            TypeSig::I1 => f.write_str("int8"),
            TypeSig::U1 => f.write_str("uint8"),
            TypeSig::I2 => f.write_str("int16"),
            TypeSig::U2 => f.write_str("uint16"),
            TypeSig::I4 => f.write_str("int32"),
            TypeSig::U4 => f.write_str("uint32"),
            TypeSig::I8 => f.write_str("int64"),
            TypeSig::U8 => f.write_str("uint64"),
            TypeSig::R4 => f.write_str("float32"),
            TypeSig::R8 => f.write_str("float64"),
            TypeSig::I => f.write_str("native int"),
            TypeSig::U => f.write_str("native uint"),
            TypeSig::String => f.write_str("string"),
            TypeSig::Object => f.write_str("object"),
            TypeSig::TypedByRef => f.write_str("typedref"),
            TypeSig::Type(type_ref) => write!(f, "{}", type_ref),
            TypeSig::GenericInst(type_ref, args) => {
                write!(f, "{}<", type_ref)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(">")
            }
            TypeSig::Var(index) => write!(f, "!{}", index),
            TypeSig::MVar(index) => write!(f, "!!{}", index),
            TypeSig::SzArray(inner) => write!(f, "{}[]", inner),
            TypeSig::ByRef(inner) => write!(f, "{}&", inner),
            TypeSig::Ptr(inner) => write!(f, "{}*", inner),
        }
    }
}

/// Positional substitution for generic parameters.
///
/// `type_args[i]` replaces `!i` and `method_args[i]` replaces `!!i`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericContext {
    /// Arguments for the generic parameters of the declaring type
    pub type_args: Vec<TypeSig>,
    /// Arguments for the generic parameters of the method
    pub method_args: Vec<TypeSig>,
}

impl GenericContext {
    /// Creates a context from type and method arguments
    #[must_use]
    pub fn new(type_args: Vec<TypeSig>, method_args: Vec<TypeSig>) -> Self {
        GenericContext {
            type_args,
            method_args,
        }
    }

    /// Returns true if this context substitutes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.type_args.is_empty() && self.method_args.is_empty()
    }

    /// Replaces every generic parameter in `sig`.
    ///
    /// Returns `None` if `sig` names a parameter position this context has no argument for.
    #[must_use]
    pub fn substitute(&self, sig: &TypeSig) -> Option<TypeSig> {
        if !sig.contains_generic_parameter() {
            return Some(sig.clone());
        }

        match sig {
            TypeSig::Var(index) => self.type_args.get(usize::from(*index)).cloned(),
            TypeSig::MVar(index) => self.method_args.get(usize::from(*index)).cloned(),
            TypeSig::SzArray(inner) => Some(TypeSig::SzArray(Box::new(self.substitute(inner)?))),
            TypeSig::ByRef(inner) => Some(TypeSig::ByRef(Box::new(self.substitute(inner)?))),
            TypeSig::Ptr(inner) => Some(TypeSig::Ptr(Box::new(self.substitute(inner)?))),
            TypeSig::GenericInst(type_ref, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.substitute(arg))
                    .collect::<Option<Vec<_>>>()?;
                Some(TypeSig::GenericInst(type_ref.clone(), args))
            }
            _ => Some(sig.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> TypeRef {
        TypeRef::core("System.Collections.Generic", "List`1")
    }

    #[test]
    fn test_nested_names() {
        let outer = TypeRef::new("Shared", "Shared", "Outer");
        let inner = outer.nested("Inner");
        assert_eq!(inner.name, "Outer/Inner");
        assert_eq!(inner.full_name(), "Shared.Outer/Inner");
        assert_eq!(inner.simple_name(), "Inner");
    }

    #[test]
    fn test_substitute_recursive() {
        let ctx = GenericContext::new(vec![TypeSig::I4], vec![TypeSig::String]);
        let sig = TypeSig::GenericInst(list(), vec![TypeSig::Var(0).array()]).by_ref();
        let resolved = ctx.substitute(&sig).unwrap();
        assert_eq!(
            resolved,
            TypeSig::GenericInst(list(), vec![TypeSig::I4.array()]).by_ref()
        );
        assert_eq!(ctx.substitute(&TypeSig::MVar(0)), Some(TypeSig::String));
    }

    #[test]
    fn test_substitute_missing_argument() {
        let ctx = GenericContext::default();
        assert_eq!(ctx.substitute(&TypeSig::Var(1)), None);
        assert_eq!(ctx.substitute(&TypeSig::Object), Some(TypeSig::Object));
    }

    #[test]
    fn test_generic_definition() {
        let open = TypeSig::GenericInst(list(), vec![TypeSig::Var(0)]);
        assert_eq!(open.generic_definition(), TypeSig::Type(list()));
        let closed = TypeSig::GenericInst(list(), vec![TypeSig::I4]);
        assert_eq!(closed.generic_definition(), closed);
    }

    #[test]
    fn test_display() {
        let sig = TypeSig::GenericInst(list(), vec![TypeSig::I4, TypeSig::MVar(0)]).array();
        assert_eq!(
            sig.to_string(),
            "System.Collections.Generic.List`1<int32,!!0>[]"
        );
        assert_eq!(
            TypeSig::String.namespace_and_name(),
            ("System".to_string(), "String".to_string())
        );
    }
}
