//! Member attribute flags and structural member references.
//!
//! Field and method operands of instructions are [`FieldRef`] and [`MethodRef`] values: the
//! declaring type signature plus the member's name and signature, exactly as a compiler emits a
//! member reference. They name a member across module boundaries and are resolved to a loaded
//! [`crate::metadata::identity::MemberId`] by the [`crate::runtime::Domain`].
//!
//! # Key Types
//! - [`FieldAttributes`], [`MethodAttributes`], [`TypeAttributes`]: Definition flags
//! - [`MemberVisibility`], [`TypeVisibility`]: Access levels extracted from the flags
//! - [`FieldRef`], [`MethodSig`], [`MethodRef`], [`TokenRef`]: Structural references

use std::fmt;

use bitflags::bitflags;

use crate::metadata::typesig::{GenericContext, TypeSig};

/// Bitmask for member access extraction
pub const MEMBER_ACCESS_MASK: u16 = 0x0007;
/// Bitmask for type visibility extraction
pub const TYPE_VISIBILITY_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Field definition flags
    pub struct FieldAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this module
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the module
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the module
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Field can only be written by a constructor
        const INIT_ONLY = 0x0020;
        /// Value is a compile time constant
        const LITERAL = 0x0040;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x0400;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Method definition flags
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this module
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the module
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the module
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Method may not be overridden
        const FINAL = 0x0020;
        /// Method is dispatched through the vtable
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime should check name encoding
        const RT_SPECIAL_NAME = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Type definition flags
    pub struct TypeAttributes: u32 {
        /// Top-level type visible outside its module
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested type with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested type with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested type with family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Nested type with family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
        /// Type name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Static constructor may run lazily
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// Access level of a field or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MemberVisibility {
    CompilerControlled,
    Private,
    FamAndAssem,
    Assembly,
    Family,
    FamOrAssem,
    Public,
}

impl MemberVisibility {
    fn from_bits(bits: u16) -> Self {
        match bits & MEMBER_ACCESS_MASK {
            0x0001 => MemberVisibility::Private,
            0x0002 => MemberVisibility::FamAndAssem,
            0x0003 => MemberVisibility::Assembly,
            0x0004 => MemberVisibility::Family,
            0x0005 => MemberVisibility::FamOrAssem,
            0x0006 => MemberVisibility::Public,
            _ => MemberVisibility::CompilerControlled,
        }
    }
}

/// Visibility of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TypeVisibility {
    NotPublic,
    Public,
    NestedPublic,
    NestedPrivate,
    NestedFamily,
    NestedAssembly,
    NestedFamAndAssem,
    NestedFamOrAssem,
}

impl FieldAttributes {
    /// Extract the access level
    #[must_use]
    pub fn visibility(&self) -> MemberVisibility {
        MemberVisibility::from_bits(self.bits())
    }

    /// Returns true if the field can be written after construction
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.intersects(FieldAttributes::INIT_ONLY | FieldAttributes::LITERAL)
    }
}

impl MethodAttributes {
    /// Extract the access level
    #[must_use]
    pub fn visibility(&self) -> MemberVisibility {
        MemberVisibility::from_bits(self.bits())
    }

    /// Returns true for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.contains(MethodAttributes::VIRTUAL)
    }
}

impl TypeAttributes {
    /// Extract the type visibility
    #[must_use]
    pub fn visibility(&self) -> TypeVisibility {
        match self.bits() & TYPE_VISIBILITY_MASK {
            0x1 => TypeVisibility::Public,
            0x2 => TypeVisibility::NestedPublic,
            0x3 => TypeVisibility::NestedPrivate,
            0x4 => TypeVisibility::NestedFamily,
            0x5 => TypeVisibility::NestedAssembly,
            0x6 => TypeVisibility::NestedFamAndAssem,
            0x7 => TypeVisibility::NestedFamOrAssem,
            _ => TypeVisibility::NotPublic,
        }
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.contains(TypeAttributes::INTERFACE)
    }
}

/// A reference to a field through its declaring type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type, possibly a generic instantiation
    pub declaring_type: TypeSig,
    /// Field name
    pub name: String,
    /// Declared field type, in terms of the generic definition
    pub field_type: TypeSig,
}

impl FieldRef {
    /// Creates a new field reference
    pub fn new(declaring_type: TypeSig, name: impl Into<String>, field_type: TypeSig) -> Self {
        FieldRef {
            declaring_type,
            name: name.into(),
            field_type,
        }
    }

    /// Module that defines the declaring type
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.declaring_type.scope()
    }

    /// The same field referenced through the generic type definition
    #[must_use]
    pub fn definition(&self) -> FieldRef {
        FieldRef {
            declaring_type: open_declaring_type(&self.declaring_type),
            name: self.name.clone(),
            field_type: self.field_type.clone(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}",
            self.field_type, self.declaring_type, self.name
        )
    }
}

/// The signature of a method definition.
///
/// Parameter and return types are expressed in terms of the definition, so generic parameters
/// appear as [`TypeSig::Var`] and [`TypeSig::MVar`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Method takes an implicit `this`
    pub has_this: bool,
    /// Number of method generic parameters
    pub generic_arity: u16,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types, excluding `this`
    pub params: Vec<TypeSig>,
}

impl MethodSig {
    /// Signature of a static method
    #[must_use]
    pub fn new_static(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: false,
            generic_arity: 0,
            return_type,
            params,
        }
    }

    /// Signature of an instance method
    #[must_use]
    pub fn new_instance(return_type: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            generic_arity: 0,
            return_type,
            params,
        }
    }

    /// Sets the number of method generic parameters
    #[must_use]
    pub fn with_generic_arity(mut self, arity: u16) -> Self {
        self.generic_arity = arity;
        self
    }
}

/// A reference to a method through its declaring type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type, possibly a generic instantiation or an array
    pub declaring_type: TypeSig,
    /// Method name
    pub name: String,
    /// Definition signature
    pub sig: MethodSig,
    /// Method instantiation, empty for non-generic references
    pub generic_args: Vec<TypeSig>,
}

impl MethodRef {
    /// Creates a non-generic method reference
    pub fn new(declaring_type: TypeSig, name: impl Into<String>, sig: MethodSig) -> Self {
        MethodRef {
            declaring_type,
            name: name.into(),
            sig,
            generic_args: Vec::new(),
        }
    }

    /// Instantiates a generic method reference
    #[must_use]
    pub fn instantiate(mut self, args: Vec<TypeSig>) -> Self {
        self.generic_args = args;
        self
    }

    /// Module that defines the declaring type, `None` for array intrinsics
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.declaring_type.scope()
    }

    /// Returns true for instance constructors
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Substitution context of this call site
    #[must_use]
    pub fn generic_context(&self) -> GenericContext {
        GenericContext::new(
            self.declaring_type.generic_args().to_vec(),
            self.generic_args.clone(),
        )
    }

    /// The same method referenced through its generic definition
    #[must_use]
    pub fn definition(&self) -> MethodRef {
        MethodRef {
            declaring_type: open_declaring_type(&self.declaring_type),
            name: self.name.clone(),
            sig: self.sig.clone(),
            generic_args: Vec::new(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}",
            self.sig.return_type, self.declaring_type, self.name
        )?;
        if !self.generic_args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.generic_args.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}", arg)?;
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (i, param) in self.sig.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")
    }
}

/// Operand of `ldtoken`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenRef {
    /// A field handle
    Field(FieldRef),
    /// A method handle
    Method(MethodRef),
    /// A type handle
    Type(TypeSig),
}

fn open_declaring_type(declaring_type: &TypeSig) -> TypeSig {
    match declaring_type {
        TypeSig::GenericInst(type_ref, _) => TypeSig::Type(type_ref.clone()),
        other => other.clone(),
    }
}
