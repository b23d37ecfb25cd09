//! Guard flags: cached per-module access decisions.
//!
//! Each instrumented module gets one companion type, `Cas.Guard.<CasGuard>`, holding a static
//! `bool` per distinct guarded member and access kind. Its static constructor asks the runtime
//! once whether the access is unconditionally allowed and stores the answer; guarded sites read
//! the flag and only fall through to the full assertion when it is false.
//!
//! Members are folded to their generic definition before deduplication, since the decision is
//! made on the open declaration and not on each instantiation.

use std::collections::HashMap;

use crate::{
    assembly::{InstructionAssembler, OpCode, Operand},
    instrument::{references::RuntimeReferences, site::GuardKind},
    metadata::{
        members::{FieldAttributes, FieldRef, MethodRef, TokenRef, TypeAttributes},
        module::{FieldDef, MethodDef, TypeDef},
        typesig::{TypeRef, TypeSig},
    },
    Result,
};

/// Namespace of the synthesized guard type
pub const GUARD_NAMESPACE: &str = "Cas.Guard";

/// Name of the synthesized guard type
pub const GUARD_TYPE_NAME: &str = "<CasGuard>";

/// A member a guard flag is computed for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GuardedMember {
    /// A field, folded to its definition
    Field(FieldRef),
    /// A method, folded to its definition
    Method(MethodRef),
}

impl GuardedMember {
    fn name(&self) -> &str {
        match self {
            GuardedMember::Field(field) => &field.name,
            GuardedMember::Method(method) => &method.name,
        }
    }

    fn declaring_type(&self) -> &TypeSig {
        match self {
            GuardedMember::Field(field) => &field.declaring_type,
            GuardedMember::Method(method) => &method.declaring_type,
        }
    }

    fn token(&self) -> TokenRef {
        match self {
            GuardedMember::Field(field) => TokenRef::Field(field.clone()),
            GuardedMember::Method(method) => TokenRef::Method(method.clone()),
        }
    }
}

/// Deduplication key of a guard flag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GuardKey {
    /// Access kind
    pub kind: GuardKind,
    /// Folded member
    pub member: GuardedMember,
}

/// Builds the guard type of one module.
pub struct GuardWriter<'r> {
    guard_type: TypeRef,
    references: &'r RuntimeReferences,
    fields: Vec<FieldDef>,
    keys: HashMap<GuardKey, usize>,
    initializer: InstructionAssembler,
}

impl<'r> GuardWriter<'r> {
    /// Creates a writer for the module named `scope`
    #[must_use]
    pub fn new(scope: &str, references: &'r RuntimeReferences) -> Self {
        let mut initializer = InstructionAssembler::new();
        initializer.set_max_stack(3);
        GuardWriter {
            guard_type: guard_type_ref(scope),
            references,
            fields: Vec::new(),
            keys: HashMap::new(),
            initializer,
        }
    }

    /// Returns the flag for a field access, allocating it on first use
    ///
    /// # Errors
    /// Returns an error if the initializer instructions cannot be built.
    pub fn field_flag(&mut self, kind: GuardKind, field: &FieldRef) -> Result<FieldRef> {
        self.flag(kind, GuardedMember::Field(field.definition()))
    }

    /// Returns the flag for a call, allocating it on first use
    ///
    /// # Errors
    /// Returns an error if the initializer instructions cannot be built.
    pub fn call_flag(&mut self, method: &MethodRef) -> Result<FieldRef> {
        self.flag(GuardKind::Call, GuardedMember::Method(method.definition()))
    }

    /// Number of flags allocated so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no flag was allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn flag(&mut self, kind: GuardKind, member: GuardedMember) -> Result<FieldRef> {
        let key = GuardKey { kind, member };
        if let Some(index) = self.keys.get(&key) {
            return Ok(self.field_ref(*index));
        }

        let index = self.fields.len();
        let name = format!(".{}.{}", key.member.name(), index);
        log::trace!("allocating guard flag {} for {:?}", name, key.kind);
        self.fields.push(FieldDef::new(
            name,
            FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
            TypeSig::Boolean,
        ));

        let decisions: &[&MethodRef] = match kind {
            GuardKind::Read => &[&self.references.can_read_field],
            GuardKind::Write => &[&self.references.can_write_field],
            GuardKind::ReadWrite => &[&self.references.can_read_field, &self.references.can_write_field],
            GuardKind::Call => &[&self.references.can_call_always],
        };
        for (i, decision) in decisions.iter().enumerate() {
            self.initializer
                .emit(OpCode::Ldtoken, Operand::Token(key.member.token()))?;
            self.initializer.emit(
                OpCode::Ldtoken,
                Operand::Token(TokenRef::Type(key.member.declaring_type().clone())),
            )?;
            self.initializer
                .emit(OpCode::Call, Operand::Method((*decision).clone()))?;
            if i > 0 {
                self.initializer.emit(OpCode::And, Operand::None)?;
            }
        }
        let flag = self.field_ref(index);
        self.initializer.emit(OpCode::Stsfld, Operand::Field(flag.clone()))?;

        self.keys.insert(key, index);
        Ok(flag)
    }

    fn field_ref(&self, index: usize) -> FieldRef {
        FieldRef::new(
            TypeSig::of(self.guard_type.clone()),
            self.fields[index].name.clone(),
            TypeSig::Boolean,
        )
    }

    /// Produces the guard type, or `None` if no flag was requested
    ///
    /// # Errors
    /// Returns an error if the static constructor cannot be assembled.
    pub fn finish(mut self) -> Result<Option<TypeDef>> {
        if self.fields.is_empty() {
            return Ok(None);
        }

        self.initializer.emit(OpCode::Ret, Operand::None)?;
        let initializer = self.initializer.finalize()?;

        let mut guard = TypeDef::new(
            GUARD_NAMESPACE,
            GUARD_TYPE_NAME,
            TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
        )
        .with_base(TypeSig::Object)
        .with_method(MethodDef::static_constructor(initializer));
        guard.fields = self.fields;
        Ok(Some(guard))
    }
}

/// Reference to the guard type of the module named `scope`
#[must_use]
pub fn guard_type_ref(scope: &str) -> TypeRef {
    TypeRef::new(scope, GUARD_NAMESPACE, GUARD_TYPE_NAME)
}

/// Returns true if `field` is a guard flag of any module
#[must_use]
pub fn is_guard_field(field: &FieldRef) -> bool {
    field
        .declaring_type
        .type_ref()
        .is_some_and(|t| t.namespace == GUARD_NAMESPACE && t.name == GUARD_TYPE_NAME)
}
