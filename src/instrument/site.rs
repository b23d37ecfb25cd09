//! Classification of instructions into guarded access sites.
//!
//! An [`AccessSite`] is the common currency of both front-ends: the bytecode patcher builds one
//! from an instruction and its prefixes, the expression visitor builds one from a node, and both
//! hand it to the same guard emission and runtime decision.

use crate::{
    assembly::{Instruction, OpCode, Operand},
    instrument::references::RUNTIME_SCOPE,
    metadata::{
        members::{FieldRef, MethodRef},
        typesig::TypeSig,
    },
};

/// The kind of access a guard flag caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// Field load
    Read,
    /// Field store
    Write,
    /// Field address, which permits both
    ReadWrite,
    /// Call, construction or function-pointer load
    Call,
}

/// A cross-module operation that needs a guard.
#[derive(Clone, Debug, PartialEq)]
pub enum AccessSite {
    /// `ldfld`, `ldsfld`, `stfld`, `stsfld`, `ldflda`, `ldsflda`
    Field {
        /// Accessed field
        field: FieldRef,
        /// Read, write, or both for address loads
        kind: GuardKind,
    },
    /// `call`, `jmp`, `newobj`, and `callvirt` on a method without `this`
    Call {
        /// Called method
        method: MethodRef,
    },
    /// `callvirt` on an instance method, optionally with a `constrained.` prefix
    VirtualCall {
        /// Statically declared target
        method: MethodRef,
        /// Constraining type of the `constrained.` prefix
        constrained: Option<TypeSig>,
    },
    /// `ldftn`, a bound function pointer
    StaticDelegate {
        /// Target method
        method: MethodRef,
    },
    /// `ldvirtftn`, a function pointer resolved against the receiver on the stack
    VirtualDelegate {
        /// Statically declared target
        method: MethodRef,
    },
}

impl AccessSite {
    /// Classifies an instruction, `None` if it does not reference a member
    #[must_use]
    pub fn classify(instruction: &Instruction, prefixes: &[Instruction]) -> Option<AccessSite> {
        match (&instruction.opcode, &instruction.operand) {
            (OpCode::Ldfld | OpCode::Ldsfld, Operand::Field(field)) => Some(AccessSite::Field {
                field: field.clone(),
                kind: GuardKind::Read,
            }),
            (OpCode::Stfld | OpCode::Stsfld, Operand::Field(field)) => Some(AccessSite::Field {
                field: field.clone(),
                kind: GuardKind::Write,
            }),
            (OpCode::Ldflda | OpCode::Ldsflda, Operand::Field(field)) => Some(AccessSite::Field {
                field: field.clone(),
                kind: GuardKind::ReadWrite,
            }),
            (OpCode::Callvirt, Operand::Method(method)) if method.sig.has_this => {
                let constrained = prefixes.iter().find_map(|prefix| match (&prefix.opcode, &prefix.operand) {
                    (OpCode::Constrained, Operand::Type(sig)) => Some(sig.clone()),
                    _ => None,
                });
                Some(AccessSite::VirtualCall {
                    method: method.clone(),
                    constrained,
                })
            }
            (OpCode::Call | OpCode::Callvirt | OpCode::Newobj | OpCode::Jmp, Operand::Method(method)) => {
                Some(AccessSite::Call {
                    method: method.clone(),
                })
            }
            (OpCode::Ldftn, Operand::Method(method)) => Some(AccessSite::StaticDelegate {
                method: method.clone(),
            }),
            (OpCode::Ldvirtftn, Operand::Method(method)) => Some(AccessSite::VirtualDelegate {
                method: method.clone(),
            }),
            _ => None,
        }
    }

    /// Module that declares the target, `None` for array intrinsics
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        match self {
            AccessSite::Field { field, .. } => field.scope(),
            AccessSite::Call { method }
            | AccessSite::VirtualCall { method, .. }
            | AccessSite::StaticDelegate { method }
            | AccessSite::VirtualDelegate { method } => method.scope(),
        }
    }

    /// Returns true if the site needs no guard when it appears in module `caller`.
    ///
    /// Members of the caller itself, array intrinsics and the runtime guard surface are exempt.
    #[must_use]
    pub fn is_exempt(&self, caller: &str) -> bool {
        match self.scope() {
            None => true,
            Some(scope) => scope == caller || scope == RUNTIME_SCOPE,
        }
    }

    /// The method target, for every site except field accesses
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        match self {
            AccessSite::Field { .. } => None,
            AccessSite::Call { method }
            | AccessSite::VirtualCall { method, .. }
            | AccessSite::StaticDelegate { method }
            | AccessSite::VirtualDelegate { method } => Some(method),
        }
    }

    /// Returns true if dispatch depends on the runtime type of a receiver
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            AccessSite::VirtualCall { .. } | AccessSite::VirtualDelegate { .. }
        )
    }
}
