//! Editable instructions.
//!
//! An [`Instruction`] is an opcode, its resolved [`Operand`] and two positions: a stable
//! [`InstrId`] and the byte `offset` it had when offsets were last computed. Branch operands and
//! exception-region boundaries refer to ids, so instructions can be inserted without touching
//! every branch, while the rewriter keys its old-to-new mapping on offsets.
//!
//! Instructions created during rewriting carry [`NEW_INSTRUCTION_OFFSET`] until offsets are
//! recomputed, which marks them as outside the original offset space.

use std::fmt;

use crate::{
    assembly::opcodes::{OpCode, OperandType},
    metadata::{
        members::{FieldRef, MethodRef, MethodSig, TokenRef},
        typesig::TypeSig,
    },
    Error::InvalidOperand,
    Result,
};

/// Offset sentinel of instructions inserted by the rewriter.
pub const NEW_INSTRUCTION_OFFSET: u32 = u32::MAX;

/// Stable identity of an instruction within one method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL#{}", self.0)
    }
}

/// A resolved instruction operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Integer immediate, also used for `ldc.i4.s`, `unaligned.` and `no.`
    Int32(i32),
    /// 64-bit integer immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// Branch target
    Target(InstrId),
    /// Jump table
    Switch(Vec<InstrId>),
    /// Local variable slot
    Local(u16),
    /// Argument slot, including `this` at 0 for instance methods
    Arg(u16),
    /// Field reference
    Field(FieldRef),
    /// Method reference
    Method(MethodRef),
    /// Type reference
    Type(TypeSig),
    /// Handle for `ldtoken`
    Token(TokenRef),
    /// String literal
    String(String),
    /// Call-site signature for `calli`
    Signature(MethodSig),
}

impl Operand {
    /// Returns true if this operand is valid for the given operand type
    #[must_use]
    pub fn matches(&self, operand_type: OperandType) -> bool {
        matches!(
            (operand_type, self),
            (OperandType::None, Operand::None)
                | (OperandType::ShortInt | OperandType::Int32, Operand::Int32(_))
                | (OperandType::Int64, Operand::Int64(_))
                | (OperandType::Float32, Operand::Float32(_))
                | (OperandType::Float64, Operand::Float64(_))
                | (
                    OperandType::BranchTarget | OperandType::ShortBranchTarget,
                    Operand::Target(_)
                )
                | (OperandType::Switch, Operand::Switch(_))
                | (
                    OperandType::Variable | OperandType::ShortVariable,
                    Operand::Local(_) | Operand::Arg(_)
                )
                | (OperandType::Field, Operand::Field(_))
                | (OperandType::Method, Operand::Method(_))
                | (OperandType::Type, Operand::Type(_))
                | (OperandType::Token, Operand::Token(_))
                | (OperandType::String, Operand::String(_))
                | (OperandType::Signature, Operand::Signature(_))
        )
    }
}

/// A single CIL instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Stable identity within the method body
    pub id: InstrId,
    /// Byte offset, or [`NEW_INSTRUCTION_OFFSET`] for inserted instructions
    pub offset: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction, validating that the operand fits the opcode
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperand`] if the operand kind does not match the opcode.
    pub fn new(id: InstrId, opcode: OpCode, operand: Operand) -> Result<Self> {
        if !operand.matches(opcode.operand_type()) {
            return Err(InvalidOperand(format!("{} cannot take {:?}", opcode, operand)));
        }

        Ok(Instruction {
            id,
            offset: NEW_INSTRUCTION_OFFSET,
            opcode,
            operand,
        })
    }

    /// Encoded size in bytes, including the operand
    #[must_use]
    pub fn size(&self) -> u32 {
        let operand = match (&self.operand, self.opcode.operand_type().size()) {
            (Operand::Switch(targets), _) => 4 + 4 * targets.len() as u32,
            (_, Some(size)) => size,
            (_, None) => 4,
        };
        self.opcode.opcode_size() + operand
    }

    /// Returns true if this instruction was inserted and has no original offset
    #[must_use]
    pub fn is_inserted(&self) -> bool {
        self.offset == NEW_INSTRUCTION_OFFSET
    }

    /// Returns true for prefixes
    #[must_use]
    pub fn is_prefix(&self) -> bool {
        self.opcode.is_prefix()
    }

    /// Returns true for single-target branches
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    /// All branch and switch targets of this instruction
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// The field operand, if any
    #[must_use]
    pub fn field(&self) -> Option<&FieldRef> {
        match &self.operand {
            Operand::Field(field) => Some(field),
            _ => None,
        }
    }

    /// The method operand, if any
    #[must_use]
    pub fn method(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// The type operand, if any
    #[must_use]
    pub fn type_sig(&self) -> Option<&TypeSig> {
        match &self.operand {
            Operand::Type(sig) => Some(sig),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inserted() {
            write!(f, "IL_????: {}", self.opcode)?;
        } else {
            write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        }

        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(value) => write!(f, " {}", value),
            Operand::Int64(value) => write!(f, " {}", value),
            Operand::Float32(value) => write!(f, " {}", value),
            Operand::Float64(value) => write!(f, " {}", value),
            Operand::Target(target) => write!(f, " {}", target),
            Operand::Switch(targets) => {
                let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
                write!(f, " ({})", names.join(", "))
            }
            Operand::Local(index) => write!(f, " V_{}", index),
            Operand::Arg(index) => write!(f, " A_{}", index),
            Operand::Field(field) => write!(f, " {}", field),
            Operand::Method(method) => write!(f, " {}", method),
            Operand::Type(sig) => write!(f, " {}", sig),
            Operand::Token(TokenRef::Field(field)) => write!(f, " {}", field),
            Operand::Token(TokenRef::Method(method)) => write!(f, " {}", method),
            Operand::Token(TokenRef::Type(sig)) => write!(f, " {}", sig),
            Operand::String(value) => write!(f, " \"{}\"", value),
            Operand::Signature(sig) => write!(f, " {:?}", sig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_validation() {
        assert!(Instruction::new(InstrId(0), OpCode::Ldc_I4, Operand::Int32(5)).is_ok());
        assert!(Instruction::new(InstrId(0), OpCode::Ldc_I4, Operand::None).is_err());
        assert!(Instruction::new(InstrId(0), OpCode::Br_S, Operand::Target(InstrId(3))).is_ok());
        assert!(Instruction::new(InstrId(0), OpCode::Ldloc, Operand::Local(2)).is_ok());
        assert!(Instruction::new(InstrId(0), OpCode::Ldfld, Operand::String("x".into())).is_err());
    }

    #[test]
    fn test_sizes() {
        let nop = Instruction::new(InstrId(0), OpCode::Nop, Operand::None).unwrap();
        assert_eq!(nop.size(), 1);
        let ldloc = Instruction::new(InstrId(1), OpCode::Ldloc, Operand::Local(7)).unwrap();
        assert_eq!(ldloc.size(), 4);
        let switch = Instruction::new(
            InstrId(2),
            OpCode::Switch,
            Operand::Switch(vec![InstrId(0), InstrId(1)]),
        )
        .unwrap();
        assert_eq!(switch.size(), 1 + 4 + 8);
        assert_eq!(switch.targets(), vec![InstrId(0), InstrId(1)]);
        assert!(switch.is_inserted());
    }
}
