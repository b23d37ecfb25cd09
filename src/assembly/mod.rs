//! CIL instructions and method-body assembly.
//!
//! This module holds the instruction-level representation instrumentation edits: the opcode
//! table, resolved operands, layout (offsets and macro forms), a label-based assembler for
//! building bodies, and basic-block analysis for checking that rewriting preserved control flow.
//!
//! # Key Components
//!
//! - [`OpCode`] - The full CIL opcode set with operand types and flow classification
//! - [`Instruction`] / [`Operand`] - Editable instructions with stable [`InstrId`] identities
//! - [`InstructionAssembler`] - Builds a [`crate::metadata::method::MethodBody`] from labels
//! - [`compute_offsets`], [`expand_macro`], [`optimize_macros`] - Encoding-size management
//! - [`ControlFlowGraph`] - Basic blocks and edges of a body

mod block;
mod builder;
mod instruction;
mod layout;
mod opcodes;

pub use block::{BasicBlock, ControlFlowGraph, EdgeKind};
pub use builder::InstructionAssembler;
pub use instruction::{InstrId, Instruction, Operand, NEW_INSTRUCTION_OFFSET};
pub use layout::{compute_offsets, expand_macro, optimize_macros};
pub use opcodes::{FlowType, OpCode, OperandType};
