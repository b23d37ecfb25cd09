//! Label-based construction of method bodies.
//!
//! [`InstructionAssembler`] appends instructions in order and lets branches and exception regions
//! name labels that are defined later. Labels are resolved when the body is finalized, in the
//! same way the encoder resolves label fixups for raw bytecode.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotcas::assembly::{InstructionAssembler, OpCode, Operand};
//!
//! let mut asm = InstructionAssembler::new();
//! asm.emit(OpCode::Ldarg_0, Operand::None)?;
//! asm.emit_branch(OpCode::Brtrue, "done")?;
//! asm.emit(OpCode::Ldc_I4, Operand::Int32(1))?;
//! asm.emit(OpCode::Pop, Operand::None)?;
//! asm.define_label("done")?;
//! asm.emit(OpCode::Ret, Operand::None)?;
//!
//! let body = asm.finalize()?;
//! # Ok::<(), dotcas::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, Instruction, OpCode, Operand},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        typesig::TypeSig,
    },
    Error::InvalidOperand,
    Result,
};

/// A reference to a label that is resolved at finalization.
#[derive(Debug, Clone)]
struct LabelFixup {
    /// Position of the instruction in the stream
    position: usize,
    /// Labels, one for branches and several for switches
    labels: Vec<String>,
}

/// A handler clause whose boundaries are still labels.
#[derive(Debug, Clone)]
struct PendingHandler {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    filter_start: Option<String>,
    catch_type: Option<TypeSig>,
}

/// Builds a [`MethodBody`] from instructions and labels.
#[derive(Debug, Default)]
pub struct InstructionAssembler {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
    fixups: Vec<LabelFixup>,
    handlers: Vec<PendingHandler>,
    locals: Vec<TypeSig>,
    max_stack: u16,
    init_locals: bool,
}

impl InstructionAssembler {
    /// Creates an empty assembler
    #[must_use]
    pub fn new() -> Self {
        InstructionAssembler {
            max_stack: 8,
            ..Default::default()
        }
    }

    /// Declares a local slot and returns its index
    pub fn declare_local(&mut self, local_type: TypeSig) -> u16 {
        self.locals.push(local_type);
        (self.locals.len() - 1) as u16
    }

    /// Sets the maximum stack depth of the body
    pub fn set_max_stack(&mut self, max_stack: u16) {
        self.max_stack = max_stack;
    }

    /// Zero-initialize locals on entry
    pub fn set_init_locals(&mut self, init_locals: bool) {
        self.init_locals = init_locals;
    }

    /// Appends an instruction with an inline operand
    ///
    /// # Errors
    /// Returns an error if the operand does not fit the opcode, or if it is a branch.
    pub fn emit(&mut self, opcode: OpCode, operand: Operand) -> Result<()> {
        if matches!(operand, Operand::Target(_) | Operand::Switch(_)) {
            return Err(InvalidOperand(format!(
                "{} targets must be given as labels",
                opcode
            )));
        }

        let id = InstrId(self.instructions.len() as u32);
        self.instructions.push(Instruction::new(id, opcode, operand)?);
        Ok(())
    }

    /// Appends a branch to a label
    ///
    /// # Errors
    /// Returns an error if `opcode` is not a branch.
    pub fn emit_branch(&mut self, opcode: OpCode, label: &str) -> Result<()> {
        if !opcode.is_branch() {
            return Err(InvalidOperand(format!("{} is not a branch", opcode)));
        }

        let id = InstrId(self.instructions.len() as u32);
        self.fixups.push(LabelFixup {
            position: self.instructions.len(),
            labels: vec![label.to_string()],
        });
        self.instructions
            .push(Instruction::new(id, opcode, Operand::Target(id))?);
        Ok(())
    }

    /// Appends a switch over labels
    ///
    /// # Errors
    /// Never fails today, returns `Result` for symmetry with the other emitters.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<()> {
        let id = InstrId(self.instructions.len() as u32);
        self.fixups.push(LabelFixup {
            position: self.instructions.len(),
            labels: labels.iter().map(ToString::to_string).collect(),
        });
        self.instructions.push(Instruction::new(
            id,
            OpCode::Switch,
            Operand::Switch(vec![id; labels.len()]),
        )?);
        Ok(())
    }

    /// Defines a label at the next emitted instruction
    ///
    /// # Errors
    /// Returns an error if the label is already defined.
    pub fn define_label(&mut self, label: &str) -> Result<()> {
        if self.labels.contains_key(label) {
            return Err(InvalidOperand(format!("label '{}' defined twice", label)));
        }
        self.labels
            .insert(label.to_string(), self.instructions.len());
        Ok(())
    }

    /// Adds a typed catch clause between labels
    pub fn add_catch(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
        catch_type: TypeSig,
    ) {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            filter_start: None,
            catch_type: Some(catch_type),
        });
    }

    /// Adds a finally clause between labels
    pub fn add_finally(&mut self, try_start: &str, try_end: &str, handler_start: &str, handler_end: &str) {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            filter_start: None,
            catch_type: None,
        });
    }

    /// Adds a filter clause between labels
    pub fn add_filter(
        &mut self,
        try_start: &str,
        try_end: &str,
        filter_start: &str,
        handler_start: &str,
        handler_end: &str,
    ) {
        self.handlers.push(PendingHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
            filter_start: Some(filter_start.to_string()),
            catch_type: None,
        });
    }

    /// Resolves all labels and produces the body
    ///
    /// # Errors
    /// Returns an error if a label is referenced but never defined.
    pub fn finalize(mut self) -> Result<MethodBody> {
        for fixup in std::mem::take(&mut self.fixups) {
            let targets = fixup
                .labels
                .iter()
                .map(|label| self.label_target(label))
                .collect::<Result<Vec<_>>>()?;

            let instruction = &mut self.instructions[fixup.position];
            instruction.operand = match instruction.operand {
                Operand::Switch(_) => Operand::Switch(targets),
                _ => Operand::Target(targets[0]),
            };
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for pending in &self.handlers {
            handlers.push(ExceptionHandler {
                flags: pending.flags,
                try_start: self.label_target(&pending.try_start)?,
                try_end: self.label_end(&pending.try_end)?,
                handler_start: self.label_target(&pending.handler_start)?,
                handler_end: self.label_end(&pending.handler_end)?,
                filter_start: pending
                    .filter_start
                    .as_deref()
                    .map(|label| self.label_target(label))
                    .transpose()?,
                catch_type: pending.catch_type.clone(),
            });
        }

        let mut body = MethodBody::new(self.instructions, self.locals, self.max_stack);
        body.exception_handlers = handlers;
        body.init_locals = self.init_locals;
        Ok(body)
    }

    fn label_position(&self, label: &str) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| InvalidOperand(format!("undefined label '{}'", label)))
    }

    fn label_target(&self, label: &str) -> Result<InstrId> {
        let position = self.label_position(label)?;
        self.instructions
            .get(position)
            .map(|i| i.id)
            .ok_or_else(|| InvalidOperand(format!("label '{}' is past the last instruction", label)))
    }

    fn label_end(&self, label: &str) -> Result<Option<InstrId>> {
        let position = self.label_position(label)?;
        Ok(self.instructions.get(position).map(|i| i.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() {
        let mut asm = InstructionAssembler::new();
        asm.define_label("top").unwrap();
        asm.emit(OpCode::Nop, Operand::None).unwrap();
        asm.emit_branch(OpCode::Brtrue, "end").unwrap();
        asm.emit_branch(OpCode::Br, "top").unwrap();
        asm.define_label("end").unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();

        let body = asm.finalize().unwrap();
        assert_eq!(body.instructions[1].operand, Operand::Target(InstrId(3)));
        assert_eq!(body.instructions[2].operand, Operand::Target(InstrId(0)));
        assert_eq!(body.instructions[3].offset, 1 + 5 + 5);
    }

    #[test]
    fn test_undefined_label() {
        let mut asm = InstructionAssembler::new();
        asm.emit_branch(OpCode::Br, "nowhere").unwrap();
        assert!(asm.finalize().is_err());
    }

    #[test]
    fn test_duplicate_label() {
        let mut asm = InstructionAssembler::new();
        asm.define_label("a").unwrap();
        assert!(asm.define_label("a").is_err());
    }

    #[test]
    fn test_handler_regions() {
        let mut asm = InstructionAssembler::new();
        asm.define_label("try").unwrap();
        asm.emit(OpCode::Nop, Operand::None).unwrap();
        asm.emit_branch(OpCode::Leave, "after").unwrap();
        asm.define_label("handler").unwrap();
        asm.emit(OpCode::Pop, Operand::None).unwrap();
        asm.emit_branch(OpCode::Leave, "after").unwrap();
        asm.define_label("after").unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        asm.add_catch("try", "handler", "handler", "after", TypeSig::Object);

        let body = asm.finalize().unwrap();
        let handler = &body.exception_handlers[0];
        assert_eq!(handler.try_start, InstrId(0));
        assert_eq!(handler.try_end, Some(InstrId(2)));
        assert_eq!(handler.handler_start, InstrId(2));
        assert_eq!(handler.handler_end, Some(InstrId(4)));
    }

    #[test]
    fn test_switch() {
        let mut asm = InstructionAssembler::new();
        asm.emit(OpCode::Ldarg_0, Operand::None).unwrap();
        asm.emit_switch(&["a", "b"]).unwrap();
        asm.define_label("a").unwrap();
        asm.emit(OpCode::Nop, Operand::None).unwrap();
        asm.define_label("b").unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        let body = asm.finalize().unwrap();
        assert_eq!(
            body.instructions[1].operand,
            Operand::Switch(vec![InstrId(2), InstrId(3)])
        );
    }
}
