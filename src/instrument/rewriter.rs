//! Cursor-based editing of a single method body.
//!
//! [`MethodBodyRewriter`] walks the original instructions once, front to back. At each primary
//! instruction (prefixes are skipped and stay attached) the caller may [`insert`] new
//! instructions and then [`advance`], which copies or drops the consumed originals. Every
//! consumed original offset is mapped to the first instruction inserted in front of it, so a
//! branch that used to land on a guarded instruction now lands on its guard.
//!
//! [`insert`]: MethodBodyRewriter::insert
//! [`advance`]: MethodBodyRewriter::advance

use std::collections::{HashMap, HashSet};

use crate::{
    assembly::{expand_macro, optimize_macros, InstrId, Instruction, OpCode, Operand},
    metadata::{method::MethodBody, typesig::TypeSig},
    Result,
};

/// Single-pass editor over one method body.
pub struct MethodBodyRewriter<'a> {
    body: &'a mut MethodBody,
    original: Vec<Instruction>,
    output: Vec<Instruction>,
    /// Old byte offset to the instruction now occupying that position
    offset_map: Vec<Option<InstrId>>,
    original_offsets: HashMap<InstrId, u32>,
    copy_position: usize,
    advance_position: usize,
    new_position: usize,
    current: Option<usize>,
    extra_stack: u16,
}

impl<'a> MethodBodyRewriter<'a> {
    /// Starts rewriting `body`, positioning the cursor on the first primary instruction
    pub fn start(body: &'a mut MethodBody) -> Self {
        let code_size = body.update_offsets();
        let original = std::mem::take(&mut body.instructions);
        let original_offsets = original.iter().map(|i| (i.id, i.offset)).collect();

        let mut rewriter = MethodBodyRewriter {
            body,
            output: Vec::with_capacity(2 * original.len()),
            original,
            offset_map: vec![None; code_size as usize],
            original_offsets,
            copy_position: 0,
            advance_position: 0,
            new_position: 0,
            current: None,
            extra_stack: 0,
        };
        rewriter.advance(false);
        rewriter
    }

    /// The current primary instruction, `None` once the body is exhausted
    #[must_use]
    pub fn instruction(&self) -> Option<&Instruction> {
        self.current.map(|position| &self.original[position])
    }

    /// Prefixes attached to the current instruction
    #[must_use]
    pub fn prefixes(&self) -> &[Instruction] {
        match self.current {
            Some(position) => &self.original[self.copy_position..position],
            None => &[],
        }
    }

    /// The instruction after the current one, without consuming anything
    #[must_use]
    pub fn peek_next(&self) -> Option<&Instruction> {
        self.original[self.advance_position.min(self.original.len())..]
            .iter()
            .find(|i| !i.is_prefix())
    }

    /// Consumes everything up to and including the current instruction.
    ///
    /// The consumed originals are expanded to their long forms and, if `keep_original` is set,
    /// copied to the output. Their old offsets map to the first instruction inserted since the
    /// previous advance, or to themselves if nothing was inserted.
    pub fn advance(&mut self, keep_original: bool) {
        let target = if self.new_position == self.output.len() {
            self.original.get(self.copy_position).map(|i| i.id)
        } else {
            Some(self.output[self.new_position].id)
        };

        while self.copy_position < self.advance_position.min(self.original.len()) {
            let mut instruction = self.original[self.copy_position].clone();
            expand_macro(&mut instruction);
            if let Some(slot) = self.offset_map.get_mut(instruction.offset as usize) {
                *slot = target;
            }
            if keep_original {
                self.output.push(instruction);
            }
            self.copy_position += 1;
        }

        while self
            .original
            .get(self.advance_position)
            .is_some_and(Instruction::is_prefix)
        {
            self.advance_position += 1;
        }
        self.current = (self.advance_position < self.original.len()).then_some(self.advance_position);
        self.advance_position += 1;
        self.new_position = self.output.len();
    }

    /// Creates an instruction with a fresh id without placing it
    ///
    /// # Errors
    /// Returns an error if the operand does not fit the opcode.
    pub fn create(&mut self, opcode: OpCode, operand: Operand) -> Result<Instruction> {
        self.body.create(opcode, operand)
    }

    /// Appends an instruction created earlier with [`MethodBodyRewriter::create`]
    pub fn insert(&mut self, mut instruction: Instruction) {
        instruction.offset = crate::assembly::NEW_INSTRUCTION_OFFSET;
        self.output.push(instruction);
    }

    /// Creates and appends an instruction, returning its id
    ///
    /// # Errors
    /// Returns an error if the operand does not fit the opcode.
    pub fn emit(&mut self, opcode: OpCode, operand: Operand) -> Result<InstrId> {
        let instruction = self.create(opcode, operand)?;
        let id = instruction.id;
        self.insert(instruction);
        Ok(id)
    }

    /// Declares a temporary local
    pub fn add_local(&mut self, local_type: TypeSig) -> u16 {
        self.body.add_local(local_type)
    }

    /// Requires locals to be zero-initialized
    pub fn set_init_locals(&mut self) {
        self.body.init_locals = true;
    }

    /// Records that inserted code needs `depth` stack slots beyond the original maximum
    pub fn reserve_stack(&mut self, depth: u16) {
        self.extra_stack = self.extra_stack.max(depth);
    }

    /// Number of instructions emitted so far
    #[must_use]
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Installs the output, remapping every branch target and region boundary.
    ///
    /// Instructions that were never reached by the cursor are kept as they are.
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] if a target or boundary would name an instruction
    /// that is no longer part of the body.
    pub fn finish(mut self, optimize: bool) -> Result<()> {
        while self.current.is_some() {
            self.advance(true);
        }

        let present: HashSet<InstrId> = self.output.iter().map(|i| i.id).collect();
        let resolve = |id: InstrId| -> Result<InstrId> {
            let resolved = self
                .original_offsets
                .get(&id)
                .and_then(|offset| self.offset_map.get(*offset as usize).copied().flatten())
                .unwrap_or(id);
            if present.contains(&resolved) {
                Ok(resolved)
            } else {
                Err(rewrite_error!("{} is no longer part of the method body", id))
            }
        };

        let mut output = std::mem::take(&mut self.output);
        for instruction in &mut output {
            match &mut instruction.operand {
                Operand::Target(target) => *target = resolve(*target)?,
                Operand::Switch(targets) => {
                    for target in targets.iter_mut() {
                        *target = resolve(*target)?;
                    }
                }
                _ => {}
            }
        }

        for handler in &mut self.body.exception_handlers {
            handler.try_start = resolve(handler.try_start)?;
            handler.handler_start = resolve(handler.handler_start)?;
            if let Some(end) = handler.try_end {
                handler.try_end = Some(resolve(end)?);
            }
            if let Some(end) = handler.handler_end {
                handler.handler_end = Some(resolve(end)?);
            }
            if let Some(filter) = handler.filter_start {
                handler.filter_start = Some(resolve(filter)?);
            }
        }

        self.body.instructions = output;
        if optimize {
            optimize_macros(&mut *self.body);
        } else {
            self.body.update_offsets();
        }
        self.body.max_stack = self.body.max_stack.saturating_add(self.extra_stack);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        metadata::method::ExceptionHandlerFlags,
    };

    fn opcodes(body: &MethodBody) -> Vec<OpCode> {
        body.instructions.iter().map(|i| i.opcode).collect()
    }

    /// loop: ldloc.0; brtrue.s loop; ret
    fn looping_body() -> MethodBody {
        let mut asm = InstructionAssembler::new();
        asm.declare_local(TypeSig::Boolean);
        asm.define_label("loop").unwrap();
        asm.emit(OpCode::Ldloc_0, Operand::None).unwrap();
        asm.emit_branch(OpCode::Brtrue_S, "loop").unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        asm.finalize().unwrap()
    }

    #[test]
    fn test_passthrough_expands_macros() {
        let mut body = looping_body();
        let mut rewriter = MethodBodyRewriter::start(&mut body);
        while rewriter.instruction().is_some() {
            rewriter.advance(true);
        }
        rewriter.finish(false).unwrap();

        assert_eq!(opcodes(&body), vec![OpCode::Ldloc, OpCode::Brtrue, OpCode::Ret]);
        assert_eq!(body.instructions[0].operand, Operand::Local(0));
        assert_eq!(body.instructions[1].operand, Operand::Target(body.instructions[0].id));
    }

    #[test]
    fn test_branch_retargets_to_inserted_guard() {
        let mut body = looping_body();
        let first = body.instructions[0].id;
        let mut rewriter = MethodBodyRewriter::start(&mut body);
        let guard = rewriter.emit(OpCode::Nop, Operand::None).unwrap();
        rewriter.advance(true);
        rewriter.finish(true).unwrap();

        assert_eq!(opcodes(&body), vec![OpCode::Nop, OpCode::Ldloc_0, OpCode::Brtrue_S, OpCode::Ret]);
        assert_eq!(body.instructions[1].id, first);
        assert_eq!(body.instructions[2].operand, Operand::Target(guard));
    }

    #[test]
    fn test_replaced_instruction_maps_to_replacement() {
        let mut asm = InstructionAssembler::new();
        asm.emit_branch(OpCode::Br, "call").unwrap();
        asm.define_label("call").unwrap();
        asm.emit(OpCode::Ldnull, Operand::None).unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        let mut body = asm.finalize().unwrap();

        let mut rewriter = MethodBodyRewriter::start(&mut body);
        rewriter.advance(true);
        let replacement = rewriter.emit(OpCode::Ldc_I4_0, Operand::None).unwrap();
        rewriter.advance(false);
        rewriter.finish(false).unwrap();

        assert_eq!(opcodes(&body), vec![OpCode::Br, OpCode::Ldc_I4_0, OpCode::Ret]);
        assert_eq!(body.instructions[0].operand, Operand::Target(replacement));
    }

    #[test]
    fn test_dropped_target_is_an_error() {
        let mut asm = InstructionAssembler::new();
        asm.emit_branch(OpCode::Br, "gone").unwrap();
        asm.define_label("gone").unwrap();
        asm.emit(OpCode::Nop, Operand::None).unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        let mut body = asm.finalize().unwrap();

        let mut rewriter = MethodBodyRewriter::start(&mut body);
        rewriter.advance(true);
        rewriter.advance(false);
        assert!(rewriter.finish(false).is_err());
    }

    #[test]
    fn test_prefix_stays_attached() {
        let mut asm = InstructionAssembler::new();
        asm.emit(OpCode::Ldarg_0, Operand::None).unwrap();
        asm.emit(OpCode::Volatile, Operand::None).unwrap();
        asm.emit(OpCode::Ldind_I4, Operand::None).unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        let mut body = asm.finalize().unwrap();

        let mut rewriter = MethodBodyRewriter::start(&mut body);
        rewriter.advance(true);
        assert_eq!(rewriter.instruction().unwrap().opcode, OpCode::Ldind_I4);
        assert_eq!(rewriter.prefixes().len(), 1);
        rewriter.emit(OpCode::Nop, Operand::None).unwrap();
        rewriter.advance(true);
        rewriter.finish(false).unwrap();

        assert_eq!(
            opcodes(&body),
            vec![OpCode::Ldarg_0, OpCode::Nop, OpCode::Volatile, OpCode::Ldind_I4, OpCode::Ret]
        );
    }

    #[test]
    fn test_handler_boundaries_follow_guards() {
        let mut asm = InstructionAssembler::new();
        asm.define_label("try").unwrap();
        asm.emit(OpCode::Nop, Operand::None).unwrap();
        asm.emit_branch(OpCode::Leave_S, "after").unwrap();
        asm.define_label("handler").unwrap();
        asm.emit(OpCode::Pop, Operand::None).unwrap();
        asm.emit_branch(OpCode::Leave_S, "after").unwrap();
        asm.define_label("after").unwrap();
        asm.emit(OpCode::Ret, Operand::None).unwrap();
        asm.add_catch("try", "handler", "handler", "after", TypeSig::Object);
        let mut body = asm.finalize().unwrap();

        let mut rewriter = MethodBodyRewriter::start(&mut body);
        let try_guard = rewriter.emit(OpCode::Nop, Operand::None).unwrap();
        rewriter.advance(true);
        rewriter.advance(true);
        let handler_guard = rewriter.emit(OpCode::Nop, Operand::None).unwrap();
        rewriter.finish(false).unwrap();

        let handler = &body.exception_handlers[0];
        assert_eq!(handler.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(handler.try_start, try_guard);
        assert_eq!(handler.try_end, Some(handler_guard));
        assert_eq!(handler.handler_start, handler_guard);
        assert_eq!(body.instructions[2].operand, Operand::Target(body.instructions[6].id));
    }

    #[test]
    fn test_unvisited_targets_resolve_to_themselves() {
        let mut body = looping_body();
        let ret = body.instructions[2].id;
        body.instructions[1].operand = Operand::Target(ret);
        let rewriter = MethodBodyRewriter::start(&mut body);
        rewriter.finish(false).unwrap();
        assert_eq!(body.instructions[1].operand, Operand::Target(ret));
    }
}
