//! Instruction layout: offsets, macro expansion and short-form selection.
//!
//! Short branch forms encode an 8-bit displacement and compact local forms encode the slot in the
//! opcode, both of which break once instructions are inserted. [`expand_macro`] rewrites a single
//! instruction into its canonical long form. [`optimize_macros`] goes the other way once editing
//! is done, choosing the smallest encoding that still reaches every target.

use std::collections::HashMap;

use crate::{
    assembly::{InstrId, Instruction, OpCode, Operand},
    metadata::method::MethodBody,
};

/// Assigns consecutive byte offsets and returns the total code size
pub fn compute_offsets(instructions: &mut [Instruction]) -> u32 {
    let mut offset = 0;
    for instruction in instructions {
        instruction.offset = offset;
        offset += instruction.size();
    }
    offset
}

/// Expands compact and short opcodes to their canonical long form.
///
/// Returns true if the instruction changed. Expansion is idempotent.
pub fn expand_macro(instruction: &mut Instruction) -> bool {
    let expanded = match instruction.opcode {
        OpCode::Ldloc_0 => Some((OpCode::Ldloc, Operand::Local(0))),
        OpCode::Ldloc_1 => Some((OpCode::Ldloc, Operand::Local(1))),
        OpCode::Ldloc_2 => Some((OpCode::Ldloc, Operand::Local(2))),
        OpCode::Ldloc_3 => Some((OpCode::Ldloc, Operand::Local(3))),
        OpCode::Stloc_0 => Some((OpCode::Stloc, Operand::Local(0))),
        OpCode::Stloc_1 => Some((OpCode::Stloc, Operand::Local(1))),
        OpCode::Stloc_2 => Some((OpCode::Stloc, Operand::Local(2))),
        OpCode::Stloc_3 => Some((OpCode::Stloc, Operand::Local(3))),
        op => op
            .long_form()
            .map(|long| (long, instruction.operand.clone())),
    };

    match expanded {
        Some((opcode, operand)) => {
            instruction.opcode = opcode;
            instruction.operand = operand;
            true
        }
        None => false,
    }
}

/// Selects the smallest encoding for every instruction and recomputes offsets.
pub fn optimize_macros(body: &mut MethodBody) {
    for instruction in &mut body.instructions {
        if let Some((opcode, operand)) = compact_form(instruction) {
            instruction.opcode = opcode;
            instruction.operand = operand;
        }
    }

    body.update_offsets();
    let offsets: HashMap<InstrId, u32> = body
        .instructions
        .iter()
        .map(|i| (i.id, i.offset))
        .collect();

    for instruction in &mut body.instructions {
        let (Some(short), Operand::Target(target)) =
            (instruction.opcode.short_form(), &instruction.operand)
        else {
            continue;
        };
        if !instruction.opcode.is_branch() {
            continue;
        }
        let Some(target_offset) = offsets.get(target) else {
            continue;
        };

        let end = i64::from(instruction.offset) + i64::from(instruction.size());
        let displacement = i64::from(*target_offset) - end;
        if (i64::from(i8::MIN)..=i64::from(i8::MAX)).contains(&displacement) {
            instruction.opcode = short;
        }
    }

    body.update_offsets();
}

fn compact_form(instruction: &Instruction) -> Option<(OpCode, Operand)> {
    let compact = |forms: [OpCode; 4], short: OpCode, index: u16, operand: Operand| {
        if index < 4 {
            Some((forms[usize::from(index)], Operand::None))
        } else if index <= u16::from(u8::MAX) {
            Some((short, operand))
        } else {
            None
        }
    };
    let short_only = |short: OpCode, index: u16, operand: Operand| {
        (index <= u16::from(u8::MAX)).then_some((short, operand))
    };

    match (instruction.opcode, &instruction.operand) {
        (OpCode::Ldloc, Operand::Local(index)) => compact(
            [OpCode::Ldloc_0, OpCode::Ldloc_1, OpCode::Ldloc_2, OpCode::Ldloc_3],
            OpCode::Ldloc_S,
            *index,
            Operand::Local(*index),
        ),
        (OpCode::Stloc, Operand::Local(index)) => compact(
            [OpCode::Stloc_0, OpCode::Stloc_1, OpCode::Stloc_2, OpCode::Stloc_3],
            OpCode::Stloc_S,
            *index,
            Operand::Local(*index),
        ),
        (OpCode::Ldarg, Operand::Arg(index)) => compact(
            [OpCode::Ldarg_0, OpCode::Ldarg_1, OpCode::Ldarg_2, OpCode::Ldarg_3],
            OpCode::Ldarg_S,
            *index,
            Operand::Arg(*index),
        ),
        (OpCode::Ldloca, Operand::Local(index)) => {
            short_only(OpCode::Ldloca_S, *index, Operand::Local(*index))
        }
        (OpCode::Ldarga, Operand::Arg(index)) => {
            short_only(OpCode::Ldarga_S, *index, Operand::Arg(*index))
        }
        (OpCode::Starg, Operand::Arg(index)) => {
            short_only(OpCode::Starg_S, *index, Operand::Arg(*index))
        }
        (OpCode::Ldc_I4, Operand::Int32(value)) => Some(match *value {
            -1 => (OpCode::Ldc_I4_M1, Operand::None),
            0 => (OpCode::Ldc_I4_0, Operand::None),
            1 => (OpCode::Ldc_I4_1, Operand::None),
            2 => (OpCode::Ldc_I4_2, Operand::None),
            3 => (OpCode::Ldc_I4_3, Operand::None),
            4 => (OpCode::Ldc_I4_4, Operand::None),
            5 => (OpCode::Ldc_I4_5, Operand::None),
            6 => (OpCode::Ldc_I4_6, Operand::None),
            7 => (OpCode::Ldc_I4_7, Operand::None),
            8 => (OpCode::Ldc_I4_8, Operand::None),
            v if i8::try_from(v).is_ok() => (OpCode::Ldc_I4_S, Operand::Int32(v)),
            _ => return None,
        }),
        _ => None,
    }
}
