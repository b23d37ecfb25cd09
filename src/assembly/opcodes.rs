//! The CIL opcode set (ECMA-335 Partition III).
//!
//! [`OpCode`] enumerates every instruction together with its encoding, the kind of operand it
//! takes and how it affects control flow. The table is declared once through the `opcodes!`
//! macro, so mnemonic, encoding, operand kind and flow can never drift apart.
//!
//! Two-byte opcodes carry their `0xFE` prefix in the high byte of [`OpCode::code`].

use strum::{EnumCount, EnumIter};

/// The kind of inline operand an opcode takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// 8-bit signed integer
    ShortInt,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// 8-bit relative branch target
    ShortBranchTarget,
    /// 32-bit relative branch target
    BranchTarget,
    /// Jump table
    Switch,
    /// 8-bit local or argument index
    ShortVariable,
    /// 16-bit local or argument index
    Variable,
    /// Field token
    Field,
    /// Method token
    Method,
    /// Type token
    Type,
    /// Field, method or type token
    Token,
    /// User string token
    String,
    /// Stand-alone signature token
    Signature,
}

impl OperandType {
    /// Returns the encoded size in bytes of this operand type.
    ///
    /// Returns `None` for [`OperandType::Switch`], whose size depends on the number of targets.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        match self {
            OperandType::None => Some(0),
            OperandType::ShortInt | OperandType::ShortBranchTarget | OperandType::ShortVariable => {
                Some(1)
            }
            OperandType::Variable => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::BranchTarget
            | OperandType::Field
            | OperandType::Method
            | OperandType::Type
            | OperandType::Token
            | OperandType::String
            | OperandType::Signature => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally, fault or filter block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
    /// Prefix modifying the following instruction
    Meta,
}

macro_rules! opcodes {
    ($( $variant:ident => ($mnemonic:literal, $code:literal, $operand:ident, $flow:ident) ),* $(,)?) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount)]
        #[allow(non_camel_case_types, missing_docs)]
        pub enum OpCode {
            $( $variant ),*
        }

        impl OpCode {
            /// The assembler mnemonic, e.g. `ldloc.s`
            #[must_use]
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( OpCode::$variant => $mnemonic ),*
                }
            }

            /// The encoding, with the `0xFE` prefix in the high byte for two-byte opcodes
            #[must_use]
            pub const fn code(&self) -> u16 {
                match self {
                    $( OpCode::$variant => $code ),*
                }
            }

            /// The kind of inline operand
            #[must_use]
            pub const fn operand_type(&self) -> OperandType {
                match self {
                    $( OpCode::$variant => OperandType::$operand ),*
                }
            }

            /// The control flow behavior
            #[must_use]
            pub const fn flow(&self) -> FlowType {
                match self {
                    $( OpCode::$variant => FlowType::$flow ),*
                }
            }
        }
    };
}

opcodes! {
    Nop => ("nop", 0x00, None, Sequential),
    Break => ("break", 0x01, None, Sequential),
    Ldarg_0 => ("ldarg.0", 0x02, None, Sequential),
    Ldarg_1 => ("ldarg.1", 0x03, None, Sequential),
    Ldarg_2 => ("ldarg.2", 0x04, None, Sequential),
    Ldarg_3 => ("ldarg.3", 0x05, None, Sequential),
    Ldloc_0 => ("ldloc.0", 0x06, None, Sequential),
    Ldloc_1 => ("ldloc.1", 0x07, None, Sequential),
    Ldloc_2 => ("ldloc.2", 0x08, None, Sequential),
    Ldloc_3 => ("ldloc.3", 0x09, None, Sequential),
    Stloc_0 => ("stloc.0", 0x0A, None, Sequential),
    Stloc_1 => ("stloc.1", 0x0B, None, Sequential),
    Stloc_2 => ("stloc.2", 0x0C, None, Sequential),
    Stloc_3 => ("stloc.3", 0x0D, None, Sequential),
    Ldarg_S => ("ldarg.s", 0x0E, ShortVariable, Sequential),
    Ldarga_S => ("ldarga.s", 0x0F, ShortVariable, Sequential),
    Starg_S => ("starg.s", 0x10, ShortVariable, Sequential),
    Ldloc_S => ("ldloc.s", 0x11, ShortVariable, Sequential),
    Ldloca_S => ("ldloca.s", 0x12, ShortVariable, Sequential),
    Stloc_S => ("stloc.s", 0x13, ShortVariable, Sequential),
    Ldnull => ("ldnull", 0x14, None, Sequential),
    Ldc_I4_M1 => ("ldc.i4.m1", 0x15, None, Sequential),
    Ldc_I4_0 => ("ldc.i4.0", 0x16, None, Sequential),
    Ldc_I4_1 => ("ldc.i4.1", 0x17, None, Sequential),
    Ldc_I4_2 => ("ldc.i4.2", 0x18, None, Sequential),
    Ldc_I4_3 => ("ldc.i4.3", 0x19, None, Sequential),
    Ldc_I4_4 => ("ldc.i4.4", 0x1A, None, Sequential),
    Ldc_I4_5 => ("ldc.i4.5", 0x1B, None, Sequential),
    Ldc_I4_6 => ("ldc.i4.6", 0x1C, None, Sequential),
    Ldc_I4_7 => ("ldc.i4.7", 0x1D, None, Sequential),
    Ldc_I4_8 => ("ldc.i4.8", 0x1E, None, Sequential),
    Ldc_I4_S => ("ldc.i4.s", 0x1F, ShortInt, Sequential),
    Ldc_I4 => ("ldc.i4", 0x20, Int32, Sequential),
    Ldc_I8 => ("ldc.i8", 0x21, Int64, Sequential),
    Ldc_R4 => ("ldc.r4", 0x22, Float32, Sequential),
    Ldc_R8 => ("ldc.r8", 0x23, Float64, Sequential),
    Dup => ("dup", 0x25, None, Sequential),
    Pop => ("pop", 0x26, None, Sequential),
    Jmp => ("jmp", 0x27, Method, Call),
    Call => ("call", 0x28, Method, Call),
    Calli => ("calli", 0x29, Signature, Call),
    Ret => ("ret", 0x2A, None, Return),
    Br_S => ("br.s", 0x2B, ShortBranchTarget, UnconditionalBranch),
    Brfalse_S => ("brfalse.s", 0x2C, ShortBranchTarget, ConditionalBranch),
    Brtrue_S => ("brtrue.s", 0x2D, ShortBranchTarget, ConditionalBranch),
    Beq_S => ("beq.s", 0x2E, ShortBranchTarget, ConditionalBranch),
    Bge_S => ("bge.s", 0x2F, ShortBranchTarget, ConditionalBranch),
    Bgt_S => ("bgt.s", 0x30, ShortBranchTarget, ConditionalBranch),
    Ble_S => ("ble.s", 0x31, ShortBranchTarget, ConditionalBranch),
    Blt_S => ("blt.s", 0x32, ShortBranchTarget, ConditionalBranch),
    Bne_Un_S => ("bne.un.s", 0x33, ShortBranchTarget, ConditionalBranch),
    Bge_Un_S => ("bge.un.s", 0x34, ShortBranchTarget, ConditionalBranch),
    Bgt_Un_S => ("bgt.un.s", 0x35, ShortBranchTarget, ConditionalBranch),
    Ble_Un_S => ("ble.un.s", 0x36, ShortBranchTarget, ConditionalBranch),
    Blt_Un_S => ("blt.un.s", 0x37, ShortBranchTarget, ConditionalBranch),
    Br => ("br", 0x38, BranchTarget, UnconditionalBranch),
    Brfalse => ("brfalse", 0x39, BranchTarget, ConditionalBranch),
    Brtrue => ("brtrue", 0x3A, BranchTarget, ConditionalBranch),
    Beq => ("beq", 0x3B, BranchTarget, ConditionalBranch),
    Bge => ("bge", 0x3C, BranchTarget, ConditionalBranch),
    Bgt => ("bgt", 0x3D, BranchTarget, ConditionalBranch),
    Ble => ("ble", 0x3E, BranchTarget, ConditionalBranch),
    Blt => ("blt", 0x3F, BranchTarget, ConditionalBranch),
    Bne_Un => ("bne.un", 0x40, BranchTarget, ConditionalBranch),
    Bge_Un => ("bge.un", 0x41, BranchTarget, ConditionalBranch),
    Bgt_Un => ("bgt.un", 0x42, BranchTarget, ConditionalBranch),
    Ble_Un => ("ble.un", 0x43, BranchTarget, ConditionalBranch),
    Blt_Un => ("blt.un", 0x44, BranchTarget, ConditionalBranch),
    Switch => ("switch", 0x45, Switch, Switch),
    Ldind_I1 => ("ldind.i1", 0x46, None, Sequential),
    Ldind_U1 => ("ldind.u1", 0x47, None, Sequential),
    Ldind_I2 => ("ldind.i2", 0x48, None, Sequential),
    Ldind_U2 => ("ldind.u2", 0x49, None, Sequential),
    Ldind_I4 => ("ldind.i4", 0x4A, None, Sequential),
    Ldind_U4 => ("ldind.u4", 0x4B, None, Sequential),
    Ldind_I8 => ("ldind.i8", 0x4C, None, Sequential),
    Ldind_I => ("ldind.i", 0x4D, None, Sequential),
    Ldind_R4 => ("ldind.r4", 0x4E, None, Sequential),
    Ldind_R8 => ("ldind.r8", 0x4F, None, Sequential),
    Ldind_Ref => ("ldind.ref", 0x50, None, Sequential),
    Stind_Ref => ("stind.ref", 0x51, None, Sequential),
    Stind_I1 => ("stind.i1", 0x52, None, Sequential),
    Stind_I2 => ("stind.i2", 0x53, None, Sequential),
    Stind_I4 => ("stind.i4", 0x54, None, Sequential),
    Stind_I8 => ("stind.i8", 0x55, None, Sequential),
    Stind_R4 => ("stind.r4", 0x56, None, Sequential),
    Stind_R8 => ("stind.r8", 0x57, None, Sequential),
    Add => ("add", 0x58, None, Sequential),
    Sub => ("sub", 0x59, None, Sequential),
    Mul => ("mul", 0x5A, None, Sequential),
    Div => ("div", 0x5B, None, Sequential),
    Div_Un => ("div.un", 0x5C, None, Sequential),
    Rem => ("rem", 0x5D, None, Sequential),
    Rem_Un => ("rem.un", 0x5E, None, Sequential),
    And => ("and", 0x5F, None, Sequential),
    Or => ("or", 0x60, None, Sequential),
    Xor => ("xor", 0x61, None, Sequential),
    Shl => ("shl", 0x62, None, Sequential),
    Shr => ("shr", 0x63, None, Sequential),
    Shr_Un => ("shr.un", 0x64, None, Sequential),
    Neg => ("neg", 0x65, None, Sequential),
    Not => ("not", 0x66, None, Sequential),
    Conv_I1 => ("conv.i1", 0x67, None, Sequential),
    Conv_I2 => ("conv.i2", 0x68, None, Sequential),
    Conv_I4 => ("conv.i4", 0x69, None, Sequential),
    Conv_I8 => ("conv.i8", 0x6A, None, Sequential),
    Conv_R4 => ("conv.r4", 0x6B, None, Sequential),
    Conv_R8 => ("conv.r8", 0x6C, None, Sequential),
    Conv_U4 => ("conv.u4", 0x6D, None, Sequential),
    Conv_U8 => ("conv.u8", 0x6E, None, Sequential),
    Callvirt => ("callvirt", 0x6F, Method, Call),
    Cpobj => ("cpobj", 0x70, Type, Sequential),
    Ldobj => ("ldobj", 0x71, Type, Sequential),
    Ldstr => ("ldstr", 0x72, String, Sequential),
    Newobj => ("newobj", 0x73, Method, Call),
    Castclass => ("castclass", 0x74, Type, Sequential),
    Isinst => ("isinst", 0x75, Type, Sequential),
    Conv_R_Un => ("conv.r.un", 0x76, None, Sequential),
    Unbox => ("unbox", 0x79, Type, Sequential),
    Throw => ("throw", 0x7A, None, Throw),
    Ldfld => ("ldfld", 0x7B, Field, Sequential),
    Ldflda => ("ldflda", 0x7C, Field, Sequential),
    Stfld => ("stfld", 0x7D, Field, Sequential),
    Ldsfld => ("ldsfld", 0x7E, Field, Sequential),
    Ldsflda => ("ldsflda", 0x7F, Field, Sequential),
    Stsfld => ("stsfld", 0x80, Field, Sequential),
    Stobj => ("stobj", 0x81, Type, Sequential),
    Conv_Ovf_I1_Un => ("conv.ovf.i1.un", 0x82, None, Sequential),
    Conv_Ovf_I2_Un => ("conv.ovf.i2.un", 0x83, None, Sequential),
    Conv_Ovf_I4_Un => ("conv.ovf.i4.un", 0x84, None, Sequential),
    Conv_Ovf_I8_Un => ("conv.ovf.i8.un", 0x85, None, Sequential),
    Conv_Ovf_U1_Un => ("conv.ovf.u1.un", 0x86, None, Sequential),
    Conv_Ovf_U2_Un => ("conv.ovf.u2.un", 0x87, None, Sequential),
    Conv_Ovf_U4_Un => ("conv.ovf.u4.un", 0x88, None, Sequential),
    Conv_Ovf_U8_Un => ("conv.ovf.u8.un", 0x89, None, Sequential),
    Conv_Ovf_I_Un => ("conv.ovf.i.un", 0x8A, None, Sequential),
    Conv_Ovf_U_Un => ("conv.ovf.u.un", 0x8B, None, Sequential),
    Box => ("box", 0x8C, Type, Sequential),
    Newarr => ("newarr", 0x8D, Type, Sequential),
    Ldlen => ("ldlen", 0x8E, None, Sequential),
    Ldelema => ("ldelema", 0x8F, Type, Sequential),
    Ldelem_I1 => ("ldelem.i1", 0x90, None, Sequential),
    Ldelem_U1 => ("ldelem.u1", 0x91, None, Sequential),
    Ldelem_I2 => ("ldelem.i2", 0x92, None, Sequential),
    Ldelem_U2 => ("ldelem.u2", 0x93, None, Sequential),
    Ldelem_I4 => ("ldelem.i4", 0x94, None, Sequential),
    Ldelem_U4 => ("ldelem.u4", 0x95, None, Sequential),
    Ldelem_I8 => ("ldelem.i8", 0x96, None, Sequential),
    Ldelem_I => ("ldelem.i", 0x97, None, Sequential),
    Ldelem_R4 => ("ldelem.r4", 0x98, None, Sequential),
    Ldelem_R8 => ("ldelem.r8", 0x99, None, Sequential),
    Ldelem_Ref => ("ldelem.ref", 0x9A, None, Sequential),
    Stelem_I => ("stelem.i", 0x9B, None, Sequential),
    Stelem_I1 => ("stelem.i1", 0x9C, None, Sequential),
    Stelem_I2 => ("stelem.i2", 0x9D, None, Sequential),
    Stelem_I4 => ("stelem.i4", 0x9E, None, Sequential),
    Stelem_I8 => ("stelem.i8", 0x9F, None, Sequential),
    Stelem_R4 => ("stelem.r4", 0xA0, None, Sequential),
    Stelem_R8 => ("stelem.r8", 0xA1, None, Sequential),
    Stelem_Ref => ("stelem.ref", 0xA2, None, Sequential),
    Ldelem => ("ldelem", 0xA3, Type, Sequential),
    Stelem => ("stelem", 0xA4, Type, Sequential),
    Unbox_Any => ("unbox.any", 0xA5, Type, Sequential),
    Conv_Ovf_I1 => ("conv.ovf.i1", 0xB3, None, Sequential),
    Conv_Ovf_U1 => ("conv.ovf.u1", 0xB4, None, Sequential),
    Conv_Ovf_I2 => ("conv.ovf.i2", 0xB5, None, Sequential),
    Conv_Ovf_U2 => ("conv.ovf.u2", 0xB6, None, Sequential),
    Conv_Ovf_I4 => ("conv.ovf.i4", 0xB7, None, Sequential),
    Conv_Ovf_U4 => ("conv.ovf.u4", 0xB8, None, Sequential),
    Conv_Ovf_I8 => ("conv.ovf.i8", 0xB9, None, Sequential),
    Conv_Ovf_U8 => ("conv.ovf.u8", 0xBA, None, Sequential),
    Refanyval => ("refanyval", 0xC2, Type, Sequential),
    Ckfinite => ("ckfinite", 0xC3, None, Sequential),
    Mkrefany => ("mkrefany", 0xC6, Type, Sequential),
    Ldtoken => ("ldtoken", 0xD0, Token, Sequential),
    Conv_U2 => ("conv.u2", 0xD1, None, Sequential),
    Conv_U1 => ("conv.u1", 0xD2, None, Sequential),
    Conv_I => ("conv.i", 0xD3, None, Sequential),
    Conv_Ovf_I => ("conv.ovf.i", 0xD4, None, Sequential),
    Conv_Ovf_U => ("conv.ovf.u", 0xD5, None, Sequential),
    Add_Ovf => ("add.ovf", 0xD6, None, Sequential),
    Add_Ovf_Un => ("add.ovf.un", 0xD7, None, Sequential),
    Mul_Ovf => ("mul.ovf", 0xD8, None, Sequential),
    Mul_Ovf_Un => ("mul.ovf.un", 0xD9, None, Sequential),
    Sub_Ovf => ("sub.ovf", 0xDA, None, Sequential),
    Sub_Ovf_Un => ("sub.ovf.un", 0xDB, None, Sequential),
    Endfinally => ("endfinally", 0xDC, None, EndFinally),
    Leave => ("leave", 0xDD, BranchTarget, Leave),
    Leave_S => ("leave.s", 0xDE, ShortBranchTarget, Leave),
    Stind_I => ("stind.i", 0xDF, None, Sequential),
    Conv_U => ("conv.u", 0xE0, None, Sequential),
    Arglist => ("arglist", 0xFE00, None, Sequential),
    Ceq => ("ceq", 0xFE01, None, Sequential),
    Cgt => ("cgt", 0xFE02, None, Sequential),
    Cgt_Un => ("cgt.un", 0xFE03, None, Sequential),
    Clt => ("clt", 0xFE04, None, Sequential),
    Clt_Un => ("clt.un", 0xFE05, None, Sequential),
    Ldftn => ("ldftn", 0xFE06, Method, Sequential),
    Ldvirtftn => ("ldvirtftn", 0xFE07, Method, Sequential),
    Ldarg => ("ldarg", 0xFE09, Variable, Sequential),
    Ldarga => ("ldarga", 0xFE0A, Variable, Sequential),
    Starg => ("starg", 0xFE0B, Variable, Sequential),
    Ldloc => ("ldloc", 0xFE0C, Variable, Sequential),
    Ldloca => ("ldloca", 0xFE0D, Variable, Sequential),
    Stloc => ("stloc", 0xFE0E, Variable, Sequential),
    Localloc => ("localloc", 0xFE0F, None, Sequential),
    Endfilter => ("endfilter", 0xFE11, None, EndFinally),
    Unaligned => ("unaligned.", 0xFE12, ShortInt, Meta),
    Volatile => ("volatile.", 0xFE13, None, Meta),
    Tail => ("tail.", 0xFE14, None, Meta),
    Initobj => ("initobj", 0xFE15, Type, Sequential),
    Constrained => ("constrained.", 0xFE16, Type, Meta),
    Cpblk => ("cpblk", 0xFE17, None, Sequential),
    Initblk => ("initblk", 0xFE18, None, Sequential),
    No => ("no.", 0xFE19, ShortInt, Meta),
    Rethrow => ("rethrow", 0xFE1A, None, Throw),
    Sizeof => ("sizeof", 0xFE1C, Type, Sequential),
    Refanytype => ("refanytype", 0xFE1D, None, Sequential),
    Readonly => ("readonly.", 0xFE1E, None, Meta),
}

impl OpCode {
    /// Encoded size of the opcode itself, without operand
    #[must_use]
    pub const fn opcode_size(&self) -> u32 {
        if self.code() > 0xFF {
            2
        } else {
            1
        }
    }

    /// Returns true for prefixes, which stay attached to the instruction that follows them
    #[must_use]
    pub const fn is_prefix(&self) -> bool {
        matches!(self.flow(), FlowType::Meta)
    }

    /// Returns true for instructions carrying a single branch target
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::BranchTarget | OperandType::ShortBranchTarget
        )
    }

    /// Returns true if execution never falls through to the next instruction
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        ) || matches!(self, OpCode::Jmp)
    }

    /// The long form of a short branch or short variable opcode.
    ///
    /// Returns `None` if there is no long form, which includes opcodes that already are long.
    #[must_use]
    pub const fn long_form(&self) -> Option<OpCode> {
        Some(match self {
            OpCode::Ldarg_S => OpCode::Ldarg,
            OpCode::Ldarga_S => OpCode::Ldarga,
            OpCode::Starg_S => OpCode::Starg,
            OpCode::Ldloc_S => OpCode::Ldloc,
            OpCode::Ldloca_S => OpCode::Ldloca,
            OpCode::Stloc_S => OpCode::Stloc,
            OpCode::Br_S => OpCode::Br,
            OpCode::Brfalse_S => OpCode::Brfalse,
            OpCode::Brtrue_S => OpCode::Brtrue,
            OpCode::Beq_S => OpCode::Beq,
            OpCode::Bge_S => OpCode::Bge,
            OpCode::Bgt_S => OpCode::Bgt,
            OpCode::Ble_S => OpCode::Ble,
            OpCode::Blt_S => OpCode::Blt,
            OpCode::Bne_Un_S => OpCode::Bne_Un,
            OpCode::Bge_Un_S => OpCode::Bge_Un,
            OpCode::Bgt_Un_S => OpCode::Bgt_Un,
            OpCode::Ble_Un_S => OpCode::Ble_Un,
            OpCode::Blt_Un_S => OpCode::Blt_Un,
            OpCode::Leave_S => OpCode::Leave,
            _ => return None,
        })
    }

    /// The short form of a long branch or long variable opcode
    #[must_use]
    pub const fn short_form(&self) -> Option<OpCode> {
        Some(match self {
            OpCode::Ldarg => OpCode::Ldarg_S,
            OpCode::Ldarga => OpCode::Ldarga_S,
            OpCode::Starg => OpCode::Starg_S,
            OpCode::Ldloc => OpCode::Ldloc_S,
            OpCode::Ldloca => OpCode::Ldloca_S,
            OpCode::Stloc => OpCode::Stloc_S,
            OpCode::Br => OpCode::Br_S,
            OpCode::Brfalse => OpCode::Brfalse_S,
            OpCode::Brtrue => OpCode::Brtrue_S,
            OpCode::Beq => OpCode::Beq_S,
            OpCode::Bge => OpCode::Bge_S,
            OpCode::Bgt => OpCode::Bgt_S,
            OpCode::Ble => OpCode::Ble_S,
            OpCode::Blt => OpCode::Blt_S,
            OpCode::Bne_Un => OpCode::Bne_Un_S,
            OpCode::Bge_Un => OpCode::Bge_Un_S,
            OpCode::Bgt_Un => OpCode::Bgt_Un_S,
            OpCode::Ble_Un => OpCode::Ble_Un_S,
            OpCode::Blt_Un => OpCode::Blt_Un_S,
            OpCode::Leave => OpCode::Leave_S,
            _ => return None,
        })
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_encodings_unique() {
        let codes: HashSet<u16> = OpCode::iter().map(|op| op.code()).collect();
        assert_eq!(codes.len(), OpCode::COUNT);

        let mnemonics: HashSet<&str> = OpCode::iter().map(|op| op.mnemonic()).collect();
        assert_eq!(mnemonics.len(), OpCode::COUNT);
    }

    #[test]
    fn test_short_long_forms_are_inverse() {
        for op in OpCode::iter() {
            if let Some(long) = op.long_form() {
                assert_eq!(long.short_form(), Some(op), "{}", op);
                assert_eq!(long.flow(), op.flow());
            }
        }
    }

    #[test]
    fn test_prefixes() {
        let prefixes: Vec<OpCode> = OpCode::iter().filter(OpCode::is_prefix).collect();
        assert!(prefixes.contains(&OpCode::Constrained));
        assert!(prefixes.contains(&OpCode::Tail));
        assert_eq!(prefixes.len(), 6);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(OpCode::Nop.opcode_size(), 1);
        assert_eq!(OpCode::Ldftn.opcode_size(), 2);
        assert_eq!(OpCode::Br_S.operand_type().size(), Some(1));
        assert_eq!(OpCode::Ldloc.operand_type().size(), Some(2));
        assert_eq!(OpCode::Switch.operand_type().size(), None);
        assert!(OpCode::Ret.is_terminal());
        assert!(!OpCode::Brtrue.is_terminal());
    }
}
