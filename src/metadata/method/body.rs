use crate::{
    assembly::{compute_offsets, InstrId, Instruction, OpCode, Operand},
    metadata::{method::ExceptionHandler, typesig::TypeSig},
    Result,
};

/// The editable body of a method: instructions, local slots and exception clauses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodBody {
    /// Instructions in layout order
    pub instructions: Vec<Instruction>,
    /// Local variable types, by slot
    pub locals: Vec<TypeSig>,
    /// Exception-handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Locals are zero-initialized on entry
    pub init_locals: bool,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    next_id: u32,
}

impl MethodBody {
    /// Creates a body from instructions, assigning byte offsets
    #[must_use]
    pub fn new(mut instructions: Vec<Instruction>, locals: Vec<TypeSig>, max_stack: u16) -> Self {
        compute_offsets(&mut instructions);
        let next_id = instructions
            .iter()
            .map(|i| i.id.0 + 1)
            .max()
            .unwrap_or(0);

        MethodBody {
            instructions,
            locals,
            exception_handlers: Vec::new(),
            init_locals: false,
            max_stack,
            next_id,
        }
    }

    /// Creates a new instruction with a fresh id, not yet placed in the body
    ///
    /// # Errors
    /// Returns an error if the operand does not fit the opcode.
    pub fn create(&mut self, opcode: OpCode, operand: Operand) -> Result<Instruction> {
        let instruction = Instruction::new(InstrId(self.next_id), opcode, operand)?;
        self.next_id += 1;
        Ok(instruction)
    }

    /// Appends a local slot and returns its index
    pub fn add_local(&mut self, local_type: TypeSig) -> u16 {
        self.locals.push(local_type);
        (self.locals.len() - 1) as u16
    }

    /// Total encoded size of the instructions
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.instructions.iter().map(Instruction::size).sum()
    }

    /// Looks up an instruction by id
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    /// Index of an instruction in layout order
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id == id)
    }

    /// Recomputes byte offsets after editing
    pub fn update_offsets(&mut self) -> u32 {
        compute_offsets(&mut self.instructions)
    }
}
