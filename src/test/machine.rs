//! A small reference evaluator for instrumented method bodies.
//!
//! Executes the instruction subset the fixtures and the inserted guards use against a
//! [`Domain`] and a [`CasRuntime`]: integers, locals, static and instance fields, calls with
//! virtual dispatch, object construction, type initializers and `ldtoken` handles. Calls into
//! the runtime guard surface are routed to the matching [`CasRuntime`] operation with the
//! executing module as caller.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    assembly::{expand_macro, InstrId, OpCode, Operand},
    instrument::references::RUNTIME_SCOPE,
    metadata::{
        identity::{MemberId, ModuleId, TypeHandle},
        members::{FieldRef, MethodRef, TokenRef},
        typesig::{TypeSig, CORE_LIBRARY},
    },
    runtime::{CasRuntime, Domain, LateBindingResolver, LoadedModule},
    Error, Result,
};

const STEP_LIMIT: usize = 100_000;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    I4(i32),
    Object(usize),
    Token(TokenRef),
}

impl Value {
    fn as_i32(&self) -> Result<i32> {
        match self {
            Value::I4(value) => Ok(*value),
            Value::Null => Ok(0),
            other => Err(Error::Error(format!("expected an integer, found {:?}", other))),
        }
    }

    fn default_for(sig: &TypeSig) -> Value {
        match sig {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4 => Value::I4(0),
            _ => Value::Null,
        }
    }
}

struct HeapObject {
    type_handle: TypeHandle,
    fields: HashMap<MemberId, Value>,
}

pub struct Machine<'r> {
    runtime: &'r CasRuntime,
    resolver: LateBindingResolver,
    statics: HashMap<MemberId, Value>,
    heap: Vec<HeapObject>,
    initialized: HashSet<TypeHandle>,
    steps: usize,
    /// Full runtime assertions executed, the slow path of a guard
    pub assertions: usize,
    /// Guard-flag decisions made by type initializers
    pub decisions: usize,
}

impl<'r> Machine<'r> {
    pub fn new(runtime: &'r CasRuntime) -> Self {
        Machine {
            runtime,
            resolver: LateBindingResolver::new(runtime.domain().clone()),
            statics: HashMap::new(),
            heap: Vec::new(),
            initialized: HashSet::new(),
            steps: 0,
            assertions: 0,
            decisions: 0,
        }
    }

    fn domain(&self) -> &Arc<Domain> {
        self.runtime.domain()
    }

    /// Runs the static method `name` of type `type_name` in module `module`
    pub fn invoke(&mut self, module: &str, type_name: &str, name: &str, args: Vec<Value>) -> Result<Value> {
        let loaded = self
            .domain()
            .module_by_name(module)
            .ok_or_else(|| Error::Error(format!("module {} is not loaded", module)))?;
        let index = loaded
            .type_index(type_name)
            .ok_or_else(|| Error::TypeNotFound(type_name.to_string()))?;
        let id = loaded
            .method_ids(index)
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::MemberNotFound(name.to_string()))?;
        self.execute(id, args)
    }

    /// Current value of a static field
    pub fn static_value(&self, field: MemberId) -> Option<&Value> {
        self.statics.get(&field)
    }

    /// Current value of an instance field of the object allocated `object`-th
    pub fn instance_value(&self, object: usize, field: MemberId) -> Option<&Value> {
        self.heap.get(object)?.fields.get(&field)
    }

    /// Number of objects allocated so far
    pub fn objects(&self) -> usize {
        self.heap.len()
    }

    fn execute(&mut self, method: MemberId, args: Vec<Value>) -> Result<Value> {
        let module = self.domain().module(method.module)?;
        let (owner, def) = module.method(method).ok_or(Error::InvalidMember(method))?;
        self.ensure_initialized(module.type_handle(owner))?;

        let body = def
            .body
            .as_ref()
            .ok_or_else(|| Error::Error(format!("{} has no body", def.name)))?;
        let returns_value = def.sig.return_type != TypeSig::Void;
        let positions: HashMap<InstrId, usize> = body
            .instructions
            .iter()
            .enumerate()
            .map(|(pos, i)| (i.id, pos))
            .collect();
        let jump = |target: &InstrId| -> Result<usize> {
            positions
                .get(target)
                .copied()
                .ok_or_else(|| Error::Error(format!("branch to missing {:?}", target)))
        };

        let mut args = args;
        let mut locals: Vec<Value> = body.locals.iter().map(Value::default_for).collect();
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;

        loop {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(Error::Error("step limit exceeded".to_string()));
            }
            let mut instruction = body
                .instructions
                .get(pc)
                .cloned()
                .ok_or_else(|| Error::Error("fell off the end of the body".to_string()))?;
            expand_macro(&mut instruction);
            pc += 1;

            match (instruction.opcode, &instruction.operand) {
                (OpCode::Nop | OpCode::Constrained, _) => {}
                (OpCode::Ldnull, _) => stack.push(Value::Null),
                (OpCode::Ldc_I4_M1, _) => stack.push(Value::I4(-1)),
                (OpCode::Ldc_I4_0, _) => stack.push(Value::I4(0)),
                (OpCode::Ldc_I4_1, _) => stack.push(Value::I4(1)),
                (OpCode::Ldc_I4_2, _) => stack.push(Value::I4(2)),
                (OpCode::Ldc_I4_3, _) => stack.push(Value::I4(3)),
                (OpCode::Ldc_I4_4, _) => stack.push(Value::I4(4)),
                (OpCode::Ldc_I4_5, _) => stack.push(Value::I4(5)),
                (OpCode::Ldc_I4_6, _) => stack.push(Value::I4(6)),
                (OpCode::Ldc_I4_7, _) => stack.push(Value::I4(7)),
                (OpCode::Ldc_I4_8, _) => stack.push(Value::I4(8)),
                (OpCode::Ldc_I4 | OpCode::Ldc_I4_S, Operand::Int32(value)) => stack.push(Value::I4(*value)),
                (OpCode::Ldarg_0, _) => stack.push(argument(&args, 0)?),
                (OpCode::Ldarg_1, _) => stack.push(argument(&args, 1)?),
                (OpCode::Ldarg_2, _) => stack.push(argument(&args, 2)?),
                (OpCode::Ldarg_3, _) => stack.push(argument(&args, 3)?),
                (OpCode::Ldarg, Operand::Arg(index)) => stack.push(argument(&args, usize::from(*index))?),
                (OpCode::Starg, Operand::Arg(index)) => {
                    let value = pop(&mut stack)?;
                    let slot = args
                        .get_mut(usize::from(*index))
                        .ok_or_else(|| Error::Error(format!("no argument {}", index)))?;
                    *slot = value;
                }
                (OpCode::Ldloc, Operand::Local(index)) => {
                    let value = locals
                        .get(usize::from(*index))
                        .cloned()
                        .ok_or_else(|| Error::Error(format!("no local {}", index)))?;
                    stack.push(value);
                }
                (OpCode::Stloc, Operand::Local(index)) => {
                    let value = pop(&mut stack)?;
                    let slot = locals
                        .get_mut(usize::from(*index))
                        .ok_or_else(|| Error::Error(format!("no local {}", index)))?;
                    *slot = value;
                }
                (OpCode::Pop, _) => {
                    pop(&mut stack)?;
                }
                (OpCode::Dup, _) => {
                    let top = stack
                        .last()
                        .cloned()
                        .ok_or_else(|| Error::Error("stack underflow".to_string()))?;
                    stack.push(top);
                }
                (OpCode::Add | OpCode::Sub | OpCode::And, _) => {
                    let right = pop(&mut stack)?.as_i32()?;
                    let left = pop(&mut stack)?.as_i32()?;
                    stack.push(Value::I4(match instruction.opcode {
                        OpCode::Add => left.wrapping_add(right),
                        OpCode::Sub => left.wrapping_sub(right),
                        _ => left & right,
                    }));
                }
                (OpCode::Br, Operand::Target(target)) => pc = jump(target)?,
                (OpCode::Brtrue, Operand::Target(target)) => {
                    if is_true(&pop(&mut stack)?) {
                        pc = jump(target)?;
                    }
                }
                (OpCode::Brfalse, Operand::Target(target)) => {
                    if !is_true(&pop(&mut stack)?) {
                        pc = jump(target)?;
                    }
                }
                (OpCode::Ret, _) => {
                    return if returns_value { pop(&mut stack) } else { Ok(Value::Null) };
                }
                (OpCode::Ldtoken, Operand::Token(token)) => stack.push(Value::Token(token.clone())),
                (OpCode::Ldsfld, Operand::Field(field)) => {
                    let (id, field_type) = self.static_field(field)?;
                    let value = self
                        .statics
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(&field_type));
                    stack.push(value);
                }
                (OpCode::Stsfld, Operand::Field(field)) => {
                    let (id, _) = self.static_field(field)?;
                    let value = pop(&mut stack)?;
                    self.statics.insert(id, value);
                }
                (OpCode::Ldfld, Operand::Field(field)) => {
                    let id = self.domain().resolve_field(field)?;
                    let object = self.object(&pop(&mut stack)?)?;
                    let value = self.heap[object]
                        .fields
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(&field.field_type));
                    stack.push(value);
                }
                (OpCode::Stfld, Operand::Field(field)) => {
                    let id = self.domain().resolve_field(field)?;
                    let value = pop(&mut stack)?;
                    let object = self.object(&pop(&mut stack)?)?;
                    self.heap[object].fields.insert(id, value);
                }
                (OpCode::Call | OpCode::Callvirt, Operand::Method(target)) => {
                    let count = target.sig.params.len() + usize::from(target.sig.has_this);
                    let call_args = pop_n(&mut stack, count)?;
                    let result = if target.scope() == Some(RUNTIME_SCOPE) {
                        self.runtime_call(module.id, target, call_args)?
                    } else {
                        let virtual_call = instruction.opcode == OpCode::Callvirt && target.sig.has_this;
                        self.call(target, call_args, virtual_call)?
                    };
                    if target.sig.return_type != TypeSig::Void {
                        stack.push(result);
                    }
                }
                (OpCode::Newobj, Operand::Method(constructor)) => {
                    let call_args = pop_n(&mut stack, constructor.sig.params.len())?;
                    let type_handle = self.domain().resolve_type(&constructor.declaring_type)?;
                    self.ensure_initialized(type_handle)?;
                    self.heap.push(HeapObject {
                        type_handle,
                        fields: HashMap::new(),
                    });
                    let object = Value::Object(self.heap.len() - 1);
                    let mut ctor_args = vec![object.clone()];
                    ctor_args.extend(call_args);
                    self.call(constructor, ctor_args, false)?;
                    stack.push(object);
                }
                (opcode, _) => {
                    return Err(Error::Error(format!("unsupported instruction {}", opcode)));
                }
            }
        }
    }

    fn call(&mut self, target: &MethodRef, args: Vec<Value>, virtual_call: bool) -> Result<Value> {
        let receiver = if virtual_call {
            match args.first() {
                Some(Value::Object(object)) => Some(self.heap[*object].type_handle),
                _ => return Err(Error::Error(format!("null receiver calling {}", target))),
            }
        } else {
            None
        };
        let id = match self.domain().resolve_method(target) {
            Ok(id) => self.resolver.resolve(receiver, id)?,
            Err(err) if target.scope() != Some(CORE_LIBRARY) => return Err(err),
            // core library bodies are not available, only loaded overrides run
            Err(_) => match receiver {
                Some(receiver) => match self.resolver.resolve_unloaded(receiver, target)? {
                    Some(id) => id,
                    None => return Ok(Value::default_for(&target.sig.return_type)),
                },
                None => return Ok(Value::default_for(&target.sig.return_type)),
            },
        };
        self.execute(id, args)
    }

    fn static_field(&mut self, field: &FieldRef) -> Result<(MemberId, TypeSig)> {
        let id = self.domain().resolve_field(field)?;
        let module = self.domain().module(id.module)?;
        let (owner, def) = module.field(id).ok_or(Error::InvalidMember(id))?;
        let field_type = def.field_type.clone();
        self.ensure_initialized(module.type_handle(owner))?;
        Ok((id, field_type))
    }

    /// Runs the type initializer of `handle` once
    fn ensure_initialized(&mut self, handle: TypeHandle) -> Result<()> {
        if !self.initialized.insert(handle) {
            return Ok(());
        }
        let (module, index): (Arc<LoadedModule>, usize) = self.domain().type_entry(handle)?;
        let initializer = module
            .method_ids(index)
            .find(|(_, m)| m.name == ".cctor")
            .map(|(id, _)| id);
        match initializer {
            Some(id) => self.execute(id, Vec::new()).map(|_| ()),
            None => Ok(()),
        }
    }

    fn object(&self, value: &Value) -> Result<usize> {
        match value {
            Value::Object(object) if *object < self.heap.len() => Ok(*object),
            other => Err(Error::Error(format!("expected an object, found {:?}", other))),
        }
    }

    fn receiver_type(&self, value: &Value) -> Option<TypeHandle> {
        match value {
            Value::Object(object) => self.heap.get(*object).map(|o| o.type_handle),
            _ => None,
        }
    }

    fn member(&self, value: &Value) -> Result<MemberId> {
        match value {
            Value::Token(TokenRef::Field(field)) => self.domain().resolve_field(field),
            Value::Token(TokenRef::Method(method)) => self.domain().resolve_method(method),
            other => Err(Error::Error(format!("expected a member handle, found {:?}", other))),
        }
    }

    fn runtime_call(&mut self, caller: ModuleId, target: &MethodRef, args: Vec<Value>) -> Result<Value> {
        let runtime = self.runtime;
        let decision = |value: bool| Value::I4(i32::from(value));
        match (target.name.as_str(), args.as_slice()) {
            ("CanReadField", [member, _]) => {
                self.decisions += 1;
                Ok(decision(runtime.can_read_field(caller, self.member(member)?)?))
            }
            ("CanWriteField", [member, _]) => {
                self.decisions += 1;
                Ok(decision(runtime.can_write_field(caller, self.member(member)?)?))
            }
            ("CanCallAlways", [Value::Token(TokenRef::Method(method)), _]) => {
                self.decisions += 1;
                Ok(decision(runtime.can_call_always_ref(caller, method)?))
            }
            ("AssertCanReadField", [member, _]) => {
                self.assertions += 1;
                runtime.assert_can_read_field(caller, self.member(member)?)?;
                Ok(Value::Null)
            }
            ("AssertCanWriteField", [member, _]) => {
                self.assertions += 1;
                runtime.assert_can_write_field(caller, self.member(member)?)?;
                Ok(Value::Null)
            }
            ("AssertCanCall", [receiver, Value::Token(TokenRef::Method(method)), _]) => {
                self.assertions += 1;
                runtime.assert_can_call_ref(caller, self.receiver_type(receiver), method)?;
                Ok(Value::Null)
            }
            ("AssertCanCallConstrained", [receiver, Value::Token(TokenRef::Method(method)), _]) => {
                self.assertions += 1;
                let constraint = target
                    .generic_args
                    .first()
                    .and_then(|sig| self.domain().resolve_type(sig).ok())
                    .or_else(|| self.receiver_type(receiver));
                runtime.assert_can_call_ref(caller, constraint, method)?;
                Ok(Value::Null)
            }
            ("DenyShimInvocation", [Value::Token(TokenRef::Method(method)), _]) => {
                runtime.deny_shim_invocation(caller, method)?;
                Ok(Value::Null)
            }
            _ => Err(Error::Error(format!("unknown runtime entry point {}", target))),
        }
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| Error::Error("stack underflow".to_string()))
}

fn pop_n(stack: &mut Vec<Value>, count: usize) -> Result<Vec<Value>> {
    if stack.len() < count {
        return Err(Error::Error("stack underflow".to_string()));
    }
    Ok(stack.split_off(stack.len() - count))
}

fn argument(args: &[Value], index: usize) -> Result<Value> {
    args.get(index)
        .cloned()
        .ok_or_else(|| Error::Error(format!("no argument {}", index)))
}

fn is_true(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::I4(0))
}
