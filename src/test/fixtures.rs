//! Module factories shared by the unit tests.
//!
//! `Shared` is the library a sandboxed module reaches into, `Sandboxed` exercises one kind of
//! cross-module operation per method of `Sandboxed.Program`.

use crate::{
    assembly::{InstructionAssembler, OpCode, Operand},
    metadata::{
        members::{FieldAttributes, FieldRef, MethodAttributes, MethodRef, MethodSig},
        method::MethodBody,
        module::{FieldDef, MethodDef, ModuleDef, TypeDef},
        typesig::{TypeRef, TypeSig},
    },
    policy::{Accessibility, CasPolicy, CasPolicyBuilder, TypeBinding},
    runtime::LoadedModule,
    Result,
};

pub const SHARED_CLASS: &str = "Shared.SharedClass";
pub const SHARED_DERIVED: &str = "Shared.DerivedClass";
pub const SHARED_INTERFACE: &str = "Shared.ISharedInterface";
pub const PROGRAM: &str = "Sandboxed.Program";

/// Assembles a body, panicking on malformed test input
pub fn body(build: impl FnOnce(&mut InstructionAssembler) -> Result<()>) -> MethodBody {
    let mut asm = InstructionAssembler::new();
    build(&mut asm).unwrap();
    asm.finalize().unwrap()
}

fn returns(value: i32) -> MethodBody {
    body(|asm| {
        asm.emit(OpCode::Ldc_I4, Operand::Int32(value))?;
        asm.emit(OpCode::Ret, Operand::None)
    })
}

fn empty_body() -> MethodBody {
    body(|asm| asm.emit(OpCode::Ret, Operand::None))
}

pub fn shared_class() -> TypeSig {
    TypeSig::of(TypeRef::new("Shared", "Shared", "SharedClass"))
}

pub fn derived_class() -> TypeSig {
    TypeSig::of(TypeRef::new("Shared", "Shared", "DerivedClass"))
}

pub fn shared_interface() -> TypeSig {
    TypeSig::of(TypeRef::new("Shared", "Shared", "ISharedInterface"))
}

pub fn shared_field(name: &str) -> FieldRef {
    FieldRef::new(shared_class(), name, TypeSig::I4)
}

pub fn shared_static(name: &str) -> MethodRef {
    MethodRef::new(shared_class(), name, MethodSig::new_static(TypeSig::I4, vec![]))
}

pub fn shared_instance(declaring_type: TypeSig, name: &str) -> MethodRef {
    MethodRef::new(declaring_type, name, MethodSig::new_instance(TypeSig::I4, vec![]))
}

pub fn constructor(declaring_type: TypeSig) -> MethodRef {
    MethodRef::new(declaring_type, ".ctor", MethodSig::new_instance(TypeSig::Void, vec![]))
}

fn instance(name: &str, extra: MethodAttributes, body: Option<MethodBody>) -> MethodDef {
    let method = MethodDef::new(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | extra,
        MethodSig::new_instance(TypeSig::I4, vec![]),
    );
    match body {
        Some(body) => method.with_body(body),
        None => method,
    }
}

fn static_method(name: &str, body: MethodBody) -> MethodDef {
    MethodDef::new(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG,
        MethodSig::new_static(TypeSig::I4, vec![]),
    )
    .with_body(body)
}

/// The library module
pub fn shared_module() -> ModuleDef {
    let static_field = FieldAttributes::PUBLIC | FieldAttributes::STATIC;
    let read_allowed = body(|asm| {
        asm.emit(OpCode::Ldarg_0, Operand::None)?;
        asm.emit(OpCode::Ldfld, Operand::Field(shared_field("AllowedField")))?;
        asm.emit(OpCode::Ret, Operand::None)
    });
    let derived_constructor = body(|asm| {
        asm.emit(OpCode::Ldarg_0, Operand::None)?;
        asm.emit(OpCode::Call, Operand::Method(constructor(shared_class())))?;
        asm.emit(OpCode::Ret, Operand::None)
    });

    ModuleDef::new("Shared")
        .with_type(TypeDef::interface("Shared", "ISharedInterface").with_method(instance(
            "Run",
            MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT | MethodAttributes::ABSTRACT,
            None,
        )))
        .with_type(
            TypeDef::class("Shared", "SharedClass")
                .with_interface(shared_interface())
                .with_field(FieldDef::new("AllowedStaticField", static_field, TypeSig::I4))
                .with_field(FieldDef::new("DeniedStaticField", static_field, TypeSig::I4))
                .with_field(FieldDef::new(
                    "ReadOnlyStaticField",
                    static_field | FieldAttributes::INIT_ONLY,
                    TypeSig::I4,
                ))
                .with_field(FieldDef::new("AllowedField", FieldAttributes::PUBLIC, TypeSig::I4))
                .with_field(FieldDef::new("DeniedField", FieldAttributes::PUBLIC, TypeSig::I4))
                .with_method(MethodDef::constructor(vec![], empty_body()))
                .with_method(static_method("AllowedStaticMethod", returns(42)))
                .with_method(static_method("DeniedStaticMethod", returns(13)))
                .with_method(instance("AllowedMethod", MethodAttributes::empty(), Some(read_allowed)))
                .with_method(instance(
                    "VirtualMethod",
                    MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT,
                    Some(returns(1)),
                ))
                .with_method(instance(
                    "Run",
                    MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT | MethodAttributes::FINAL,
                    Some(returns(7)),
                )),
        )
        .with_type(
            TypeDef::class("Shared", "DerivedClass")
                .with_base(shared_class())
                .with_method(MethodDef::constructor(vec![], derived_constructor))
                .with_method(instance("VirtualMethod", MethodAttributes::VIRTUAL, Some(returns(2))))
                .with_method(
                    MethodDef::new(
                        "ToString",
                        MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG,
                        MethodSig::new_instance(TypeSig::String, vec![]),
                    )
                    .with_body(body(|asm| {
                        asm.emit(OpCode::Ldnull, Operand::None)?;
                        asm.emit(OpCode::Ret, Operand::None)
                    })),
                ),
        )
}

/// `Object::ToString`, declared in the core library
pub fn object_to_string() -> MethodRef {
    MethodRef::new(TypeSig::Object, "ToString", MethodSig::new_instance(TypeSig::String, vec![]))
}

/// Grants the `Allowed*` members, the read-only field, both constructors, the interface
/// implementation and the override of `VirtualMethod` in `DerivedClass`, but not its base
/// declaration nor the `ToString` override
pub fn shared_policy(shared: &LoadedModule) -> Result<CasPolicy> {
    let shared_class = TypeBinding::by_name(shared, SHARED_CLASS, Accessibility::None)?
        .with_constructor(Accessibility::Public)?
        .with_field("AllowedStaticField", Accessibility::Public)?
        .with_field("ReadOnlyStaticField", Accessibility::Public)?
        .with_field("AllowedField", Accessibility::Public)?
        .with_method("AllowedStaticMethod", Accessibility::Public)?
        .with_method("AllowedMethod", Accessibility::Public)?
        .with_method("Run", Accessibility::Public)?;
    let derived = TypeBinding::by_name(shared, SHARED_DERIVED, Accessibility::None)?
        .with_constructor(Accessibility::Public)?
        .with_method("VirtualMethod", Accessibility::Public)?;

    Ok(CasPolicyBuilder::new().allow(shared_class).allow(derived).build())
}

fn program_method(name: &str, build: impl FnOnce(&mut InstructionAssembler) -> Result<()>) -> MethodDef {
    static_method(name, body(build))
}

fn new_object(asm: &mut InstructionAssembler, declaring_type: TypeSig) -> Result<()> {
    asm.emit(OpCode::Newobj, Operand::Method(constructor(declaring_type)))
}

/// The sandboxed module, one guarded operation per method
pub fn sandboxed_module() -> ModuleDef {
    let program = TypeDef::class("Sandboxed", "Program")
        .with_method(program_method("ReadAllowed", |asm| {
            asm.emit(OpCode::Ldsfld, Operand::Field(shared_field("AllowedStaticField")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("ReadDenied", |asm| {
            asm.emit(OpCode::Ldsfld, Operand::Field(shared_field("DeniedStaticField")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("WriteAllowed", |asm| {
            asm.emit(OpCode::Ldc_I4_5, Operand::None)?;
            asm.emit(OpCode::Stsfld, Operand::Field(shared_field("AllowedStaticField")))?;
            asm.emit(OpCode::Ldsfld, Operand::Field(shared_field("AllowedStaticField")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("WriteReadOnly", |asm| {
            asm.emit(OpCode::Ldc_I4_1, Operand::None)?;
            asm.emit(OpCode::Stsfld, Operand::Field(shared_field("ReadOnlyStaticField")))?;
            asm.emit(OpCode::Ldc_I4_0, Operand::None)?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("CallAllowed", |asm| {
            asm.emit(OpCode::Call, Operand::Method(shared_static("AllowedStaticMethod")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("CallDenied", |asm| {
            asm.emit(OpCode::Call, Operand::Method(shared_static("DeniedStaticMethod")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("NewAndCall", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(
                OpCode::Callvirt,
                Operand::Method(shared_instance(shared_class(), "AllowedMethod")),
            )?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("ReadInstanceDenied", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(OpCode::Ldfld, Operand::Field(shared_field("DeniedField")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("WriteInstanceAllowed", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(OpCode::Dup, Operand::None)?;
            asm.emit(OpCode::Ldc_I4, Operand::Int32(9))?;
            asm.emit(OpCode::Stfld, Operand::Field(shared_field("AllowedField")))?;
            asm.emit(OpCode::Ldfld, Operand::Field(shared_field("AllowedField")))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("WriteInstanceDenied", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(OpCode::Ldc_I4, Operand::Int32(9))?;
            asm.emit(OpCode::Stfld, Operand::Field(shared_field("DeniedField")))?;
            asm.emit(OpCode::Ldc_I4_0, Operand::None)?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("VirtualOnDerived", |asm| {
            new_object(asm, derived_class())?;
            asm.emit(
                OpCode::Callvirt,
                Operand::Method(shared_instance(shared_class(), "VirtualMethod")),
            )?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("VirtualOnBase", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(
                OpCode::Callvirt,
                Operand::Method(shared_instance(shared_class(), "VirtualMethod")),
            )?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("InterfaceCall", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(
                OpCode::Callvirt,
                Operand::Method(shared_instance(shared_interface(), "Run")),
            )?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("ToStringOnDerived", |asm| {
            new_object(asm, derived_class())?;
            asm.emit(OpCode::Callvirt, Operand::Method(object_to_string()))?;
            asm.emit(OpCode::Pop, Operand::None)?;
            asm.emit(OpCode::Ldc_I4_1, Operand::None)?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("ToStringOnBase", |asm| {
            new_object(asm, shared_class())?;
            asm.emit(OpCode::Callvirt, Operand::Method(object_to_string()))?;
            asm.emit(OpCode::Pop, Operand::None)?;
            asm.emit(OpCode::Ldc_I4_1, Operand::None)?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("LoopCallAllowed", |asm| {
            let sum = asm.declare_local(TypeSig::I4);
            let counter = asm.declare_local(TypeSig::I4);
            asm.emit(OpCode::Ldc_I4_0, Operand::None)?;
            asm.emit(OpCode::Stloc, Operand::Local(sum))?;
            asm.emit(OpCode::Ldc_I4_3, Operand::None)?;
            asm.emit(OpCode::Stloc, Operand::Local(counter))?;
            asm.define_label("loop")?;
            asm.emit(OpCode::Call, Operand::Method(shared_static("AllowedStaticMethod")))?;
            asm.emit(OpCode::Ldloc, Operand::Local(sum))?;
            asm.emit(OpCode::Add, Operand::None)?;
            asm.emit(OpCode::Stloc, Operand::Local(sum))?;
            asm.emit(OpCode::Ldloc, Operand::Local(counter))?;
            asm.emit(OpCode::Ldc_I4_1, Operand::None)?;
            asm.emit(OpCode::Sub, Operand::None)?;
            asm.emit(OpCode::Dup, Operand::None)?;
            asm.emit(OpCode::Stloc, Operand::Local(counter))?;
            asm.emit_branch(OpCode::Brtrue, "loop")?;
            asm.emit(OpCode::Ldloc, Operand::Local(sum))?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(program_method("LocalCall", |asm| {
            asm.emit(
                OpCode::Call,
                Operand::Method(MethodRef::new(
                    TypeSig::of(TypeRef::new("Sandboxed", "Sandboxed", "Program")),
                    "Helper",
                    MethodSig::new_static(TypeSig::I4, vec![]),
                )),
            )?;
            asm.emit(OpCode::Ret, Operand::None)
        }))
        .with_method(static_method("Helper", returns(3)));

    ModuleDef::new("Sandboxed").with_type(program)
}
