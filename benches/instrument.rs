//! Benchmarks for load-time instrumentation and runtime decisions.
//!
//! - Rewriting a body with many cross-module field reads and calls
//! - Rewriting the same body with macro optimization disabled
//! - The cached and the asserted path of a field decision

extern crate dotcas;

use criterion::{criterion_group, criterion_main, Criterion};
use dotcas::{
    assembly::{InstructionAssembler, OpCode, Operand},
    prelude::*,
};
use std::{hint::black_box, sync::Arc};

fn lib_type() -> TypeSig {
    TypeSig::of(TypeRef::new("Lib", "Lib", "Values"))
}

fn lib_module() -> ModuleDef {
    let mut values = TypeDef::class("Lib", "Values");
    for i in 0..16 {
        values = values.with_field(FieldDef::new(
            format!("F{}", i),
            FieldAttributes::PUBLIC | FieldAttributes::STATIC,
            TypeSig::I4,
        ));
    }
    ModuleDef::new("Lib").with_type(values)
}

/// A consumer whose single method sums 16 library fields, `rounds` times over
fn consumer_module(rounds: usize) -> ModuleDef {
    let mut asm = InstructionAssembler::new();
    asm.emit(OpCode::Ldc_I4_0, Operand::None).unwrap();
    for _ in 0..rounds {
        for i in 0..16 {
            let field = FieldRef::new(lib_type(), format!("F{}", i), TypeSig::I4);
            asm.emit(OpCode::Ldsfld, Operand::Field(field)).unwrap();
            asm.emit(OpCode::Add, Operand::None).unwrap();
        }
    }
    asm.emit(OpCode::Ret, Operand::None).unwrap();

    let method = MethodDef::new(
        "Sum",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        MethodSig::new_static(TypeSig::I4, vec![]),
    )
    .with_body(asm.finalize().unwrap());
    ModuleDef::new("Consumer").with_type(TypeDef::class("Consumer", "Program").with_method(method))
}

/// Benchmark instrumenting 256 field reads with the default configuration.
fn bench_instrument_default(c: &mut Criterion) {
    let module = consumer_module(16);
    let instrumenter = Instrumenter::default();

    c.bench_function("instrument_256_reads", |b| {
        b.iter(|| {
            let mut module = module.clone();
            let report = instrumenter.instrument(black_box(&mut module)).unwrap();
            black_box(report)
        });
    });
}

/// Benchmark the same body without the short-form post-pass.
fn bench_instrument_minimal(c: &mut Criterion) {
    let module = consumer_module(16);
    let instrumenter = Instrumenter::new(InstrumentConfig::minimal());

    c.bench_function("instrument_256_reads_minimal", |b| {
        b.iter(|| {
            let mut module = module.clone();
            let report = instrumenter.instrument(black_box(&mut module)).unwrap();
            black_box(report)
        });
    });
}

/// Benchmark a granted and a denied field decision.
fn bench_field_decision(c: &mut Criterion) {
    let domain = Arc::new(Domain::new());
    let lib = domain.load(lib_module(), LoadContextId::DEFAULT).unwrap();
    let values = lib.type_index("Lib.Values").unwrap();
    let granted = lib.find_field(values, "F0").unwrap();
    let denied = lib.find_field(values, "F1").unwrap();

    let policy = CasPolicyBuilder::new().allow_member(&lib, granted).build();
    let loader = CasLoader::from_config(domain, policy, CasConfig::default());
    let (consumer, _) = loader.load(consumer_module(1)).unwrap();
    let runtime = loader.runtime();

    c.bench_function("can_read_field_granted", |b| {
        b.iter(|| black_box(runtime.can_read_field(black_box(consumer.id), granted).unwrap()));
    });
    c.bench_function("assert_can_read_field_denied", |b| {
        b.iter(|| black_box(runtime.assert_can_read_field(black_box(consumer.id), denied).is_err()));
    });
}

criterion_group!(
    benches,
    bench_instrument_default,
    bench_instrument_minimal,
    bench_field_decision
);
criterion_main!(benches);
