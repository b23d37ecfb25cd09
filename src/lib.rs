// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotcas
//!
//! [![Crates.io](https://img.shields.io/crates/v/dotcas.svg)](https://crates.io/crates/dotcas)
//! [![Documentation](https://docs.rs/dotcas/badge.svg)](https://docs.rs/dotcas)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/dotcas/blob/main/LICENSE-APACHE)
//!
//! Code-access-security sandboxing for .NET modules through load-time CIL rewriting.
//!
//! `dotcas` takes a module at instruction level before it is loaded and inserts a capability
//! check in front of every field access, call, object construction and function-pointer load
//! that reaches into another module. Each check is two-tiered: a per-module cached flag answers
//! the common case with a single static field load, and only when the flag is not set does the
//! inserted code call the full runtime assertion, which resolves virtual dispatch against the
//! actual receiver and consults the module's [`policy::CasPolicy`].
//!
//! ## Features
//!
//! - **Instruction rewriting** - Insert and replace instructions with branch, switch and
//!   exception-region fix-up
//! - **Cached guards** - One static flag per distinct member and access kind, initialized once
//! - **Late binding** - Virtual and interface calls are judged on the method that will run
//! - **Shims** - Reflection, activation and delegate binding are redirected to policy-aware
//!   replacements
//! - **Expression trees** - The same guards applied to trees compiled at run time
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotcas::prelude::*;
//!
//! # fn example(library: ModuleDef, plugin: ModuleDef) -> dotcas::Result<()> {
//! let domain = Arc::new(Domain::new());
//! let library = domain.load(library, LoadContextId::DEFAULT)?;
//!
//! let policy = CasPolicyBuilder::new()
//!     .allow(TypeBinding::by_name(&library, "Library.Api", Accessibility::Public)?)
//!     .build();
//!
//! let loader = CasLoader::from_config(domain, policy, CasConfig::default());
//! let (plugin, report) = loader.load(plugin)?;
//! println!("{}: {} guarded sites", plugin.name(), report.guarded_sites);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - Editable modules, references, signatures and member identities
//! - [`assembly`] - CIL opcodes, instructions, assembly and control flow
//! - [`instrument`] - The load-time rewriter and guard emission
//! - [`policy`] - Allow-lists and the bindings they are built from
//! - [`runtime`] - Loaded modules, late binding and the runtime checks
//! - [`loader`] - Instrument, load and register in one step
//! - [`Error`] and [`Result`] - Error handling

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dotcas::prelude::*;
///
/// let instrumenter = Instrumenter::new(InstrumentConfig::default());
/// let mut module = ModuleDef::new("Plugin");
/// let report = instrumenter.instrument(&mut module)?;
/// # Ok::<(), dotcas::Error>(())
/// ```
pub mod prelude;

/// CIL instructions: opcodes, operands, assembly, layout and control flow.
///
/// # Key Types
///
/// - [`assembly::OpCode`] - Every CIL opcode with its operand kind and flow behavior
/// - [`assembly::Instruction`] - An instruction with a stable identity
/// - [`assembly::InstructionAssembler`] - Builds method bodies with labels
/// - [`assembly::ControlFlowGraph`] - Basic blocks of a method body
pub mod assembly;

/// Configuration of instrumentation and runtime checks.
pub mod config;

/// Load-time instrumentation.
pub mod instrument;

/// Loading sandboxed modules.
pub mod loader;

/// Modules, types, members and signatures at the level instrumentation works on.
///
/// # Key Components
///
/// - [`metadata::module`] - Editable module, type, field and method definitions
/// - [`metadata::members`] - Field and method references and their flags
/// - [`metadata::typesig`] - Type signatures and generic substitution
/// - [`metadata::identity`] - Exact and structural member identities
/// - [`metadata::method`] - Method bodies and exception handlers
pub mod metadata;

/// Allow-lists of external members.
pub mod policy;

/// Loaded modules and the runtime checks.
pub mod runtime;

/// `dotcas` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotcas` Error type
///
/// The main error type for all operations in this crate. Use [`Error::is_security_error`] to
/// tell sandbox denials from instrumentation and loading failures.
pub use error::Error;

pub use config::{CasConfig, InstrumentConfig, RuntimeConfig};
pub use instrument::{InstrumentReport, Instrumenter};
pub use loader::CasLoader;
pub use policy::{CasPolicy, CasPolicyBuilder};
pub use runtime::{CasRuntime, Domain};
