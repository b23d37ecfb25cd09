//! Shared fixtures and end-to-end tests of instrumented modules.
//!
//! - `fixtures` builds the `Shared` library, the `Sandboxed` consumer and the policy between them
//! - `machine` evaluates instrumented bodies against a [`crate::runtime::CasRuntime`]
//! - `scenarios` runs the consumer through the whole pipeline

pub mod fixtures;
pub mod machine;
