//! Loaded modules and the run-time half of the sandbox.
//!
//! # Key Components
//!
//! - [`Domain`] - Loaded modules, load contexts and reference resolution
//! - [`LateBindingResolver`] - Maps declared virtual targets to the dispatched method
//! - [`CasRuntime`] - The checks instrumented code calls
//! - [`PolicyTable`] - Policies keyed by module, evicted with their module
//! - [`ViolationHandler`] - Hook consulted on every denial

pub mod domain;
pub mod guard;
pub mod resolver;
pub mod table;
pub mod violation;

pub use domain::{Domain, LoadedModule, LoadedType};
pub use guard::CasRuntime;
pub use resolver::LateBindingResolver;
pub use table::PolicyTable;
pub use violation::{DenyViolations, RecordViolations, ViolationHandler};
