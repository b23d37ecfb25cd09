//! Allow-lists of external members.
//!
//! A [`CasPolicy`] lists the fields and methods of other modules that a sandboxed module may use
//! without further checks. Policies are assembled from bindings against already loaded modules,
//! so every grant names an exact member definition.
//!
//! # Key Components
//!
//! - [`CasPolicyBuilder`] - Accumulates allow and deny operations
//! - [`TypeBinding`] / [`ModuleBinding`] - Grant sets derived from loaded types and modules
//! - [`Accessibility`] - Requested visibility level of a binding
//! - [`CasPolicy`] - The frozen allow-list
//! - [`AccessDecision`] - Pluggable admit rule over the grant table

pub mod accessibility;
pub mod binding;
pub mod builder;
pub mod grants;

pub use accessibility::Accessibility;
pub use binding::{ModuleBinding, TypeBinding};
pub use builder::CasPolicyBuilder;
pub use grants::{AccessDecision, CasPolicy, MemberAccess, MembershipDecision};
