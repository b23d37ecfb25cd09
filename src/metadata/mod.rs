//! Module, type and member model.
//!
//! This is the representation instrumentation works on and the loader consumes. It deliberately
//! stays structural: references name their targets by scope, namespace, name and signature, and
//! only the [`crate::runtime::Domain`] turns them into exact [`identity::MemberId`] values.
//!
//! # Key Components
//!
//! - [`module`] - Editable modules, types, fields and methods
//! - [`method`] - Method bodies and exception clauses
//! - [`members`] - Flags and structural member references
//! - [`typesig`] - Type references, signatures and generic substitution
//! - [`identity`] - Exact and structural identities
//! - [`token`] - Definition tokens

pub mod identity;
pub mod members;
pub mod method;
pub mod module;
pub mod token;
pub mod typesig;
