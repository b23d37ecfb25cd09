//! # dotcas Prelude
//!
//! The types needed to build policies, instrument modules and load them into a sandbox, for
//! glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotcas operations
pub use crate::Error;

/// The result type used throughout dotcas
pub use crate::Result;

/// Configuration of instrumentation and runtime checks
pub use crate::config::{CasConfig, InstrumentConfig, RuntimeConfig};

// ================================================================================================
// Modules and Identities
// ================================================================================================

/// Editable module representation
pub use crate::metadata::module::{FieldDef, MethodDef, ModuleDef, TypeDef};

/// Member references and flags
pub use crate::metadata::members::{
    FieldAttributes, FieldRef, MethodAttributes, MethodRef, MethodSig, TypeAttributes,
};

/// Type signatures
pub use crate::metadata::typesig::{TypeRef, TypeSig};

/// Identities of loaded modules, types and members
pub use crate::metadata::identity::{LoadContextId, MemberId, ModuleId, TypeHandle};

// ================================================================================================
// Instrumentation
// ================================================================================================

/// Module instrumentation and its statistics
pub use crate::instrument::{InstrumentReport, Instrumenter};

/// Shim replacements
pub use crate::instrument::shims::ShimTable;

/// Expression-tree guarding
pub use crate::instrument::expression::{Expr, GuardExpressionVisitor};

// ================================================================================================
// Policies
// ================================================================================================

/// Policy construction
pub use crate::policy::{
    Accessibility, CasPolicy, CasPolicyBuilder, MemberAccess, ModuleBinding, TypeBinding,
};

// ================================================================================================
// Runtime
// ================================================================================================

/// Loaded modules and runtime checks
pub use crate::runtime::{CasRuntime, Domain, LoadedModule, ViolationHandler};

/// Loading sandboxed modules
pub use crate::loader::CasLoader;
