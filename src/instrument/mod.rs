//! Load-time instrumentation of untrusted modules.
//!
//! This module rewrites every method body of a consumer module so that each operation reaching
//! into another module is preceded by a capability check. Checks come in two tiers: a cached
//! per-module flag computed once by the guard type's static constructor, and a full assertion
//! through [`crate::runtime::CasRuntime`] when the flag is not set.
//!
//! # Architecture
//!
//! - [`rewriter`] edits one method body with branch and region fix-up
//! - [`site`] classifies instructions into [`site::AccessSite`]s
//! - [`guard`] allocates guard flags and synthesizes the guard type
//! - [`patcher`] emits the guard sequences
//! - [`shims`] redirects dangerous library entry points
//! - [`expression`] applies the same guards to expression trees compiled at run time
//!
//! # Key Components
//!
//! - [`Instrumenter`] - Instruments whole modules
//! - [`InstrumentReport`] - What a pass did
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotcas::prelude::*;
//!
//! # fn example(mut module: ModuleDef) -> dotcas::Result<()> {
//! let instrumenter = Instrumenter::new(InstrumentConfig::default());
//! let report = instrumenter.instrument(&mut module)?;
//! println!("{} guarded sites", report.guarded_sites);
//! # Ok(())
//! # }
//! ```

pub mod expression;
pub mod guard;
pub mod patcher;
pub mod references;
pub mod rewriter;
pub mod shims;
pub mod site;

use crate::{
    config::InstrumentConfig,
    instrument::{
        guard::{GuardWriter, GUARD_NAMESPACE, GUARD_TYPE_NAME},
        patcher::Patcher,
        references::RuntimeReferences,
        shims::ShimTable,
    },
    metadata::module::ModuleDef,
    Result,
};

/// Statistics of one instrumentation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentReport {
    /// Method bodies that went through the rewriter
    pub methods_rewritten: usize,
    /// Field accesses, calls and pointer loads that received a guard
    pub guarded_sites: usize,
    /// Calls redirected to a shim
    pub shimmed_calls: usize,
    /// Function-pointer loads of shimmed methods, now always denied
    pub denied_pointer_loads: usize,
    /// Member references left alone because they are exempt
    pub skipped_sites: usize,
    /// Distinct guard flags in the synthesized guard type
    pub guard_flags: usize,
}

impl std::ops::AddAssign for InstrumentReport {
    fn add_assign(&mut self, other: Self) {
        self.methods_rewritten += other.methods_rewritten;
        self.guarded_sites += other.guarded_sites;
        self.shimmed_calls += other.shimmed_calls;
        self.denied_pointer_loads += other.denied_pointer_loads;
        self.skipped_sites += other.skipped_sites;
        self.guard_flags += other.guard_flags;
    }
}

/// Instruments modules against the runtime guard surface.
#[derive(Debug, Clone)]
pub struct Instrumenter {
    config: InstrumentConfig,
    references: RuntimeReferences,
    shims: ShimTable,
}

impl Instrumenter {
    /// Creates an instrumenter with the default shim table
    #[must_use]
    pub fn new(config: InstrumentConfig) -> Self {
        Instrumenter {
            config,
            references: RuntimeReferences::new(),
            shims: ShimTable::with_default_shims(),
        }
    }

    /// Replaces the shim table
    #[must_use]
    pub fn with_shims(mut self, shims: ShimTable) -> Self {
        self.shims = shims;
        self
    }

    /// The rewrite settings
    #[must_use]
    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// The shim table
    #[must_use]
    pub fn shims(&self) -> &ShimTable {
        &self.shims
    }

    /// Instruments every method of `module` in place and adds its guard type.
    ///
    /// On error the module is left partially rewritten and must not be loaded.
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] if the module already carries a guard type, writes
    /// a guard flag, or contains a body that cannot be rewritten.
    pub fn instrument(&self, module: &mut ModuleDef) -> Result<InstrumentReport> {
        if module.find_type(GUARD_NAMESPACE, GUARD_TYPE_NAME).is_some() {
            return Err(rewrite_error!(
                "module {} already contains {}.{}",
                module.name,
                GUARD_NAMESPACE,
                GUARD_TYPE_NAME
            ));
        }

        let scope = module.name.clone();
        let patcher = Patcher {
            scope: &scope,
            config: &self.config,
            references: &self.references,
            shims: &self.shims,
        };
        let mut guards = GuardWriter::new(&scope, &self.references);
        let mut report = InstrumentReport::default();

        module.for_each_method_mut(|_, method| patcher.patch_method(method, &mut guards, &mut report))?;

        report.guard_flags = guards.len();
        if let Some(guard_type) = guards.finish()? {
            module.types.push(guard_type);
        }

        log::debug!(
            "instrumented {}: {} methods, {} guards over {} flags, {} shimmed calls",
            scope,
            report.methods_rewritten,
            report.guarded_sites,
            report.guard_flags,
            report.shimmed_calls
        );
        Ok(report)
    }
}

impl Default for Instrumenter {
    fn default() -> Self {
        Self::new(InstrumentConfig::default())
    }
}
