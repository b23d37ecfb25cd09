//! Loading sandboxed modules.
//!
//! A [`CasLoader`] owns one load context and one policy. Every module it loads is instrumented,
//! loaded into that context and subjected to the policy, in that order, so no code of the module
//! can run before its guards and its policy are in place.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dotcas::prelude::*;
//!
//! # fn example(library: ModuleDef, plugin: ModuleDef) -> dotcas::Result<()> {
//! let domain = Arc::new(Domain::new());
//! let library = domain.load(library, LoadContextId::DEFAULT)?;
//! let policy = CasPolicyBuilder::new()
//!     .allow(ModuleBinding::new(&library, Accessibility::Public))
//!     .build();
//!
//! let loader = CasLoader::from_config(domain, policy, CasConfig::default());
//! let (plugin, report) = loader.load(plugin)?;
//! println!("{}: {} guarded sites", plugin.name(), report.guarded_sites);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    config::{CasConfig, InstrumentConfig},
    instrument::{InstrumentReport, Instrumenter},
    metadata::{
        identity::{LoadContextId, ModuleId},
        module::ModuleDef,
    },
    policy::CasPolicy,
    runtime::{CasRuntime, Domain, LoadedModule},
    Result,
};

/// Loads modules into a sandboxed load context.
pub struct CasLoader {
    runtime: Arc<CasRuntime>,
    context: LoadContextId,
    policy: Arc<CasPolicy>,
    instrumenter: Instrumenter,
}

impl CasLoader {
    /// Creates a loader with a fresh, non-collectible load context
    #[must_use]
    pub fn new(runtime: Arc<CasRuntime>, policy: CasPolicy, config: InstrumentConfig) -> Self {
        let context = runtime.domain().create_context(false);
        Self::with_context(runtime, policy, config, context)
    }

    /// Creates a loader with a fresh load context that [`CasLoader::unload`] can release
    #[must_use]
    pub fn collectible(runtime: Arc<CasRuntime>, policy: CasPolicy, config: InstrumentConfig) -> Self {
        let context = runtime.domain().create_context(true);
        Self::with_context(runtime, policy, config, context)
    }

    /// Creates a runtime over `domain` from `config` and a loader on top of it
    #[must_use]
    pub fn from_config(domain: Arc<Domain>, policy: CasPolicy, config: CasConfig) -> Self {
        let runtime = Arc::new(CasRuntime::new(domain, config.runtime));
        Self::new(runtime, policy, config.instrument)
    }

    fn with_context(
        runtime: Arc<CasRuntime>,
        policy: CasPolicy,
        config: InstrumentConfig,
        context: LoadContextId,
    ) -> Self {
        CasLoader {
            runtime,
            context,
            policy: Arc::new(policy),
            instrumenter: Instrumenter::new(config),
        }
    }

    /// The runtime judging the loaded modules
    #[must_use]
    pub fn runtime(&self) -> &Arc<CasRuntime> {
        &self.runtime
    }

    /// The load context modules are loaded into
    #[must_use]
    pub fn context(&self) -> LoadContextId {
        self.context
    }

    /// The policy every loaded module is subjected to
    #[must_use]
    pub fn policy(&self) -> &Arc<CasPolicy> {
        &self.policy
    }

    /// The instrumenter applied before loading
    #[must_use]
    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    /// Instruments, loads and registers one module
    ///
    /// # Errors
    /// Returns [`crate::Error::RewriteFailure`] if the module cannot be instrumented and
    /// [`crate::Error::DuplicateModule`] if its name is taken. Nothing is loaded in either case.
    pub fn load(&self, mut module: ModuleDef) -> Result<(Arc<LoadedModule>, InstrumentReport)> {
        let report = self.instrumenter.instrument(&mut module)?;
        let loaded = self.register(module)?;
        Ok((loaded, report))
    }

    /// Instruments a batch of modules in parallel, then loads and registers them in order.
    ///
    /// Instrumentation of the whole batch must succeed before the first module is loaded.
    ///
    /// # Errors
    /// Returns the first instrumentation error, or the first load error. Modules loaded before a
    /// load error stay loaded.
    pub fn load_many(&self, mut modules: Vec<ModuleDef>) -> Result<Vec<(Arc<LoadedModule>, InstrumentReport)>> {
        let reports = modules
            .par_iter_mut()
            .map(|module| self.instrumenter.instrument(module))
            .collect::<Result<Vec<_>>>()?;

        modules
            .into_iter()
            .zip(reports)
            .map(|(module, report)| Ok((self.register(module)?, report)))
            .collect()
    }

    /// Unloads every module of a collectible loader and drops their policies
    ///
    /// # Errors
    /// Returns an error if the load context is not collectible.
    pub fn unload(&self) -> Result<Vec<ModuleId>> {
        let unloaded = self.runtime.domain().unload_context(self.context)?;
        for id in &unloaded {
            self.runtime.policies().remove(*id);
        }
        Ok(unloaded)
    }

    fn register(&self, module: ModuleDef) -> Result<Arc<LoadedModule>> {
        let loaded = self.runtime.domain().load(module, self.context)?;
        self.runtime.register_policy(&loaded, self.policy.clone());
        Ok(loaded)
    }
}
