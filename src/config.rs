//! Instrumentation and runtime configuration
//!
//! Two independent knobs exist: how method bodies are rewritten ([`InstrumentConfig`]) and how
//! the runtime guard surface decides ([`RuntimeConfig`]). [`CasConfig`] bundles both for
//! [`crate::CasLoader`].

/// Configuration of the instrumentation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct InstrumentConfig {
    /// Restore short branch and compact local forms after rewriting
    pub optimize_macros: bool,

    /// Leave a leading `ldsfld; pop` verification prologue in front of the first guard
    pub skip_verification_prologue: bool,

    /// Guard the `newobj` of a delegate constructor that directly follows `ldvirtftn`.
    /// The pointer load is already guarded, so this only adds a redundant check
    pub guard_delegate_constructors: bool,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            optimize_macros: true,
            skip_verification_prologue: true,
            guard_delegate_constructors: false,
        }
    }
}

impl InstrumentConfig {
    /// Creates a minimal configuration: no post-pass and no prologue handling
    ///
    /// Bodies keep their long forms, which is easier to inspect when debugging the rewriter.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            optimize_macros: false,
            skip_verification_prologue: false,
            guard_delegate_constructors: false,
        }
    }
}

/// Configuration of the runtime decision surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Admit fields and calls whose target lives in the caller's load context
    pub trust_load_context: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trust_load_context: true,
        }
    }
}

impl RuntimeConfig {
    /// Creates a strict configuration in which only the policy admits accesses
    #[must_use]
    pub fn strict() -> Self {
        Self {
            trust_load_context: false,
        }
    }
}

/// Combined configuration used by [`crate::CasLoader`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CasConfig {
    /// Instrumentation settings
    pub instrument: InstrumentConfig,
    /// Runtime settings
    pub runtime: RuntimeConfig,
}

impl CasConfig {
    /// Minimal instrumentation, strict runtime
    #[must_use]
    pub fn strict() -> Self {
        Self {
            instrument: InstrumentConfig::minimal(),
            runtime: RuntimeConfig::strict(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(InstrumentConfig::default().optimize_macros);
        assert!(!InstrumentConfig::minimal().skip_verification_prologue);
        assert!(RuntimeConfig::default().trust_load_context);
        assert!(!CasConfig::strict().runtime.trust_load_context);
    }
}
