//! Hooks consulted when a guard rejects an operation.

use std::sync::Mutex;

use crate::{Error, Result};

/// Decides what happens to a rejected operation.
///
/// The handler receives the security error the guard would raise. Returning `Err` aborts the
/// operation with that (or any other) error; returning `Ok(())` lets it proceed, which turns the
/// sandbox into an auditing tool for that host.
pub trait ViolationHandler: Send + Sync {
    /// Called once per rejected operation
    ///
    /// # Errors
    /// Returns the error that aborts the operation.
    fn on_violation(&self, violation: Error) -> Result<()>;
}

/// Rejects every violation. The default handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyViolations;

impl ViolationHandler for DenyViolations {
    fn on_violation(&self, violation: Error) -> Result<()> {
        Err(violation)
    }
}

/// Records violations and lets the operation proceed.
#[derive(Debug, Default)]
pub struct RecordViolations {
    seen: Mutex<Vec<Error>>,
}

impl RecordViolations {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The violations recorded so far
    #[must_use]
    pub fn violations(&self) -> Vec<Error> {
        match self.seen.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ViolationHandler for RecordViolations {
    fn on_violation(&self, violation: Error) -> Result<()> {
        match self.seen.lock() {
            Ok(mut seen) => seen.push(violation),
            Err(poisoned) => poisoned.into_inner().push(violation),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation() -> Error {
        Error::PolicyViolation {
            caller: "Sandboxed".into(),
            member: "DeniedStaticField".into(),
            declaring_type: "Shared.SharedClass".into(),
        }
    }

    #[test]
    fn test_deny_returns_error() {
        assert_eq!(DenyViolations.on_violation(violation()), Err(violation()));
    }

    #[test]
    fn test_record_allows() {
        let recorder = RecordViolations::new();
        assert!(recorder.on_violation(violation()).is_ok());
        assert_eq!(recorder.violations(), vec![violation()]);
    }
}
