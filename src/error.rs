use thiserror::Error;

use crate::metadata::identity::{MemberId, ModuleId};

macro_rules! rewrite_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::RewriteFailure {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::RewriteFailure {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups that callers must treat differently. Security errors
/// ([`Error::PolicyViolation`] and [`Error::ShimInvocationDenied`]) are the sandbox doing its job:
/// a guarded operation was rejected and must abort at the call site. Everything else signals that
/// a module could not be instrumented or that the loaded program is inconsistent, and is fatal to
/// loading the module rather than a policy decision.
///
/// # Error Categories
///
/// ## Security Errors
/// - [`Error::PolicyViolation`] - A guarded field access or call was denied
/// - [`Error::ShimInvocationDenied`] - A dangerous library entry point was reached dynamically
///
/// ## Instrumentation Errors
/// - [`Error::RewriteFailure`] - A method body could not be rewritten
/// - [`Error::ResolutionFailure`] - Late binding found no concrete target (a bug, not a decision)
///
/// ## Loader and Policy Errors
/// - [`Error::ModuleNotFound`], [`Error::TypeNotFound`], [`Error::MemberNotFound`]
/// - [`Error::DuplicateModule`] - A module name is already registered in the domain
/// - [`Error::NoPolicy`] - Guard code ran for a module that has no registered policy
/// - [`Error::Binding`] - A policy binding selected nothing
///
/// ## Construction Errors
/// - [`Error::InvalidOperand`] - An operand that does not fit its opcode, or an undefined label
/// - [`Error::InvalidMember`] - A member identity of the wrong kind
///
/// # Examples
///
/// ```rust,no_run
/// use dotcas::Error;
///
/// fn report(result: dotcas::Result<()>) {
///     match result {
///         Ok(()) => {}
///         Err(Error::PolicyViolation { caller, member, declaring_type }) => {
///             eprintln!("{caller} tried to touch {member} of {declaring_type}");
///         }
///         Err(Error::RewriteFailure { message, file, line }) => {
///             eprintln!("instrumentation failed: {message} ({file}:{line})");
///         }
///         Err(e) => eprintln!("other error: {e}"),
///     }
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Security errors
    /// A guarded operation was rejected by the caller's policy.
    ///
    /// Raised by the full runtime assertion once the late-binding resolver has determined the
    /// real target. The operation never runs, there is no partial side effect.
    ///
    /// # Fields
    ///
    /// * `caller` - Name of the module that attempted the access
    /// * `member` - Display form of the denied member
    /// * `declaring_type` - Full name of the type declaring the member
    #[error("Module {caller} does not have permission to access {member} of {declaring_type}.")]
    PolicyViolation {
        /// The module that attempted the access
        caller: String,
        /// The member that was denied
        member: String,
        /// The type declaring the denied member
        declaring_type: String,
    },

    /// A shimmed library entry point was invoked through a path the rewriter cannot see.
    ///
    /// Function-pointer loads and reflective invocation of shimmed methods are always rejected,
    /// since a raw pointer to them would bypass the replacement.
    #[error("Module {caller} may not invoke {member} dynamically")]
    ShimInvocationDenied {
        /// The module that attempted the invocation
        caller: String,
        /// The shimmed member
        member: String,
    },

    // Instrumentation errors
    /// A method body could not be instrumented.
    ///
    /// This is fatal to loading the module. It includes the source location where the
    /// failure was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Description of what could not be rewritten
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("RewriteFailure - {file}:{line}: {message}")]
    RewriteFailure {
        /// The message to be printed for the RewriteFailure error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The late-binding resolver found no concrete target for a receiver.
    ///
    /// Well-formed programs never produce this, it must not be handled as a policy denial.
    #[error("Failed to resolve dispatch target - {0}")]
    ResolutionFailure(String),

    // Loader and policy errors
    /// No module with the given identity is loaded.
    #[error("Module not found - {0}")]
    ModuleNotFound(ModuleId),

    /// A module name is already registered in the domain.
    #[error("Module {0} is already loaded")]
    DuplicateModule(String),

    /// A type reference could not be resolved.
    #[error("Type not found - {0}")]
    TypeNotFound(String),

    /// A field or method reference could not be resolved.
    #[error("Member not found - {0}")]
    MemberNotFound(String),

    /// Guard code ran for a module that has no policy registered.
    #[error("No policy registered for module {0}")]
    NoPolicy(String),

    /// A policy binding could not select the requested member.
    #[error("Binding - {0}")]
    Binding(String),

    /// An operand does not fit the opcode it was given to, or a label is undefined.
    #[error("Invalid operand - {0}")]
    InvalidOperand(String),

    /// A member identity does not name a member of the expected kind.
    #[error("Invalid member - {0:?}")]
    InvalidMember(MemberId),

    /// General error.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors that represent a sandbox denial rather than an internal failure.
    #[must_use]
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            Error::PolicyViolation { .. } | Error::ShimInvocationDenied { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_error_macro() {
        let err = rewrite_error!("bad operand {}", 3);
        match err {
            Error::RewriteFailure { message, file, .. } => {
                assert_eq!(message, "bad operand 3");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_policy_violation_message() {
        let err = Error::PolicyViolation {
            caller: "Sandboxed".into(),
            member: "DeniedField".into(),
            declaring_type: "Shared.SharedClass".into(),
        };
        assert_eq!(
            err.to_string(),
            "Module Sandboxed does not have permission to access DeniedField of Shared.SharedClass."
        );
        assert!(err.is_security_error());
        assert!(!Error::ResolutionFailure("x".into()).is_security_error());
    }
}
