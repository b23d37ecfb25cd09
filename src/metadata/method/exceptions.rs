use bitflags::bitflags;

use crate::{assembly::InstrId, metadata::typesig::TypeSig};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags describing the kind of exception handler (catch, filter, finally, fault).
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// Fault clause (finally that is called on exception only)
        const FAULT = 0x0004;
    }
}

/// One exception-handling clause of a method body.
///
/// Region boundaries name instructions rather than offsets. `try_end` and `handler_end` are
/// exclusive, `None` meaning the region runs to the end of the body.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionHandler {
    /// Kind of handler
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected region
    pub try_start: InstrId,
    /// First instruction after the protected region
    pub try_end: Option<InstrId>,
    /// First instruction of the handler
    pub handler_start: InstrId,
    /// First instruction after the handler
    pub handler_end: Option<InstrId>,
    /// First instruction of the filter, for filter clauses
    pub filter_start: Option<InstrId>,
    /// Caught exception type, for typed clauses
    pub catch_type: Option<TypeSig>,
}

impl ExceptionHandler {
    /// All boundary instructions of this clause
    #[must_use]
    pub fn boundaries(&self) -> Vec<InstrId> {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
            self.filter_start,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Entry points control can reach without a branch: the handler and the filter
    #[must_use]
    pub fn entries(&self) -> Vec<InstrId> {
        let mut entries = vec![self.handler_start];
        entries.extend(self.filter_start);
        entries
    }
}
