//! Method bodies and their exception-handling clauses.
//!
//! # Key Components
//!
//! - [`MethodBody`] - Instructions, locals and exception clauses of one method
//! - [`ExceptionHandler`] - A protected region with its handler, boundaries named by instruction
//! - [`ExceptionHandlerFlags`] - Catch, filter, finally or fault

mod body;
mod exceptions;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
