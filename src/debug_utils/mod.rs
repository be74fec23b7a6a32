//! Utility functions and types for debugging bank selection.
//!
//! These are not needed for normal compilation, but are useful during
//! development of both bank selection itself and users of it.

mod checker;
mod display;
mod generic_function;
mod validate_func;

pub use checker::*;
pub use display::*;
pub use generic_function::*;
pub use validate_func::*;
