//! Transaction rules and the compiler that applies them

pub mod compiler;
pub mod table;

pub use compiler::*;
pub use table::*;
