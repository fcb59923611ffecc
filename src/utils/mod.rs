//! Utility modules

pub mod memory_storage;
pub mod telemetry;
pub mod validation;

pub use memory_storage::*;
pub use validation::*;
