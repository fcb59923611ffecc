//! Transaction processing pipeline: submission, queueing and workers

pub mod processor;
pub mod transaction;

pub use processor::*;
pub use transaction::*;
