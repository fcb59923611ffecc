//! Ledger module containing the chart of accounts, journal and balances

pub mod account;
pub mod balance;
pub mod core;
pub mod journal;

pub use account::*;
pub use balance::*;
pub use core::*;
pub use journal::*;
