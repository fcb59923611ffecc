//! # Creator Ledger
//!
//! A double-entry ledger for a creator-economy platform, with an asynchronous
//! pipeline that turns business transactions (subscriptions, tips, content and
//! NFT sales, payouts, refunds, crypto movements) into balanced journal entries.
//!
//! ## Features
//!
//! - **Multi-currency chart of accounts**: one standard chart per currency, fiat and crypto
//! - **Double-entry journal**: entries balance per currency and are append-only; reversals offset
//! - **Point-in-time balances**: cached, invalidated on post, with a per-currency trial balance
//! - **Declarative rules**: one versioned rule table drives validation and fee splits
//! - **Processing pipeline**: bounded queue, worker pool, idempotent submission, stall watchdog
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bigdecimal::BigDecimal;
//! use creator_ledger::{
//!     Ledger, MemoryStorage, TransactionPipeline, TransactionRequest, TransactionType,
//! };
//!
//! # async fn run() -> creator_ledger::LedgerResult<()> {
//! let ledger = Ledger::new(MemoryStorage::new());
//! ledger.initialize().await?;
//!
//! let pipeline = TransactionPipeline::start(ledger.clone());
//! let amount = BigDecimal::from(50);
//! let tip = TransactionRequest::new(TransactionType::TipPayment, "web", amount, "USD")
//!     .user("fan-1")
//!     .creator("creator-1");
//! let submitted = pipeline.submit(tip).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod ledger;
pub mod pipeline;
pub mod rules;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use events::*;
pub use ledger::*;
pub use pipeline::*;
pub use rules::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;
