//! Ledger events for pub/sub distribution
//!
//! Every component publishes onto one [`EventBus`]. Consumers either hold a
//! raw broadcast receiver from [`EventBus::subscribe`] or implement
//! [`EventSubscriber`] and hand it to [`EventBus::spawn_subscriber`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::pipeline::Transaction;
use crate::types::*;

/// Events emitted by the ledger and the processing pipeline
#[derive(Debug, Clone, Serialize)]
pub enum LedgerEvent {
    /// The standard chart of accounts was created
    AccountsInitialized { account_count: usize },

    /// A journal entry became authoritative
    JournalEntryPosted { entry: JournalEntry },

    /// A posted entry was offset by a new reversing entry
    JournalEntryReversed {
        original_id: String,
        reversal_id: String,
    },

    /// A trial balance was computed
    BalancesCalculated {
        as_of: Option<DateTime<Utc>>,
        account_count: usize,
        is_balanced: bool,
    },

    TransactionSubmitted { transaction: Transaction },

    TransactionProcessing { transaction: Transaction },

    TransactionCompleted { transaction: Transaction },

    TransactionFailed {
        transaction: Transaction,
        error: String,
    },

    TransactionCancelled { transaction: Transaction },

    /// A transaction has been processing longer than the configured threshold
    TransactionStalled {
        transaction_id: String,
        processing_since: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::AccountsInitialized { .. } => "accountsInitialized",
            Self::JournalEntryPosted { .. } => "journalEntryPosted",
            Self::JournalEntryReversed { .. } => "journalEntryReversed",
            Self::BalancesCalculated { .. } => "balancesCalculated",
            Self::TransactionSubmitted { .. } => "transactionSubmitted",
            Self::TransactionProcessing { .. } => "transactionProcessing",
            Self::TransactionCompleted { .. } => "transactionCompleted",
            Self::TransactionFailed { .. } => "transactionFailed",
            Self::TransactionCancelled { .. } => "transactionCancelled",
            Self::TransactionStalled { .. } => "transactionStalled",
        }
    }

    /// Transaction id carried by the event, if any
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::TransactionSubmitted { transaction }
            | Self::TransactionProcessing { transaction }
            | Self::TransactionCompleted { transaction }
            | Self::TransactionFailed { transaction, .. }
            | Self::TransactionCancelled { transaction } => Some(&transaction.id),
            Self::TransactionStalled { transaction_id, .. } => Some(transaction_id),
            Self::JournalEntryPosted { entry } => Some(&entry.transaction_id),
            _ => None,
        }
    }
}

/// Trait for event subscribers
///
/// Delivery is at-most-once: a subscriber that falls behind the channel
/// capacity skips the events it missed.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Get the subscriber name (for logging)
    fn name(&self) -> &str;

    /// Handle one event
    async fn handle(&self, event: &LedgerEvent);
}

/// In-process broadcast bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: LedgerEvent) {
        let name = event.name();
        // No receivers is not an error: events are notifications, not state
        if self.sender.send(event).is_err() {
            tracing::trace!(event = name, "event published with no subscribers");
        }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drive a subscriber on its own task until the bus is dropped
    pub fn spawn_subscriber(&self, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => subscriber.handle(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            subscriber = subscriber.name(),
                            skipped,
                            "event subscriber lagged behind"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
