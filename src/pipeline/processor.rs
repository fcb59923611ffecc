//! Asynchronous transaction processor
//!
//! Requests are validated on submit, stored as pending and queued on a
//! bounded channel. A pool of workers drains the queue in FIFO order and
//! turns each transaction into a posted journal entry. A watchdog reports
//! transactions stuck in processing without ever failing them.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::events::LedgerEvent;
use crate::ledger::Ledger;
use crate::pipeline::transaction::*;
use crate::rules::{RuleCompiler, RuleTable};
use crate::traits::*;
use crate::types::*;

/// Counts and volumes over every stored transaction
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PipelineStats {
    pub total: usize,
    pub by_status: BTreeMap<TransactionStatus, usize>,
    pub by_type: BTreeMap<TransactionType, usize>,
    /// Gross amount of every transaction per currency, whatever its status
    pub volume: BTreeMap<String, BigDecimal>,
    /// Gross amount of completed transactions per currency
    pub completed_volume: BTreeMap<String, BigDecimal>,
    /// Transactions waiting in the queue
    pub queued: usize,
}

struct PipelineInner<S: LedgerStorage> {
    ledger: Ledger<S>,
    rules: RuleTable,
    compiler: RuleCompiler<S>,
    config: PipelineConfig,
    /// Serializes the idempotency check with the insert
    submissions: Mutex<()>,
    /// Transactions already reported as stalled
    stalled: Mutex<HashSet<String>>,
}

/// Transaction processing pipeline
pub struct TransactionPipeline<S: LedgerStorage> {
    inner: Arc<PipelineInner<S>>,
    sender: Mutex<Option<mpsc::Sender<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl<S: LedgerStorage> TransactionPipeline<S> {
    /// Start a pipeline with the standard rules
    pub fn start(ledger: Ledger<S>) -> Self {
        Self::start_with_rules(ledger, RuleTable::standard())
    }

    /// Start a pipeline with a custom rule table. Spawns the workers and the
    /// watchdog on the current tokio runtime.
    pub fn start_with_rules(ledger: Ledger<S>, rules: RuleTable) -> Self {
        let config = ledger.config().pipeline.clone();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let inner = Arc::new(PipelineInner {
            compiler: RuleCompiler::new(ledger.clone()),
            ledger,
            rules,
            config,
            submissions: Mutex::new(()),
            stalled: Mutex::new(HashSet::new()),
        });

        let workers = (0..inner.config.workers.max(1))
            .map(|worker| {
                let inner = inner.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move { inner.run_worker(worker, receiver).await })
            })
            .collect();

        let watchdog = {
            let inner = inner.clone();
            tokio::spawn(async move { inner.run_watchdog().await })
        };

        tracing::info!(
            workers = inner.config.workers,
            queue_capacity = inner.config.queue_capacity,
            rules_version = inner.rules.version,
            "transaction pipeline started"
        );

        Self {
            inner,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            watchdog: Mutex::new(Some(watchdog)),
        }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.inner.ledger
    }

    pub fn rules(&self) -> &RuleTable {
        &self.inner.rules
    }

    /// Validate and queue a request.
    ///
    /// Fails with `Validation` listing every violation; nothing is stored in
    /// that case. Waits for queue capacity when the queue is full. A request
    /// id that was seen before is treated as an idempotency key.
    pub async fn submit(&self, request: TransactionRequest) -> LedgerResult<Transaction> {
        let transaction = {
            let _guard = self.inner.submissions.lock().await;
            if self.sender.lock().await.is_none() {
                return Err(LedgerError::QueueClosed);
            }

            let storage = self.inner.ledger.storage();
            let existing = match &request.id {
                Some(id) => storage.get_transaction(id).await?,
                None => None,
            };

            match existing {
                Some(existing) => {
                    if !existing.matches_request(&request) {
                        return Err(LedgerError::Validation(vec![format!(
                            "Transaction id {} was already used for a different {} of {} {}",
                            existing.id,
                            existing.transaction_type,
                            existing.amount,
                            existing.currency
                        )]));
                    }
                    let previous = existing.status;
                    match previous {
                        TransactionStatus::Pending
                        | TransactionStatus::Processing
                        | TransactionStatus::Completed => {
                            tracing::debug!(
                                transaction_id = %existing.id,
                                status = %existing.status,
                                "duplicate submission"
                            );
                            return Ok(existing);
                        }
                        TransactionStatus::Failed | TransactionStatus::Cancelled => {
                            self.validate(&request).await?;
                            let mut rearmed = existing;
                            rearmed.platform = request.platform;
                            rearmed.user_id = request.user_id;
                            rearmed.creator_id = request.creator_id;
                            rearmed.metadata = request.metadata;
                            rearmed.kyc_verified = request.kyc_verified;
                            rearmed.error = None;
                            rearmed.journal_entry_id = None;
                            rearmed.reconciliation_status = ReconciliationStatus::Pending;
                            rearmed.transition(
                                TransactionStatus::Pending,
                                Some(format!("resubmitted after {}", previous)),
                            );
                            storage.update_transaction(&rearmed, previous).await?;
                            rearmed
                        }
                    }
                }
                None => {
                    self.validate(&request).await?;
                    let transaction = Transaction::from_request(request);
                    storage.insert_transaction(&transaction).await?;
                    transaction
                }
            }
        };

        tracing::debug!(
            transaction_id = %transaction.id,
            transaction_type = %transaction.transaction_type,
            amount = %transaction.amount,
            currency = %transaction.currency,
            "transaction submitted"
        );
        self.inner
            .ledger
            .events()
            .publish(LedgerEvent::TransactionSubmitted {
                transaction: transaction.clone(),
            });

        if let Err(e) = self.enqueue(&transaction.id).await {
            self.inner
                .fail(transaction.clone(), TransactionStatus::Pending, &e)
                .await?;
            return Err(e);
        }
        Ok(transaction)
    }

    async fn validate(&self, request: &TransactionRequest) -> LedgerResult<()> {
        let currency = self
            .inner
            .ledger
            .registry()
            .currency(&request.currency)
            .await;
        self.inner.rules.validate(request, currency.as_ref())?;
        Ok(())
    }

    async fn enqueue(&self, transaction_id: &str) -> LedgerResult<()> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(LedgerError::QueueClosed)?;
        sender
            .send(transaction_id.to_string())
            .await
            .map_err(|_| LedgerError::QueueClosed)
    }

    /// Cancel a pending transaction
    pub async fn cancel(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        let mut transaction = self.get_transaction(transaction_id).await?;
        if transaction.status != TransactionStatus::Pending {
            return Err(LedgerError::InvalidState(format!(
                "Cannot cancel transaction {} with status: {}",
                transaction_id, transaction.status
            )));
        }

        transaction.transition(TransactionStatus::Cancelled, None);
        // A worker that picked it up first wins
        self.inner
            .ledger
            .storage()
            .update_transaction(&transaction, TransactionStatus::Pending)
            .await?;

        tracing::info!(transaction_id, "transaction cancelled");
        self.inner
            .ledger
            .events()
            .publish(LedgerEvent::TransactionCancelled {
                transaction: transaction.clone(),
            });
        Ok(transaction)
    }

    /// Get a transaction by ID
    pub async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        self.inner
            .ledger
            .storage()
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Transactions where the user is the payer or the creator, newest first
    pub async fn user_transactions(&self, user_id: &str) -> LedgerResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .inner
            .ledger
            .storage()
            .list_transactions()
            .await?
            .into_iter()
            .rev()
            .filter(|transaction| transaction.involves(user_id))
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    pub async fn stats(&self) -> LedgerResult<PipelineStats> {
        let mut stats = PipelineStats::default();
        for transaction in self.inner.ledger.storage().list_transactions().await? {
            stats.total += 1;
            *stats.by_status.entry(transaction.status).or_default() += 1;
            *stats.by_type.entry(transaction.transaction_type).or_default() += 1;
            *stats
                .volume
                .entry(transaction.currency.clone())
                .or_default() += &transaction.amount;
            if transaction.status == TransactionStatus::Completed {
                *stats
                    .completed_volume
                    .entry(transaction.currency.clone())
                    .or_default() += &transaction.amount;
            }
        }
        if let Some(sender) = self.sender.lock().await.as_ref() {
            stats.queued = sender.max_capacity() - sender.capacity();
        }
        Ok(stats)
    }

    /// Transactions that have been processing for at least `threshold`
    pub async fn stalled_transactions(
        &self,
        threshold: Duration,
    ) -> LedgerResult<Vec<Transaction>> {
        self.inner.stalled_transactions(threshold).await
    }

    /// Run one watchdog pass now. Returns the ids newly reported as stalled.
    pub async fn check_stalled(&self) -> LedgerResult<Vec<String>> {
        self.inner.check_stalled().await
    }

    /// Poll until the transaction reaches a terminal status or `timeout`
    /// elapses, returning its latest state either way
    pub async fn wait_for_outcome(
        &self,
        transaction_id: &str,
        timeout: Duration,
    ) -> LedgerResult<Transaction> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let transaction = self.get_transaction(transaction_id).await?;
            if transaction.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(transaction);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop accepting work, let the workers drain the queue, then stop the
    /// watchdog
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "pipeline worker panicked");
            }
        }
        if let Some(watchdog) = self.watchdog.lock().await.take() {
            watchdog.abort();
        }
        tracing::info!("transaction pipeline stopped");
    }
}

impl<S: LedgerStorage> PipelineInner<S> {
    async fn run_worker(&self, worker: usize, receiver: Arc<Mutex<mpsc::Receiver<String>>>) {
        loop {
            // Holding the lock while waiting keeps dequeue order FIFO across workers
            let next = receiver.lock().await.recv().await;
            let Some(transaction_id) = next else {
                break;
            };
            if let Err(e) = self.process(&transaction_id).await {
                tracing::error!(
                    worker,
                    transaction_id = %transaction_id,
                    error = %e,
                    "transaction processing aborted"
                );
            }
        }
        tracing::debug!(worker, "pipeline worker stopped");
    }

    async fn process(&self, transaction_id: &str) -> LedgerResult<()> {
        let storage = self.ledger.storage();
        let Some(mut transaction) = storage.get_transaction(transaction_id).await? else {
            tracing::warn!(transaction_id, "queued transaction no longer exists");
            return Ok(());
        };
        if transaction.status != TransactionStatus::Pending {
            tracing::debug!(transaction_id, status = %transaction.status, "skipping transaction");
            return Ok(());
        }

        transaction.transition(TransactionStatus::Processing, None);
        if let Err(e) = storage
            .update_transaction(&transaction, TransactionStatus::Pending)
            .await
        {
            // Cancelled between dequeue and pickup
            tracing::debug!(transaction_id, error = %e, "transaction no longer pending");
            return Ok(());
        }
        self.ledger
            .events()
            .publish(LedgerEvent::TransactionProcessing {
                transaction: transaction.clone(),
            });

        match self.record(&transaction).await {
            Ok(entry) => {
                transaction.journal_entry_id = Some(entry.id.clone());
                transaction.reconciliation_status = ReconciliationStatus::Reconciled;
                transaction.transition(TransactionStatus::Completed, None);
                storage
                    .update_transaction(&transaction, TransactionStatus::Processing)
                    .await?;
                self.stalled.lock().await.remove(transaction_id);

                tracing::info!(
                    transaction_id,
                    transaction_type = %transaction.transaction_type,
                    journal_entry_id = %entry.id,
                    "transaction completed"
                );
                self.ledger
                    .events()
                    .publish(LedgerEvent::TransactionCompleted { transaction });
                Ok(())
            }
            Err(e) => self.fail(transaction, TransactionStatus::Processing, &e).await,
        }
    }

    /// Post the transaction's entry, reusing one already posted for it
    async fn record(&self, transaction: &Transaction) -> LedgerResult<JournalEntry> {
        let journal = self.ledger.journal();
        if let Some(existing) = journal
            .effective_entry_for_transaction(&transaction.id)
            .await?
        {
            tracing::debug!(
                transaction_id = %transaction.id,
                entry_id = %existing.id,
                "reusing posted entry"
            );
            return Ok(existing);
        }

        let rule = self
            .rules
            .get(transaction.transaction_type)
            .ok_or_else(|| {
                LedgerError::Validation(vec![format!(
                    "No rule for transaction type {}",
                    transaction.transaction_type
                )])
            })?;
        let spec = self.compiler.compile(transaction, rule).await?;
        let draft = journal.create_draft(spec).await?;
        journal.post(&draft.id).await
    }

    async fn fail(
        &self,
        mut transaction: Transaction,
        expected: TransactionStatus,
        error: &LedgerError,
    ) -> LedgerResult<()> {
        let message = error.to_string();
        transaction.error = Some(message.clone());
        transaction.reconciliation_status = match error {
            LedgerError::InvalidEntry(_) => ReconciliationStatus::ManualReview,
            _ => ReconciliationStatus::Pending,
        };
        transaction.transition(TransactionStatus::Failed, Some(message.clone()));
        self.ledger
            .storage()
            .update_transaction(&transaction, expected)
            .await?;
        self.stalled.lock().await.remove(&transaction.id);

        tracing::error!(
            transaction_id = %transaction.id,
            transaction_type = %transaction.transaction_type,
            error_code = error.error_code(),
            error = %message,
            "transaction failed"
        );
        self.ledger.events().publish(LedgerEvent::TransactionFailed {
            transaction,
            error: message,
        });
        Ok(())
    }

    async fn stalled_transactions(&self, threshold: Duration) -> LedgerResult<Vec<Transaction>> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| LedgerError::Config(format!("stall threshold out of range: {}", e)))?;
        let now = Utc::now();
        Ok(self
            .ledger
            .storage()
            .list_transactions()
            .await?
            .into_iter()
            .filter(|transaction| {
                transaction.status == TransactionStatus::Processing
                    && now - transaction.status_since() >= threshold
            })
            .collect())
    }

    async fn check_stalled(&self) -> LedgerResult<Vec<String>> {
        let stalled = self.stalled_transactions(self.config.stall_threshold()).await?;
        let mut reported = self.stalled.lock().await;
        reported.retain(|id| stalled.iter().any(|transaction| &transaction.id == id));

        let mut newly_reported = Vec::new();
        for transaction in stalled {
            if !reported.insert(transaction.id.clone()) {
                continue;
            }
            let processing_since = transaction.status_since();
            tracing::warn!(
                transaction_id = %transaction.id,
                processing_since = %processing_since,
                "transaction stalled in processing"
            );
            self.ledger.events().publish(LedgerEvent::TransactionStalled {
                transaction_id: transaction.id.clone(),
                processing_since,
            });
            newly_reported.push(transaction.id);
        }
        Ok(newly_reported)
    }

    async fn run_watchdog(&self) {
        let mut interval = tokio::time::interval(self.config.stall_check_interval());
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = self.check_stalled().await {
                tracing::error!(error = %e, "stalled transaction scan failed");
            }
        }
    }
}
