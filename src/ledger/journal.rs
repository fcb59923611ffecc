//! Journal entry creation, posting and reversal

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::events::{EventBus, LedgerEvent};
use crate::ledger::balance::BalanceCache;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{tolerance_for, within_tolerance};

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Named async locks, created on first use and dropped once nobody holds or
/// waits on them
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: LockMap,
}

impl KeyedLocks {
    /// Acquire every key in sorted order so overlapping callers cannot deadlock
    async fn acquire(&self, mut keys: Vec<String>) -> KeyedGuard {
        keys.sort();
        keys.dedup();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            keys.iter()
                .map(|key| locks.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        KeyedGuard {
            locks: self.locks.clone(),
            keys,
            guards,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Held keys; releasing prunes locks no other caller references
struct KeyedGuard {
    locks: LockMap,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in &self.keys {
            // Only the map's own reference left
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

/// Validates, stores, posts and reverses journal entries
pub struct JournalEngine<S: LedgerStorage> {
    storage: S,
    cache: Arc<BalanceCache>,
    events: EventBus,
    tolerance: BigDecimal,
    posting_locks: KeyedLocks,
    reversal_locks: KeyedLocks,
}

impl<S: LedgerStorage> JournalEngine<S> {
    pub fn new(
        storage: S,
        cache: Arc<BalanceCache>,
        events: EventBus,
        tolerance: BigDecimal,
    ) -> Self {
        Self {
            storage,
            cache,
            events,
            tolerance,
            posting_locks: KeyedLocks::default(),
            reversal_locks: KeyedLocks::default(),
        }
    }

    /// Validate an entry specification and store it as a draft.
    ///
    /// Every violation is reported at once in `InvalidEntry`.
    pub async fn create_draft(&self, spec: NewJournalEntry) -> LedgerResult<JournalEntry> {
        let mut errors = Vec::new();

        if spec.lines.len() < 2 {
            errors.push(format!(
                "Journal entry must have at least 2 lines, got {}",
                spec.lines.len()
            ));
        }

        let mut currencies: HashMap<String, Currency> = HashMap::new();
        let mut accounts: HashMap<String, Option<Account>> = HashMap::new();
        for (index, line) in spec.lines.iter().enumerate() {
            let line_no = index + 1;
            if line.entry_type().is_none() {
                errors.push(format!(
                    "Line {}: exactly one of debit or credit must be positive \
                     (debit {}, credit {})",
                    line_no,
                    line.debit_amount,
                    line.credit_amount
                ));
            }

            if !accounts.contains_key(&line.account_id) {
                let account = self.storage.get_account(&line.account_id).await?;
                accounts.insert(line.account_id.clone(), account);
            }
            match accounts.get(&line.account_id).and_then(|a| a.as_ref()) {
                None => errors.push(format!(
                    "Line {}: account {} does not exist",
                    line_no, line.account_id
                )),
                Some(account) if !account.is_active => errors.push(format!(
                    "Line {}: account {} is inactive",
                    line_no, account.code
                )),
                Some(account) if account.currency.code != line.currency => {
                    errors.push(format!(
                        "Line {}: account {} is kept in {}, line is in {}",
                        line_no, account.code, account.currency.code, line.currency
                    ))
                }
                Some(account) => {
                    currencies
                        .entry(line.currency.clone())
                        .or_insert_with(|| account.currency.clone());
                }
            }
        }

        let totals: BTreeMap<String, SideTotals> = totals_by_currency(&spec.lines);
        for (currency, side) in &totals {
            let tolerance = tolerance_for(currencies.get(currency), &self.tolerance);
            if !within_tolerance(&side.debits, &side.credits, &tolerance) {
                errors.push(format!(
                    "Entry is unbalanced in {}: debits {} != credits {}",
                    currency, side.debits, side.credits
                ));
            }
        }

        if !errors.is_empty() {
            return Err(LedgerError::InvalidEntry(errors));
        }

        let entry = JournalEntry {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_id: spec.transaction_id,
            description: spec.description,
            reference: spec.reference,
            platform: spec.platform,
            user_id: spec.user_id,
            created_at: Utc::now(),
            posted_at: None,
            reversed_at: None,
            lines: spec.lines,
            status: EntryStatus::Draft,
            metadata: spec.metadata,
        };
        self.storage.insert_entry(&entry).await?;
        tracing::debug!(
            entry_id = %entry.id,
            transaction_id = %entry.transaction_id,
            "journal entry drafted"
        );
        Ok(entry)
    }

    /// Make a draft entry authoritative
    pub async fn post(&self, entry_id: &str) -> LedgerResult<JournalEntry> {
        let entry = self.get(entry_id).await?;
        if entry.status != EntryStatus::Draft {
            return Err(LedgerError::InvalidState(format!(
                "Cannot post journal entry {} with status: {}",
                entry_id, entry.status
            )));
        }

        let pairs = entry.touched_pairs();
        let keys = pairs
            .iter()
            .map(|(account_id, currency)| format!("{}:{}", account_id, currency))
            .collect();
        let guards = self.posting_locks.acquire(keys).await;

        // The storage transition is the arbiter when two posts race
        let posted = self.storage.mark_posted(entry_id, Utc::now()).await?;
        let posted_at = posted.posted_at.unwrap_or(posted.created_at);
        self.cache.invalidate(&pairs, posted_at).await;
        drop(guards);

        tracing::info!(
            entry_id = %posted.id,
            transaction_id = %posted.transaction_id,
            lines = posted.lines.len(),
            "journal entry posted"
        );
        self.events.publish(LedgerEvent::JournalEntryPosted {
            entry: posted.clone(),
        });
        Ok(posted)
    }

    /// Offset a posted entry with a new entry carrying the swapped lines.
    /// Returns the posted reversing entry.
    pub async fn reverse(&self, entry_id: &str) -> LedgerResult<JournalEntry> {
        let _guard = self.reversal_locks.acquire(vec![entry_id.to_string()]).await;

        let original = self.get(entry_id).await?;
        if original.status != EntryStatus::Posted {
            return Err(LedgerError::InvalidState(format!(
                "Cannot reverse journal entry {} with status: {}",
                entry_id, original.status
            )));
        }

        let mut spec = NewJournalEntry::new(
            &original.transaction_id,
            &format!("Reversal of: {}", original.description),
            &original.platform,
        )
        .user(original.user_id.clone())
        .metadata("reversal_of", original.id.clone());
        spec.reference = original.reference.clone();
        spec.lines = original.lines.iter().map(LedgerLine::swapped).collect();

        let draft = self.create_draft(spec).await?;
        let reversal = self.post(&draft.id).await?;
        let reversed_at = reversal.posted_at.unwrap_or_else(Utc::now);
        self.storage
            .mark_reversed(&original.id, reversed_at, &reversal.id)
            .await?;

        tracing::info!(
            entry_id = %original.id,
            reversal_id = %reversal.id,
            "journal entry reversed"
        );
        self.events.publish(LedgerEvent::JournalEntryReversed {
            original_id: original.id,
            reversal_id: reversal.id.clone(),
        });
        Ok(reversal)
    }

    /// Get an entry by ID
    pub async fn get(&self, entry_id: &str) -> LedgerResult<JournalEntry> {
        self.storage
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))
    }

    /// Every entry recorded for a business transaction, reversals included
    pub async fn entries_for_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Vec<JournalEntry>> {
        self.storage.entries_for_transaction(transaction_id).await
    }

    /// The posted, unreversed, non-reversal entry of a transaction, if any
    pub async fn effective_entry_for_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<JournalEntry>> {
        Ok(self
            .entries_for_transaction(transaction_id)
            .await?
            .into_iter()
            .find(|entry| {
                entry.status == EntryStatus::Posted && !entry.metadata.contains_key("reversal_of")
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStorage;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    struct Fixture {
        storage: MemoryStorage,
        engine: JournalEngine<MemoryStorage>,
        cash: Account,
        revenue: Account,
        btc: Account,
    }

    async fn fixture() -> Fixture {
        let storage = MemoryStorage::new();
        let cash = Account::new(
            "1001.USD".to_string(),
            "Cash (USD)".to_string(),
            AccountType::Asset,
            Currency::usd(),
            None,
        );
        let revenue = Account::new(
            "4100.USD".to_string(),
            "Subscription Revenue (USD)".to_string(),
            AccountType::Revenue,
            Currency::usd(),
            None,
        );
        let btc = Account::new(
            "1010.BTC".to_string(),
            "Crypto Holdings (BTC)".to_string(),
            AccountType::Asset,
            Currency::btc(),
            None,
        );
        for account in [&cash, &revenue, &btc] {
            storage.insert_account(account).await.unwrap();
        }

        let engine = JournalEngine::new(
            storage.clone(),
            Arc::new(BalanceCache::new()),
            EventBus::default(),
            dec("0.001"),
        );
        Fixture {
            storage,
            engine,
            cash,
            revenue,
            btc,
        }
    }

    fn sale(f: &Fixture, debit: &str, credit: &str) -> NewJournalEntry {
        NewJournalEntry::new("txn-1", "Subscription", "test")
            .line(LedgerLine::debit(&f.cash.id, dec(debit), "USD", "cash in"))
            .line(LedgerLine::credit(&f.revenue.id, dec(credit), "USD", "revenue"))
    }

    #[tokio::test]
    async fn test_create_and_post() {
        let f = fixture().await;
        let mut events = f.engine.events.subscribe();

        let draft = f.engine.create_draft(sale(&f, "100", "100")).await.unwrap();
        assert_eq!(draft.status, EntryStatus::Draft);

        let posted = f.engine.post(&draft.id).await.unwrap();
        assert_eq!(posted.status, EntryStatus::Posted);
        assert!(posted.posted_at.is_some());

        match events.recv().await.unwrap() {
            LedgerEvent::JournalEntryPosted { entry } => assert_eq!(entry.id, draft.id),
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn test_create_draft_reports_every_violation() {
        let f = fixture().await;
        let spec = NewJournalEntry::new("txn-2", "Broken", "test")
            .line(LedgerLine::debit(&f.cash.id, dec("100"), "USD", "cash"))
            .line(LedgerLine::credit(&f.revenue.id, dec("90"), "USD", "revenue"))
            .line(LedgerLine::credit("missing", dec("5"), "USD", "nowhere"))
            .line(LedgerLine::debit(&f.btc.id, dec("-1"), "USD", "wrong"));

        match f.engine.create_draft(spec).await {
            Err(LedgerError::InvalidEntry(errors)) => {
                assert!(errors.iter().any(|e| e.contains("does not exist")));
                assert!(errors.iter().any(|e| e.contains("exactly one")));
                assert!(errors.iter().any(|e| e.contains("kept in BTC")));
                assert!(errors.iter().any(|e| e.contains("unbalanced in USD")));
            }
            other => panic!("expected invalid entry, got {other:?}"),
        }
        assert!(f.storage.list_entries(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_line_and_inactive_account_rejected() {
        let f = fixture().await;
        let single = NewJournalEntry::new("txn-3", "Single", "test")
            .line(LedgerLine::debit(&f.cash.id, dec("1"), "USD", "alone"));
        assert!(matches!(
            f.engine.create_draft(single).await,
            Err(LedgerError::InvalidEntry(_))
        ));

        f.storage
            .set_account_active(&f.revenue.id, false)
            .await
            .unwrap();
        match f.engine.create_draft(sale(&f, "10", "10")).await {
            Err(LedgerError::InvalidEntry(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("inactive"));
            }
            other => panic!("expected invalid entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_post_fails() {
        let f = fixture().await;
        let draft = f.engine.create_draft(sale(&f, "10", "10")).await.unwrap();
        f.engine.post(&draft.id).await.unwrap();

        assert!(matches!(
            f.engine.post(&draft.id).await,
            Err(LedgerError::InvalidState(_))
        ));
        assert!(matches!(
            f.engine.post("nope").await,
            Err(LedgerError::EntryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_posts_of_same_draft_post_once() {
        let f = Arc::new(fixture().await);
        let draft = f.engine.create_draft(sale(&f, "10", "10")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let f = f.clone();
            let id = draft.id.clone();
            handles.push(tokio::spawn(async move { f.engine.post(&id).await }));
        }
        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_reverse_links_entries() {
        let f = fixture().await;
        let draft = f.engine.create_draft(sale(&f, "25", "25")).await.unwrap();
        f.engine.post(&draft.id).await.unwrap();

        let reversal = f.engine.reverse(&draft.id).await.unwrap();
        assert_eq!(reversal.status, EntryStatus::Posted);
        assert_eq!(reversal.metadata.get("reversal_of"), Some(&draft.id));
        assert_eq!(reversal.lines[0].credit_amount, dec("25"));
        assert_eq!(reversal.lines[0].account_id, f.cash.id);

        let original = f.engine.get(&draft.id).await.unwrap();
        assert_eq!(original.status, EntryStatus::Reversed);
        assert_eq!(original.metadata.get("reversed_by"), Some(&reversal.id));
        assert!(original.reversed_at.is_some());

        assert!(matches!(
            f.engine.reverse(&draft.id).await,
            Err(LedgerError::InvalidState(_))
        ));
        assert!(f
            .engine
            .effective_entry_for_transaction("txn-1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let f = Arc::new(fixture().await);
        let mut ids = Vec::new();
        for _ in 0..10 {
            let draft = f.engine.create_draft(sale(&f, "1", "1")).await.unwrap();
            f.engine.post(&draft.id).await.unwrap();
            ids.push(draft.id);
        }

        let mut handles = Vec::new();
        for id in ids.iter().chain(ids.iter()) {
            let f = f.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { f.engine.reverse(&id).await.is_ok() }));
        }
        let mut reversed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                reversed += 1;
            }
        }

        assert_eq!(reversed, ids.len());
        assert_eq!(f.engine.reversal_locks.len(), 0);
        assert_eq!(f.engine.posting_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_reverse_draft_fails() {
        let f = fixture().await;
        let draft = f.engine.create_draft(sale(&f, "5", "5")).await.unwrap();
        assert!(matches!(
            f.engine.reverse(&draft.id).await,
            Err(LedgerError::InvalidState(_))
        ));
    }
}
