//! In-memory storage implementation for testing and development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::pipeline::{Transaction, TransactionStatus};
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct AccountTable {
    by_id: HashMap<String, Account>,
    id_by_code: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct JournalTable {
    by_id: HashMap<String, JournalEntry>,
    order: Vec<String>,
    by_account: HashMap<String, Vec<String>>,
    by_transaction: HashMap<String, Vec<String>>,
}

impl JournalTable {
    fn collect(&self, ids: Option<&Vec<String>>) -> Vec<JournalEntry> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct TransactionTable {
    by_id: HashMap<String, Transaction>,
    order: Vec<String>,
}

/// In-memory storage implementation for testing and development
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    accounts: Arc<RwLock<AccountTable>>,
    journal: Arc<RwLock<JournalTable>>,
    transactions: Arc<RwLock<TransactionTable>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub async fn clear(&self) {
        *self.accounts.write().await = AccountTable::default();
        *self.journal.write().await = JournalTable::default();
        *self.transactions.write().await = TransactionTable::default();
    }
}

#[async_trait]
impl AccountStore for MemoryStorage {
    async fn insert_account(&self, account: &Account) -> LedgerResult<()> {
        let mut table = self.accounts.write().await;
        if table.id_by_code.contains_key(&account.code) {
            return Err(LedgerError::DuplicateCode(account.code.clone()));
        }
        if table.by_id.contains_key(&account.id) {
            return Err(LedgerError::Storage(format!(
                "Account id '{}' already exists",
                account.id
            )));
        }
        table
            .id_by_code
            .insert(account.code.clone(), account.id.clone());
        table.by_id.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.accounts.read().await.by_id.get(account_id).cloned())
    }

    async fn get_account_by_code(&self, code: &str) -> LedgerResult<Option<Account>> {
        let table = self.accounts.read().await;
        Ok(table
            .id_by_code
            .get(code)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        let table = self.accounts.read().await;
        let mut filtered: Vec<Account> = table
            .by_id
            .values()
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(filtered)
    }

    async fn set_account_active(&self, account_id: &str, active: bool) -> LedgerResult<Account> {
        let mut table = self.accounts.write().await;
        let account = table
            .by_id
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;
        account.is_active = active;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }
}

#[async_trait]
impl JournalStore for MemoryStorage {
    async fn insert_entry(&self, entry: &JournalEntry) -> LedgerResult<()> {
        let mut table = self.journal.write().await;
        if table.by_id.contains_key(&entry.id) {
            return Err(LedgerError::Storage(format!(
                "Journal entry '{}' already exists",
                entry.id
            )));
        }

        for (account_id, _) in entry.touched_pairs() {
            let ids = table.by_account.entry(account_id).or_default();
            if !ids.contains(&entry.id) {
                ids.push(entry.id.clone());
            }
        }
        table
            .by_transaction
            .entry(entry.transaction_id.clone())
            .or_default()
            .push(entry.id.clone());
        table.order.push(entry.id.clone());
        table.by_id.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get_entry(&self, entry_id: &str) -> LedgerResult<Option<JournalEntry>> {
        Ok(self.journal.read().await.by_id.get(entry_id).cloned())
    }

    async fn mark_posted(
        &self,
        entry_id: &str,
        posted_at: DateTime<Utc>,
    ) -> LedgerResult<JournalEntry> {
        let mut table = self.journal.write().await;
        let entry = table
            .by_id
            .get_mut(entry_id)
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))?;
        if entry.status != EntryStatus::Draft {
            return Err(LedgerError::InvalidState(format!(
                "Cannot post journal entry {} with status: {}",
                entry_id, entry.status
            )));
        }
        entry.status = EntryStatus::Posted;
        entry.posted_at = Some(posted_at);
        Ok(entry.clone())
    }

    async fn mark_reversed(
        &self,
        entry_id: &str,
        reversed_at: DateTime<Utc>,
        reversal_entry_id: &str,
    ) -> LedgerResult<JournalEntry> {
        let mut table = self.journal.write().await;
        let entry = table
            .by_id
            .get_mut(entry_id)
            .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))?;
        if entry.status != EntryStatus::Posted {
            return Err(LedgerError::InvalidState(format!(
                "Cannot reverse journal entry {} with status: {}",
                entry_id, entry.status
            )));
        }
        entry.status = EntryStatus::Reversed;
        entry.reversed_at = Some(reversed_at);
        entry
            .metadata
            .insert("reversed_by".to_string(), reversal_entry_id.to_string());
        Ok(entry.clone())
    }

    async fn entries_for_account(&self, account_id: &str) -> LedgerResult<Vec<JournalEntry>> {
        let table = self.journal.read().await;
        Ok(table.collect(table.by_account.get(account_id)))
    }

    async fn entries_for_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let table = self.journal.read().await;
        Ok(table.collect(table.by_transaction.get(transaction_id)))
    }

    async fn list_entries(&self, status: Option<EntryStatus>) -> LedgerResult<Vec<JournalEntry>> {
        let table = self.journal.read().await;
        Ok(table
            .collect(Some(&table.order))
            .into_iter()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .collect())
    }
}

#[async_trait]
impl TransactionStore for MemoryStorage {
    async fn insert_transaction(&self, transaction: &Transaction) -> LedgerResult<()> {
        let mut table = self.transactions.write().await;
        if table.by_id.contains_key(&transaction.id) {
            return Err(LedgerError::Storage(format!(
                "Transaction '{}' already exists",
                transaction.id
            )));
        }
        table.order.push(transaction.id.clone());
        table
            .by_id
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .by_id
            .get(transaction_id)
            .cloned())
    }

    async fn update_transaction(
        &self,
        transaction: &Transaction,
        expected: TransactionStatus,
    ) -> LedgerResult<()> {
        let mut table = self.transactions.write().await;
        let stored = table
            .by_id
            .get_mut(&transaction.id)
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction.id.clone()))?;
        if stored.status != expected {
            return Err(LedgerError::InvalidState(format!(
                "Transaction {} is {}, expected {}",
                transaction.id, stored.status, expected
            )));
        }
        *stored = transaction.clone();
        Ok(())
    }

    async fn list_transactions(&self) -> LedgerResult<Vec<Transaction>> {
        let table = self.transactions.read().await;
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect())
    }
}
