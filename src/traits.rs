//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pipeline::{Transaction, TransactionStatus};
use crate::types::*;
use crate::utils::validation::{validate_account_code, validate_account_name};

/// Storage for the chart of accounts
///
/// Codes are unique. Apart from the active flag an account never changes
/// once inserted, so the trait offers no general update.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account, failing with `DuplicateCode` if the code is taken
    async fn insert_account(&self, account: &Account) -> LedgerResult<()>;

    /// Get an account by ID
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    /// Get an account by its unique code
    async fn get_account_by_code(&self, code: &str) -> LedgerResult<Option<Account>>;

    /// List all accounts, optionally filtered by type
    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>>;

    /// Flip the active flag and return the updated account
    async fn set_account_active(&self, account_id: &str, active: bool) -> LedgerResult<Account>;
}

/// Append-only storage for journal entries
///
/// Lines are written once by `insert_entry`. The only mutations are the
/// compare-and-set status transitions below.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Insert a draft entry
    async fn insert_entry(&self, entry: &JournalEntry) -> LedgerResult<()>;

    /// Get an entry by ID
    async fn get_entry(&self, entry_id: &str) -> LedgerResult<Option<JournalEntry>>;

    /// Draft -> posted. Fails with `InvalidState` if the entry is not a draft.
    async fn mark_posted(
        &self,
        entry_id: &str,
        posted_at: DateTime<Utc>,
    ) -> LedgerResult<JournalEntry>;

    /// Posted -> reversed, recording the reversing entry in metadata.
    /// Fails with `InvalidState` if the entry is not posted.
    async fn mark_reversed(
        &self,
        entry_id: &str,
        reversed_at: DateTime<Utc>,
        reversal_entry_id: &str,
    ) -> LedgerResult<JournalEntry>;

    /// All entries with at least one line on the account, in insertion order
    async fn entries_for_account(&self, account_id: &str) -> LedgerResult<Vec<JournalEntry>>;

    /// All entries recorded for a business transaction
    async fn entries_for_transaction(&self, transaction_id: &str)
        -> LedgerResult<Vec<JournalEntry>>;

    /// All entries, optionally filtered by status, in insertion order
    async fn list_entries(&self, status: Option<EntryStatus>) -> LedgerResult<Vec<JournalEntry>>;
}

/// Storage for business transactions processed by the pipeline
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new transaction; ids are unique
    async fn insert_transaction(&self, transaction: &Transaction) -> LedgerResult<()>;

    /// Get a transaction by ID
    async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>>;

    /// Replace a transaction if its stored status still equals `expected`.
    /// Fails with `InvalidState` when another writer got there first.
    async fn update_transaction(
        &self,
        transaction: &Transaction,
        expected: TransactionStatus,
    ) -> LedgerResult<()>;

    /// All transactions in submission order
    async fn list_transactions(&self) -> LedgerResult<Vec<Transaction>>;
}

/// Everything the ledger and pipeline need from a backing store
///
/// Implement the three store traits on one cheaply clonable handle
/// (PostgreSQL pool, embedded database, in-memory maps) to plug it in.
pub trait LedgerStorage:
    AccountStore + JournalStore + TransactionStore + Clone + Send + Sync + 'static
{
}

impl<T> LedgerStorage for T where
    T: AccountStore + JournalStore + TransactionStore + Clone + Send + Sync + 'static
{
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        let mut errors = Vec::new();
        if let Err(LedgerError::Validation(mut found)) = validate_account_code(&account.code) {
            errors.append(&mut found);
        }
        if let Err(LedgerError::Validation(mut found)) = validate_account_name(&account.name) {
            errors.append(&mut found);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::Validation(errors))
        }
    }
}
