//! Core types and data structures for the ledger

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Free-form key/value metadata attached to accounts, lines, entries and transactions
pub type Metadata = HashMap<String, String>;

/// Build a decimal from integer units and a scale, e.g. `decimal(29, 1) == 2.9`
pub fn decimal(units: i64, scale: u32) -> BigDecimal {
    BigDecimal::new(units.into(), i64::from(scale))
}

/// Whether a currency is a fiat currency or a crypto asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyKind {
    Fiat,
    Crypto,
}

/// Currency reference data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// Currency code (USD, EUR, BTC, ETH, ...)
    pub code: String,
    /// Display symbol
    pub symbol: String,
    /// Number of decimal places in the smallest unit
    pub decimals: u32,
    /// Fiat or crypto
    pub kind: CurrencyKind,
}

impl Currency {
    pub fn new(code: &str, symbol: &str, decimals: u32, kind: CurrencyKind) -> Self {
        Self {
            code: code.to_string(),
            symbol: symbol.to_string(),
            decimals,
            kind,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", "$", 2, CurrencyKind::Fiat)
    }

    pub fn eur() -> Self {
        Self::new("EUR", "€", 2, CurrencyKind::Fiat)
    }

    pub fn btc() -> Self {
        Self::new("BTC", "₿", 8, CurrencyKind::Crypto)
    }

    pub fn eth() -> Self {
        Self::new("ETH", "Ξ", 18, CurrencyKind::Crypto)
    }

    /// The currencies a fresh ledger is initialized with
    pub fn defaults() -> Vec<Currency> {
        vec![Self::usd(), Self::eur(), Self::btc(), Self::eth()]
    }

    /// Smallest representable amount, e.g. 0.01 for USD
    pub fn minor_unit(&self) -> BigDecimal {
        decimal(1, self.decimals)
    }

    /// Round an amount to this currency's precision (banker's rounding)
    pub fn round(&self, amount: &BigDecimal) -> BigDecimal {
        amount.with_scale_round(i64::from(self.decimals), RoundingMode::HalfEven)
    }

    /// Whether the amount can be represented without losing precision
    pub fn fits_precision(&self, amount: &BigDecimal) -> bool {
        let (_, scale) = amount.normalized().as_bigint_and_exponent();
        scale <= i64::from(self.decimals)
    }
}

/// Account types following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// What the platform owns (cash, crypto holdings, receivables)
    Asset,
    /// What the platform owes (creator payouts pending, tax withholding)
    Liability,
    /// Owners' interest in the platform
    Equity,
    /// Money earned (subscriptions, tips, fees)
    Revenue,
    /// Costs incurred (creator payouts, processing fees)
    Expense,
}

impl AccountType {
    /// Returns the normal balance side for this account type.
    /// Assets and Expenses normally have debit balances,
    /// Liabilities, Equity, and Revenue normally have credit balances
    pub fn normal_balance(&self) -> EntryType {
        match self {
            AccountType::Asset | AccountType::Expense => EntryType::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                EntryType::Credit
            }
        }
    }
}

/// Side of a ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Debit,
    Credit,
}

/// Account in the chart of accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: String,
    /// Human code, unique across the ledger (e.g. "1001.USD")
    pub code: String,
    /// Human-readable name
    pub name: String,
    /// Type of account; immutable after creation
    pub account_type: AccountType,
    /// Currency of every line posted to this account; immutable after creation
    pub currency: Currency,
    /// Optional parent account for hierarchical charts
    pub parent_id: Option<String>,
    /// Inactive accounts cannot receive new lines
    pub is_active: bool,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active account with a fresh id
    pub fn new(
        code: String,
        name: String,
        account_type: AccountType,
        currency: Currency,
        parent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            name,
            account_type,
            currency,
            parent_id,
            is_active: true,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single debit or credit line within a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub id: String,
    pub account_id: String,
    pub debit_amount: BigDecimal,
    pub credit_amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub metadata: Metadata,
}

impl LedgerLine {
    fn new(
        account_id: &str,
        debit_amount: BigDecimal,
        credit_amount: BigDecimal,
        currency: &str,
        description: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            debit_amount,
            credit_amount,
            currency: currency.to_string(),
            description: description.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Create a debit line
    pub fn debit(account_id: &str, amount: BigDecimal, currency: &str, description: &str) -> Self {
        Self::new(account_id, amount, BigDecimal::from(0), currency, description)
    }

    /// Create a credit line
    pub fn credit(account_id: &str, amount: BigDecimal, currency: &str, description: &str) -> Self {
        Self::new(account_id, BigDecimal::from(0), amount, currency, description)
    }

    /// Attach a metadata pair
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Which side carries the amount; `None` when the line is malformed
    pub fn entry_type(&self) -> Option<EntryType> {
        let zero = BigDecimal::from(0);
        match (self.debit_amount > zero, self.credit_amount > zero) {
            (true, false) if self.credit_amount == zero => Some(EntryType::Debit),
            (false, true) if self.debit_amount == zero => Some(EntryType::Credit),
            _ => None,
        }
    }

    /// The nonzero amount regardless of side
    pub fn amount(&self) -> BigDecimal {
        &self.debit_amount + &self.credit_amount
    }

    /// A new line with debit and credit swapped, used for reversals
    pub fn swapped(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: self.account_id.clone(),
            debit_amount: self.credit_amount.clone(),
            credit_amount: self.debit_amount.clone(),
            currency: self.currency.clone(),
            description: format!("Reversal: {}", self.description),
            metadata: self.metadata.clone(),
        }
    }
}

/// Lifecycle of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Draft,
    Posted,
    Reversed,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Posted => "posted",
            EntryStatus::Reversed => "reversed",
        };
        f.write_str(s)
    }
}

/// Debit and credit totals for one currency
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SideTotals {
    pub debits: BigDecimal,
    pub credits: BigDecimal,
}

/// Balanced group of ledger lines representing one transaction's accounting effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    /// Business transaction this entry records
    pub transaction_id: String,
    pub description: String,
    /// Optional external reference (subscription id, payout id, ...)
    pub reference: Option<String>,
    /// Platform that originated the transaction
    pub platform: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub lines: Vec<LedgerLine>,
    pub status: EntryStatus,
    pub metadata: Metadata,
}

impl JournalEntry {
    /// Debit and credit totals grouped by currency
    pub fn totals_by_currency(&self) -> BTreeMap<String, SideTotals> {
        totals_by_currency(&self.lines)
    }

    /// Distinct (account id, currency) pairs touched by this entry
    pub fn touched_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .lines
            .iter()
            .map(|line| (line.account_id.clone(), line.currency.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Whether this entry currently contributes to balances as of `as_of`
    pub fn is_effective_at(&self, as_of: &DateTime<Utc>) -> bool {
        self.status != EntryStatus::Draft && self.posted_at.is_some_and(|at| at <= *as_of)
    }
}

/// Group line totals by currency
pub fn totals_by_currency(lines: &[LedgerLine]) -> BTreeMap<String, SideTotals> {
    let mut totals: BTreeMap<String, SideTotals> = BTreeMap::new();
    for line in lines {
        let entry = totals.entry(line.currency.clone()).or_default();
        entry.debits += &line.debit_amount;
        entry.credits += &line.credit_amount;
    }
    totals
}

/// Unposted journal entry specification, as produced by the rule compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub transaction_id: String,
    pub description: String,
    pub reference: Option<String>,
    pub platform: String,
    pub user_id: Option<String>,
    pub lines: Vec<LedgerLine>,
    pub metadata: Metadata,
}

impl NewJournalEntry {
    pub fn new(transaction_id: &str, description: &str, platform: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            description: description.to_string(),
            reference: None,
            platform: platform.to_string(),
            user_id: None,
            lines: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn line(mut self, line: LedgerLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Derived balance of one account in one currency as of an instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: String,
    pub currency: String,
    pub debit_total: BigDecimal,
    pub credit_total: BigDecimal,
    /// debit_total - credit_total
    pub net_balance: BigDecimal,
    pub as_of: DateTime<Utc>,
}

impl Balance {
    pub fn zero(account_id: &str, currency: &str, as_of: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            currency: currency.to_string(),
            debit_total: BigDecimal::from(0),
            credit_total: BigDecimal::from(0),
            net_balance: BigDecimal::from(0),
            as_of,
        }
    }

    /// Fold one line into the totals
    pub fn apply(&mut self, line: &LedgerLine) {
        self.debit_total += &line.debit_amount;
        self.credit_total += &line.credit_amount;
        self.net_balance = &self.debit_total - &self.credit_total;
    }

    /// Balance signed by the account type's normal side
    /// (positive when a liability carries a credit balance, etc.)
    pub fn normal_amount(&self, account_type: AccountType) -> BigDecimal {
        match account_type.normal_balance() {
            EntryType::Debit => self.net_balance.clone(),
            EntryType::Credit => -self.net_balance.clone(),
        }
    }
}

/// Account together with its balance, as listed in a trial balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account: Account,
    pub balance: Balance,
}

/// Per-currency aggregates of a trial balance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrencyTotals {
    /// Sum of asset balances (debit-normal)
    pub assets: BigDecimal,
    /// Sum of liability balances (credit-normal)
    pub liabilities: BigDecimal,
    /// Equity plus revenue minus expenses (credit-normal)
    pub equity: BigDecimal,
    pub revenue: BigDecimal,
    pub expenses: BigDecimal,
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    /// assets == liabilities + equity within tolerance
    pub is_balanced: bool,
}

/// Snapshot of every active account's balance and the accounting equation check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    /// Bound of the calculation; `None` for a live calculation
    pub as_of: Option<DateTime<Utc>>,
    pub calculated_at: DateTime<Utc>,
    pub balances: Vec<AccountBalance>,
    pub totals: BTreeMap<String, CurrencyTotals>,
    pub is_balanced: bool,
}

impl TrialBalance {
    /// Totals for one currency, if any active account uses it
    pub fn currency_totals(&self, currency: &str) -> Option<&CurrencyTotals> {
        self.totals.get(currency)
    }

    /// Balance line for an account code
    pub fn balance_for(&self, code: &str) -> Option<&AccountBalance> {
        self.balances.iter().find(|ab| ab.account.code == code)
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("Invalid journal entry: {}", .0.join("; "))]
    InvalidEntry(Vec<String>),
    #[error("Required account missing: {0}")]
    MissingAccount(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Journal entry not found: {0}")]
    EntryNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Account code already exists: {0}")]
    DuplicateCode(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Processing queue is closed")]
    QueueClosed,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidEntry(_) => "INVALID_ENTRY",
            Self::MissingAccount(_) => "MISSING_ACCOUNT",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::DuplicateCode(_) => "DUPLICATE_CODE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::QueueClosed => "QUEUE_CLOSED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound(_) | Self::EntryNotFound(_) | Self::TransactionNotFound(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
