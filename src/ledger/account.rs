//! Chart of accounts management

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::events::{EventBus, LedgerEvent};
use crate::traits::*;
use crate::types::*;

/// Standard accounts of the creator-economy chart.
///
/// Each one exists once per currency, coded `"<code>.<currency>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardAccount {
    Cash,
    CryptoHoldings,
    AccountsReceivable,
    CreatorAdvances,
    AccountsPayable,
    CreatorPayoutsPending,
    PlatformFeesPayable,
    TaxWithholding,
    RetainedEarnings,
    PlatformEquity,
    SubscriptionRevenue,
    TipRevenue,
    ContentSales,
    PlatformFees,
    NftSales,
    CreatorPayouts,
    PaymentProcessing,
    PlatformOperating,
    TaxExpense,
}

impl StandardAccount {
    pub const ALL: [StandardAccount; 19] = [
        StandardAccount::Cash,
        StandardAccount::CryptoHoldings,
        StandardAccount::AccountsReceivable,
        StandardAccount::CreatorAdvances,
        StandardAccount::AccountsPayable,
        StandardAccount::CreatorPayoutsPending,
        StandardAccount::PlatformFeesPayable,
        StandardAccount::TaxWithholding,
        StandardAccount::RetainedEarnings,
        StandardAccount::PlatformEquity,
        StandardAccount::SubscriptionRevenue,
        StandardAccount::TipRevenue,
        StandardAccount::ContentSales,
        StandardAccount::PlatformFees,
        StandardAccount::NftSales,
        StandardAccount::CreatorPayouts,
        StandardAccount::PaymentProcessing,
        StandardAccount::PlatformOperating,
        StandardAccount::TaxExpense,
    ];

    /// Key stored in account metadata under `standard_account`
    pub fn key(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::CryptoHoldings => "CRYPTO_HOLDINGS",
            Self::AccountsReceivable => "ACCOUNTS_RECEIVABLE",
            Self::CreatorAdvances => "CREATOR_ADVANCES",
            Self::AccountsPayable => "ACCOUNTS_PAYABLE",
            Self::CreatorPayoutsPending => "CREATOR_PAYOUTS_PENDING",
            Self::PlatformFeesPayable => "PLATFORM_FEES_PAYABLE",
            Self::TaxWithholding => "TAX_WITHHOLDING",
            Self::RetainedEarnings => "RETAINED_EARNINGS",
            Self::PlatformEquity => "PLATFORM_EQUITY",
            Self::SubscriptionRevenue => "SUBSCRIPTION_REVENUE",
            Self::TipRevenue => "TIP_REVENUE",
            Self::ContentSales => "CONTENT_SALES",
            Self::PlatformFees => "PLATFORM_FEES",
            Self::NftSales => "NFT_SALES",
            Self::CreatorPayouts => "CREATOR_PAYOUTS",
            Self::PaymentProcessing => "PAYMENT_PROCESSING",
            Self::PlatformOperating => "PLATFORM_OPERATING",
            Self::TaxExpense => "TAX_EXPENSE",
        }
    }

    /// Numeric chart code, shared by every currency
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cash => "1001",
            Self::CryptoHoldings => "1010",
            Self::AccountsReceivable => "1100",
            Self::CreatorAdvances => "1200",
            Self::AccountsPayable => "2100",
            Self::CreatorPayoutsPending => "2200",
            Self::PlatformFeesPayable => "2300",
            Self::TaxWithholding => "2400",
            Self::RetainedEarnings => "3100",
            Self::PlatformEquity => "3200",
            Self::SubscriptionRevenue => "4100",
            Self::TipRevenue => "4200",
            Self::ContentSales => "4300",
            Self::PlatformFees => "4400",
            Self::NftSales => "4500",
            Self::CreatorPayouts => "5100",
            Self::PaymentProcessing => "5200",
            Self::PlatformOperating => "5300",
            Self::TaxExpense => "5400",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cash => "Cash",
            Self::CryptoHoldings => "Crypto Holdings",
            Self::AccountsReceivable => "Accounts Receivable",
            Self::CreatorAdvances => "Creator Advance Payments",
            Self::AccountsPayable => "Accounts Payable",
            Self::CreatorPayoutsPending => "Creator Payouts Pending",
            Self::PlatformFeesPayable => "Platform Fees Payable",
            Self::TaxWithholding => "Tax Withholding Payable",
            Self::RetainedEarnings => "Retained Earnings",
            Self::PlatformEquity => "Platform Equity",
            Self::SubscriptionRevenue => "Subscription Revenue",
            Self::TipRevenue => "Tip Revenue",
            Self::ContentSales => "Content Sales Revenue",
            Self::PlatformFees => "Platform Fee Revenue",
            Self::NftSales => "NFT Sales Revenue",
            Self::CreatorPayouts => "Creator Payout Expense",
            Self::PaymentProcessing => "Payment Processing Fees",
            Self::PlatformOperating => "Platform Operating Expenses",
            Self::TaxExpense => "Tax Expense",
        }
    }

    pub fn account_type(&self) -> AccountType {
        match self {
            Self::Cash
            | Self::CryptoHoldings
            | Self::AccountsReceivable
            | Self::CreatorAdvances => AccountType::Asset,
            Self::AccountsPayable
            | Self::CreatorPayoutsPending
            | Self::PlatformFeesPayable
            | Self::TaxWithholding => AccountType::Liability,
            Self::RetainedEarnings | Self::PlatformEquity => AccountType::Equity,
            Self::SubscriptionRevenue
            | Self::TipRevenue
            | Self::ContentSales
            | Self::PlatformFees
            | Self::NftSales => AccountType::Revenue,
            Self::CreatorPayouts
            | Self::PaymentProcessing
            | Self::PlatformOperating
            | Self::TaxExpense => AccountType::Expense,
        }
    }

    /// Cash is held for fiat currencies only, crypto holdings for crypto only
    pub fn applies_to(&self, kind: CurrencyKind) -> bool {
        match self {
            Self::Cash => kind == CurrencyKind::Fiat,
            Self::CryptoHoldings => kind == CurrencyKind::Crypto,
            _ => true,
        }
    }

    /// Account that receives and pays out funds in a currency
    pub fn settlement(kind: CurrencyKind) -> Self {
        match kind {
            CurrencyKind::Fiat => Self::Cash,
            CurrencyKind::Crypto => Self::CryptoHoldings,
        }
    }

    /// Full account code for a currency, e.g. `1001.USD`
    pub fn account_code(&self, currency_code: &str) -> String {
        format!("{}.{}", self.code(), currency_code)
    }
}

/// Registry of accounts and the currencies they are kept in
pub struct AccountRegistry<S: LedgerStorage> {
    storage: S,
    validator: Box<dyn AccountValidator>,
    currencies: RwLock<HashMap<String, Currency>>,
    events: EventBus,
}

impl<S: LedgerStorage> AccountRegistry<S> {
    /// Create a new registry
    pub fn new(storage: S, events: EventBus) -> Self {
        Self::with_validator(storage, events, Box::new(DefaultAccountValidator))
    }

    /// Create a new registry with custom validator
    pub fn with_validator(
        storage: S,
        events: EventBus,
        validator: Box<dyn AccountValidator>,
    ) -> Self {
        Self {
            storage,
            validator,
            currencies: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create the standard chart for every currency. Returns the number of
    /// accounts in the registry afterwards. Safe to call again.
    pub async fn initialize(&self, currencies: &[Currency]) -> LedgerResult<usize> {
        for currency in currencies {
            self.register_currency(currency.clone()).await?;
        }

        let account_count = self.storage.list_accounts(None).await?.len();
        tracing::info!(
            account_count,
            currencies = currencies.len(),
            "standard chart of accounts initialized"
        );
        self.events
            .publish(LedgerEvent::AccountsInitialized { account_count });
        Ok(account_count)
    }

    /// Add a currency and create its standard accounts
    pub async fn register_currency(&self, currency: Currency) -> LedgerResult<Vec<Account>> {
        {
            let mut currencies = self.currencies.write().await;
            if let Some(existing) = currencies.get(&currency.code) {
                if *existing != currency {
                    return Err(LedgerError::Validation(vec![format!(
                        "Currency {} is already registered with different reference data",
                        currency.code
                    )]));
                }
            }
            currencies.insert(currency.code.clone(), currency.clone());
        }

        let mut accounts = Vec::new();
        for standard in StandardAccount::ALL {
            if standard.applies_to(currency.kind) {
                accounts.push(self.ensure_account(standard, &currency).await?);
            }
        }
        Ok(accounts)
    }

    /// Registered currency by code
    pub async fn currency(&self, code: &str) -> Option<Currency> {
        self.currencies.read().await.get(code).cloned()
    }

    pub async fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> =
            self.currencies.read().await.values().cloned().collect();
        currencies.sort_by(|a, b| a.code.cmp(&b.code));
        currencies
    }

    /// Get or create the account for a standard key in a currency
    pub async fn ensure_account(
        &self,
        standard: StandardAccount,
        currency: &Currency,
    ) -> LedgerResult<Account> {
        let code = standard.account_code(&currency.code);
        if let Some(existing) = self.storage.get_account_by_code(&code).await? {
            return Ok(existing);
        }

        let mut account = Account::new(
            code.clone(),
            format!("{} ({})", standard.name(), currency.code),
            standard.account_type(),
            currency.clone(),
            None,
        );
        account
            .metadata
            .insert("standard_account".to_string(), standard.key().to_string());

        match self.insert(&account).await {
            Ok(()) => Ok(account),
            // Lost a race with a concurrent ensure; the winner's account stands
            Err(LedgerError::DuplicateCode(_)) => self.get_by_code(&code).await,
            Err(e) => Err(e),
        }
    }

    /// Create a custom account
    pub async fn create_account(
        &self,
        code: String,
        name: String,
        account_type: AccountType,
        currency: Currency,
        parent_id: Option<String>,
        metadata: Metadata,
    ) -> LedgerResult<Account> {
        let mut account = Account::new(code, name, account_type, currency, parent_id);
        account.metadata = metadata;

        // Validate parent account exists if specified
        if let Some(ref parent_id) = account.parent_id {
            let parent = self.get(parent_id).await.map_err(|_| {
                LedgerError::Validation(vec![format!(
                    "Parent account '{}' does not exist",
                    parent_id
                )])
            })?;
            if parent.currency.code != account.currency.code {
                return Err(LedgerError::Validation(vec![format!(
                    "Parent account '{}' is kept in {}, not {}",
                    parent.code, parent.currency.code, account.currency.code
                )]));
            }
        }

        self.insert(&account).await?;
        Ok(account)
    }

    async fn insert(&self, account: &Account) -> LedgerResult<()> {
        self.validator.validate_account(account)?;
        self.storage.insert_account(account).await?;
        tracing::debug!(code = %account.code, account_id = %account.id, "account created");
        Ok(())
    }

    /// Get an account by ID
    pub async fn get(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Get an account by code
    pub async fn get_by_code(&self, code: &str) -> LedgerResult<Account> {
        self.storage
            .get_account_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(code.to_string()))
    }

    /// Active accounts of one type
    pub async fn list_by_type(&self, account_type: AccountType) -> LedgerResult<Vec<Account>> {
        Ok(self
            .storage
            .list_accounts(Some(account_type))
            .await?
            .into_iter()
            .filter(|account| account.is_active)
            .collect())
    }

    /// Every active account
    pub async fn list_active(&self) -> LedgerResult<Vec<Account>> {
        Ok(self
            .storage
            .list_accounts(None)
            .await?
            .into_iter()
            .filter(|account| account.is_active)
            .collect())
    }

    /// Deactivate an account; it keeps its history but accepts no new lines
    pub async fn deactivate(&self, code: &str) -> LedgerResult<Account> {
        let account = self.get_by_code(code).await?;
        let updated = self.storage.set_account_active(&account.id, false).await?;
        tracing::info!(code, "account deactivated");
        Ok(updated)
    }

    /// Active account for a standard key in a currency, or `MissingAccount`
    pub async fn require(
        &self,
        standard: StandardAccount,
        currency_code: &str,
    ) -> LedgerResult<Account> {
        let code = standard.account_code(currency_code);
        match self.storage.get_account_by_code(&code).await? {
            Some(account) if account.is_active => Ok(account),
            _ => Err(LedgerError::MissingAccount(code)),
        }
    }

    /// Settlement account (cash or crypto holdings) for a currency
    pub async fn settlement_account(&self, currency_code: &str) -> LedgerResult<Account> {
        let currency = self
            .currency(currency_code)
            .await
            .ok_or_else(|| LedgerError::MissingAccount(format!("1001.{}", currency_code)))?;
        self.require(StandardAccount::settlement(currency.kind), currency_code)
            .await
    }
}
