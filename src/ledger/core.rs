//! Main ledger orchestrator that coordinates accounts, journal and balances

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::events::EventBus;
use crate::ledger::{AccountRegistry, BalanceCache, BalanceEngine, JournalEngine};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{tolerance_for, within_tolerance};

/// Main ledger system wiring every engine over one storage backend
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    config: Arc<LedgerConfig>,
    events: EventBus,
    registry: Arc<AccountRegistry<S>>,
    journal: Arc<JournalEngine<S>>,
    balances: Arc<BalanceEngine<S>>,
}

impl<S: LedgerStorage> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            journal: self.journal.clone(),
            balances: self.balances.clone(),
        }
    }
}

impl<S: LedgerStorage> Ledger<S> {
    /// Create a new ledger with the given storage backend and default configuration
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, LedgerConfig::default())
    }

    /// Create a new ledger with explicit configuration
    pub fn with_config(storage: S, config: LedgerConfig) -> Self {
        Self::with_validator(storage, config, Box::new(DefaultAccountValidator))
    }

    /// Create a new ledger with a custom account validator
    pub fn with_validator(
        storage: S,
        config: LedgerConfig,
        account_validator: Box<dyn AccountValidator>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        let cache = Arc::new(BalanceCache::new());
        let tolerance = config.balance_tolerance.clone();

        Self {
            registry: Arc::new(AccountRegistry::with_validator(
                storage.clone(),
                events.clone(),
                account_validator,
            )),
            journal: Arc::new(JournalEngine::new(
                storage.clone(),
                cache.clone(),
                events.clone(),
                tolerance.clone(),
            )),
            balances: Arc::new(BalanceEngine::new(
                storage.clone(),
                cache,
                events.clone(),
                tolerance,
            )),
            storage,
            config: Arc::new(config),
            events,
        }
    }

    /// Create the standard chart of accounts for every configured currency
    pub async fn initialize(&self) -> LedgerResult<usize> {
        self.registry.initialize(&self.config.currencies).await
    }

    pub fn registry(&self) -> &AccountRegistry<S> {
        &self.registry
    }

    pub fn journal(&self) -> &JournalEngine<S> {
        &self.journal
    }

    pub fn balances(&self) -> &BalanceEngine<S> {
        &self.balances
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Balance of an account, by code, as of an instant (now when `None`)
    pub async fn get_account_balance(
        &self,
        code: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<Balance> {
        let account = self.registry.get_by_code(code).await?;
        self.balances
            .calculate_account_balance(&account.id, &account.currency.code, as_of)
            .await
    }

    /// Trial balance over every active account
    pub async fn get_trial_balance(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<TrialBalance> {
        self.balances.calculate_all_balances(as_of).await
    }

    /// Validate the integrity of the ledger
    ///
    /// Re-checks every non-draft entry posted by `as_of` for per-currency
    /// balance and the accounting equation of the trial balance.
    pub async fn validate_integrity(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<LedgerIntegrityReport> {
        let bound = as_of.unwrap_or_else(Utc::now);
        let mut issues = Vec::new();
        let mut entries_checked = 0;

        for entry in self.storage.list_entries(None).await? {
            if !entry.is_effective_at(&bound) {
                continue;
            }
            entries_checked += 1;

            for (code, side) in entry.totals_by_currency() {
                let currency = self.registry.currency(&code).await;
                let tolerance = tolerance_for(currency.as_ref(), &self.config.balance_tolerance);
                if !within_tolerance(&side.debits, &side.credits, &tolerance) {
                    issues.push(format!(
                        "Journal entry {} is unbalanced in {}: debits = {}, credits = {}",
                        entry.id, code, side.debits, side.credits
                    ));
                }
            }
        }

        let trial_balance = self.get_trial_balance(as_of).await?;
        let mut currencies = BTreeMap::new();
        for (code, totals) in &trial_balance.totals {
            let liabilities_equity = &totals.liabilities + &totals.equity;
            if !totals.is_balanced {
                issues.push(format!(
                    "Accounting equation violated in {}: assets = {}, liabilities + equity = {}",
                    code, totals.assets, liabilities_equity
                ));
            }
            currencies.insert(
                code.clone(),
                IntegrityTotals {
                    total_debits: totals.total_debits.clone(),
                    total_credits: totals.total_credits.clone(),
                    assets: totals.assets.clone(),
                    liabilities_equity,
                },
            );
        }

        Ok(LedgerIntegrityReport {
            as_of: bound,
            is_valid: issues.is_empty(),
            issues,
            entries_checked,
            currencies,
        })
    }
}

/// Per-currency figures in an integrity report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityTotals {
    pub total_debits: BigDecimal,
    pub total_credits: BigDecimal,
    pub assets: BigDecimal,
    pub liabilities_equity: BigDecimal,
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub as_of: DateTime<Utc>,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub entries_checked: usize,
    pub currencies: BTreeMap<String, IntegrityTotals>,
}
