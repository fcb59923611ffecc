//! Balance calculation and caching

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::events::{EventBus, LedgerEvent};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{tolerance_for, within_tolerance};

/// (account id, currency, as-of); `None` is the live balance
type CacheKey = (String, String, Option<DateTime<Utc>>);
type Pair = (String, String);

#[derive(Debug, Default)]
struct CacheState {
    balances: HashMap<CacheKey, Balance>,
    generations: HashMap<Pair, u64>,
}

/// Balance cache shared by the journal engine (which invalidates) and
/// the balance engine (which fills it).
///
/// Every invalidation bumps the pair's generation. A calculation records the
/// generation before reading entries and only stores its result if the
/// generation is unchanged, so a post racing with a calculation can never
/// leave a stale balance behind.
#[derive(Debug, Default)]
pub struct BalanceCache {
    state: RwLock<CacheState>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, key: &CacheKey) -> Option<Balance> {
        self.state.read().await.balances.get(key).cloned()
    }

    async fn generation(&self, pair: &Pair) -> u64 {
        self.state
            .read()
            .await
            .generations
            .get(pair)
            .copied()
            .unwrap_or(0)
    }

    async fn insert_if_current(&self, key: CacheKey, balance: Balance, generation: u64) -> bool {
        let mut state = self.state.write().await;
        let pair = (key.0.clone(), key.1.clone());
        if state.generations.get(&pair).copied().unwrap_or(0) != generation {
            return false;
        }
        state.balances.insert(key, balance);
        true
    }

    /// Drop cached balances a post at `posted_at` may have changed: the live
    /// balance and every historical balance at or after the posting instant.
    pub async fn invalidate(&self, pairs: &[(String, String)], posted_at: DateTime<Utc>) {
        let mut state = self.state.write().await;
        for pair in pairs {
            *state.generations.entry(pair.clone()).or_insert(0) += 1;
        }
        let before = state.balances.len();
        state.balances.retain(|(account_id, currency, as_of), _| {
            let touched = pairs
                .iter()
                .any(|(a, c)| a == account_id && c == currency);
            !touched || as_of.is_some_and(|at| at < posted_at)
        });
        tracing::debug!(
            pairs = pairs.len(),
            dropped = before - state.balances.len(),
            "balance cache invalidated"
        );
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.balances.clear();
        for generation in state.generations.values_mut() {
            *generation += 1;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.balances.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Computes balances from posted journal entries
pub struct BalanceEngine<S: LedgerStorage> {
    storage: S,
    cache: Arc<BalanceCache>,
    events: EventBus,
    tolerance: BigDecimal,
}

impl<S: LedgerStorage> BalanceEngine<S> {
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
        }
    }

    /// Balance of one account in one currency as of `as_of` (now when `None`)
    pub async fn calculate_account_balance(
        &self,
        account_id: &str,
        currency: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<Balance> {
        let key: CacheKey = (account_id.to_string(), currency.to_string(), as_of);
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(account_id, currency, "balance cache hit");
            return Ok(cached);
        }

        let generation = self
            .cache
            .generation(&(account_id.to_string(), currency.to_string()))
            .await;

        if self.storage.get_account(account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(account_id.to_string()));
        }

        let bound = as_of.unwrap_or_else(Utc::now);
        let mut balance = Balance::zero(account_id, currency, bound);
        for entry in self.storage.entries_for_account(account_id).await? {
            if !entry.is_effective_at(&bound) {
                continue;
            }
            for line in entry
                .lines
                .iter()
                .filter(|line| line.account_id == account_id && line.currency == currency)
            {
                balance.apply(line);
            }
        }

        self.cache
            .insert_if_current(key, balance.clone(), generation)
            .await;
        Ok(balance)
    }

    /// Trial balance over every active account, checking
    /// `assets == liabilities + equity` per currency.
    ///
    /// An imbalance is reported, not returned as an error.
    pub async fn calculate_all_balances(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> LedgerResult<TrialBalance> {
        let accounts: Vec<Account> = self
            .storage
            .list_accounts(None)
            .await?
            .into_iter()
            .filter(|account| account.is_active)
            .collect();

        let mut balances = Vec::with_capacity(accounts.len());
        let mut totals: BTreeMap<String, CurrencyTotals> = BTreeMap::new();
        let mut currencies: HashMap<String, Currency> = HashMap::new();

        for account in accounts {
            let balance = self
                .calculate_account_balance(&account.id, &account.currency.code, as_of)
                .await?;

            let currency_totals = totals.entry(account.currency.code.clone()).or_default();
            currency_totals.total_debits += &balance.debit_total;
            currency_totals.total_credits += &balance.credit_total;
            let normal = balance.normal_amount(account.account_type);
            match account.account_type {
                AccountType::Asset => currency_totals.assets += normal,
                AccountType::Liability => currency_totals.liabilities += normal,
                AccountType::Equity => currency_totals.equity += normal,
                AccountType::Revenue => currency_totals.revenue += normal,
                AccountType::Expense => currency_totals.expenses += normal,
            }
            currencies
                .entry(account.currency.code.clone())
                .or_insert_with(|| account.currency.clone());

            balances.push(AccountBalance { account, balance });
        }

        let mut is_balanced = true;
        for (code, currency_totals) in totals.iter_mut() {
            // Net income belongs to the owners until it is closed out
            currency_totals.equity =
                &currency_totals.equity + &currency_totals.revenue - &currency_totals.expenses;
            let right = &currency_totals.liabilities + &currency_totals.equity;
            let tolerance = tolerance_for(currencies.get(code), &self.tolerance);
            currency_totals.is_balanced =
                within_tolerance(&currency_totals.assets, &right, &tolerance);

            if !currency_totals.is_balanced {
                is_balanced = false;
                tracing::error!(
                    currency = %code,
                    assets = %currency_totals.assets,
                    liabilities = %currency_totals.liabilities,
                    equity = %currency_totals.equity,
                    "accounting equation violated"
                );
            }
        }

        let trial_balance = TrialBalance {
            as_of,
            calculated_at: Utc::now(),
            balances,
            totals,
            is_balanced,
        };

        self.events.publish(LedgerEvent::BalancesCalculated {
            as_of,
            account_count: trial_balance.balances.len(),
            is_balanced,
        });
        Ok(trial_balance)
    }

    /// Drop every cached balance
    pub async fn invalidate_all(&self) {
        self.cache.clear().await;
    }

    /// Number of cached balances
    pub async fn cached_len(&self) -> usize {
        self.cache.len().await
    }
}
