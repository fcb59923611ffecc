//! Integration tests for the creator ledger

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use creator_ledger::{
    AccountType, Currency, EntryStatus, LedgerError, LedgerEvent, LedgerLine, Ledger,
    MemoryStorage, NewJournalEntry, StandardAccount,
};

fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

async fn ledger() -> Ledger<MemoryStorage> {
    let ledger = Ledger::new(MemoryStorage::new());
    ledger.initialize().await.unwrap();
    ledger
}

async fn account_id(
    ledger: &Ledger<MemoryStorage>,
    standard: StandardAccount,
    currency: &str,
) -> String {
    ledger.registry().require(standard, currency).await.unwrap().id
}

/// Draft and post a two-line entry
async fn post_transfer(
    ledger: &Ledger<MemoryStorage>,
    transaction_id: &str,
    debit: (StandardAccount, &str),
    credit: (StandardAccount, &str),
    currency: &str,
) -> String {
    let spec = NewJournalEntry::new(transaction_id, "transfer", "test")
        .line(LedgerLine::debit(
            &account_id(ledger, debit.0, currency).await,
            dec(debit.1),
            currency,
            "debit",
        ))
        .line(LedgerLine::credit(
            &account_id(ledger, credit.0, currency).await,
            dec(credit.1),
            currency,
            "credit",
        ));
    let draft = ledger.journal().create_draft(spec).await.unwrap();
    ledger.journal().post(&draft.id).await.unwrap().id
}

#[tokio::test]
async fn test_complete_ledger_workflow() {
    let ledger = ledger().await;

    // Owner funds the platform, then a tip comes in
    post_transfer(
        &ledger,
        "funding",
        (StandardAccount::Cash, "1000"),
        (StandardAccount::PlatformEquity, "1000"),
        "USD",
    )
    .await;
    post_transfer(
        &ledger,
        "tip",
        (StandardAccount::Cash, "50"),
        (StandardAccount::TipRevenue, "50"),
        "USD",
    )
    .await;

    let cash = ledger.get_account_balance("1001.USD", None).await.unwrap();
    assert_eq!(cash.net_balance, dec("1050"));
    assert_eq!(cash.debit_total, dec("1050"));

    let trial = ledger.get_trial_balance(None).await.unwrap();
    assert!(trial.is_balanced);
    let usd = trial.currency_totals("USD").unwrap();
    assert_eq!(usd.assets, dec("1050"));
    assert_eq!(usd.liabilities, dec("0"));
    assert_eq!(usd.equity, dec("1050"));
    assert_eq!(usd.total_debits, usd.total_credits);

    let equity = trial.balance_for("3200.USD").unwrap();
    assert_eq!(equity.balance.normal_amount(AccountType::Equity), dec("1000"));

    let report = ledger.validate_integrity(None).await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
    assert_eq!(report.entries_checked, 2);
}

#[tokio::test]
async fn test_double_post_leaves_balances_unchanged() {
    let ledger = ledger().await;
    let cash = account_id(&ledger, StandardAccount::Cash, "EUR").await;
    let fees = account_id(&ledger, StandardAccount::PlatformFees, "EUR").await;

    let spec = NewJournalEntry::new("fee-1", "fee", "test")
        .line(LedgerLine::debit(&cash, dec("12.50"), "EUR", "cash"))
        .line(LedgerLine::credit(&fees, dec("12.50"), "EUR", "fee"));
    let draft = ledger.journal().create_draft(spec).await.unwrap();
    ledger.journal().post(&draft.id).await.unwrap();
    let before = ledger.get_account_balance("1001.EUR", None).await.unwrap();

    assert!(matches!(
        ledger.journal().post(&draft.id).await,
        Err(LedgerError::InvalidState(_))
    ));
    ledger.balances().invalidate_all().await;
    let after = ledger.get_account_balance("1001.EUR", None).await.unwrap();
    assert_eq!(before.net_balance, after.net_balance);
}

#[tokio::test]
async fn test_reversal_restores_prior_totals() {
    let ledger = ledger().await;
    post_transfer(
        &ledger,
        "sub-1",
        (StandardAccount::Cash, "30"),
        (StandardAccount::SubscriptionRevenue, "30"),
        "USD",
    )
    .await;
    let baseline = ledger.get_trial_balance(None).await.unwrap();

    let mistaken = post_transfer(
        &ledger,
        "sub-2",
        (StandardAccount::Cash, "70"),
        (StandardAccount::SubscriptionRevenue, "70"),
        "USD",
    )
    .await;
    let mut events = ledger.events().subscribe();
    let reversal = ledger.journal().reverse(&mistaken).await.unwrap();

    let after = ledger.get_trial_balance(None).await.unwrap();
    let base_usd = baseline.currency_totals("USD").unwrap();
    let after_usd = after.currency_totals("USD").unwrap();
    assert_eq!(base_usd.assets, after_usd.assets);
    assert_eq!(base_usd.equity, after_usd.equity);
    assert_eq!(base_usd.revenue, after_usd.revenue);
    assert!(after.is_balanced);

    let original = ledger.journal().get(&mistaken).await.unwrap();
    assert_eq!(original.status, EntryStatus::Reversed);
    assert_eq!(reversal.metadata.get("reversal_of"), Some(&mistaken));

    let mut saw_reversed = false;
    while let Ok(event) = events.try_recv() {
        if let LedgerEvent::JournalEntryReversed { original_id, reversal_id } = event {
            assert_eq!(original_id, mistaken);
            assert_eq!(reversal_id, reversal.id);
            saw_reversed = true;
        }
    }
    assert!(saw_reversed);
}

#[tokio::test]
async fn test_historical_balance_ignores_later_posts() {
    let ledger = ledger().await;
    post_transfer(
        &ledger,
        "deposit-1",
        (StandardAccount::CryptoHoldings, "0.5"),
        (StandardAccount::AccountsPayable, "0.5"),
        "BTC",
    )
    .await;
    let checkpoint = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    post_transfer(
        &ledger,
        "deposit-2",
        (StandardAccount::CryptoHoldings, "0.25"),
        (StandardAccount::AccountsPayable, "0.25"),
        "BTC",
    )
    .await;

    let then = ledger
        .get_account_balance("1010.BTC", Some(checkpoint))
        .await
        .unwrap();
    let now = ledger.get_account_balance("1010.BTC", None).await.unwrap();
    assert_eq!(then.net_balance, dec("0.5"));
    assert_eq!(now.net_balance, dec("0.75"));

    let before_anything = ledger
        .get_trial_balance(Some(checkpoint - Duration::days(1)))
        .await
        .unwrap();
    let btc = before_anything.currency_totals("BTC").unwrap();
    assert_eq!(btc.assets, dec("0"));
    assert!(before_anything.is_balanced);
}

#[tokio::test]
async fn test_accounting_equation_per_currency() {
    let ledger = ledger().await;
    post_transfer(
        &ledger,
        "usd",
        (StandardAccount::Cash, "100"),
        (StandardAccount::CreatorPayoutsPending, "100"),
        "USD",
    )
    .await;
    post_transfer(
        &ledger,
        "eth",
        (StandardAccount::PlatformOperating, "0.000000000000000001"),
        (StandardAccount::CryptoHoldings, "0.000000000000000001"),
        "ETH",
    )
    .await;

    let trial = ledger.get_trial_balance(None).await.unwrap();
    assert!(trial.is_balanced);
    for currency in ["USD", "EUR", "BTC", "ETH"] {
        assert!(trial.currency_totals(currency).unwrap().is_balanced, "{currency}");
    }
    let eth = trial.currency_totals("ETH").unwrap();
    assert_eq!(eth.assets, dec("-0.000000000000000001"));
    assert_eq!(eth.expenses, dec("0.000000000000000001"));
}

#[tokio::test]
async fn test_cross_currency_entry_balances_per_currency() {
    let ledger = ledger().await;
    let usd_cash = account_id(&ledger, StandardAccount::Cash, "USD").await;
    let eur_cash = account_id(&ledger, StandardAccount::Cash, "EUR").await;
    let usd_payable = account_id(&ledger, StandardAccount::AccountsPayable, "USD").await;
    let eur_payable = account_id(&ledger, StandardAccount::AccountsPayable, "EUR").await;

    // Balanced overall but not per currency
    let lopsided = NewJournalEntry::new("fx", "fx", "test")
        .line(LedgerLine::debit(&usd_cash, dec("10"), "USD", "usd in"))
        .line(LedgerLine::credit(&eur_payable, dec("10"), "EUR", "eur owed"));
    match ledger.journal().create_draft(lopsided).await {
        Err(LedgerError::InvalidEntry(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected invalid entry, got {other:?}"),
    }

    let balanced = NewJournalEntry::new("fx", "fx", "test")
        .line(LedgerLine::debit(&usd_cash, dec("10"), "USD", "usd in"))
        .line(LedgerLine::credit(&usd_payable, dec("10"), "USD", "usd owed"))
        .line(LedgerLine::debit(&eur_cash, dec("9.20"), "EUR", "eur in"))
        .line(LedgerLine::credit(&eur_payable, dec("9.20"), "EUR", "eur owed"));
    let draft = ledger.journal().create_draft(balanced).await.unwrap();
    let posted = ledger.journal().post(&draft.id).await.unwrap();
    assert_eq!(posted.totals_by_currency().len(), 2);
}

#[tokio::test]
async fn test_register_currency_at_runtime() {
    let ledger = ledger().await;
    let gbp = Currency::new("GBP", "£", 2, creator_ledger::CurrencyKind::Fiat);
    let created = ledger.registry().register_currency(gbp).await.unwrap();
    assert_eq!(created.len(), 18);
    assert!(ledger.registry().get_by_code("1001.GBP").await.is_ok());

    let trial = ledger.get_trial_balance(None).await.unwrap();
    assert!(trial.currency_totals("GBP").is_some());
}

#[tokio::test]
async fn test_deactivated_account_leaves_trial_balance() {
    let ledger = ledger().await;
    let before = ledger.get_trial_balance(None).await.unwrap().balances.len();
    ledger.registry().deactivate("5400.EUR").await.unwrap();
    let after = ledger.get_trial_balance(None).await.unwrap();
    assert_eq!(after.balances.len(), before - 1);
    assert!(after.balance_for("5400.EUR").is_none());
}

#[tokio::test]
async fn test_high_precision_currency_posts_and_balances() {
    let ledger = ledger().await;
    let near = Currency::new("NEAR", "N", 24, creator_ledger::CurrencyKind::Crypto);
    ledger.registry().register_currency(near).await.unwrap();

    let tiny = "0.000000000000000000000001";
    post_transfer(
        &ledger,
        "near-deposit",
        (StandardAccount::CryptoHoldings, tiny),
        (StandardAccount::AccountsPayable, tiny),
        "NEAR",
    )
    .await;

    let holdings = ledger.get_account_balance("1010.NEAR", None).await.unwrap();
    assert_eq!(holdings.net_balance, dec(tiny));

    let trial = ledger.get_trial_balance(None).await.unwrap();
    assert!(trial.is_balanced);
    assert_eq!(trial.currency_totals("NEAR").unwrap().assets, dec(tiny));

    let report = ledger.validate_integrity(None).await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}
