//! Creator payments walkthrough: tips, a subscription, a payout and a refund

use std::time::Duration;

use bigdecimal::BigDecimal;
use creator_ledger::utils::telemetry;
use creator_ledger::{
    Ledger, LedgerConfig, LedgerEvent, MemoryStorage, TransactionPipeline, TransactionRequest,
    TransactionType, ORIGINAL_TRANSACTION_ID,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    println!("🎨 Creator Ledger - Creator Payments Example\n");

    let config = LedgerConfig::load()?;
    let ledger = Ledger::with_config(MemoryStorage::new(), config);

    // 1. Chart of accounts for every configured currency
    let accounts = ledger.initialize().await?;
    println!("📊 Created {} accounts\n", accounts);

    // Print completed and failed transactions as they happen
    let mut events = ledger.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LedgerEvent::TransactionCompleted { transaction } => println!(
                    "  ✓ {} {} {} completed",
                    transaction.transaction_type, transaction.amount, transaction.currency
                ),
                LedgerEvent::TransactionFailed { transaction, error } => println!(
                    "  ✗ {} {} failed: {}",
                    transaction.transaction_type, transaction.amount, error
                ),
                _ => {}
            }
        }
    });

    // 2. Fans pay the creator
    println!("💰 Processing payments...");
    let pipeline = TransactionPipeline::start(ledger.clone());
    let payments = [
        (TransactionType::SubscriptionPayment, "100.00", "fan-1"),
        (TransactionType::TipPayment, "50.00", "fan-2"),
        (TransactionType::TipPayment, "50.00", "fan-3"),
        (TransactionType::ContentPurchase, "9.99", "fan-1"),
    ];
    let mut submitted = Vec::new();
    for (transaction_type, amount, fan) in payments {
        let request = TransactionRequest::new(transaction_type, "fanz", amount.parse()?, "USD")
            .user(fan)
            .creator("creator-1");
        submitted.push(pipeline.submit(request).await?);
    }
    for transaction in &submitted {
        pipeline
            .wait_for_outcome(&transaction.id, Duration::from_secs(5))
            .await?;
    }

    let owed = ledger.get_account_balance("2200.USD", None).await?;
    println!("\n🧾 Owed to creator: ${}\n", -owed.net_balance.clone());

    // 3. Pay the creator what they are owed, then refund one purchase
    println!("🏦 Paying out and refunding...");
    let payout = TransactionRequest::new(
        TransactionType::CreatorPayout,
        "fanz",
        -owed.net_balance,
        "USD",
    )
    .creator("creator-1")
    .kyc_verified(true);
    let payout = pipeline.submit(payout).await?;
    pipeline
        .wait_for_outcome(&payout.id, Duration::from_secs(5))
        .await?;

    let refund = TransactionRequest::new(
        TransactionType::Refund,
        "fanz",
        BigDecimal::from(5),
        "USD",
    )
    .user("fan-1")
    .metadata(ORIGINAL_TRANSACTION_ID, submitted[3].id.clone());
    let refund = pipeline.submit(refund).await?;
    pipeline
        .wait_for_outcome(&refund.id, Duration::from_secs(5))
        .await?;

    // An unsupported currency never reaches the queue
    let rejected =
        TransactionRequest::new(TransactionType::TipPayment, "fanz", BigDecimal::from(5), "GBP")
            .user("fan-4")
            .creator("creator-1");
    if let Err(e) = pipeline.submit(rejected).await {
        println!("  ✗ rejected: {}", e);
    }

    pipeline.shutdown().await;

    // 4. Trial balance
    println!("\n📈 Trial balance (USD)");
    let trial = ledger.get_trial_balance(None).await?;
    for line in &trial.balances {
        if line.account.currency.code == "USD" && line.balance.net_balance != BigDecimal::from(0) {
            println!(
                "  {:<10} {:<36} {:>10}",
                line.account.code, line.account.name, line.balance.net_balance
            );
        }
    }
    if let Some(usd) = trial.currency_totals("USD") {
        println!(
            "\n  Assets {} = Liabilities {} + Equity {} -> {}",
            usd.assets,
            usd.liabilities,
            usd.equity,
            if usd.is_balanced { "✓ balanced" } else { "✗ UNBALANCED" }
        );
    }

    let stats = pipeline.stats().await?;
    println!("\n📋 {} transactions processed: {:?}", stats.total, stats.by_status);

    let report = ledger.validate_integrity(None).await?;
    println!(
        "🔍 Integrity: {} ({} entries checked)",
        if report.is_valid { "valid" } else { "issues found" },
        report.entries_checked
    );

    drop(ledger);
    printer.abort();
    Ok(())
}
