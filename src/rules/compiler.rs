//! Compiles business transactions into balanced journal entry specifications

use bigdecimal::BigDecimal;

use crate::ledger::{Ledger, StandardAccount};
use crate::pipeline::{Transaction, TransactionType};
use crate::rules::table::{TransactionRule, ORIGINAL_TRANSACTION_ID};
use crate::traits::*;
use crate::types::*;

/// Metadata key naming how a creator payout is sent
pub const PAYMENT_METHOD: &str = "payment_method";

const DEFAULT_PAYMENT_METHOD: &str = "bank_transfer";

/// How a revenue-type transaction is split
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSplit {
    pub gross: BigDecimal,
    pub platform_fee: BigDecimal,
    /// `gross - platform_fee`, recognized as creator payout expense
    pub creator_payout: BigDecimal,
    pub tax_withholding: BigDecimal,
    /// `creator_payout - tax_withholding`, owed to the creator
    pub net_payout: BigDecimal,
}

impl FeeSplit {
    /// Round the fee, then derive the payout from it, so fee and payout
    /// always add up to the gross exactly
    pub fn calculate(gross: &BigDecimal, rule: &TransactionRule, currency: &Currency) -> Self {
        let hundred = BigDecimal::from(100);
        let platform_fee = currency.round(&(gross * &rule.platform_fee_percent / &hundred));
        let creator_payout = gross - &platform_fee;
        let tax_withholding = rule
            .tax_withholding_percent
            .as_ref()
            .map(|percent| currency.round(&(&creator_payout * percent / &hundred)))
            .unwrap_or_default();
        let net_payout = &creator_payout - &tax_withholding;

        Self {
            gross: gross.clone(),
            platform_fee,
            creator_payout,
            tax_withholding,
            net_payout,
        }
    }
}

/// Turns a transaction and its rule into the lines of a journal entry.
///
/// Apart from account lookups the compiler is pure: it never writes.
pub struct RuleCompiler<S: LedgerStorage> {
    ledger: Ledger<S>,
    post_processing_fees: bool,
}

impl<S: LedgerStorage> RuleCompiler<S> {
    pub fn new(ledger: Ledger<S>) -> Self {
        let post_processing_fees = ledger.config().post_processing_fees;
        Self {
            ledger,
            post_processing_fees,
        }
    }

    /// Override whether estimated processing fees are posted as expense
    pub fn with_processing_fees(mut self, post: bool) -> Self {
        self.post_processing_fees = post;
        self
    }

    /// Build the entry for a transaction. Fails with `MissingAccount` when a
    /// required account is absent or inactive; no partial entry is produced.
    pub async fn compile(
        &self,
        transaction: &Transaction,
        rule: &TransactionRule,
    ) -> LedgerResult<NewJournalEntry> {
        if rule.transaction_type != transaction.transaction_type {
            return Err(LedgerError::Validation(vec![format!(
                "Rule for {} cannot compile a {} transaction",
                rule.transaction_type, transaction.transaction_type
            )]));
        }

        let registry = self.ledger.registry();
        let currency = registry
            .currency(&transaction.currency)
            .await
            .ok_or_else(|| {
                LedgerError::MissingAccount(
                    StandardAccount::Cash.account_code(&transaction.currency),
                )
            })?;
        let settlement = registry.settlement_account(&currency.code).await?;

        let mut entry = match transaction.transaction_type {
            TransactionType::SubscriptionPayment => {
                let revenue = StandardAccount::SubscriptionRevenue;
                self.compile_revenue(transaction, rule, &currency, &settlement, revenue).await?
            }
            TransactionType::TipPayment => {
                let revenue = StandardAccount::TipRevenue;
                self.compile_revenue(transaction, rule, &currency, &settlement, revenue).await?
            }
            TransactionType::ContentPurchase => {
                let revenue = StandardAccount::ContentSales;
                self.compile_revenue(transaction, rule, &currency, &settlement, revenue).await?
            }
            TransactionType::NftPurchase => {
                let revenue = StandardAccount::NftSales;
                self.compile_revenue(transaction, rule, &currency, &settlement, revenue).await?
            }
            TransactionType::CreatorPayout => {
                let pending = registry
                    .require(StandardAccount::CreatorPayoutsPending, &currency.code)
                    .await?;
                let method = transaction
                    .metadata
                    .get(PAYMENT_METHOD)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());
                let description = format!(
                    "Creator payout to {} via {}",
                    party(&transaction.creator_id),
                    method
                );
                let mut entry = self
                    .transfer(
                        transaction,
                        &description,
                        (&pending, "Creator payout liability settled"),
                        (&settlement, "Creator payout sent"),
                    )
                    .metadata(PAYMENT_METHOD, method);
                if entry.reference.is_none() {
                    entry = entry.reference(transaction.id.clone());
                }
                entry
            }
            TransactionType::Refund | TransactionType::Chargeback => {
                let operating = registry
                    .require(StandardAccount::PlatformOperating, &currency.code)
                    .await?;
                let original = transaction
                    .metadata
                    .get(ORIGINAL_TRANSACTION_ID)
                    .cloned()
                    .unwrap_or_default();
                let kind = if transaction.transaction_type == TransactionType::Refund {
                    "Refund"
                } else {
                    "Chargeback"
                };
                self.transfer(
                    transaction,
                    &format!("{} for transaction {}", kind, original),
                    (&operating, &format!("{} expense", kind)),
                    (&settlement, "Cash returned to customer"),
                )
                .metadata(ORIGINAL_TRANSACTION_ID, original)
            }
            TransactionType::PlatformFee => {
                let fees = registry
                    .require(StandardAccount::PlatformFees, &currency.code)
                    .await?;
                self.transfer(
                    transaction,
                    &format!("Platform fee charged to {}", party(&transaction.user_id)),
                    (&settlement, "Platform fee received"),
                    (&fees, "Platform fee revenue"),
                )
            }
            TransactionType::TaxWithholding => {
                let pending = registry
                    .require(StandardAccount::CreatorPayoutsPending, &currency.code)
                    .await?;
                let withholding = registry
                    .require(StandardAccount::TaxWithholding, &currency.code)
                    .await?;
                self.transfer(
                    transaction,
                    &format!("Tax withheld from {}", party(&transaction.creator_id)),
                    (&pending, "Creator payout reduced by withholding"),
                    (&withholding, "Tax withholding liability"),
                )
            }
            TransactionType::CryptoDeposit => {
                let payable = registry
                    .require(StandardAccount::AccountsPayable, &currency.code)
                    .await?;
                self.transfer(
                    transaction,
                    &format!("{} deposit from {}", currency.code, party(&transaction.user_id)),
                    (&settlement, "Crypto received"),
                    (&payable, "Deposit owed to user"),
                )
            }
            TransactionType::CryptoWithdrawal => {
                let payable = registry
                    .require(StandardAccount::AccountsPayable, &currency.code)
                    .await?;
                self.transfer(
                    transaction,
                    &format!("{} withdrawal by {}", currency.code, party(&transaction.user_id)),
                    (&payable, "Deposit returned to user"),
                    (&settlement, "Crypto sent"),
                )
            }
        };

        let processing_fee = rule.processing_fee_estimate(&transaction.amount, &currency);
        if self.post_processing_fees && processing_fee > BigDecimal::from(0) {
            let processing = registry
                .require(StandardAccount::PaymentProcessing, &currency.code)
                .await?;
            entry = entry
                .line(LedgerLine::debit(
                    &processing.id,
                    processing_fee.clone(),
                    &currency.code,
                    "Payment processing fee",
                ))
                .line(LedgerLine::credit(
                    &settlement.id,
                    processing_fee.clone(),
                    &currency.code,
                    "Payment processing fee paid",
                ));
        }

        Ok(entry
            .metadata("processing_fee_estimate", processing_fee.to_string())
            .metadata("processing_fee_posted", self.post_processing_fees.to_string()))
    }

    async fn compile_revenue(
        &self,
        transaction: &Transaction,
        rule: &TransactionRule,
        currency: &Currency,
        settlement: &Account,
        revenue: StandardAccount,
    ) -> LedgerResult<NewJournalEntry> {
        let registry = self.ledger.registry();
        let split = FeeSplit::calculate(&transaction.amount, rule, currency);
        let zero = BigDecimal::from(0);
        let code = currency.code.as_str();

        let revenue_account = registry.require(revenue, code).await?;
        let expense = registry.require(StandardAccount::CreatorPayouts, code).await?;
        let pending = registry
            .require(StandardAccount::CreatorPayoutsPending, code)
            .await?;
        let withholding = if split.tax_withholding > zero {
            Some(registry.require(StandardAccount::TaxWithholding, code).await?)
        } else {
            None
        };
        let fees = if split.platform_fee > zero {
            Some(registry.require(StandardAccount::PlatformFees, code).await?)
        } else {
            None
        };

        let user = party(&transaction.user_id);
        let creator = party(&transaction.creator_id);
        let label = revenue_label(transaction.transaction_type);

        let mut entry = self
            .header(transaction, &format!("{} from {} to {}", label, user, creator))
            .metadata("platform_fee", split.platform_fee.to_string())
            .metadata("creator_payout", split.creator_payout.to_string())
            .metadata("platform_fee_percent", rule.platform_fee_percent.to_string())
            .line(
                LedgerLine::debit(
                    &settlement.id,
                    split.gross.clone(),
                    code,
                    &format!("{} received", label),
                )
                .with_metadata("user_id", user)
                .with_metadata("creator_id", creator),
            )
            .line(
                LedgerLine::credit(
                    &revenue_account.id,
                    split.gross.clone(),
                    code,
                    &format!("{} revenue recognized", label),
                )
                .with_metadata("user_id", user)
                .with_metadata("creator_id", creator),
            );

        if split.creator_payout > zero {
            entry = entry.line(
                LedgerLine::debit(
                    &expense.id,
                    split.creator_payout.clone(),
                    code,
                    "Creator payout expense",
                )
                .with_metadata("creator_id", creator),
            );
        }
        if split.net_payout > zero {
            entry = entry.line(
                LedgerLine::credit(
                    &pending.id,
                    split.net_payout.clone(),
                    code,
                    "Creator payout liability",
                )
                .with_metadata("creator_id", creator),
            );
        }
        if let Some(withholding) = withholding {
            entry = entry
                .metadata("tax_withholding", split.tax_withholding.to_string())
                .line(
                    LedgerLine::credit(
                        &withholding.id,
                        split.tax_withholding.clone(),
                        code,
                        "Tax withheld from creator payout",
                    )
                    .with_metadata("creator_id", creator),
                );
        }
        if let Some(fees) = fees {
            entry = entry.line(
                LedgerLine::credit(
                    &fees.id,
                    split.platform_fee.clone(),
                    code,
                    "Platform fee revenue",
                )
                .with_metadata("fee_percent", rule.platform_fee_percent.to_string()),
            );
        }
        Ok(entry)
    }

    /// Two-line entry moving the full amount from `credit` to `debit`
    fn transfer(
        &self,
        transaction: &Transaction,
        description: &str,
        debit: (&Account, &str),
        credit: (&Account, &str),
    ) -> NewJournalEntry {
        let code = transaction.currency.as_str();
        self.header(transaction, description)
            .line(LedgerLine::debit(&debit.0.id, transaction.amount.clone(), code, debit.1))
            .line(LedgerLine::credit(&credit.0.id, transaction.amount.clone(), code, credit.1))
    }

    fn header(&self, transaction: &Transaction, description: &str) -> NewJournalEntry {
        let mut entry = NewJournalEntry::new(&transaction.id, description, &transaction.platform)
            .user(transaction.user_id.clone());
        // Caller metadata (content id, token id, ...) travels with the entry
        entry.metadata = transaction.metadata.clone();
        if let Some(reference) = transaction.metadata.get("reference") {
            entry = entry.reference(reference.clone());
        }
        let mut entry = entry
            .metadata("transaction_type", transaction.transaction_type.as_str())
            .metadata("gross_amount", transaction.amount.to_string());
        if let Some(user_id) = &transaction.user_id {
            entry = entry.metadata("user_id", user_id.clone());
        }
        if let Some(creator_id) = &transaction.creator_id {
            entry = entry.metadata("creator_id", creator_id.clone());
        }
        entry
    }
}

fn party(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("unknown")
}

fn revenue_label(transaction_type: TransactionType) -> &'static str {
    match transaction_type {
        TransactionType::SubscriptionPayment => "Subscription payment",
        TransactionType::TipPayment => "Tip payment",
        TransactionType::ContentPurchase => "Content purchase",
        TransactionType::NftPurchase => "NFT purchase",
        _ => "Payment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TransactionRequest;
    use crate::rules::RuleTable;
    use crate::utils::MemoryStorage;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    async fn ledger() -> Ledger<MemoryStorage> {
        let ledger = Ledger::new(MemoryStorage::new());
        ledger.initialize().await.unwrap();
        ledger
    }

    async fn code_of(ledger: &Ledger<MemoryStorage>, account_id: &str) -> String {
        ledger.registry().get(account_id).await.unwrap().code
    }

    /// (code, debit, credit) for each line
    async fn describe(
        ledger: &Ledger<MemoryStorage>,
        entry: &NewJournalEntry,
    ) -> Vec<(String, BigDecimal, BigDecimal)> {
        let mut lines = Vec::new();
        for line in &entry.lines {
            lines.push((
                code_of(ledger, &line.account_id).await,
                line.debit_amount.clone(),
                line.credit_amount.clone(),
            ));
        }
        lines
    }

    fn transaction(request: TransactionRequest) -> Transaction {
        Transaction::from_request(request)
    }

    #[test]
    fn test_fee_split_conserves_gross() {
        let rule = TransactionRule::new(TransactionType::ContentPurchase).platform_fee(dec("15"));
        let split = FeeSplit::calculate(&dec("0.99"), &rule, &Currency::usd());
        // 0.1485 rounds to 0.15
        assert_eq!(split.platform_fee, dec("0.15"));
        assert_eq!(split.creator_payout, dec("0.84"));
        assert_eq!(&split.platform_fee + &split.creator_payout, dec("0.99"));
    }

    #[tokio::test]
    async fn test_subscription_lines() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone());
        let table = RuleTable::standard();
        let tx = transaction(
            TransactionRequest::new(TransactionType::SubscriptionPayment, "web", dec("100"), "USD")
                .user("fan-1")
                .creator("creator-1"),
        );
        let rule = table.get(tx.transaction_type).unwrap();

        let entry = compiler.compile(&tx, rule).await.unwrap();
        let lines = describe(&ledger, &entry).await;
        assert_eq!(
            lines,
            vec![
                ("1001.USD".to_string(), dec("100"), dec("0")),
                ("4100.USD".to_string(), dec("0"), dec("100")),
                ("5100.USD".to_string(), dec("90"), dec("0")),
                ("2200.USD".to_string(), dec("0"), dec("90")),
                ("4400.USD".to_string(), dec("0"), dec("10")),
            ]
        );
        assert_eq!(entry.metadata.get("processing_fee_estimate").unwrap(), "3.20");
        assert_eq!(entry.transaction_id, tx.id);
    }

    #[tokio::test]
    async fn test_withholding_and_processing_fee_legs() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone()).with_processing_fees(true);
        let rule = TransactionRule::new(TransactionType::TipPayment)
            .platform_fee(dec("10"))
            .tax_withholding(dec("20"))
            .processing_fee(Some(dec("2.9")), Some(dec("0.30")));
        let tx = transaction(
            TransactionRequest::new(TransactionType::TipPayment, "web", dec("100"), "USD")
                .user("fan-1")
                .creator("creator-1"),
        );

        let entry = compiler.compile(&tx, &rule).await.unwrap();
        let lines = describe(&ledger, &entry).await;
        assert!(lines.contains(&("2200.USD".to_string(), dec("0"), dec("72"))));
        assert!(lines.contains(&("2400.USD".to_string(), dec("0"), dec("18"))));
        assert!(lines.contains(&("5200.USD".to_string(), dec("3.20"), dec("0"))));
        assert_eq!(lines.len(), 8);

        for (currency, side) in totals_by_currency(&entry.lines) {
            assert_eq!(side.debits, side.credits, "{currency}");
        }
    }

    #[tokio::test]
    async fn test_crypto_revenue_uses_holdings_and_omits_zero_fee() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone());
        let rule = TransactionRule::new(TransactionType::NftPurchase).currencies(&["ETH"]);
        let tx = transaction(
            TransactionRequest::new(TransactionType::NftPurchase, "nft", dec("0.5"), "ETH")
                .user("fan-1")
                .creator("creator-1")
                .metadata("token_id", "42"),
        );

        let entry = compiler.compile(&tx, &rule).await.unwrap();
        let lines = describe(&ledger, &entry).await;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].0, "1010.ETH");
        assert_eq!(entry.metadata.get("token_id").unwrap(), "42");
    }

    #[tokio::test]
    async fn test_two_leg_types() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone());
        let table = RuleTable::standard();

        let cases = [
            (TransactionType::CreatorPayout, "USD", "2200.USD", "1001.USD"),
            (TransactionType::Refund, "USD", "5300.USD", "1001.USD"),
            (TransactionType::Chargeback, "EUR", "5300.EUR", "1001.EUR"),
            (TransactionType::PlatformFee, "USD", "1001.USD", "4400.USD"),
            (TransactionType::TaxWithholding, "USD", "2200.USD", "2400.USD"),
            (TransactionType::CryptoDeposit, "BTC", "1010.BTC", "2100.BTC"),
            (TransactionType::CryptoWithdrawal, "BTC", "2100.BTC", "1010.BTC"),
        ];
        for (transaction_type, currency, debit, credit) in cases {
            let tx = transaction(
                TransactionRequest::new(transaction_type, "web", dec("60"), currency)
                    .user("fan-1")
                    .creator("creator-1")
                    .metadata(ORIGINAL_TRANSACTION_ID, "txn-0"),
            );
            let entry = compiler
                .compile(&tx, table.get(transaction_type).unwrap())
                .await
                .unwrap();
            let lines = describe(&ledger, &entry).await;
            assert_eq!(
                lines,
                vec![
                    (debit.to_string(), dec("60"), dec("0")),
                    (credit.to_string(), dec("0"), dec("60")),
                ],
                "{transaction_type}"
            );
        }
    }

    #[tokio::test]
    async fn test_payout_carries_method_and_reference() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone());
        let rule = RuleTable::standard();
        let rule = rule.get(TransactionType::CreatorPayout).unwrap();

        let default = transaction(
            TransactionRequest::new(TransactionType::CreatorPayout, "web", dec("75"), "USD")
                .creator("creator-1"),
        );
        let entry = compiler.compile(&default, rule).await.unwrap();
        assert_eq!(entry.description, "Creator payout to creator-1 via bank_transfer");
        assert_eq!(entry.reference.as_deref(), Some(default.id.as_str()));
        assert_eq!(entry.metadata.get(PAYMENT_METHOD).unwrap(), "bank_transfer");

        let paypal = transaction(
            TransactionRequest::new(TransactionType::CreatorPayout, "web", dec("75"), "USD")
                .creator("creator-1")
                .metadata(PAYMENT_METHOD, "paypal")
                .metadata("reference", "batch-7"),
        );
        let entry = compiler.compile(&paypal, rule).await.unwrap();
        assert_eq!(entry.description, "Creator payout to creator-1 via paypal");
        assert_eq!(entry.reference.as_deref(), Some("batch-7"));
    }

    #[tokio::test]
    async fn test_missing_accounts() {
        let ledger = ledger().await;
        let compiler = RuleCompiler::new(ledger.clone());
        let rule = TransactionRule::new(TransactionType::TipPayment)
            .platform_fee(dec("5"))
            .currencies(&["GBP", "USD"]);

        let gbp = transaction(TransactionRequest::new(
            TransactionType::TipPayment,
            "web",
            dec("10"),
            "GBP",
        ));
        assert!(matches!(
            compiler.compile(&gbp, &rule).await,
            Err(LedgerError::MissingAccount(code)) if code == "1001.GBP"
        ));

        ledger.registry().deactivate("4200.USD").await.unwrap();
        let usd = transaction(TransactionRequest::new(
            TransactionType::TipPayment,
            "web",
            dec("10"),
            "USD",
        ));
        assert!(matches!(
            compiler.compile(&usd, &rule).await,
            Err(LedgerError::MissingAccount(code)) if code == "4200.USD"
        ));
    }
}
