//! Declarative transaction rules
//!
//! One [`RuleTable`] drives both request validation and journal compilation,
//! so a rule change can never make the two disagree.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::{TransactionRequest, TransactionType};
use crate::types::*;
use crate::utils::validation::{validate_amount_precision, validate_positive_amount};

/// Metadata key refunds and chargebacks must carry
pub const ORIGINAL_TRANSACTION_ID: &str = "original_transaction_id";

/// Fees, limits and requirements for one transaction type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRule {
    pub transaction_type: TransactionType,
    /// Share of the gross amount kept by the platform, in percent
    pub platform_fee_percent: BigDecimal,
    /// Share of the creator payout withheld for tax, in percent
    pub tax_withholding_percent: Option<BigDecimal>,
    pub processing_fee_percent: Option<BigDecimal>,
    pub processing_fee_flat: Option<BigDecimal>,
    pub minimum_amount: Option<BigDecimal>,
    pub maximum_amount: Option<BigDecimal>,
    pub allowed_currencies: Vec<String>,
    pub requires_kyc: bool,
    pub requires_user: bool,
    pub requires_creator: bool,
    pub required_metadata: Vec<String>,
}

impl TransactionRule {
    /// A rule with no fees, no limits and every default currency allowed
    pub fn new(transaction_type: TransactionType) -> Self {
        Self {
            transaction_type,
            platform_fee_percent: BigDecimal::from(0),
            tax_withholding_percent: None,
            processing_fee_percent: None,
            processing_fee_flat: None,
            minimum_amount: None,
            maximum_amount: None,
            allowed_currencies: Currency::defaults().into_iter().map(|c| c.code).collect(),
            requires_kyc: false,
            requires_user: false,
            requires_creator: false,
            required_metadata: Vec::new(),
        }
    }

    pub fn platform_fee(mut self, percent: BigDecimal) -> Self {
        self.platform_fee_percent = percent;
        self
    }

    pub fn tax_withholding(mut self, percent: BigDecimal) -> Self {
        self.tax_withholding_percent = Some(percent);
        self
    }

    pub fn processing_fee(mut self, percent: Option<BigDecimal>, flat: Option<BigDecimal>) -> Self {
        self.processing_fee_percent = percent;
        self.processing_fee_flat = flat;
        self
    }

    pub fn minimum(mut self, amount: BigDecimal) -> Self {
        self.minimum_amount = Some(amount);
        self
    }

    pub fn maximum(mut self, amount: BigDecimal) -> Self {
        self.maximum_amount = Some(amount);
        self
    }

    pub fn currencies(mut self, codes: &[&str]) -> Self {
        self.allowed_currencies = codes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn kyc(mut self) -> Self {
        self.requires_kyc = true;
        self
    }

    pub fn user(mut self) -> Self {
        self.requires_user = true;
        self
    }

    pub fn creator(mut self) -> Self {
        self.requires_creator = true;
        self
    }

    pub fn require_metadata(mut self, key: &str) -> Self {
        self.required_metadata.push(key.to_string());
        self
    }

    /// Estimated processing cost: `flat + gross × percent / 100`, rounded to
    /// the currency
    pub fn processing_fee_estimate(&self, gross: &BigDecimal, currency: &Currency) -> BigDecimal {
        let mut fee = self.processing_fee_flat.clone().unwrap_or_default();
        if let Some(percent) = &self.processing_fee_percent {
            fee += gross * percent / BigDecimal::from(100);
        }
        currency.round(&fee)
    }

    /// Collect every way the request breaks this rule
    fn violations(&self, request: &TransactionRequest, currency: Option<&Currency>) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.allowed_currencies.contains(&request.currency) {
            errors.push(format!(
                "Currency {} not supported for {}",
                request.currency, self.transaction_type
            ));
        }

        if let Err(LedgerError::Validation(mut found)) = validate_positive_amount(&request.amount) {
            errors.append(&mut found);
        } else {
            if let Some(minimum) = &self.minimum_amount {
                if request.amount < *minimum {
                    errors.push(format!(
                        "Amount {} is below minimum {} for {}",
                        request.amount, minimum, self.transaction_type
                    ));
                }
            }
            if let Some(maximum) = &self.maximum_amount {
                if request.amount > *maximum {
                    errors.push(format!(
                        "Amount {} exceeds maximum {} for {}",
                        request.amount, maximum, self.transaction_type
                    ));
                }
            }
        }

        if let Some(currency) = currency {
            if let Err(LedgerError::Validation(mut found)) =
                validate_amount_precision(&request.amount, currency)
            {
                errors.append(&mut found);
            }
        }

        if self.requires_user && is_blank(&request.user_id) {
            errors.push(format!("{} requires a user id", self.transaction_type));
        }
        if self.requires_creator && is_blank(&request.creator_id) {
            errors.push(format!("{} requires a creator id", self.transaction_type));
        }
        if self.requires_kyc && !request.kyc_verified {
            errors.push(format!("{} requires KYC verification", self.transaction_type));
        }

        for key in &self.required_metadata {
            if request.metadata.get(key).is_none_or(|v| v.trim().is_empty()) {
                errors.push(format!(
                    "{} requires metadata key {}",
                    self.transaction_type, key
                ));
            }
        }

        errors
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Versioned set of rules, one per transaction type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: u32,
    pub rules: BTreeMap<TransactionType, TransactionRule>,
}

impl RuleTable {
    /// An empty table; every request fails validation until rules are added
    pub fn empty(version: u32) -> Self {
        Self {
            version,
            rules: BTreeMap::new(),
        }
    }

    /// The platform's standard rules
    pub fn standard() -> Self {
        // Card processing: 2.9% + 0.30
        let (pct, flat) = (Some(decimal(29, 1)), Some(decimal(30, 2)));
        let crypto_only = ["BTC", "ETH"];

        Self::empty(1)
            .with_rule(
                TransactionRule::new(TransactionType::SubscriptionPayment)
                    .platform_fee(BigDecimal::from(10))
                    .processing_fee(pct.clone(), flat.clone())
                    .minimum(BigDecimal::from(1))
                    .user()
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::TipPayment)
                    .platform_fee(BigDecimal::from(5))
                    .processing_fee(pct.clone(), flat.clone())
                    .minimum(BigDecimal::from(1))
                    .user()
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::ContentPurchase)
                    .platform_fee(BigDecimal::from(15))
                    .processing_fee(pct, flat)
                    .minimum(decimal(99, 2))
                    .user()
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::NftPurchase)
                    .platform_fee(decimal(25, 1))
                    .processing_fee(Some(BigDecimal::from(0)), None)
                    .minimum(decimal(1, 3))
                    .currencies(&crypto_only)
                    .kyc()
                    .user()
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::CreatorPayout)
                    .processing_fee(None, Some(BigDecimal::from(1)))
                    .minimum(BigDecimal::from(50))
                    .kyc()
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::Refund)
                    .minimum(decimal(1, 2))
                    .user()
                    .require_metadata(ORIGINAL_TRANSACTION_ID),
            )
            .with_rule(
                TransactionRule::new(TransactionType::Chargeback)
                    .minimum(decimal(1, 2))
                    .user()
                    .require_metadata(ORIGINAL_TRANSACTION_ID),
            )
            .with_rule(
                TransactionRule::new(TransactionType::PlatformFee)
                    .minimum(decimal(1, 2))
                    .user(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::TaxWithholding)
                    .minimum(decimal(1, 2))
                    .creator(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::CryptoDeposit)
                    .minimum(decimal(1, 8))
                    .currencies(&crypto_only)
                    .user(),
            )
            .with_rule(
                TransactionRule::new(TransactionType::CryptoWithdrawal)
                    .minimum(decimal(1, 8))
                    .currencies(&crypto_only)
                    .kyc()
                    .user(),
            )
    }

    /// Add or replace the rule for its type
    pub fn with_rule(mut self, rule: TransactionRule) -> Self {
        self.rules.insert(rule.transaction_type, rule);
        self
    }

    pub fn get(&self, transaction_type: TransactionType) -> Option<&TransactionRule> {
        self.rules.get(&transaction_type)
    }

    /// Check a request against its rule, reporting every violation at once.
    ///
    /// `currency` is the registered reference data for the request's
    /// currency, if any; precision is only checked when it is known.
    pub fn validate(
        &self,
        request: &TransactionRequest,
        currency: Option<&Currency>,
    ) -> LedgerResult<&TransactionRule> {
        let rule = self.get(request.transaction_type).ok_or_else(|| {
            LedgerError::Validation(vec![format!(
                "No rule for transaction type {}",
                request.transaction_type
            )])
        })?;

        let errors = rule.violations(request, currency);
        if errors.is_empty() {
            Ok(rule)
        } else {
            Err(LedgerError::Validation(errors))
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    fn tip(amount: &str, currency: &str) -> TransactionRequest {
        TransactionRequest::new(TransactionType::TipPayment, "web", dec(amount), currency)
            .user("fan-1")
            .creator("creator-1")
    }

    #[test]
    fn test_standard_table_covers_every_type() {
        let table = RuleTable::standard();
        assert_eq!(table.version, 1);
        for transaction_type in TransactionType::ALL {
            assert!(table.get(transaction_type).is_some(), "{transaction_type}");
        }
        let nft = table.get(TransactionType::NftPurchase).unwrap();
        assert_eq!(nft.platform_fee_percent, dec("2.5"));
        assert!(nft.requires_kyc);
    }

    #[test]
    fn test_valid_tip_passes() {
        let table = RuleTable::standard();
        let rule = table.validate(&tip("50", "USD"), Some(&Currency::usd())).unwrap();
        assert_eq!(rule.platform_fee_percent, dec("5"));
    }

    #[test]
    fn test_every_violation_is_reported() {
        let table = RuleTable::standard();
        let mut request = tip("0.5", "GBP");
        request.user_id = None;
        request.creator_id = Some("  ".to_string());

        match table.validate(&request, None) {
            Err(LedgerError::Validation(errors)) => {
                assert_eq!(errors.len(), 4, "{errors:?}");
                assert!(errors[0].contains("GBP not supported"));
                assert!(errors[1].contains("below minimum"));
                assert!(errors[2].contains("user id"));
                assert!(errors[3].contains("creator id"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_positive_and_precision() {
        let table = RuleTable::standard();
        match table.validate(&tip("-5", "USD"), Some(&Currency::usd())) {
            Err(LedgerError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("must be positive"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        match table.validate(&tip("10.001", "USD"), Some(&Currency::usd())) {
            Err(LedgerError::Validation(errors)) => {
                assert!(errors[0].contains("precision"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_kyc_and_metadata_requirements() {
        let table = RuleTable::standard();
        let payout = TransactionRequest::new(
            TransactionType::CreatorPayout,
            "web",
            dec("100"),
            "USD",
        )
        .creator("creator-1");
        assert!(table.validate(&payout, None).is_err());
        assert!(table.validate(&payout.kyc_verified(true), None).is_ok());

        let refund = TransactionRequest::new(TransactionType::Refund, "web", dec("10"), "USD")
            .user("fan-1");
        match table.validate(&refund, None) {
            Err(LedgerError::Validation(errors)) => {
                assert!(errors[0].contains(ORIGINAL_TRANSACTION_ID));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        let refund = refund.metadata(ORIGINAL_TRANSACTION_ID, "txn-1");
        assert!(table.validate(&refund, None).is_ok());
    }

    #[test]
    fn test_missing_rule_and_maximum() {
        let table = RuleTable::empty(7).with_rule(
            TransactionRule::new(TransactionType::PlatformFee).maximum(dec("100")),
        );
        assert!(matches!(
            table.validate(&tip("5", "USD"), None),
            Err(LedgerError::Validation(_))
        ));

        let fee = TransactionRequest::new(TransactionType::PlatformFee, "web", dec("101"), "USD");
        match table.validate(&fee, None) {
            Err(LedgerError::Validation(errors)) => assert!(errors[0].contains("exceeds maximum")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_processing_fee_estimate() {
        let table = RuleTable::standard();
        let subscription = table.get(TransactionType::SubscriptionPayment).unwrap();
        // 0.30 + 100 × 2.9%
        assert_eq!(
            subscription.processing_fee_estimate(&dec("100"), &Currency::usd()),
            dec("3.20")
        );
        let payout = table.get(TransactionType::CreatorPayout).unwrap();
        assert_eq!(
            payout.processing_fee_estimate(&dec("90"), &Currency::usd()),
            dec("1.00")
        );
    }
}
