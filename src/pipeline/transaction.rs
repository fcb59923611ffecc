//! Business transaction types and lifecycle

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::*;

/// Kinds of business event the pipeline turns into journal entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    SubscriptionPayment,
    TipPayment,
    ContentPurchase,
    NftPurchase,
    CreatorPayout,
    Refund,
    Chargeback,
    PlatformFee,
    TaxWithholding,
    CryptoDeposit,
    CryptoWithdrawal,
}

impl TransactionType {
    pub const ALL: [TransactionType; 11] = [
        TransactionType::SubscriptionPayment,
        TransactionType::TipPayment,
        TransactionType::ContentPurchase,
        TransactionType::NftPurchase,
        TransactionType::CreatorPayout,
        TransactionType::Refund,
        TransactionType::Chargeback,
        TransactionType::PlatformFee,
        TransactionType::TaxWithholding,
        TransactionType::CryptoDeposit,
        TransactionType::CryptoWithdrawal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionPayment => "subscription_payment",
            Self::TipPayment => "tip_payment",
            Self::ContentPurchase => "content_purchase",
            Self::NftPurchase => "nft_purchase",
            Self::CreatorPayout => "creator_payout",
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
            Self::PlatformFee => "platform_fee",
            Self::TaxWithholding => "tax_withholding",
            Self::CryptoDeposit => "crypto_deposit",
            Self::CryptoWithdrawal => "crypto_withdrawal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status. `pending -> processing -> completed | failed`,
/// `cancelled` only from pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    /// Completed, failed and cancelled transactions are never picked up again
    /// by a worker
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pending,
    Reconciled,
    Discrepancy,
    ManualReview,
}

/// One step of a transaction's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: TransactionStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A business event as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Idempotency key; a fresh id is generated when absent
    pub id: Option<String>,
    pub transaction_type: TransactionType,
    pub platform: String,
    pub user_id: Option<String>,
    pub creator_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub metadata: Metadata,
    /// Whether the paying or receiving party has passed KYC
    pub kyc_verified: bool,
}

impl TransactionRequest {
    pub fn new(
        transaction_type: TransactionType,
        platform: &str,
        amount: BigDecimal,
        currency: &str,
    ) -> Self {
        Self {
            id: None,
            transaction_type,
            platform: platform.to_string(),
            user_id: None,
            creator_id: None,
            amount,
            currency: currency.to_string(),
            metadata: Metadata::new(),
            kyc_verified: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn creator(mut self, creator_id: impl Into<String>) -> Self {
        self.creator_id = Some(creator_id.into());
        self
    }

    pub fn metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn kyc_verified(mut self, verified: bool) -> Self {
        self.kyc_verified = verified;
        self
    }
}

/// A business transaction tracked by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub platform: String,
    pub user_id: Option<String>,
    pub creator_id: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub reconciliation_status: ReconciliationStatus,
    pub metadata: Metadata,
    pub kyc_verified: bool,
    pub journal_entry_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusChange>,
}

impl Transaction {
    /// A pending transaction for a validated request
    pub fn from_request(request: TransactionRequest) -> Self {
        let now = Utc::now();
        Self {
            id: request
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            transaction_type: request.transaction_type,
            platform: request.platform,
            user_id: request.user_id,
            creator_id: request.creator_id,
            amount: request.amount,
            currency: request.currency,
            status: TransactionStatus::Pending,
            reconciliation_status: ReconciliationStatus::Pending,
            metadata: request.metadata,
            kyc_verified: request.kyc_verified,
            journal_entry_id: None,
            error: None,
            created_at: now,
            processed_at: None,
            failed_at: None,
            history: vec![StatusChange {
                status: TransactionStatus::Pending,
                at: now,
                note: None,
            }],
        }
    }

    /// Move to a new status, appending to the audit trail
    pub fn transition(&mut self, status: TransactionStatus, note: Option<String>) {
        let now = Utc::now();
        match status {
            TransactionStatus::Completed => self.processed_at = Some(now),
            TransactionStatus::Failed => self.failed_at = Some(now),
            _ => {}
        }
        self.status = status;
        self.history.push(StatusChange {
            status,
            at: now,
            note,
        });
    }

    /// When the transaction last entered its current status
    pub fn status_since(&self) -> DateTime<Utc> {
        self.history
            .iter()
            .rev()
            .find(|change| change.status == self.status)
            .map(|change| change.at)
            .unwrap_or(self.created_at)
    }

    /// Whether the user took part as payer or creator
    pub fn involves(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id) || self.creator_id.as_deref() == Some(user_id)
    }

    /// Whether a resubmitted request describes the same business event
    pub fn matches_request(&self, request: &TransactionRequest) -> bool {
        self.transaction_type == request.transaction_type
            && self.amount == request.amount
            && self.currency == request.currency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_lifecycle_history() {
        let request = TransactionRequest::new(
            TransactionType::TipPayment,
            "web",
            BigDecimal::from(5),
            "USD",
        )
        .user("fan-1")
        .creator("creator-1");
        let mut transaction = Transaction::from_request(request);
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert!(!transaction.id.is_empty());

        transaction.transition(TransactionStatus::Processing, None);
        transaction.transition(TransactionStatus::Failed, Some("boom".to_string()));
        assert!(transaction.failed_at.is_some());
        assert!(transaction.status.is_terminal());
        assert_eq!(transaction.history.len(), 3);
        assert_eq!(transaction.status_since(), transaction.history[2].at);

        assert!(transaction.involves("fan-1"));
        assert!(transaction.involves("creator-1"));
        assert!(!transaction.involves("someone-else"));
    }

    #[test]
    fn test_type_names_match_serde() {
        for transaction_type in TransactionType::ALL {
            let json = serde_json::to_string(&transaction_type).unwrap();
            assert_eq!(json, format!("\"{}\"", transaction_type.as_str()));
        }
    }
}
