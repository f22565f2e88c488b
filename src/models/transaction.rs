use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
        }
    }

    /// Kind implied by a signed amount: outflows are expenses, everything
    /// else income. The aggregator never reports transfers.
    pub fn from_signed_amount(amount: Decimal) -> Self {
        if amount < Decimal::ZERO {
            TransactionKind::Expense
        } else {
            TransactionKind::Income
        }
    }

    /// Canonical stored sign for an unsigned magnitude of this kind.
    /// Expenses and transfers are outflows.
    pub fn signed_amount(&self, magnitude: Decimal) -> Decimal {
        match self {
            TransactionKind::Income => magnitude,
            TransactionKind::Expense | TransactionKind::Transfer => -magnitude,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// One financial movement.
///
/// The stored amount is always signed: negative = outflow. The balance
/// effect of a transaction on its account is exactly its stored amount.
/// Rows with an `external_id` are provider-sourced and write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub user_id: Id,
    pub account_id: Id,
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// The aggregator's stable transaction id; the sync dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("transaction amounts are entered as unsigned magnitudes; got a negative value")]
pub struct NegativeAmountError;

impl Transaction {
    /// A user-authored transaction. `magnitude` is unsigned; the stored sign
    /// comes from `kind` (expenses and transfers are outflows).
    pub fn manual(
        user_id: Id,
        account_id: Id,
        date: DateTime<Utc>,
        kind: TransactionKind,
        magnitude: Decimal,
        category: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, NegativeAmountError> {
        if magnitude < Decimal::ZERO {
            return Err(NegativeAmountError);
        }
        let amount = kind.signed_amount(magnitude);
        Ok(Self {
            id: Id::new(),
            user_id,
            account_id,
            date,
            amount,
            kind,
            category: category.into(),
            subcategory: None,
            description: description.into(),
            merchant: None,
            is_recurring: false,
            tags: Vec::new(),
            notes: None,
            external_id: None,
            location: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// A provider-sourced transaction. The provider's sign is preserved as
    /// given and the kind derived from it.
    pub fn synced(
        user_id: Id,
        account_id: Id,
        date: DateTime<Utc>,
        amount: Decimal,
        category: impl Into<String>,
        description: impl Into<String>,
        external_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            user_id,
            account_id,
            date,
            amount,
            kind: TransactionKind::from_signed_amount(amount),
            category: category.into(),
            subcategory: None,
            description: description.into(),
            merchant: None,
            is_recurring: false,
            tags: Vec::new(),
            notes: None,
            external_id: Some(external_id.into()),
            location: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_merchant(mut self, merchant: Option<String>) -> Self {
        self.merchant = merchant;
        self
    }

    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn is_provider_sourced(&self) -> bool {
        self.external_id.is_some()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn manual_expense_stores_a_negative_amount() {
        let tx = Transaction::manual(
            Id::from_string("user-1"),
            Id::from_string("acct-1"),
            at(),
            TransactionKind::Expense,
            "12.34".parse().unwrap(),
            "Food & Dining",
            "Lunch",
            at(),
        )
        .unwrap();

        assert_eq!(tx.amount.to_string(), "-12.34");
        assert!(!tx.is_provider_sourced());
    }

    #[test]
    fn manual_income_stores_a_positive_amount() {
        let tx = Transaction::manual(
            Id::from_string("user-1"),
            Id::from_string("acct-1"),
            at(),
            TransactionKind::Income,
            "100".parse().unwrap(),
            "Income",
            "Salary",
            at(),
        )
        .unwrap();

        assert_eq!(tx.amount.to_string(), "100");
    }

    #[test]
    fn manual_rejects_signed_input() {
        let err = Transaction::manual(
            Id::from_string("user-1"),
            Id::from_string("acct-1"),
            at(),
            TransactionKind::Expense,
            "-5".parse().unwrap(),
            "Food & Dining",
            "Lunch",
            at(),
        )
        .unwrap_err();

        assert_eq!(err, NegativeAmountError);
    }

    #[test]
    fn synced_kind_follows_the_provider_sign() {
        let expense = Transaction::synced(
            Id::from_string("user-1"),
            Id::from_string("acct-1"),
            at(),
            "-42.50".parse().unwrap(),
            "Food & Dining",
            "COFFEE SHOP",
            "tx-1",
            at(),
        );
        assert_eq!(expense.kind, TransactionKind::Expense);
        assert!(expense.is_provider_sourced());

        let income = Transaction::synced(
            Id::from_string("user-1"),
            Id::from_string("acct-1"),
            at(),
            "10".parse().unwrap(),
            "Income",
            "REFUND",
            "tx-2",
            at(),
        );
        assert_eq!(income.kind, TransactionKind::Income);
    }
}
