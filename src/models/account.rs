use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Bank,
    Credit,
    Investment,
    Loan,
    Cash,
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Bank => "bank",
            AccountType::Credit => "credit",
            AccountType::Investment => "investment",
            AccountType::Loan => "loan",
            AccountType::Cash => "cash",
            AccountType::Other => "other",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A financial account, either manually managed or owned by a connection.
///
/// For a linked account the balance is the provider's figure at last sync;
/// for an unlinked account it is maintained by the ledger rules from
/// transaction effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    /// Signed, in the account's stated currency.
    pub balance: Decimal,
    pub currency: String,
    pub is_active: bool,
    /// Masked suffix only, e.g. "****1234".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Id>,
    /// The provider's stable account identifier, present on linked accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    /// Opaque provider payload for the account, kept for diagnostics.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub provider_metadata: serde_json::Value,
}

impl Account {
    /// A manually managed account. Balance starts at the opening value and is
    /// adjusted by the ledger rules from then on.
    pub fn manual(
        user_id: Id,
        name: impl Into<String>,
        account_type: AccountType,
        opening_balance: Decimal,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            user_id,
            name: name.into(),
            account_type,
            institution: None,
            balance: opening_balance,
            currency: currency.into(),
            is_active: true,
            account_number: None,
            connection_id: None,
            external_id: None,
            created_at: now,
            updated_at: now,
            last_synced: None,
            provider_metadata: serde_json::Value::Null,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_accounts_are_unlinked() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let account = Account::manual(
            Id::from_string("user-1"),
            "Wallet",
            AccountType::Cash,
            "25.50".parse().unwrap(),
            "USD",
            now,
        );

        assert!(!account.is_linked());
        assert_eq!(account.balance.to_string(), "25.50");
        assert!(account.external_id.is_none());
    }
}
