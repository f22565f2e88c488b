use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::TokenResult;

use super::Id;

/// Which aggregator a connection was established through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    TrueLayer,
    Plaid,
    Yodlee,
    Other,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::TrueLayer => "truelayer",
            Provider::Plaid => "plaid",
            Provider::Yodlee => "yodlee",
            Provider::Other => "other",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Revoked,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Expired => "expired",
            ConnectionStatus::Revoked => "revoked",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authorized link between a user and a financial institution.
///
/// At most one connection exists per (user, provider, institution);
/// re-authenticating the same institution updates the existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Id,
    pub user_id: Id,
    pub provider: Provider,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry, computed once at exchange/refresh time.
    pub expires_at: DateTime<Utc>,
    pub institution_id: String,
    pub institution_name: String,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    /// Raw institution payload from the provider, kept for diagnostics.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Connection {
    pub fn new(
        user_id: Id,
        provider: Provider,
        tokens: &TokenResult,
        institution_id: impl Into<String>,
        institution_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            user_id,
            provider,
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at(now),
            institution_id: institution_id.into(),
            institution_name: institution_name.into(),
            status: ConnectionStatus::Active,
            consent_id: tokens.consent_id.clone(),
            created_at: now,
            updated_at: now,
            last_synced: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overwrite tokens and expiry after an exchange or refresh.
    ///
    /// A refresh response that omits the refresh token keeps the stored one.
    pub fn apply_tokens(&mut self, tokens: &TokenResult, now: DateTime<Utc>) {
        self.access_token = tokens.access_token.clone();
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token.clone();
        }
        self.expires_at = tokens.expires_at(now);
        if tokens.consent_id.is_some() {
            self.consent_id = tokens.consent_id.clone();
        }
        self.status = ConnectionStatus::Active;
    }

    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
