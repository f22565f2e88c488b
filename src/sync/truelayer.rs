//! TrueLayer API client.
//!
//! Speaks the aggregator's OAuth2 + REST dialect and nothing else: token
//! grants are form-encoded POSTs against the auth host, data reads are
//! bearer-authenticated GETs against the API host. No business meaning is
//! interpreted here.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::Id;

const OAUTH_SCOPES: &str = "info accounts balance transactions";

/// Tokens from an authorization-code exchange or a refresh grant.
#[derive(Debug, Clone)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub consent_id: Option<String>,
}

impl TokenResult {
    /// Absolute expiry, computed once at exchange/refresh time.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in)
    }
}

pub struct TrueLayerClient {
    config: ProviderConfig,
    client: Client,
}

impl TrueLayerClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { config, client })
    }

    /// The URL a user visits to grant access. `state` carries the user id so
    /// the callback can be correlated. Pure; no I/O.
    pub fn authorization_url(&self, user_id: &Id) -> String {
        format!(
            "{}/authorize?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.config.auth_base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(user_id.as_str()),
        )
    }

    pub async fn exchange_code(&self, code: &str) -> Result<TokenResult, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("redirect_uri", &self.config.redirect_uri),
            ("code", code),
        ])
        .await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResult, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    pub async fn fetch_institution_info(
        &self,
        access_token: &str,
    ) -> Result<InstitutionInfo, ProviderError> {
        let mut results: Vec<InstitutionInfo> =
            self.data_get(access_token, "/data/v1/info", "info").await?;
        if results.is_empty() {
            return Err(ProviderError::EmptyResults { payload: "info" });
        }
        Ok(results.remove(0))
    }

    pub async fn fetch_accounts(
        &self,
        access_token: &str,
    ) -> Result<Vec<ProviderAccount>, ProviderError> {
        self.data_get(access_token, "/data/v1/accounts", "accounts")
            .await
    }

    pub async fn fetch_balance(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<ProviderBalance, ProviderError> {
        let path = format!(
            "/data/v1/accounts/{}/balance",
            urlencoding::encode(account_id)
        );
        let mut results: Vec<ProviderBalance> =
            self.data_get(access_token, &path, "balance").await?;
        if results.is_empty() {
            return Err(ProviderError::EmptyResults { payload: "balance" });
        }
        Ok(results.remove(0))
    }

    /// `from`/`to` are calendar dates, inclusive on both ends (provider
    /// semantics).
    pub async fn fetch_transactions(
        &self,
        access_token: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        let path = format!(
            "/data/v1/accounts/{}/transactions?from={}&to={}",
            urlencoding::encode(account_id),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
        );
        self.data_get(access_token, &path, "transactions").await
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenResult, ProviderError> {
        let url = format!(
            "{}/connect/token",
            self.config.auth_base_url.trim_end_matches('/')
        );

        let response = self.client.post(&url).form(params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Auth { status, body });
        }

        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|source| ProviderError::Decode {
                payload: "token",
                source,
            })?;
        Ok(TokenResult {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_in: payload.expires_in,
            consent_id: payload.consent_id,
        })
    }

    async fn data_get<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path_and_query: &str,
        payload: &'static str,
    ) -> Result<Vec<T>, ProviderError> {
        let url = format!(
            "{}{}",
            self.config.api_base_url.trim_end_matches('/'),
            path_and_query
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Data { status, body });
        }

        let envelope: ResultsEnvelope<T> = serde_json::from_str(&body)
            .map_err(|source| ProviderError::Decode { payload, source })?;
        Ok(envelope.results)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    consent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ResultsEnvelope<T> {
    #[serde(default)]
    results: Vec<T>,
}

/// Institution record for the token's consent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionInfo {
    pub provider: InstitutionProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionProvider {
    pub provider_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub account_id: String,
    pub display_name: String,
    /// Provider vocabulary, e.g. `TRANSACTION`, `SAVINGS`, `CREDIT_CARD`.
    pub account_type: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<ProviderAccountNumber>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAccountNumber {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_4_digits: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderBalance {
    pub currency: String,
    pub current: Decimal,
    #[serde(default)]
    pub available: Option<Decimal>,
    #[serde(default)]
    pub overdraft: Option<Decimal>,
    #[serde(default)]
    pub update_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTransaction {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    /// Signed as reported by the provider; negative = outflow.
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    /// Provider vocabulary, e.g. `FOOD_AND_DRINK`.
    pub transaction_category: String,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub merchant_location: Option<ProviderLocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderLocation {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}
