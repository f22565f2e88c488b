//! A 401 on a data read with a token that looked fresh triggers exactly one
//! refresh-and-retry before giving up.

use std::sync::Arc;

use anyhow::Result;
use banklink::clock::FixedClock;
use banklink::config::ProviderConfig;
use banklink::models::{Connection, Id, Provider};
use banklink::storage::{MemoryStorage, Storage};
use banklink::sync::{BankSyncService, TokenResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use secrecy::SecretString;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn revoked_server_side_token_is_refreshed_once_and_the_fetch_retried() -> Result<()> {
    let server = MockServer::start().await;

    // The stored token still looks fresh locally, but the provider has
    // already invalidated it: the first accounts read comes back 401.
    Mock::given(method("GET"))
        .and(path("/data/v1/accounts"))
        .and(wiremock::matchers::header(
            "authorization",
            "Bearer locally-fresh",
        ))
        .respond_with(ResponseTemplate::new(401).set_body_raw("invalid token", "text/plain"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "reissued",
            "refresh_token": "refresh-2",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts"))
        .and(wiremock::matchers::header("authorization", "Bearer reissued"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "account_id": "acc-1",
                "display_name": "Current Account",
                "account_type": "TRANSACTION",
                "currency": "GBP"
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts/acc-1/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{ "currency": "GBP", "current": 42.0 }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts/acc-1/transactions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [] })),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let tokens = TokenResult {
        access_token: "locally-fresh".to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_in: 3600,
        consent_id: None,
    };
    let connection = Connection::new(
        Id::from_string("user-1"),
        Provider::TrueLayer,
        &tokens,
        "mock-bank",
        "Mock Bank",
        now(),
    );
    storage.save_connection(&connection).await?;

    let config = ProviderConfig::new(
        "client-1",
        SecretString::new("secret".to_string().into()),
        "https://app.example.com/callback",
    )
    .with_base_url(server.uri());
    let service = BankSyncService::with_clock(
        storage.clone(),
        config,
        Arc::new(FixedClock::new(now())),
    )?;

    let window = Some((
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
    ));
    let report = service
        .sync_connection(&Id::from_string("user-1"), &connection.id, window)
        .await?;

    assert_eq!(report.accounts.len(), 1);
    assert!(!report.is_partial());
    assert_eq!(report.connection.access_token, "reissued");

    Ok(())
}
