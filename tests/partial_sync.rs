//! A failing account must not abort its siblings: partial success is a
//! valid, reportable outcome.

use std::sync::Arc;

use anyhow::Result;
use banklink::clock::FixedClock;
use banklink::config::ProviderConfig;
use banklink::models::Id;
use banklink::storage::MemoryStorage;
use banklink::sync::BankSyncService;
use chrono::{NaiveDate, TimeZone, Utc};
use secrecy::SecretString;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(base_url: &str, storage: Arc<MemoryStorage>) -> BankSyncService {
    let config = ProviderConfig::new(
        "client-1",
        SecretString::new("secret".to_string().into()),
        "https://app.example.com/callback",
    )
    .with_base_url(base_url);
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap(),
    ));
    BankSyncService::with_clock(storage, config, clock).unwrap()
}

#[tokio::test]
async fn one_broken_account_reports_failure_while_siblings_sync() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "provider": { "provider_id": "mock-bank", "display_name": "Mock Bank" }
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                {
                    "account_id": "acc-good",
                    "display_name": "Healthy",
                    "account_type": "TRANSACTION",
                    "currency": "GBP"
                },
                {
                    "account_id": "acc-bad",
                    "display_name": "Broken",
                    "account_type": "SAVINGS",
                    "currency": "GBP"
                }
            ]
        })))
        .mount(&server)
        .await;

    for account in ["acc-good", "acc-bad"] {
        Mock::given(method("GET"))
            .and(path(format!("/data/v1/accounts/{account}/balance")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "currency": "GBP", "current": 100.0 }]
            })))
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts/acc-good/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "transaction_id": "good-tx-1",
                "timestamp": "2026-02-10T00:00:00Z",
                "amount": -5.0,
                "currency": "GBP",
                "description": "OK",
                "transaction_category": "SHOPPING"
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data/v1/accounts/acc-bad/transactions"))
        .respond_with(ResponseTemplate::new(502).set_body_raw("upstream down", "text/plain"))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let service = service(&server.uri(), storage);
    let user = Id::from_string("user-1");

    let outcome = service.handle_callback(&user, "auth-code-1").await?;
    let window = Some((
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
    ));

    let report = service
        .sync_connection(&user, &outcome.connection.id, window)
        .await?;

    assert!(report.is_partial());
    assert_eq!(report.accounts.len(), 2);
    assert_eq!(report.synced_account_count(), 1);
    assert_eq!(report.new_transactions.len(), 1);
    assert_eq!(report.new_transactions[0].external_id.as_deref(), Some("good-tx-1"));

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_name, "Broken");
    assert!(report.failures[0].error.contains("502"));

    Ok(())
}
