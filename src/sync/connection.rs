use std::sync::Arc;

use anyhow::Context;
use reqwest::StatusCode;

use crate::clock::Clock;
use crate::error::{ProviderError, SyncError};
use crate::models::{Connection, ConnectionStatus, Id, Provider};
use crate::storage::Storage;

use super::truelayer::{InstitutionInfo, TokenResult, TrueLayerClient};

/// Owns the lifecycle of a bank connection: token acquisition, refresh on
/// expiry, persistence of connection state, status transitions.
pub struct ConnectionManager {
    storage: Arc<dyn Storage>,
    client: Arc<TrueLayerClient>,
    clock: Arc<dyn Clock>,
}

impl ConnectionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        client: Arc<TrueLayerClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            client,
            clock,
        }
    }

    /// Create or update the connection for (user, provider, institution).
    ///
    /// Re-authenticating the same institution overwrites tokens and metadata
    /// in place instead of creating a duplicate, which is what makes repeated
    /// OAuth flows safe.
    pub async fn upsert_connection(
        &self,
        user_id: &Id,
        provider: Provider,
        tokens: &TokenResult,
        institution: &InstitutionInfo,
    ) -> Result<Connection, SyncError> {
        let now = self.clock.now();
        let metadata =
            serde_json::to_value(institution).context("Failed to serialize institution info")?;

        let existing = self
            .storage
            .find_connection_by_institution(user_id, provider, &institution.provider.provider_id)
            .await?;

        let connection = match existing {
            Some(mut connection) => {
                connection.apply_tokens(tokens, now);
                connection.institution_name = institution.provider.display_name.clone();
                connection.last_synced = Some(now);
                connection.metadata = metadata;
                connection.touch(now);
                tracing::info!(
                    connection_id = %connection.id,
                    institution = %connection.institution_name,
                    "Re-authenticated existing connection",
                );
                connection
            }
            None => {
                let mut connection = Connection::new(
                    user_id.clone(),
                    provider,
                    tokens,
                    &institution.provider.provider_id,
                    &institution.provider.display_name,
                    now,
                )
                .with_metadata(metadata);
                connection.last_synced = Some(now);
                tracing::info!(
                    connection_id = %connection.id,
                    institution = %connection.institution_name,
                    "Created connection",
                );
                connection
            }
        };

        self.storage.save_connection(&connection).await?;
        Ok(connection)
    }

    /// Return a token valid right now, refreshing first if the stored one has
    /// expired. On refresh failure the connection is marked errored and the
    /// caller must not proceed to data sync.
    pub async fn ensure_fresh_token(
        &self,
        connection: &mut Connection,
    ) -> Result<String, SyncError> {
        if !connection.is_token_expired(self.clock.now()) {
            return Ok(connection.access_token.clone());
        }

        connection.status = ConnectionStatus::Expired;
        self.refresh(connection).await
    }

    /// Refresh unconditionally. Used for the retry-once path after a data
    /// call comes back 401 despite a token that looked fresh.
    pub async fn force_refresh(&self, connection: &mut Connection) -> Result<String, SyncError> {
        self.refresh(connection).await
    }

    async fn refresh(&self, connection: &mut Connection) -> Result<String, SyncError> {
        let result = match connection.refresh_token.clone() {
            Some(refresh_token) => self.client.refresh_token(&refresh_token).await,
            None => Err(ProviderError::Auth {
                status: StatusCode::UNAUTHORIZED,
                body: "no refresh token stored for this connection".to_string(),
            }),
        };

        let now = self.clock.now();
        match result {
            Ok(tokens) => {
                connection.apply_tokens(&tokens, now);
                connection.touch(now);
                self.storage.save_connection(connection).await?;
                tracing::info!(connection_id = %connection.id, "Refreshed access token");
                Ok(connection.access_token.clone())
            }
            Err(err) => {
                connection.status = ConnectionStatus::Error;
                connection.touch(now);
                if let Err(save_err) = self.storage.save_connection(connection).await {
                    tracing::warn!(
                        connection_id = %connection.id,
                        error = %save_err,
                        "Failed to persist errored connection state",
                    );
                }
                tracing::warn!(connection_id = %connection.id, error = %err, "Token refresh failed");
                Err(SyncError::Refresh {
                    connection_id: connection.id.clone(),
                    source: err,
                })
            }
        }
    }

    /// Stamp a completed sync.
    pub async fn mark_synced(&self, connection: &mut Connection) -> Result<(), SyncError> {
        let now = self.clock.now();
        connection.last_synced = Some(now);
        connection.touch(now);
        self.storage.save_connection(connection).await?;
        Ok(())
    }

    /// Explicit user disconnect.
    pub async fn revoke(&self, connection: &mut Connection) -> Result<(), SyncError> {
        let now = self.clock.now();
        connection.status = ConnectionStatus::Revoked;
        connection.touch(now);
        self.storage.save_connection(connection).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ProviderConfig;
    use crate::storage::MemoryStorage;
    use crate::sync::truelayer::InstitutionProvider;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;

    fn manager(base_url: &str) -> (ConnectionManager, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let config = ProviderConfig::new(
            "client-1",
            SecretString::new("secret".to_string().into()),
            "https://app.example.com/callback",
        )
        .with_base_url(base_url);
        let client = Arc::new(TrueLayerClient::new(config).unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        (
            ConnectionManager::new(storage.clone(), client, clock),
            storage,
        )
    }

    fn tokens() -> TokenResult {
        TokenResult {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_in: 3600,
            consent_id: None,
        }
    }

    fn institution() -> InstitutionInfo {
        InstitutionInfo {
            provider: InstitutionProvider {
                provider_id: "mock-bank".to_string(),
                display_name: "Mock Bank".to_string(),
                logo_uri: None,
            },
            full_name: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_institution() {
        let (manager, storage) = manager("http://127.0.0.1:9");
        let user = Id::from_string("user-1");

        let first = manager
            .upsert_connection(&user, Provider::TrueLayer, &tokens(), &institution())
            .await
            .unwrap();

        let mut second_tokens = tokens();
        second_tokens.access_token = "access-2".to_string();
        let second = manager
            .upsert_connection(&user, Provider::TrueLayer, &second_tokens, &institution())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token, "access-2");
        assert_eq!(
            storage.list_connections(&user).await.unwrap().len(),
            1,
            "re-authentication must not duplicate the connection"
        );
    }

    #[tokio::test]
    async fn fresh_tokens_are_returned_without_a_refresh_call() {
        // Unroutable client: any network call would error the test.
        let (manager, _storage) = manager("http://127.0.0.1:9");
        let user = Id::from_string("user-1");
        let mut connection = manager
            .upsert_connection(&user, Provider::TrueLayer, &tokens(), &institution())
            .await
            .unwrap();

        let token = manager.ensure_fresh_token(&mut connection).await.unwrap();
        assert_eq!(token, "access-1");
        assert_eq!(connection.status, ConnectionStatus::Active);
    }

    #[tokio::test]
    async fn refresh_failure_marks_the_connection_errored() {
        let (manager, storage) = manager("http://127.0.0.1:9");
        let user = Id::from_string("user-1");

        let mut expired_tokens = tokens();
        expired_tokens.expires_in = -60;
        let mut connection = manager
            .upsert_connection(&user, Provider::TrueLayer, &expired_tokens, &institution())
            .await
            .unwrap();

        let err = manager
            .ensure_fresh_token(&mut connection)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Refresh { .. }));
        assert_eq!(connection.status, ConnectionStatus::Error);

        let stored = storage
            .get_connection(&connection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ConnectionStatus::Error);
    }
}
