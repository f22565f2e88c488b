use std::sync::Arc;

use anyhow::Context;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::models::{Account, Connection, Id};
use crate::storage::Storage;

use super::connection::ConnectionManager;
use super::mappers::map_account_type;
use super::truelayer::{ProviderAccount, TrueLayerClient};

/// Reconciles the provider's current account list against locally stored
/// accounts for a connection.
///
/// Creates accounts it has not seen before, updates balances of known ones,
/// and never deletes: absence from a provider response does not imply the
/// account is gone.
pub struct AccountSynchronizer {
    storage: Arc<dyn Storage>,
    client: Arc<TrueLayerClient>,
    connections: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
}

impl AccountSynchronizer {
    pub fn new(
        storage: Arc<dyn Storage>,
        client: Arc<TrueLayerClient>,
        connections: Arc<ConnectionManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            client,
            connections,
            clock,
        }
    }

    /// Sync every provider account into local storage and stamp the
    /// connection. Running this twice against an unchanged provider response
    /// is a no-op beyond timestamp refreshes.
    pub async fn sync_accounts(
        &self,
        user_id: &Id,
        connection: &mut Connection,
    ) -> Result<Vec<Account>, SyncError> {
        let mut token = self.connections.ensure_fresh_token(connection).await?;

        let provider_accounts = match self.client.fetch_accounts(&token).await {
            Ok(accounts) => accounts,
            Err(err) if err.is_unauthorized() => {
                // The token looked fresh but the provider disagreed; refresh
                // once and retry, then give up.
                token = self.connections.force_refresh(connection).await?;
                self.client.fetch_accounts(&token).await?
            }
            Err(err) => return Err(err.into()),
        };

        let mut synced = Vec::with_capacity(provider_accounts.len());
        for provider_account in provider_accounts {
            let account = self
                .sync_one(user_id, connection, &token, provider_account)
                .await?;
            synced.push(account);
        }

        self.connections.mark_synced(connection).await?;
        tracing::info!(
            connection_id = %connection.id,
            accounts = synced.len(),
            "Synced accounts",
        );
        Ok(synced)
    }

    async fn sync_one(
        &self,
        user_id: &Id,
        connection: &Connection,
        token: &str,
        provider_account: ProviderAccount,
    ) -> Result<Account, SyncError> {
        let balance = self
            .client
            .fetch_balance(token, &provider_account.account_id)
            .await?;
        let now = self.clock.now();

        let existing = self
            .storage
            .find_account_by_external_id(user_id, &connection.id, &provider_account.account_id)
            .await?;

        let account = match existing {
            Some(mut account) => {
                // Only balance and sync stamp move on re-sync; name, type and
                // institution stay as the user may have edited them.
                account.balance = balance.current;
                account.last_synced = Some(now);
                account.touch(now);
                account
            }
            None => {
                let provider_metadata = serde_json::to_value(&provider_account)
                    .context("Failed to serialize provider account")?;
                Account {
                    id: Id::from_external(&format!(
                        "{}:{}",
                        connection.id, provider_account.account_id
                    )),
                    user_id: user_id.clone(),
                    name: provider_account.display_name.clone(),
                    account_type: map_account_type(&provider_account.account_type),
                    institution: Some(connection.institution_name.clone()),
                    balance: balance.current,
                    currency: provider_account.currency.clone(),
                    is_active: true,
                    account_number: provider_account
                        .account_number
                        .as_ref()
                        .and_then(|n| n.last_4_digits.as_deref())
                        .map(|digits| format!("****{digits}")),
                    connection_id: Some(connection.id.clone()),
                    external_id: Some(provider_account.account_id.clone()),
                    created_at: now,
                    updated_at: now,
                    last_synced: Some(now),
                    provider_metadata,
                }
            }
        };

        self.storage.save_account(&account).await?;
        Ok(account)
    }
}
