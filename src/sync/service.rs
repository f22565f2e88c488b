use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use futures::future::join_all;

use crate::clock::{Clock, SystemClock};
use crate::config::ProviderConfig;
use crate::error::SyncError;
use crate::lock::KeyedMutex;
use crate::models::{Account, Connection, Id, Provider};
use crate::storage::Storage;

use super::accounts::AccountSynchronizer;
use super::connection::ConnectionManager;
use super::transactions::TransactionSynchronizer;
use super::truelayer::TrueLayerClient;
use super::{AccountSyncFailure, SyncReport};

/// Transaction window when the caller does not supply one.
const DEFAULT_SYNC_WINDOW_DAYS: i64 = 30;

/// Result of a completed OAuth callback: the (possibly pre-existing)
/// connection and its freshly synced accounts.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub connection: Connection,
    pub accounts: Vec<Account>,
}

/// What a connection delete took down with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeSummary {
    pub deleted_accounts: usize,
    pub deleted_transactions: usize,
}

/// Entry point the rest of the system talks to.
///
/// Holds no process-wide state: construct one with storage and provider
/// configuration and pass it where it is needed.
pub struct BankSyncService {
    storage: Arc<dyn Storage>,
    client: Arc<TrueLayerClient>,
    connections: Arc<ConnectionManager>,
    accounts: AccountSynchronizer,
    transactions: TransactionSynchronizer,
    clock: Arc<dyn Clock>,
    /// Serializes syncs of the same connection so two refreshes cannot race
    /// and invalidate each other's token.
    sync_locks: KeyedMutex<Id>,
}

impl BankSyncService {
    pub fn new(storage: Arc<dyn Storage>, config: ProviderConfig) -> Result<Self> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn Storage>,
        config: ProviderConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(TrueLayerClient::new(config)?);
        let connections = Arc::new(ConnectionManager::new(
            storage.clone(),
            client.clone(),
            clock.clone(),
        ));
        let accounts = AccountSynchronizer::new(
            storage.clone(),
            client.clone(),
            connections.clone(),
            clock.clone(),
        );
        let transactions =
            TransactionSynchronizer::new(storage.clone(), client.clone(), clock.clone());
        Ok(Self {
            storage,
            client,
            connections,
            accounts,
            transactions,
            clock,
            sync_locks: KeyedMutex::new(),
        })
    }

    pub fn authorization_url(&self, user_id: &Id) -> String {
        self.client.authorization_url(user_id)
    }

    /// Full exchange + account sync in one call: trade the authorization code
    /// for tokens, identify the institution, upsert the connection, and pull
    /// its accounts. Transactions arrive with the first `sync_connection`.
    pub async fn handle_callback(
        &self,
        user_id: &Id,
        code: &str,
    ) -> Result<CallbackOutcome, SyncError> {
        let tokens = self.client.exchange_code(code).await?;
        let institution = self.client.fetch_institution_info(&tokens.access_token).await?;

        let mut connection = self
            .connections
            .upsert_connection(user_id, Provider::TrueLayer, &tokens, &institution)
            .await?;
        let _guard = self.sync_locks.lock(&connection.id).await;

        let accounts = self.accounts.sync_accounts(user_id, &mut connection).await?;
        Ok(CallbackOutcome {
            connection,
            accounts,
        })
    }

    pub async fn list_connections(&self, user_id: &Id) -> Result<Vec<Connection>, SyncError> {
        Ok(self.storage.list_connections(user_id).await?)
    }

    pub async fn get_connection(
        &self,
        user_id: &Id,
        connection_id: &Id,
    ) -> Result<Connection, SyncError> {
        self.owned_connection(user_id, connection_id).await
    }

    /// Refresh-if-needed, re-sync accounts, then re-sync transactions for a
    /// date window (default: the last 30 days).
    ///
    /// One failing account does not abort its siblings; the report carries
    /// the per-account failures alongside what did succeed.
    pub async fn sync_connection(
        &self,
        user_id: &Id,
        connection_id: &Id,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self.sync_locks.lock(connection_id).await;
        let mut connection = self.owned_connection(user_id, connection_id).await?;

        let accounts = self.accounts.sync_accounts(user_id, &mut connection).await?;

        let (from, to) = window.unwrap_or_else(|| {
            let to = self.clock.today();
            (to - Duration::days(DEFAULT_SYNC_WINDOW_DAYS), to)
        });

        let token = self.connections.ensure_fresh_token(&mut connection).await?;

        let results = join_all(accounts.iter().map(|account| {
            let token = token.clone();
            async move {
                self.transactions
                    .sync_transactions(user_id, account, &token, from, to)
                    .await
            }
        }))
        .await;

        let mut new_transactions = Vec::new();
        let mut failures = Vec::new();
        let mut retry_after_refresh = Vec::new();
        for (account, result) in accounts.iter().zip(results) {
            match result {
                Ok(mut rows) => new_transactions.append(&mut rows),
                Err(SyncError::Provider(err)) if err.is_unauthorized() => {
                    retry_after_refresh.push(account);
                }
                Err(err) => failures.push(account_failure(account, &err)),
            }
        }

        if !retry_after_refresh.is_empty() {
            match self.connections.force_refresh(&mut connection).await {
                Ok(token) => {
                    for account in retry_after_refresh {
                        match self
                            .transactions
                            .sync_transactions(user_id, account, &token, from, to)
                            .await
                        {
                            Ok(mut rows) => new_transactions.append(&mut rows),
                            Err(err) => failures.push(account_failure(account, &err)),
                        }
                    }
                }
                Err(err) => {
                    // The whole connection is unusable now, but the sibling
                    // accounts already synced stay synced.
                    for account in retry_after_refresh {
                        failures.push(account_failure(account, &err));
                    }
                }
            }
        }

        if !failures.is_empty() {
            tracing::warn!(
                connection_id = %connection.id,
                synced = accounts.len() - failures.len(),
                total = accounts.len(),
                "Partial sync",
            );
        }

        Ok(SyncReport {
            connection,
            accounts,
            new_transactions,
            failures,
        })
    }

    /// Explicit user disconnect. Cascades: transactions, then accounts, then
    /// the connection itself.
    pub async fn delete_connection(
        &self,
        user_id: &Id,
        connection_id: &Id,
    ) -> Result<CascadeSummary, SyncError> {
        let _guard = self.sync_locks.lock(connection_id).await;
        let mut connection = self.owned_connection(user_id, connection_id).await?;
        self.connections.revoke(&mut connection).await?;

        let accounts = self
            .storage
            .list_accounts_for_connection(&connection.id)
            .await?;

        let mut deleted_transactions = 0;
        let mut deleted_accounts = 0;
        for account in &accounts {
            for transaction in self.storage.list_transactions(&account.id).await? {
                if self.storage.delete_transaction(&transaction.id).await? {
                    deleted_transactions += 1;
                }
            }
            if self.storage.delete_account(&account.id).await? {
                deleted_accounts += 1;
            }
        }

        self.storage.delete_connection(&connection.id).await?;
        tracing::info!(
            connection_id = %connection.id,
            deleted_accounts,
            deleted_transactions,
            "Deleted connection",
        );
        Ok(CascadeSummary {
            deleted_accounts,
            deleted_transactions,
        })
    }

    /// Delete a manually managed account and its transactions. Accounts owned
    /// by a connection are refused: disconnect first.
    pub async fn delete_account(
        &self,
        user_id: &Id,
        account_id: &Id,
    ) -> Result<CascadeSummary, SyncError> {
        let account = self
            .storage
            .get_account(account_id)
            .await?
            .filter(|a| a.user_id == *user_id)
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;

        if account.is_linked() {
            return Err(SyncError::AccountLinked(account.id));
        }

        let mut deleted_transactions = 0;
        for transaction in self.storage.list_transactions(&account.id).await? {
            if self.storage.delete_transaction(&transaction.id).await? {
                deleted_transactions += 1;
            }
        }
        self.storage.delete_account(&account.id).await?;
        Ok(CascadeSummary {
            deleted_accounts: 1,
            deleted_transactions,
        })
    }

    async fn owned_connection(
        &self,
        user_id: &Id,
        connection_id: &Id,
    ) -> Result<Connection, SyncError> {
        self.storage
            .get_connection(connection_id)
            .await?
            .filter(|c| c.user_id == *user_id)
            .ok_or_else(|| SyncError::ConnectionNotFound(connection_id.clone()))
    }
}

fn account_failure(account: &Account, err: &SyncError) -> AccountSyncFailure {
    tracing::warn!(account_id = %account.id, error = %err, "Account sync failed");
    AccountSyncFailure {
        account_id: account.id.clone(),
        account_name: account.name.clone(),
        error: err.to_string(),
    }
}
