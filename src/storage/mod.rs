mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;

use crate::models::{Account, Connection, Id, Provider, Transaction};

/// Raised by [`Storage::insert_transaction`] when a row with the same
/// (account, external id) already exists. This is the storage-level backstop
/// for sync dedup: even if two syncs race past the application-level
/// existence check, only one insert wins.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("duplicate transaction for account {account_id} with external id {external_id:?}")]
pub struct DuplicateTransactionError {
    pub account_id: Id,
    pub external_id: String,
}

/// Raised by [`Storage::save_connection`] when a different connection already
/// covers the same (user, provider, institution). Re-authentication goes
/// through the upsert path, which updates that row instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("duplicate connection for user {user_id} to institution {institution_id:?} via {provider}")]
pub struct DuplicateConnectionError {
    pub user_id: Id,
    pub provider: Provider,
    pub institution_id: String,
}

/// Document-style persistence contract.
///
/// All cross-entity lookups are by field equality; there are no joins.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Connections
    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>>;
    async fn find_connection_by_institution(
        &self,
        user_id: &Id,
        provider: Provider,
        institution_id: &str,
    ) -> Result<Option<Connection>>;
    async fn list_connections(&self, user_id: &Id) -> Result<Vec<Connection>>;
    async fn save_connection(&self, connection: &Connection) -> Result<()>;
    async fn delete_connection(&self, id: &Id) -> Result<bool>;

    // Accounts
    async fn get_account(&self, id: &Id) -> Result<Option<Account>>;
    async fn find_account_by_external_id(
        &self,
        user_id: &Id,
        connection_id: &Id,
        external_id: &str,
    ) -> Result<Option<Account>>;
    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>>;
    async fn list_accounts_for_connection(&self, connection_id: &Id) -> Result<Vec<Account>>;
    async fn save_account(&self, account: &Account) -> Result<()>;
    async fn delete_account(&self, id: &Id) -> Result<bool>;

    // Transactions
    async fn get_transaction(&self, id: &Id) -> Result<Option<Transaction>>;
    async fn find_transaction_by_external_id(
        &self,
        account_id: &Id,
        external_id: &str,
    ) -> Result<Option<Transaction>>;
    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>>;
    /// Insert a new row, enforcing the sparse (account, external id)
    /// uniqueness constraint. Fails with [`DuplicateTransactionError`].
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;
    /// Overwrite an existing row in place.
    async fn save_transaction(&self, transaction: &Transaction) -> Result<()>;
    async fn delete_transaction(&self, id: &Id) -> Result<bool>;
}
