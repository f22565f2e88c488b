use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::models::{Account, Connection, Id, Provider, Transaction};

use super::{DuplicateConnectionError, DuplicateTransactionError, Storage};

/// JSON file-based storage implementation.
///
/// One document per entity:
/// ```text
/// data/
///   connections/{id}.json
///   accounts/{id}.json
///   transactions/{id}.json
/// ```
///
/// Single-process storage: the uniqueness constraint on transaction inserts
/// is enforced under an internal write lock.
pub struct JsonFileStorage {
    base_path: PathBuf,
    insert_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            insert_lock: Mutex::new(()),
        }
    }

    fn connections_dir(&self) -> PathBuf {
        self.base_path.join("connections")
    }

    fn accounts_dir(&self) -> PathBuf {
        self.base_path.join("accounts")
    }

    fn transactions_dir(&self) -> PathBuf {
        self.base_path.join("transactions")
    }

    fn entity_file(dir: &Path, id: &Id) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    async fn read_entity<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(raw) => {
                let entity = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                Ok(Some(entity))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }

    async fn write_entity<T: Serialize>(dir: &Path, id: &Id, entity: &T) -> Result<()> {
        if !Id::is_path_safe(id.as_str()) {
            anyhow::bail!("Refusing to store entity with unsafe id: {id:?}");
        }
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = Self::entity_file(dir, id);
        let raw = serde_json::to_string_pretty(entity)?;
        fs::write(&path, raw)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn delete_entity(dir: &Path, id: &Id) -> Result<bool> {
        let path = Self::entity_file(dir, id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    /// Load every document in a directory, skipping entries that fail to
    /// parse so one corrupted file cannot take the whole store down.
    async fn list_entities<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to list {}", dir.display()))
            }
        };

        let mut results = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entity(&path).await {
                Ok(Some(entity)) => results.push(entity),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "Skipping unreadable entry");
                }
            }
        }
        Ok(results)
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>> {
        Self::read_entity(&Self::entity_file(&self.connections_dir(), id)).await
    }

    async fn find_connection_by_institution(
        &self,
        user_id: &Id,
        provider: Provider,
        institution_id: &str,
    ) -> Result<Option<Connection>> {
        let connections: Vec<Connection> = Self::list_entities(&self.connections_dir()).await?;
        Ok(connections.into_iter().find(|c| {
            c.user_id == *user_id && c.provider == provider && c.institution_id == institution_id
        }))
    }

    async fn list_connections(&self, user_id: &Id) -> Result<Vec<Connection>> {
        let connections: Vec<Connection> = Self::list_entities(&self.connections_dir()).await?;
        Ok(connections
            .into_iter()
            .filter(|c| c.user_id == *user_id)
            .collect())
    }

    async fn save_connection(&self, connection: &Connection) -> Result<()> {
        let existing = self
            .find_connection_by_institution(
                &connection.user_id,
                connection.provider,
                &connection.institution_id,
            )
            .await?;
        if let Some(existing) = existing {
            if existing.id != connection.id {
                return Err(DuplicateConnectionError {
                    user_id: connection.user_id.clone(),
                    provider: connection.provider,
                    institution_id: connection.institution_id.clone(),
                }
                .into());
            }
        }
        Self::write_entity(&self.connections_dir(), &connection.id, connection).await
    }

    async fn delete_connection(&self, id: &Id) -> Result<bool> {
        Self::delete_entity(&self.connections_dir(), id).await
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        Self::read_entity(&Self::entity_file(&self.accounts_dir(), id)).await
    }

    async fn find_account_by_external_id(
        &self,
        user_id: &Id,
        connection_id: &Id,
        external_id: &str,
    ) -> Result<Option<Account>> {
        let accounts: Vec<Account> = Self::list_entities(&self.accounts_dir()).await?;
        Ok(accounts.into_iter().find(|a| {
            a.user_id == *user_id
                && a.connection_id.as_ref() == Some(connection_id)
                && a.external_id.as_deref() == Some(external_id)
        }))
    }

    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>> {
        let accounts: Vec<Account> = Self::list_entities(&self.accounts_dir()).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.user_id == *user_id)
            .collect())
    }

    async fn list_accounts_for_connection(&self, connection_id: &Id) -> Result<Vec<Account>> {
        let accounts: Vec<Account> = Self::list_entities(&self.accounts_dir()).await?;
        Ok(accounts
            .into_iter()
            .filter(|a| a.connection_id.as_ref() == Some(connection_id))
            .collect())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        Self::write_entity(&self.accounts_dir(), &account.id, account).await
    }

    async fn delete_account(&self, id: &Id) -> Result<bool> {
        Self::delete_entity(&self.accounts_dir(), id).await
    }

    async fn get_transaction(&self, id: &Id) -> Result<Option<Transaction>> {
        Self::read_entity(&Self::entity_file(&self.transactions_dir(), id)).await
    }

    async fn find_transaction_by_external_id(
        &self,
        account_id: &Id,
        external_id: &str,
    ) -> Result<Option<Transaction>> {
        let transactions: Vec<Transaction> = Self::list_entities(&self.transactions_dir()).await?;
        Ok(transactions.into_iter().find(|t| {
            t.account_id == *account_id && t.external_id.as_deref() == Some(external_id)
        }))
    }

    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        let transactions: Vec<Transaction> = Self::list_entities(&self.transactions_dir()).await?;
        let mut rows: Vec<Transaction> = transactions
            .into_iter()
            .filter(|t| t.account_id == *account_id)
            .collect();
        rows.sort_by_key(|t| t.date);
        Ok(rows)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        let _guard = self.insert_lock.lock().await;
        if let Some(external_id) = &transaction.external_id {
            let existing = self
                .find_transaction_by_external_id(&transaction.account_id, external_id)
                .await?;
            if existing.is_some() {
                return Err(DuplicateTransactionError {
                    account_id: transaction.account_id.clone(),
                    external_id: external_id.clone(),
                }
                .into());
            }
        }
        Self::write_entity(&self.transactions_dir(), &transaction.id, transaction).await
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        Self::write_entity(&self.transactions_dir(), &transaction.id, transaction).await
    }

    async fn delete_transaction(&self, id: &Id) -> Result<bool> {
        Self::delete_entity(&self.transactions_dir(), id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_documents_and_skips_corrupted_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = JsonFileStorage::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let account = Account::manual(
            Id::from_string("user-1"),
            "Wallet",
            crate::models::AccountType::Cash,
            "0".parse().unwrap(),
            "USD",
            now,
        );
        storage.save_account(&account).await?;

        // A corrupted sibling must not break listing.
        std::fs::write(dir.path().join("accounts").join("broken.json"), "{nope")?;

        let listed = storage.list_accounts(&Id::from_string("user-1")).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Wallet");

        assert!(storage.delete_account(&account.id).await?);
        assert!(!storage.delete_account(&account.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn insert_enforces_external_id_uniqueness_on_disk() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = JsonFileStorage::new(dir.path());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let user = Id::from_string("user-1");
        let account = Id::from_string("acct-1");

        let make = || {
            Transaction::synced(
                user.clone(),
                account.clone(),
                now,
                "-9.99".parse().unwrap(),
                "Shopping",
                "STORE",
                "tx-unique",
                now,
            )
        };

        storage.insert_transaction(&make()).await?;
        let err = storage.insert_transaction(&make()).await.unwrap_err();
        assert!(err.downcast_ref::<DuplicateTransactionError>().is_some());
        Ok(())
    }
}
