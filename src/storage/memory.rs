//! In-memory storage implementation for testing.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{Account, Connection, Id, Provider, Transaction};

use super::{DuplicateConnectionError, DuplicateTransactionError, Storage};

/// In-memory storage for testing purposes.
pub struct MemoryStorage {
    connections: Mutex<HashMap<Id, Connection>>,
    accounts: Mutex<HashMap<Id, Account>>,
    transactions: Mutex<HashMap<Id, Transaction>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns.get(id).cloned())
    }

    async fn find_connection_by_institution(
        &self,
        user_id: &Id,
        provider: Provider,
        institution_id: &str,
    ) -> Result<Option<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns
            .values()
            .find(|c| {
                c.user_id == *user_id
                    && c.provider == provider
                    && c.institution_id == institution_id
            })
            .cloned())
    }

    async fn list_connections(&self, user_id: &Id) -> Result<Vec<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns
            .values()
            .filter(|c| c.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn save_connection(&self, connection: &Connection) -> Result<()> {
        let mut conns = self.connections.lock().await;
        let duplicate = conns.values().any(|c| {
            c.id != connection.id
                && c.user_id == connection.user_id
                && c.provider == connection.provider
                && c.institution_id == connection.institution_id
        });
        if duplicate {
            return Err(DuplicateConnectionError {
                user_id: connection.user_id.clone(),
                provider: connection.provider,
                institution_id: connection.institution_id.clone(),
            }
            .into());
        }
        conns.insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn delete_connection(&self, id: &Id) -> Result<bool> {
        let mut conns = self.connections.lock().await;
        Ok(conns.remove(id).is_some())
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.get(id).cloned())
    }

    async fn find_account_by_external_id(
        &self,
        user_id: &Id,
        connection_id: &Id,
        external_id: &str,
    ) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|a| {
                a.user_id == *user_id
                    && a.connection_id.as_ref() == Some(connection_id)
                    && a.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn list_accounts(&self, user_id: &Id) -> Result<Vec<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .filter(|a| a.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn list_accounts_for_connection(&self, connection_id: &Id) -> Result<Vec<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .filter(|a| a.connection_id.as_ref() == Some(connection_id))
            .cloned()
            .collect())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn delete_account(&self, id: &Id) -> Result<bool> {
        let mut accounts = self.accounts.lock().await;
        Ok(accounts.remove(id).is_some())
    }

    async fn get_transaction(&self, id: &Id) -> Result<Option<Transaction>> {
        let txns = self.transactions.lock().await;
        Ok(txns.get(id).cloned())
    }

    async fn find_transaction_by_external_id(
        &self,
        account_id: &Id,
        external_id: &str,
    ) -> Result<Option<Transaction>> {
        let txns = self.transactions.lock().await;
        Ok(txns
            .values()
            .find(|t| t.account_id == *account_id && t.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        let txns = self.transactions.lock().await;
        let mut rows: Vec<Transaction> = txns
            .values()
            .filter(|t| t.account_id == *account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.date);
        Ok(rows)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        // The single map lock makes the existence check and the insert atomic,
        // which is what enforces the constraint under racing syncs.
        let mut txns = self.transactions.lock().await;
        if let Some(external_id) = &transaction.external_id {
            let duplicate = txns.values().any(|t| {
                t.account_id == transaction.account_id
                    && t.external_id.as_deref() == Some(external_id.as_str())
            });
            if duplicate {
                return Err(DuplicateTransactionError {
                    account_id: transaction.account_id.clone(),
                    external_id: external_id.clone(),
                }
                .into());
            }
        }
        txns.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn save_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut txns = self.transactions.lock().await;
        txns.insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn delete_transaction(&self, id: &Id) -> Result<bool> {
        let mut txns = self.transactions.lock().await;
        Ok(txns.remove(id).is_some())
    }
}
