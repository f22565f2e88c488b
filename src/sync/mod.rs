mod accounts;
mod connection;
pub mod mappers;
mod service;
mod transactions;
pub mod truelayer;

pub use accounts::AccountSynchronizer;
pub use connection::ConnectionManager;
pub use service::{BankSyncService, CallbackOutcome, CascadeSummary};
pub use transactions::TransactionSynchronizer;
pub use truelayer::{
    InstitutionInfo, InstitutionProvider, ProviderAccount, ProviderBalance, ProviderTransaction,
    TokenResult, TrueLayerClient,
};

use crate::models::{Account, Connection, Id, Transaction};

/// Outcome of one connection sync. Partial success is a valid result: a
/// failing account must not take its siblings down with it.
#[derive(Debug)]
pub struct SyncReport {
    pub connection: Connection,
    pub accounts: Vec<Account>,
    /// Newly inserted rows only; previously known transactions are skipped.
    pub new_transactions: Vec<Transaction>,
    pub failures: Vec<AccountSyncFailure>,
}

impl SyncReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// "N of M accounts synced".
    pub fn synced_account_count(&self) -> usize {
        self.accounts.len() - self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct AccountSyncFailure {
    pub account_id: Id,
    pub account_name: String,
    pub error: String,
}
