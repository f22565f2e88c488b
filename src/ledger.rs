//! Balance ledger rules.
//!
//! The mutation entry points for user-authored transactions. Every create,
//! update and delete keeps the owning account's stored balance consistent
//! with the net effect of its transactions: the effect of a row is exactly
//! its stored signed amount, and reversal is subtraction of that amount.
//!
//! Only user-authored rows move balances. Provider-sourced rows never do:
//! a linked account's balance is the provider's authoritative figure from
//! the account sync, not a sum of transactions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;

use crate::clock::{Clock, SystemClock};
use crate::error::SyncError;
use crate::lock::KeyedMutex;
use crate::models::{
    Account, Id, Location, NegativeAmountError, Transaction, TransactionKind,
};
use crate::storage::Storage;

/// Input for a user-authored transaction. `amount` is an unsigned magnitude;
/// the stored sign comes from `kind`.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: Id,
    pub date: DateTime<Utc>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub category: String,
    pub subcategory: Option<String>,
    pub description: String,
    pub merchant: Option<String>,
    pub is_recurring: bool,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub location: Option<Location>,
}

impl NewTransaction {
    pub fn new(
        account_id: Id,
        date: DateTime<Utc>,
        kind: TransactionKind,
        amount: Decimal,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            date,
            kind,
            amount,
            category: category.into(),
            subcategory: None,
            description: description.into(),
            merchant: None,
            is_recurring: false,
            tags: Vec::new(),
            notes: None,
            location: None,
        }
    }
}

/// Partial update for a user-authored transaction. `None` leaves a field
/// unchanged; `amount` is an unsigned magnitude like on create.
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub account_id: Option<Id>,
    pub date: Option<DateTime<Utc>>,
    pub kind: Option<TransactionKind>,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub is_recurring: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
    pub location: Option<Location>,
}

pub struct Ledger {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    /// Held across the (row mutation, balance update) pair so the two writes
    /// are observed as a unit per account.
    account_locks: KeyedMutex<Id>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            account_locks: KeyedMutex::new(),
        }
    }

    pub async fn create_transaction(
        &self,
        user_id: &Id,
        input: NewTransaction,
    ) -> Result<Transaction, SyncError> {
        let _guard = self.account_locks.lock(&input.account_id).await;
        let mut account = self.owned_account(user_id, &input.account_id).await?;

        let now = self.clock.now();
        let mut transaction = Transaction::manual(
            user_id.clone(),
            account.id.clone(),
            input.date,
            input.kind,
            input.amount,
            input.category,
            input.description,
            now,
        )?;
        transaction.subcategory = input.subcategory;
        transaction.merchant = input.merchant;
        transaction.is_recurring = input.is_recurring;
        transaction.tags = input.tags;
        transaction.notes = input.notes;
        transaction.location = input.location;

        self.storage.insert_transaction(&transaction).await?;

        account.balance += transaction.amount;
        account.touch(now);
        self.storage.save_account(&account).await?;

        Ok(transaction)
    }

    /// Reverse the old amount's effect on the old account, then apply the new
    /// amount's effect to the new account (they differ when the transaction
    /// is reassigned). Both accounts persist their updated balance.
    pub async fn update_transaction(
        &self,
        user_id: &Id,
        transaction_id: &Id,
        patch: TransactionPatch,
    ) -> Result<Transaction, SyncError> {
        let mut transaction = self.owned_transaction(user_id, transaction_id).await?;
        if transaction.is_provider_sourced() {
            return Err(SyncError::SyncedTransactionImmutable(transaction.id));
        }

        let old_account_id = transaction.account_id.clone();
        let new_account_id = patch.account_id.clone().unwrap_or_else(|| old_account_id.clone());
        let _guards = self.lock_pair(&old_account_id, &new_account_id).await;

        let mut old_account = self
            .storage
            .get_account(&old_account_id)
            .await?
            .ok_or_else(|| SyncError::BalanceInvariant {
                reason: format!("account {old_account_id} for reversal no longer exists"),
            })?;
        if old_account.user_id != *user_id {
            return Err(SyncError::BalanceInvariant {
                reason: format!("account {old_account_id} is not owned by user {user_id}"),
            });
        }

        // Validate the target before any balance moves; a rejected
        // reassignment must leave every record untouched.
        let target_account = if new_account_id == old_account_id {
            None
        } else {
            let account = self
                .storage
                .get_account(&new_account_id)
                .await?
                .ok_or_else(|| SyncError::AccountNotFound(new_account_id.clone()))?;
            if account.user_id != *user_id {
                return Err(SyncError::BalanceInvariant {
                    reason: format!("account {new_account_id} is not owned by user {user_id}"),
                });
            }
            Some(account)
        };

        let kind = patch.kind.unwrap_or(transaction.kind);
        let magnitude = match patch.amount {
            Some(magnitude) if magnitude < Decimal::ZERO => {
                return Err(NegativeAmountError.into());
            }
            Some(magnitude) => magnitude,
            None => transaction.amount.abs(),
        };

        let now = self.clock.now();

        // Reverse-old first, even when the account stays the same.
        old_account.balance -= transaction.amount;
        old_account.touch(now);
        self.storage.save_account(&old_account).await?;

        transaction.account_id = new_account_id.clone();
        transaction.kind = kind;
        transaction.amount = kind.signed_amount(magnitude);
        if let Some(date) = patch.date {
            transaction.date = date;
        }
        if let Some(category) = patch.category {
            transaction.category = category;
        }
        if let Some(subcategory) = patch.subcategory {
            transaction.subcategory = Some(subcategory);
        }
        if let Some(description) = patch.description {
            transaction.description = description;
        }
        if let Some(merchant) = patch.merchant {
            transaction.merchant = Some(merchant);
        }
        if let Some(is_recurring) = patch.is_recurring {
            transaction.is_recurring = is_recurring;
        }
        if let Some(tags) = patch.tags {
            transaction.tags = tags;
        }
        if let Some(notes) = patch.notes {
            transaction.notes = Some(notes);
        }
        if let Some(location) = patch.location {
            transaction.location = Some(location);
        }
        transaction.touch(now);

        // Apply-new on the target account; the old one already carries the
        // reversal when the transaction stays put.
        let mut new_account = match target_account {
            Some(account) => account,
            None => old_account,
        };

        new_account.balance += transaction.amount;
        new_account.touch(now);
        self.storage.save_account(&new_account).await?;
        self.storage.save_transaction(&transaction).await?;

        Ok(transaction)
    }

    /// Reverse the row's effect on its account, then remove the row. Deleting
    /// a provider-sourced row removes it without touching the balance.
    pub async fn delete_transaction(
        &self,
        user_id: &Id,
        transaction_id: &Id,
    ) -> Result<(), SyncError> {
        let transaction = self.owned_transaction(user_id, transaction_id).await?;
        let _guard = self.account_locks.lock(&transaction.account_id).await;

        if !transaction.is_provider_sourced() {
            let mut account = self
                .storage
                .get_account(&transaction.account_id)
                .await?
                .ok_or_else(|| SyncError::BalanceInvariant {
                    reason: format!(
                        "account {} for reversal no longer exists",
                        transaction.account_id
                    ),
                })?;
            if account.user_id != *user_id {
                return Err(SyncError::BalanceInvariant {
                    reason: format!(
                        "account {} is not owned by user {user_id}",
                        transaction.account_id
                    ),
                });
            }

            let now = self.clock.now();
            account.balance -= transaction.amount;
            account.touch(now);
            self.storage.save_account(&account).await?;
        }

        self.storage.delete_transaction(&transaction.id).await?;
        Ok(())
    }

    /// Lock one or two accounts, always in id order, so two updates moving
    /// rows between the same pair of accounts cannot deadlock.
    async fn lock_pair(&self, first: &Id, second: &Id) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = vec![first, second];
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.account_locks.lock(id).await);
        }
        guards
    }

    async fn owned_account(&self, user_id: &Id, account_id: &Id) -> Result<Account, SyncError> {
        self.storage
            .get_account(account_id)
            .await?
            .filter(|a| a.user_id == *user_id)
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))
    }

    async fn owned_transaction(
        &self,
        user_id: &Id,
        transaction_id: &Id,
    ) -> Result<Transaction, SyncError> {
        self.storage
            .get_transaction(transaction_id)
            .await?
            .filter(|t| t.user_id == *user_id)
            .ok_or_else(|| SyncError::TransactionNotFound(transaction_id.clone()))
    }
}
