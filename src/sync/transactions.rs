use std::sync::Arc;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::models::{Account, Id, Location, Transaction};
use crate::storage::{DuplicateTransactionError, Storage};

use super::mappers::map_transaction_category;
use super::truelayer::TrueLayerClient;

/// Fetches provider transactions for a date window and inserts the ones not
/// seen before.
///
/// Provider rows are write-once: the external id is the sole dedup key, and
/// an id that already exists locally is skipped, never re-derived. Balances
/// are untouched here; a linked account's balance comes from the account
/// sync, not from summing transactions.
pub struct TransactionSynchronizer {
    storage: Arc<dyn Storage>,
    client: Arc<TrueLayerClient>,
    clock: Arc<dyn Clock>,
}

impl TransactionSynchronizer {
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

    /// Returns only the newly inserted rows. Repeated calls with overlapping
    /// windows insert nothing twice.
    pub async fn sync_transactions(
        &self,
        user_id: &Id,
        account: &Account,
        access_token: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, SyncError> {
        let Some(external_account_id) = account.external_id.as_deref() else {
            tracing::warn!(account_id = %account.id, "Skipping transaction sync for unlinked account");
            return Ok(Vec::new());
        };

        let provider_transactions = self
            .client
            .fetch_transactions(access_token, external_account_id, from, to)
            .await?;

        let mut inserted = Vec::new();
        for provider_tx in provider_transactions {
            let existing = self
                .storage
                .find_transaction_by_external_id(&account.id, &provider_tx.transaction_id)
                .await?;
            if existing.is_some() {
                continue;
            }

            let now = self.clock.now();
            let transaction = Transaction::synced(
                user_id.clone(),
                account.id.clone(),
                provider_tx.timestamp,
                provider_tx.amount,
                map_transaction_category(&provider_tx.transaction_category),
                provider_tx.description.clone(),
                provider_tx.transaction_id.clone(),
                now,
            )
            .with_merchant(provider_tx.merchant_name.clone())
            .with_location(provider_tx.merchant_location.as_ref().map(|l| Location {
                latitude: l.latitude,
                longitude: l.longitude,
                address: l.address.clone(),
            }));

            match self.storage.insert_transaction(&transaction).await {
                Ok(()) => inserted.push(transaction),
                Err(err) if err.downcast_ref::<DuplicateTransactionError>().is_some() => {
                    // A racing sync got there first; the constraint is the
                    // backstop and losing the race is not an error.
                    tracing::debug!(
                        account_id = %account.id,
                        external_id = %provider_tx.transaction_id,
                        "Transaction already stored",
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::info!(
            account_id = %account.id,
            fetched_window = %format!("{from}..={to}"),
            inserted = inserted.len(),
            "Synced transactions",
        );
        Ok(inserted)
    }
}
