//! Ledger rules over the file-backed store: balances survive a reload from
//! disk, and the uniqueness constraint holds across storage instances.

use std::sync::Arc;

use anyhow::Result;
use banklink::clock::{Clock, FixedClock};
use banklink::ledger::{Ledger, NewTransaction, TransactionPatch};
use banklink::models::{Account, AccountType, Id, TransactionKind};
use banklink::storage::{JsonFileStorage, Storage};
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

#[tokio::test]
async fn balances_round_trip_through_the_file_store() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(JsonFileStorage::new(dir.path()));
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    ));
    let user = Id::from_string("user-1");

    let account = Account::manual(
        user.clone(),
        "Wallet",
        AccountType::Cash,
        dec("200"),
        "USD",
        clock.now(),
    );
    storage.save_account(&account).await?;

    let ledger = Ledger::with_clock(storage.clone(), clock);
    let tx = ledger
        .create_transaction(
            &user,
            NewTransaction::new(
                account.id.clone(),
                Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                TransactionKind::Expense,
                dec("30"),
                "Shopping",
                "Groceries",
            ),
        )
        .await?;

    let patch = TransactionPatch {
        amount: Some(dec("45")),
        ..Default::default()
    };
    ledger.update_transaction(&user, &tx.id, patch).await?;

    // A fresh storage instance over the same directory sees the result.
    let reloaded = JsonFileStorage::new(dir.path());
    let stored_account = reloaded.get_account(&account.id).await?.unwrap();
    assert_eq!(stored_account.balance, dec("155"));

    let stored_tx = reloaded.get_transaction(&tx.id).await?.unwrap();
    assert_eq!(stored_tx.amount, dec("-45"));

    ledger.delete_transaction(&user, &tx.id).await?;
    let stored_account = reloaded.get_account(&account.id).await?.unwrap();
    assert_eq!(stored_account.balance, dec("200"));

    Ok(())
}
