use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory async locks keyed by entity id.
///
/// Used to serialize concurrent syncs of the same connection and to make the
/// (balance update, row mutation) pair atomic per account. Locks for distinct
/// keys are independent.
pub struct KeyedMutex<K> {
    inner: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("keyed lock map poisoned");
            map.entry(key.clone()).or_default().clone()
        };
        entry.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self::new()
    }
}
