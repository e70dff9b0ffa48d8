//! Per-(participant, action) serialization of termination calls

use crate::ActionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a repeatable termination call: one participant, one action
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvocationKey {
    pub owner: Box<str>,
    pub action: ActionId,
}

impl InvocationKey {
    pub fn new(owner: &str, action: &ActionId) -> Self {
        Self {
            owner: owner.into(),
            action: action.clone(),
        }
    }
}

impl std::fmt::Display for InvocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant:{}:lra:{}", self.owner, self.action)
    }
}

/// Mutual exclusion per key; unrelated keys never contend.
///
/// Lock entries exist only while someone holds or waits for them.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<InvocationKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    pub fn with_lock<R>(&self, key: &InvocationKey, f: impl FnOnce() -> R) -> R {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();

        // releases the entry even if `f` unwinds
        let _entry = LockEntry {
            locks: self,
            key,
            lock: &lock,
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of keys currently locked or contended
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct LockEntry<'a> {
    locks: &'a KeyedLocks,
    key: &'a InvocationKey,
    lock: &'a Arc<Mutex<()>>,
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // map + our clone; anyone else waiting would hold a third reference
        if Arc::strong_count(self.lock) == 2 {
            locks.remove(self.key);
        }
    }
}
