//! Per-key mutation rights.
//!
//! Transitions on one session key are serialized; different keys proceed in
//! parallel. A held right is a [`KeyGuard`]; dropping it wakes one waiter on
//! the same key. Each contended key has its own condition variable, so a
//! release never wakes threads waiting on other keys.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use callstate_types::SessionKey;

use crate::error::{SessionError, SessionResult};

#[derive(Debug, Default)]
struct KeySlot {
    locked: Mutex<bool>,
    released: Condvar,
}

#[derive(Debug)]
struct SlotEntry {
    slot: Arc<KeySlot>,
    /// Holder plus waiters; the entry is dropped when this reaches zero.
    users: usize,
}

#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<SessionKey, SlotEntry>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the mutation right for `key` is available.
    pub fn lock(&self, key: SessionKey) -> SessionResult<KeyGuard<'_>> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| SessionError::lock_poisoned())?;
            let entry = slots.entry(key).or_insert_with(|| SlotEntry {
                slot: Arc::new(KeySlot::default()),
                users: 0,
            });
            entry.users += 1;
            Arc::clone(&entry.slot)
        };

        let acquired = slot
            .locked
            .lock()
            .and_then(|locked| slot.released.wait_while(locked, |locked| *locked));
        match acquired {
            Ok(mut locked) => {
                *locked = true;
                drop(locked);
                Ok(KeyGuard {
                    locks: self,
                    key,
                    slot: Arc::clone(&slot),
                })
            }
            Err(_) => {
                self.leave(&key);
                Err(SessionError::lock_poisoned())
            }
        }
    }

    pub fn is_locked(&self, key: &SessionKey) -> bool {
        let slot = match self.slots.lock() {
            Ok(slots) => slots.get(key).map(|entry| Arc::clone(&entry.slot)),
            Err(_) => None,
        };
        slot.is_some_and(|slot| slot.locked.lock().is_ok_and(|locked| *locked))
    }

    /// Number of keys currently held or waited on.
    pub fn contended_keys(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }

    fn leave(&self, key: &SessionKey) {
        // A poisoned table still has to forget the key
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = slots.get_mut(key) {
            entry.users -= 1;
            if entry.users == 0 {
                slots.remove(key);
            }
        }
    }
}

/// Mutation right for one key, released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: SessionKey,
    slot: Arc<KeySlot>,
}

impl KeyGuard<'_> {
    pub fn key(&self) -> SessionKey {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locked: MutexGuard<'_, bool> =
            self.slot.locked.lock().unwrap_or_else(PoisonError::into_inner);
        *locked = false;
        drop(locked);
        self.slot.released.notify_one();
        self.locks.leave(&self.key);
    }
}
