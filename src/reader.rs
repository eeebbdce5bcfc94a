// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Read-side handles and the registry the [`Map`](crate::Map) uses to reach them.
//!
//! Every [`ReadHandle`] owns a small slot holding its own pointer to "the copy I read from",
//! guarded by its own lock. A refresh rewrites that pointer under the same lock, so a lookup
//! completes entirely against one copy. Readers therefore only ever contend with the writer for
//! the duration of a single pointer store.
use crate::Table;
use ahash::RandomState;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{
    borrow::Borrow,
    fmt,
    hash::{BuildHasher, Hash},
    mem,
    sync::{Arc, Weak},
};

/// Error returned when a [`ReadHandle`] is used after it has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderClosed;

impl fmt::Display for ReaderClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read handle used after close")
    }
}

impl std::error::Error for ReaderClosed {}

/// The per-handle pointer to the readable copy.
///
/// `None` once the handle is closed, which also releases its hold on the copy.
pub(crate) struct ReaderSlot<K, V, S> {
    id: u64,
    readable: Mutex<Option<Arc<Table<K, V, S>>>>,
}

impl<K, V, S> ReaderSlot<K, V, S> {
    fn swap_readable(&self, table: Arc<Table<K, V, S>>) {
        let mut readable = self.readable.lock();
        if readable.is_some() {
            *readable = Some(table);
        }
    }

    fn close(&self) {
        self.readable.lock().take();
    }
}

/// The set of live handles together with the copy that new handles start reading from.
///
/// Keeping the readable pointer behind the same lock as the handle list means a handle registered
/// concurrently with a refresh either gets propagated to or starts out on the new copy.
pub(crate) struct Registry<K, V, S> {
    pub(crate) readable: Arc<Table<K, V, S>>,
    readers: SmallVec<[Arc<ReaderSlot<K, V, S>>; 4]>,
    next_id: u64,
}

impl<K, V, S> Registry<K, V, S> {
    pub(crate) fn new(readable: Table<K, V, S>) -> Self {
        Self {
            readable: Arc::new(readable),
            readers: SmallVec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.readers.len()
    }

    fn register(&mut self) -> Arc<ReaderSlot<K, V, S>> {
        let slot = Arc::new(ReaderSlot {
            id: self.next_id,
            readable: Mutex::new(Some(Arc::clone(&self.readable))),
        });
        self.next_id += 1;
        self.readers.push(Arc::clone(&slot));
        tracing::trace!(reader = slot.id, readers = self.readers.len(), "registered reader");
        slot
    }

    fn unregister(&mut self, slot: &ReaderSlot<K, V, S>) {
        let Some(idx) = self.readers.iter().position(|reader| reader.id == slot.id) else {
            return;
        };
        // order of the remaining handles is irrelevant.
        self.readers.swap_remove(idx);
        tracing::trace!(reader = slot.id, readers = self.readers.len(), "unregistered reader");
    }

    /// Exchanges `writable` with the readable copy and points every handle at the new one.
    ///
    /// Returns the number of handles updated. Once this returns, no handle refers to the copy
    /// left in `writable`.
    pub(crate) fn swap_readable(&mut self, writable: &mut Arc<Table<K, V, S>>) -> usize {
        mem::swap(&mut self.readable, writable);
        for reader in &self.readers {
            reader.swap_readable(Arc::clone(&self.readable));
        }
        self.readers.len()
    }
}

/// A per-consumer lookup handle bound to a [`Map`](crate::Map).
///
/// A handle sees the map as of the most recent [`Map::refresh`](crate::Map::refresh) (or as of
/// its creation, if no refresh has happened since). Lookups take only the handle's own lock, so
/// they never wait for writers to finish.
///
/// Handles are closed with [`ReadHandle::close`] or by dropping them. Lookups on a closed handle
/// fail with [`ReaderClosed`].
///
/// A handle may outlive its map, in which case it keeps reading the last copy it was given.
pub struct ReadHandle<K, V, S = RandomState> {
    slot: Arc<ReaderSlot<K, V, S>>,
    registry: Weak<Mutex<Registry<K, V, S>>>,
}

impl<K, V, S> ReadHandle<K, V, S> {
    pub(crate) fn register(registry: &Arc<Mutex<Registry<K, V, S>>>) -> Self {
        let slot = registry.lock().register();
        Self {
            slot,
            registry: Arc::downgrade(registry),
        }
    }

    fn with_readable<T>(&self, f: impl FnOnce(&Table<K, V, S>) -> T) -> Result<T, ReaderClosed> {
        let readable = self.slot.readable.lock();
        let table = readable.as_deref().ok_or(ReaderClosed)?;
        Ok(f(table))
    }

    /// Number of keys visible to this handle.
    pub fn len(&self) -> Result<usize, ReaderClosed> {
        self.with_readable(|table| table.len())
    }

    /// Whether this handle sees no keys at all.
    pub fn is_empty(&self) -> Result<bool, ReaderClosed> {
        self.with_readable(|table| table.is_empty())
    }

    /// Whether [`ReadHandle::close`] has been called on this handle.
    pub fn is_closed(&self) -> bool {
        self.slot.readable.lock().is_none()
    }

    /// Unregisters this handle from its map.
    ///
    /// Every later lookup fails with [`ReaderClosed`]. Closing an already closed handle does
    /// nothing.
    pub fn close(&self) {
        match self.registry.upgrade() {
            Some(registry) => {
                let mut guard = registry.lock();
                guard.unregister(&self.slot);
                // still under the registry lock, so a refresh can't observe the slot half-closed.
                self.slot.close();
            }
            None => {
                self.slot.close();
            }
        }
    }
}

impl<K, V, S> ReadHandle<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Returns the value stored under `key`, or `None` if this handle can't see the key.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<Arc<V>>, ReaderClosed>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_readable(|table| table.get(key).cloned())
    }

    /// Returns whether `key` is visible to this handle.
    pub fn has<Q>(&self, key: &Q) -> Result<bool, ReaderClosed>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.with_readable(|table| table.contains_key(key))
    }
}

impl<K, V, S> Drop for ReadHandle<K, V, S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K, V, S> fmt::Debug for ReadHandle<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("id", &self.slot.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table;

    fn registry() -> Arc<Mutex<Registry<&'static str, i32, RandomState>>> {
        Arc::new(Mutex::new(Registry::new(create_table())))
    }

    #[test]
    fn register_and_close() {
        let registry = registry();
        let first = ReadHandle::register(&registry);
        let second = ReadHandle::register(&registry);
        assert_eq!(registry.lock().len(), 2);

        first.close();
        assert_eq!(registry.lock().len(), 1);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(first.get("foo"), Err(ReaderClosed));
        assert_eq!(first.has("foo"), Err(ReaderClosed));
        assert_eq!(first.len(), Err(ReaderClosed));
        assert_eq!(second.has("foo"), Ok(false));
    }

    #[test]
    fn double_close_is_a_noop() {
        let registry = registry();
        let handle = ReadHandle::register(&registry);
        let other = ReadHandle::register(&registry);
        handle.close();
        handle.close();
        assert_eq!(registry.lock().len(), 1);
        assert!(!other.is_closed());
    }

    #[test]
    fn drop_unregisters() {
        let registry = registry();
        {
            let _handle = ReadHandle::register(&registry);
            assert_eq!(registry.lock().len(), 1);
        }
        assert_eq!(registry.lock().len(), 0);
    }

    #[test]
    fn swap_repoints_live_handles_only() {
        let registry = registry();
        let live = ReadHandle::register(&registry);
        let closed = ReadHandle::register(&registry);
        closed.close();

        let mut writable = create_table();
        writable.insert("foo", Arc::new(1));
        let mut writable = Arc::new(writable);
        let updated = registry.lock().swap_readable(&mut writable);

        assert_eq!(updated, 1);
        assert_eq!(live.get("foo"), Ok(Some(Arc::new(1))));
        assert_eq!(closed.get("foo"), Err(ReaderClosed));
        assert!(writable.is_empty());
        assert_eq!(Arc::strong_count(&writable), 1);
    }

    #[test]
    fn handle_outlives_registry() {
        let registry = registry();
        let handle = ReadHandle::register(&registry);
        drop(registry);
        assert_eq!(handle.is_empty(), Ok(true));
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn closed_error_message() {
        assert_eq!(ReaderClosed.to_string(), "read handle used after close");
    }
}
