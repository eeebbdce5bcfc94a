// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Map Engine
//!
//! The double-buffered map: two [`Table`]s, the [`OpLog`] that reconciles them, and the
//! registry of live [`ReadHandle`]s.
//!
//! ## Locks
//!
//! - the **writer lock** guards the writable copy, the log and the write-lag counter. It is held
//!   for the whole of every mutation and every refresh.
//! - the **registry lock** guards the readable copy and the handle list. It is held while
//!   registering or unregistering a handle, and while a refresh swaps copies and walks the list.
//! - each handle's **slot lock** guards that handle's pointer. It is held for a lookup, and while
//!   a refresh repoints that one handle.
//!
//! Locks are always taken in that order.
//!
//! ## Refresh
//!
//! 1. swap which copy is readable and which is writable (an [`Arc`] swap, no data is copied);
//! 2. point every registered handle at the new readable copy;
//! 3. replay the log onto the new writable copy, which is stale by exactly the logged writes;
//! 4. truncate the log and reset the write lag.
//!
//! Steps 1 and 2 happen under the registry lock, all four under the writer lock. After step 2
//! no handle holds the writable copy any more, so the writer owns the only reference to it and
//! [`Arc::make_mut`] hands out `&mut` access without copying.
use crate::{
    Options, Table,
    oplog::{Entry, OpLog},
    reader::{ReadHandle, Registry},
};
use ahash::RandomState;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// State only ever touched by the holder of the writer lock.
struct WriteState<K, V, S> {
    writable: Arc<Table<K, V, S>>,
    oplog: OpLog<K, V>,
    /// Writes accepted since the last refresh. Always equal to `oplog.len()`.
    replication_write_lag: usize,
}

impl<K, V, S> WriteState<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    fn push_and_apply(&mut self, entry: Entry<K, V>) {
        tracing::trace!(op = entry.kind(), "applying write");
        // handles never point at the writable copy, so this doesn't clone.
        self.oplog
            .push_and_apply(entry, Arc::make_mut(&mut self.writable));
    }
}

/// A concurrent map in which readers never block writers and writers never block readers.
///
/// Writes land in a private copy and become visible to [`ReadHandle`]s only once the map is
/// [refreshed](Map::refresh), either explicitly or automatically after
/// [`Options::max_replication_write_lag`] writes.
///
/// Writers are serialized against each other by an internal lock, so a `Map` can be shared
/// between threads (typically in an [`Arc`]) and written to from several of them.
///
/// ```rust
/// use eventual::Map;
///
/// let map = Map::new();
/// let reader = map.reader();
///
/// map.insert("foo", 1);
/// assert_eq!(reader.has("foo"), Ok(false));
///
/// map.refresh();
/// assert_eq!(reader.get("foo").unwrap().as_deref(), Some(&1));
/// ```
pub struct Map<K, V, S = RandomState> {
    writer: Mutex<WriteState<K, V, S>>,
    registry: Arc<Mutex<Registry<K, V, S>>>,
    options: Options,
}

impl<K, V> Map<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map with default [`Options`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty map with the given [`Options`].
    pub fn with_options(options: Options) -> Self {
        Self::with_options_and_hasher(options, RandomState::default())
    }
}

impl<K, V, S> Default for Map<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone + Default,
{
    fn default() -> Self {
        Self::with_options_and_hasher(Options::default(), S::default())
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher + Clone,
{
    /// Creates an empty map whose two copies hash keys with `hasher`.
    pub fn with_options_and_hasher(options: Options, hasher: S) -> Self {
        let readable = HashMap::with_hasher(hasher.clone());
        let writable = HashMap::with_hasher(hasher);
        Self {
            writer: Mutex::new(WriteState {
                writable: Arc::new(writable),
                oplog: OpLog::new(),
                replication_write_lag: 0,
            }),
            registry: Arc::new(Mutex::new(Registry::new(readable))),
            options,
        }
    }

    /// Sets `key` to `value` in the writable copy.
    ///
    /// Readers see the change after the next refresh.
    pub fn insert(&self, key: K, value: V) {
        self.insert_shared(key, Arc::new(value));
    }

    /// Like [`Map::insert`], but stores an allocation the caller already shares.
    pub fn insert_shared(&self, key: K, value: Arc<V>) {
        self.mutate(|state| state.push_and_apply(Entry::Insert(key, value)));
    }

    /// Removes `key` from the writable copy.
    ///
    /// Returns whether the key was present in the writable copy before the removal, regardless of
    /// what readers currently see.
    pub fn delete(&self, key: K) -> bool {
        self.mutate(|state| {
            let existed = state.writable.contains_key(&key);
            state.push_and_apply(Entry::Delete(key));
            existed
        })
    }

    /// Removes every key from the writable copy.
    pub fn clear(&self) {
        self.mutate(|state| state.push_and_apply(Entry::Clear));
    }

    /// Publishes every write accepted so far to all readers.
    pub fn refresh(&self) {
        let mut state = self.writer.lock();
        self.refresh_locked(&mut state);
    }

    /// Registers a new [`ReadHandle`] that starts out reading the current readable copy.
    pub fn reader(&self) -> ReadHandle<K, V, S> {
        ReadHandle::register(&self.registry)
    }

    /// Number of writes accepted since the last refresh.
    pub fn write_lag(&self) -> usize {
        self.writer.lock().replication_write_lag
    }

    /// Number of handles currently registered.
    pub fn reader_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// The [`Options`] this map was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn mutate<T>(&self, write: impl FnOnce(&mut WriteState<K, V, S>) -> T) -> T {
        let mut state = self.writer.lock();
        let ret = write(&mut *state);
        state.replication_write_lag += 1;
        debug_assert_eq!(state.replication_write_lag, state.oplog.len());
        if self.options.auto_refresh_due(state.replication_write_lag) {
            tracing::debug!(
                write_lag = state.replication_write_lag,
                max_write_lag = self.options.max_replication_write_lag,
                "write lag exceeded, refreshing"
            );
            self.refresh_locked(&mut state);
        }
        ret
    }

    fn refresh_locked(&self, state: &mut WriteState<K, V, S>) {
        let readers = self.registry.lock().swap_readable(&mut state.writable);

        let replayed = state.oplog.len();
        state.oplog.apply(Arc::make_mut(&mut state.writable));
        state.oplog.clear();
        state.replication_write_lag = 0;

        tracing::debug!(readers, replayed, "refreshed map");
    }
}

impl<K, V, S> fmt::Debug for Map<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("write_lag", &self.writer.lock().replication_write_lag)
            .field("readers", &self.registry.lock().len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
