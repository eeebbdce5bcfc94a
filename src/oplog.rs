// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Operation Log
//!
//! An append-only, ordered record of the mutations that have been applied to the writable copy
//! of a [`Map`](crate::Map) but not yet to the stale copy.
//!
//! The log has no synchronization of its own. The owning map only ever touches it while holding
//! its writer lock, so a plain `&mut` receiver is sufficient.
//!
//! Order matters when replaying: a later [`Entry::Insert`] for the same key overwrites an earlier
//! one, and an [`Entry::Clear`] discards the effect of every entry before it.
use crate::Table;
use std::{
    hash::{BuildHasher, Hash},
    slice,
};

mod entry;
pub use entry::Entry;

/// Ordered buffer of pending mutations.
#[derive(Debug)]
pub struct OpLog<K, V> {
    entries: Vec<Entry<K, V>>,
}

impl<K, V> Default for OpLog<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K, V> OpLog<K, V> {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry` to the end of the log.
    pub fn push(&mut self, entry: Entry<K, V>) {
        self.entries.push(entry);
    }

    /// Empties the log, keeping its allocation for the next round of writes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the buffered entries in insertion order.
    pub fn iter(&self) -> slice::Iter<'_, Entry<K, V>> {
        self.entries.iter()
    }
}

impl<K, V> OpLog<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Replays every buffered entry onto `table`, in insertion order.
    ///
    /// Replay mutates `table`, so calling this twice is only a no-op the second time if nothing
    /// else touched `table` in between.
    pub fn apply<S>(&self, table: &mut Table<K, V, S>)
    where
        S: BuildHasher,
    {
        // a clear removes every key in the target, so nothing before the last one is observable.
        let start = self
            .entries
            .iter()
            .rposition(|entry| matches!(entry, Entry::Clear))
            .unwrap_or(0);
        for entry in &self.entries[start..] {
            entry.apply_to(table);
        }
    }

    /// Applies `entry` to `table` and then appends it to the log.
    ///
    /// This is the hot write path: the writable copy reflects the mutation immediately while the
    /// log keeps it around for the next replay.
    pub fn push_and_apply<S>(&mut self, entry: Entry<K, V>, table: &mut Table<K, V, S>)
    where
        S: BuildHasher,
    {
        entry.apply_to(table);
        self.push(entry);
    }
}

impl<'a, K, V> IntoIterator for &'a OpLog<K, V> {
    type Item = &'a Entry<K, V>;
    type IntoIter = slice::Iter<'a, Entry<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table;
    use std::{collections::BTreeMap, sync::Arc};

    fn contents(table: &Table<u8, u8>) -> BTreeMap<u8, u8> {
        table.iter().map(|(k, v)| (*k, **v)).collect()
    }

    #[test]
    fn insert_delete_clear() {
        let mut log = OpLog::new();
        let mut table = create_table::<&str, i32>();

        log.push(Entry::insert("foo", 1));
        log.push(Entry::insert("bar", 2));
        log.apply(&mut table);
        log.clear();
        assert_eq!(table.len(), 2);
        assert_eq!(*table["foo"], 1);

        log.push(Entry::Delete("foo"));
        log.apply(&mut table);
        log.clear();
        assert_eq!(table.len(), 1);

        log.push(Entry::Clear);
        log.apply(&mut table);
        assert!(table.is_empty());
    }

    #[test]
    fn push_and_apply_updates_table_and_log() {
        let mut log = OpLog::new();
        let mut table = create_table::<&str, i32>();
        log.push_and_apply(Entry::insert("foo", 1), &mut table);
        assert_eq!(table.len(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn later_insert_overwrites_earlier() {
        let mut log = OpLog::new();
        log.push(Entry::insert("foo", 1));
        log.push(Entry::insert("foo", 2));
        let mut table = create_table();
        log.apply(&mut table);
        assert_eq!(*table["foo"], 2);
    }

    #[test]
    fn clear_then_reinsert() {
        let mut log = OpLog::new();
        log.push(Entry::insert("foo", 1));
        log.push(Entry::insert("bar", 2));
        log.push(Entry::Clear);
        log.push(Entry::insert("bar", 3));

        let mut table = create_table();
        table.insert("baz", Arc::new(4));
        log.apply(&mut table);
        assert_eq!(table.len(), 1);
        assert_eq!(*table["bar"], 3);
    }

    #[test]
    fn clear_resets_length() {
        let mut log = OpLog::<u8, u8>::new();
        assert!(log.is_empty());
        log.push(Entry::Clear);
        log.push(Entry::Delete(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().filter_map(Entry::key).count(), 1);
        log.clear();
        assert!(log.is_empty());
    }

    /// Replaying the log onto the state as of the last replay yields the state of a table that
    /// had every entry applied as it was pushed.
    #[quickcheck]
    fn replay_matches_eager_application(
        initial: BTreeMap<u8, u8>,
        entries: Vec<Entry<u8, u8>>,
    ) -> bool {
        let mut stale = create_table();
        stale.extend(initial.into_iter().map(|(k, v)| (k, Arc::new(v))));
        let mut eager = stale.clone();

        let mut log = OpLog::new();
        for entry in entries {
            log.push_and_apply(entry, &mut eager);
        }
        log.apply(&mut stale);

        contents(&stale) == contents(&eager)
    }

    /// Replaying onto an untouched target a second time changes nothing.
    #[quickcheck]
    fn replay_is_repeatable(initial: BTreeMap<u8, u8>, entries: Vec<Entry<u8, u8>>) -> bool {
        let mut table = create_table();
        table.extend(initial.into_iter().map(|(k, v)| (k, Arc::new(v))));

        let mut log = OpLog::new();
        entries.into_iter().for_each(|entry| log.push(entry));
        log.apply(&mut table);
        let once = contents(&table);
        log.apply(&mut table);

        once == contents(&table)
    }
}
