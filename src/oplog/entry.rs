// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! A single mutation as recorded in the [`OpLog`](super::OpLog).

use crate::Table;
use std::{
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// One mutation accepted by a writer.
///
/// Entries are created once, when the mutation is accepted, and are never modified afterwards.
/// Inserted values live behind an [`Arc`] so that applying the same entry to both copies of the
/// map shares a single allocation rather than cloning the value.
#[derive(PartialEq, Eq)]
pub enum Entry<K, V> {
    /// Sets the key to the value, overwriting any previous value.
    Insert(K, Arc<V>),
    /// Removes the key. Removing an absent key is a no-op.
    Delete(K),
    /// Removes every key currently in the target, not only the keys touched by the log.
    Clear,
}

impl<K, V> Entry<K, V> {
    /// Creates an [`Entry::Insert`] that takes ownership of `value`.
    pub fn insert(key: K, value: V) -> Self {
        Self::Insert(key, Arc::new(value))
    }

    /// The key this entry touches, if any.
    pub fn key(&self) -> Option<&K> {
        match self {
            Entry::Insert(key, _) | Entry::Delete(key) => Some(key),
            Entry::Clear => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Entry::Insert(..) => "insert",
            Entry::Delete(_) => "delete",
            Entry::Clear => "clear",
        }
    }
}

impl<K, V> Entry<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Applies this entry to `table`.
    pub fn apply_to<S>(&self, table: &mut Table<K, V, S>)
    where
        S: BuildHasher,
    {
        match self {
            Entry::Insert(key, value) => {
                table.insert(key.clone(), Arc::clone(value));
            }
            Entry::Delete(key) => {
                table.remove(key);
            }
            Entry::Clear => table.clear(),
        }
    }
}

// NOTE: derived Clone would require `V: Clone`, but only the `Arc` is cloned.
impl<K: Clone, V> Clone for Entry<K, V> {
    fn clone(&self) -> Self {
        match self {
            Entry::Insert(key, value) => Entry::Insert(key.clone(), Arc::clone(value)),
            Entry::Delete(key) => Entry::Delete(key.clone()),
            Entry::Clear => Entry::Clear,
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Entry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Insert(key, value) => f.debug_tuple("Insert").field(key).field(value).finish(),
            Entry::Delete(key) => f.debug_tuple("Delete").field(key).finish(),
            Entry::Clear => f.write_str("Clear"),
        }
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl<K, V> quickcheck::Arbitrary for Entry<K, V>
where
    K: quickcheck::Arbitrary,
    V: quickcheck::Arbitrary,
{
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // Skew towards inserts. A clear wipes out everything before it, so frequent clears would
        // hide most of the interesting interleavings.
        let kind_choices = [0, 0, 0, 0, 0, 1, 1, 1, 2];
        match g.choose(&kind_choices).copied().unwrap_or(0) {
            0 => Entry::insert(K::arbitrary(g), V::arbitrary(g)),
            1 => Entry::Delete(K::arbitrary(g)),
            _ => Entry::Clear,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        match self {
            Entry::Insert(key, value) => {
                let value = Arc::clone(value);
                Box::new(
                    key.shrink()
                        .map(move |key| Entry::Insert(key, Arc::clone(&value))),
                )
            }
            Entry::Delete(key) => Box::new(key.shrink().map(Entry::Delete)),
            Entry::Clear => quickcheck::empty_shrinker(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_table;
    use insta::assert_debug_snapshot;

    #[test]
    fn insert_shares_the_value_allocation() {
        let entry = Entry::insert("foo", String::from("bar"));
        let mut left = create_table();
        let mut right = create_table();
        entry.apply_to(&mut left);
        entry.apply_to(&mut right);

        let Entry::Insert(_, value) = &entry else {
            panic!("constructed an insert");
        };
        assert!(Arc::ptr_eq(&left["foo"], value));
        assert!(Arc::ptr_eq(&left["foo"], &right["foo"]));
    }

    #[test]
    fn delete_of_absent_key_is_a_noop() {
        let mut table = create_table::<&str, i32>();
        Entry::insert("foo", 1).apply_to(&mut table);
        Entry::Delete("bar").apply_to(&mut table);
        assert_eq!(table.len(), 1);
        Entry::Delete("foo").apply_to(&mut table);
        assert!(table.is_empty());
    }

    #[test]
    fn clear_removes_untouched_keys() {
        let mut table = create_table::<&str, i32>();
        table.insert("untracked", Arc::new(0));
        Entry::insert("foo", 1).apply_to(&mut table);
        Entry::Clear.apply_to(&mut table);
        assert!(table.is_empty());
    }

    #[test]
    fn key_accessor() {
        assert_eq!(Entry::insert("foo", 1).key(), Some(&"foo"));
        assert_eq!(Entry::<_, i32>::Delete("foo").key(), Some(&"foo"));
        assert_eq!(Entry::<&str, i32>::Clear.key(), None);
    }

    #[test]
    fn debug_output() {
        assert_debug_snapshot!(Entry::insert("foo", 1), @r#"
        Insert(
            "foo",
            1,
        )
        "#);
        assert_debug_snapshot!(Entry::<&str, i32>::Delete("foo"), @r#"
        Delete(
            "foo",
        )
        "#);
        assert_debug_snapshot!(Entry::<&str, i32>::Clear, @"Clear");
    }
}
