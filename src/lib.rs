// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Eventual: A Double-Buffered, Eventually Consistent Concurrent Map
//!
//! This crate provides [`Map`], a concurrent key-value map for workloads with many readers and
//! few writers. Readers never block on writers and writers never block on readers. In exchange,
//! writes are not visible to readers straight away: writers mutate a private copy of the map and
//! decide explicitly when to expose what they have written.
//!
//! ## Core Concepts
//!
//! A [`Map`] keeps two copies of its contents:
//!
//! - the **readable copy**, which every [`ReadHandle`] looks keys up in;
//! - the **writable copy**, which [`Map::insert`], [`Map::delete`] and [`Map::clear`] modify.
//!
//! Every mutation is applied to the writable copy and appended to an [`OpLog`]. Calling
//! [`Map::refresh`] swaps the roles of the two copies, points every registered [`ReadHandle`] at
//! the new readable copy and replays the log onto the new writable copy, which was stale by
//! exactly the logged writes. After a refresh both copies hold the same data again.
//!
//! The swap exchanges two [`Arc`](std::sync::Arc)s, so no map data is copied, and values are
//! stored behind an `Arc` so both copies share each value's allocation.
//!
//! ## Write Lag
//!
//! The number of writes accepted since the last refresh is the **write lag**, and bounds how
//! stale reads can be. Writers can refresh after every write to emulate a regular concurrent map,
//! refresh on their own schedule, or set [`Options::max_replication_write_lag`] to have the map
//! refresh itself as part of the write that pushes the lag past the threshold.
//!
//! ## Getting Started
//!
//! ```rust
//! use eventual::{Map, Options};
//! use std::{sync::Arc, thread};
//!
//! let map = Arc::new(Map::with_options(
//!     Options::new().with_max_replication_write_lag(2),
//! ));
//! let reader = map.reader();
//!
//! // 1. WRITES ARE PRIVATE
//! map.insert("apples", 3);
//! map.insert("bananas", 5);
//! assert_eq!(reader.len(), Ok(0));
//!
//! // 2. REFRESH PUBLISHES THEM
//! map.refresh();
//! assert_eq!(reader.get("apples").unwrap().as_deref(), Some(&3));
//!
//! // 3. HANDLES CAN LIVE ON OTHER THREADS
//! let remote = map.reader();
//! let seen = thread::spawn(move || remote.has("bananas").unwrap())
//!     .join()
//!     .unwrap();
//! assert!(seen);
//!
//! // 4. OR LET THE MAP REFRESH ITSELF
//! // the third write since the last refresh exceeds the lag of 2.
//! map.delete("apples");
//! map.insert("cherries", 7);
//! assert_eq!(reader.has("apples"), Ok(true));
//! map.insert("dates", 11);
//! assert_eq!(reader.has("apples"), Ok(false));
//!
//! // 5. CLOSED HANDLES REPORT MISUSE
//! reader.close();
//! assert!(reader.get("bananas").is_err());
//! ```
//!
//! ## Scope of this Crate
//!
//! The map does not support iterating over its contents, does not persist its state and does not
//! bound the size of the pending log beyond what the refresh cadence implies. Writers are
//! serialized by an internal lock; multiple writers are safe but do not write in parallel.
//!
//! ## Features
//!
//! - `serde`: Provides `serde` support for [`Options`].
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for [`oplog::Entry`], useful for
//!   property-based testing.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{collections::HashMap, sync::Arc};

mod map;
pub use map::Map;
pub mod oplog;
pub use oplog::{Entry, OpLog};
mod options;
pub use options::Options;
mod reader;
pub use reader::{ReadHandle, ReaderClosed};

/// One copy of the map's contents.
///
/// Both copies of a [`Map`] are built from clones of the same hasher, so they always hash keys
/// identically.
pub type Table<K, V, S = RandomState> = HashMap<K, Arc<V>, S>;

#[cfg(test)]
pub(crate) fn create_table<K, V>() -> Table<K, V> {
    HashMap::with_hasher(RandomState::new())
}

#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
