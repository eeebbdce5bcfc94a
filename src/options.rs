// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Construction-time knobs for a [`Map`](crate::Map).

/// Configuration accepted by [`Map::with_options`](crate::Map::with_options).
///
/// ```rust
/// use eventual::{Map, Options};
///
/// let map = Map::<&str, u64>::with_options(Options::new().with_max_replication_write_lag(100));
/// # let _ = map;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Options {
    /// The number of writes the map accepts before they are published to readers automatically.
    ///
    /// The write that pushes the lag past this value triggers a refresh before it returns. `0`
    /// disables automatic refreshes, leaving publication entirely up to the caller.
    pub max_replication_write_lag: usize,
}

impl Options {
    /// Options with every knob at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets [`Options::max_replication_write_lag`].
    #[must_use]
    pub fn with_max_replication_write_lag(mut self, writes: usize) -> Self {
        self.max_replication_write_lag = writes;
        self
    }

    pub(crate) fn auto_refresh_due(&self, write_lag: usize) -> bool {
        self.max_replication_write_lag > 0 && write_lag > self.max_replication_write_lag
    }
}
