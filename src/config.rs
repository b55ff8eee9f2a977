//! Runtime configuration for the search core

use serde::{Deserialize, Serialize};

/// Tunables that change command behavior at runtime.
///
/// Passed to `Datastore` at construction; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// FT.AGGREGATE: reject field names in SORTBY/GROUPBY that do not
    /// start with '@'. When disabled, the '@' prefix becomes optional.
    pub reject_legacy_field: bool,

    /// Number of shards a new `Datastore` spins up.
    pub num_shards: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            reject_legacy_field: true,
            num_shards: 4,
        }
    }
}
