//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::action::IdGenerator;

/// How a dispatcher seeds its action ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum IdSeed {
    /// Wall-clock milliseconds times 1000
    #[default]
    WallClock,
    /// First id is `value + 1`; useful for reproducible logs
    Fixed(u64),
}

impl IdSeed {
    pub(crate) fn generator(self) -> IdGenerator {
        match self {
            IdSeed::WallClock => IdGenerator::from_clock(),
            IdSeed::Fixed(seed) => IdGenerator::starting_after(seed),
        }
    }
}

/// Settings used when building a dispatcher and its stores.
///
/// Deserialises with every field optional:
///
/// ```
/// use store_dispatch_core::{EngineConfig, IdSeed};
///
/// let config: EngineConfig = serde_json::from_str("{}").unwrap();
/// assert_eq!(config.id_seed, IdSeed::WallClock);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Action id seed
    pub id_seed: IdSeed,
}

impl EngineConfig {
    /// Set the id seed
    pub fn with_id_seed(mut self, seed: IdSeed) -> Self {
        self.id_seed = seed;
        self
    }
}
