//! Errors for the few fallible conversions
//!
//! The engine itself never rejects input: non-map actions are filtered and
//! unresolvable store names degrade to the empty name. Errors only arise
//! when converting between typed Rust values and the JSON the engine carries.

use thiserror::Error;

/// Errors that can occur converting to or from engine values
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to serialize action: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("State of store `{store}` does not match the requested type: {source}")]
    StateShape {
        store: String,
        #[source]
        source: serde_json::Error,
    },
}
