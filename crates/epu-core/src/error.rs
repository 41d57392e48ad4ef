//! Shared error-kind classification (spec §7).
//!
//! Every crate's own `thiserror` enum exposes a `kind()` method returning
//! one of these, so the REST layer and logging can classify any error
//! uniformly without matching every concrete variant.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    NotFound,
    AlreadyExists,
    Stale,
    Transport,
    Invariant,
    NotImplemented,
}
