//! ContentRevision - optimistic concurrency token.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token naming the exact stored state of an object at a path.
///
/// Only a `RemoteStore` hands these out. Callers never build or inspect
/// them; they pass them back unchanged as the precondition of a write or
/// delete, and the store rejects the call if the object moved on since.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRevision(String);

impl ContentRevision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // git 風に短縮表示
        let short = self.0.get(..12).unwrap_or(&self.0);
        f.write_str(short)
    }
}
