//! The replicated unit: one cell mutation (spec.md §3).

use serde::{Deserialize, Serialize};

/// An immutable record of a single `(table, row, column)` mutation.
///
/// Message identity is `id`; re-applying the same `id` twice is idempotent.
/// The log is append-only, messages are never mutated after
/// insertion except for `has_been_applied`, `has_been_synced`, and (on the
/// client) `server_timestamp` once it becomes known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,

    pub table: String,
    pub row: String,
    pub column: String,

    pub data_type: String,
    pub value: String,

    /// Packed HLC of the writer at write time.
    pub local_timestamp: String,

    /// Assigned by the remote log; absent until accepted remotely.
    pub server_timestamp: Option<u64>,

    pub user_id: String,
    pub client_id: String,

    pub has_been_applied: bool,
    pub has_been_synced: bool,
}

impl Message {
    /// The cell this message mutates, used as the merge key (spec.md §3).
    #[must_use]
    pub fn cell(&self) -> (&str, &str, &str) {
        (&self.table, &self.row, &self.column)
    }
}
