//! Mutation records.

use serde_json::{Map, Value};

/// A committed entity record as handed over by the mutation layer
pub type Record = Map<String, Value>;

/// Take an independent copy of a record for asynchronous consumers.
///
/// A missing record becomes an empty map. The copy owns its data, so later
/// mutation of the caller's record is never observable through it.
#[must_use]
pub fn snapshot(record: Option<&Record>) -> Record {
    record.cloned().unwrap_or_default()
}
