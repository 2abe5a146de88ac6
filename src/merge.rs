//! Merge Engine (spec.md §4.3): the LWW decision for one incoming message,
//! decoupled from any concrete [`crate::store::LocalStore`] so the decision
//! logic itself is unit-testable.

use crate::hlc::compare_packed;
use crate::message::Message;
use crate::store::{LocalStore, StoreError};

/// Outcome of a merge decision for a single incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No prior value for the cell, or `message` strictly outranks it:
    /// write `message.value` into the cell view.
    Apply,
    /// `message`'s timestamp does not outrank the cell's current latest
    /// timestamp (including exact ties, where the existing value wins):
    /// keep the message in the log but do not touch the cell view.
    Skip,
}

/// Pure decision function: does `incoming` win LWW over `current` (the
/// cell's current latest `local_timestamp`, if any)?
#[must_use]
pub fn decide(incoming_timestamp: &str, current_timestamp: Option<&str>) -> Decision {
    match current_timestamp {
        None => Decision::Apply,
        Some(current) => {
            if compare_packed(incoming_timestamp, current) == std::cmp::Ordering::Greater {
                Decision::Apply
            } else {
                Decision::Skip
            }
        }
    }
}

/// Full merge-engine step for one incoming message against a live store:
/// append to the log (idempotent on duplicate `id`), decide, and apply to
/// the cell view if the decision says so. `apply_to_view` failures are
/// swallowed (logged) per spec.md §4.3's "non-fatal" edge rule, the
/// message unconditionally remains in the log.
///
/// Generic over `?Sized` rather than taking `&dyn LocalStore` so this can be
/// called from inside `LocalStore`'s own default method bodies, where `Self`
/// is not `Sized` and the `&Self -> &dyn LocalStore` unsize coercion is
/// unavailable.
pub async fn merge_incoming<S: LocalStore + ?Sized>(store: &S, message: &Message) -> Result<Decision, StoreError> {
    store.append_to_log(message).await?;

    let current = store
        .get_latest_cell_timestamp(&message.table, &message.row, &message.column)
        .await?;

    let decision = decide(&message.local_timestamp, current.as_deref());

    if decision == Decision::Apply {
        if let Err(err) = store.apply_to_view(message).await {
            tracing::warn!(
                message_id = %message.id,
                error = %err,
                "apply_to_view failed, message kept in log"
            );
        }
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlc::Hlc;

    fn ts(physical: u64, logical: u32, node: &str) -> String {
        Hlc::new(physical, logical, node).pack()
    }

    #[test]
    fn empty_cell_always_applies() {
        assert_eq!(decide(&ts(1, 0, "a"), None), Decision::Apply);
    }

    #[test]
    fn strictly_greater_timestamp_applies() {
        let current = ts(1, 0, "a");
        let incoming = ts(2, 0, "a");
        assert_eq!(decide(&incoming, Some(&current)), Decision::Apply);
    }

    #[test]
    fn lesser_or_equal_timestamp_skips() {
        let current = ts(5, 0, "a");
        assert_eq!(decide(&ts(4, 0, "a"), Some(&current)), Decision::Skip);
        assert_eq!(decide(&ts(5, 0, "a"), Some(&current)), Decision::Skip);
    }

    #[test]
    fn exact_tie_keeps_existing_value() {
        let ts1 = ts(10, 3, "node-a");
        assert_eq!(decide(&ts1, Some(&ts1)), Decision::Skip);
    }

    #[test]
    fn node_is_final_tiebreaker() {
        let current = ts(10, 3, "node-a");
        let incoming = ts(10, 3, "node-b");
        assert_eq!(decide(&incoming, Some(&current)), Decision::Apply);
    }
}
