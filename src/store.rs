//! Collaborator contracts (spec.md §6): the local persisted view/log and
//! the remote message log. Neither has a concrete implementation in this
//! crate, concrete persistence and transport are out of scope (spec.md
//! §1), but the contracts are specified precisely enough to mock, and
//! `tests/support` does exactly that.

use async_trait::async_trait;

use crate::message::Message;

/// Local persistence: the message log plus the materialized cell view.
///
/// Implementations are responsible for the internal atomicity of
/// "apply-to-view + append-to-log" *for a single message* (spec.md §5).
/// Cross-message atomicity is not required.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// One-time setup.
    async fn init(&self) -> Result<(), StoreError>;

    /// Updates the cell view: `(table, row).column = value`. Failure here
    /// is non-fatal to the caller, the message still lives in the log.
    async fn apply_to_view(&self, message: &Message) -> Result<(), StoreError>;

    /// Persists `message` in the log. A duplicate `id` is a no-op success.
    async fn append_to_log(&self, message: &Message) -> Result<(), StoreError>;

    /// The greatest `local_timestamp` recorded for this cell, or `None` if
    /// the cell has never been written.
    async fn get_latest_cell_timestamp(
        &self,
        table: &str,
        row: &str,
        column: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Convenience: apply-to-view then append-to-log, used on the
    /// local-write path. `apply_to_view` failure is non-fatal (spec.md
    /// §6): it is logged and the message is appended to the log anyway.
    async fn save_local_change(&self, message: &Message) -> Result<(), StoreError> {
        if let Err(err) = self.apply_to_view(message).await {
            tracing::warn!(message_id = %message.id, error = %err, "apply_to_view failed on local write, message kept in log");
        }
        self.append_to_log(message).await
    }

    /// Runs the merge engine (spec.md §4.3) for one incoming message:
    /// append unconditionally, then apply-to-view only if it wins LWW over
    /// the cell's current latest timestamp.
    async fn save_server_message(&self, message: &Message) -> Result<(), StoreError> {
        crate::merge::merge_incoming(self, message).await?;
        Ok(())
    }

    /// `save_server_message` for every message in the batch, then advance
    /// the cursor to `max(server_timestamp)` over the batch iff every
    /// message was persisted successfully and at least one carried a
    /// `server_timestamp`.
    async fn save_server_batch(&self, batch: &[Message]) -> Result<(), StoreError> {
        for message in batch {
            self.save_server_message(message).await?;
        }

        if let Some(max_ts) = batch.iter().filter_map(|m| m.server_timestamp).max() {
            self.write_cursor(max_ts).await?;
        }

        Ok(())
    }

    async fn read_cursor(&self) -> Result<Option<u64>, StoreError>;
    async fn write_cursor(&self, cursor: u64) -> Result<(), StoreError>;

    /// Every message with `has_been_synced = false`, in insertion order.
    async fn unsynced(&self) -> Result<Vec<Message>, StoreError>;

    /// Flips `has_been_synced` to `true` for each id.
    async fn mark_synced(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// The remote message log and its live tail.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Messages with `server_timestamp > cursor`, belonging to `user_id`,
    /// originated by a client other than `client_id`.
    async fn fetch_since(
        &self,
        cursor: Option<u64>,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    /// Single-message push; `true` iff accepted.
    async fn send_message(&self, message: Message) -> Result<bool, StoreError>;

    /// Batch push; default implementation loops `send_message`.
    /// Implementations *should* override with a true bulk insert.
    async fn send_batch(&self, messages: Vec<Message>) -> Result<Vec<String>, StoreError> {
        let mut accepted = Vec::with_capacity(messages.len());
        for message in messages {
            let id = message.id.clone();
            if self.send_message(message).await? {
                accepted.push(id);
            }
        }
        Ok(accepted)
    }

    /// Live tail of newly accepted messages, filtered identically to
    /// `fetch_since`.
    async fn subscribe(
        &self,
        user_id: String,
        client_id: String,
        cursor: Option<u64>,
    ) -> Result<Box<dyn Subscription>, StoreError>;
}

/// A live handle to a remote store's push-based tail. Pull-based rather
/// than callback-based (spec.md §9's design note on replacing the
/// callback/cyclic-reference shape with a plain message stream).
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Awaits the next non-empty batch, in causal order of arrival on the
    /// server. Returns `None` once the subscription ends.
    async fn next_batch(&mut self) -> Option<Vec<Message>>;
}

/// Opaque error from a store collaborator. `LocalStoreError`/
/// `RemoteTransient` from spec.md §7 are represented by this type, wrapped
/// into [`crate::error::Error::Local`]/[`crate::error::Error::Remote`] at
/// the point the Replicator swallows them.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn msg(text: impl Into<String>) -> Self {
        #[derive(Debug, thiserror::Error)]
        #[error("{0}")]
        struct Msg(String);
        Self(Box::new(Msg(text.into())))
    }
}
