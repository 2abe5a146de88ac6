//! The Replicator (spec.md §4.4): owns the per-client HLC, the debounced
//! push scheduler, the live-tail subscription, and the change stream. Every
//! public entry point acquires the single `state` mutex for its full
//! duration, which is the concurrency model spec.md §5 calls out as option
//! (b), "an internal mutex that each public entry point acquires", and
//! trivially satisfies every atomicity/ordering guarantee listed there.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::codec::{encode, CellValue};
use crate::error::{Error, Result};
use crate::hlc::{Hlc, HlcClock};
use crate::message::Message;
use crate::store::{LocalStore, RemoteStore};

/// Generates the caller-supplied `id` for each new [`Message`].
pub trait IdGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Default generator, backed by random UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Replicator configuration (spec.md §4.4).
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Max messages per push batch.
    pub batch_size: usize,
    /// Delay coalescing multiple writes before a push is attempted.
    pub push_debounce: Duration,
    /// Bypass the debounce and push after every write.
    pub push_immediately: bool,
    /// Optional drift bound enforced against incoming live-tail/pull
    /// messages (spec.md §9 Open Question 3: disabled unless an
    /// integrator opts in).
    pub max_drift_ms: Option<u64>,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            push_debounce: Duration::from_millis(500),
            push_immediately: false,
            max_drift_ms: None,
        }
    }
}

impl ReplicatorConfig {
    /// The `Immediate` profile: no debounce, push after every write.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            push_debounce: Duration::ZERO,
            push_immediately: true,
            ..Self::default()
        }
    }
}

/// Origin of a [`ChangeEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeSource {
    Local,
    Server,
}

/// One batch of messages that just took effect, broadcast on the change
/// stream (spec.md §4.4, C7). `messages` is always non-empty.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub source: ChangeSource,
    pub messages: Vec<Message>,
}

/// One entry of a [`Replicator::save_changes`] call.
pub struct ChangeInput {
    pub table: String,
    pub row: String,
    pub column: String,
    pub value: CellValue,
}

impl ChangeInput {
    pub fn new(
        table: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
        value: CellValue,
    ) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            column: column.into(),
            value,
        }
    }
}

struct State {
    hlc: HlcClock,
    disposed: bool,
    sync_enabled: bool,
    debounce_handle: Option<JoinHandle<()>>,
    periodic_handle: Option<JoinHandle<()>>,
    subscription_handle: Option<JoinHandle<()>>,
}

struct Inner {
    user_id: String,
    client_id: String,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    id_gen: Arc<dyn IdGenerator>,
    config: ReplicatorConfig,
    tx: broadcast::Sender<ChangeEvent>,
    state: Mutex<State>,
}

/// A per-application replication core over a [`LocalStore`], a
/// [`RemoteStore`], and an [`IdGenerator`], each held behind an `Arc` so
/// they can be shared with the spawned debounce, periodic-sync, and
/// live-tail tasks (spec.md §6.A). Cheaply `Clone`able: clones share the
/// same underlying state.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<Inner>,
}

const CHANGE_STREAM_CAPACITY: usize = 256;

impl Replicator {
    /// Constructs a Replicator. Starts disabled (no network activity);
    /// the change stream exists immediately.
    pub fn new(
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        id_gen: Arc<dyn IdGenerator>,
        config: ReplicatorConfig,
    ) -> Self {
        let client_id = client_id.into();
        let (tx, _rx) = broadcast::channel(CHANGE_STREAM_CAPACITY);

        let inner = Inner {
            user_id: user_id.into(),
            client_id: client_id.clone(),
            local,
            remote,
            id_gen,
            config,
            tx,
            state: Mutex::new(State {
                hlc: HlcClock::new(client_id),
                disposed: false,
                sync_enabled: false,
                debounce_handle: None,
                periodic_handle: None,
                subscription_handle: None,
            }),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// New subscribers receive only events emitted after this call.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.tx.subscribe()
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub async fn is_sync_enabled(&self) -> bool {
        self.inner.state.lock().await.sync_enabled
    }

    pub async fn is_disposed(&self) -> bool {
        self.inner.state.lock().await.disposed
    }

    /// Enables/disables sync. Enabling subscribes to the remote live tail
    /// and schedules one immediate [`Self::run_sync`]; disabling cancels
    /// the subscription. Local writes always persist regardless of this
    /// flag.
    #[instrument(skip(self))]
    pub async fn set_sync_enabled(&self, enabled: bool) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        if state.sync_enabled == enabled {
            return Ok(());
        }

        if enabled {
            let cursor = self
                .inner
                .local
                .read_cursor()
                .await
                .map_err(|e| Error::Local(Box::new(e)))?;

            let subscription = self
                .inner
                .remote
                .subscribe(self.inner.user_id.clone(), self.inner.client_id.clone(), cursor)
                .await
                .map_err(|e| Error::Remote(Box::new(e)))?;

            let replicator = self.clone();
            state.subscription_handle = Some(tokio::spawn(Self::drive_subscription(
                replicator,
                subscription,
            )));

            // Scheduled detached so it doesn't try to reacquire our lock.
            let replicator = self.clone();
            tokio::spawn(async move {
                if let Err(err) = replicator.run_sync().await {
                    warn!(%err, "initial run_sync after enabling sync failed");
                }
            });
        } else if let Some(handle) = state.subscription_handle.take() {
            handle.abort();
        }

        state.sync_enabled = enabled;
        Ok(())
    }

    async fn drive_subscription(
        replicator: Self,
        mut subscription: Box<dyn crate::store::Subscription>,
    ) {
        while let Some(batch) = subscription.next_batch().await {
            if let Err(err) = replicator.ingest_live_batch(batch).await {
                warn!(%err, "live tail: failed to ingest batch");
                if matches!(err, Error::Disposed) {
                    break;
                }
            }
        }
        debug!("live tail subscription ended");
    }

    async fn ingest_live_batch(&self, batch: Vec<Message>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        self.ingest_batch_locked(&mut state, batch).await
    }

    /// Encodes `value` per spec.md §4.2 and writes it as a new message.
    #[instrument(skip(self, value))]
    pub async fn save_change(
        &self,
        table: impl Into<String> + std::fmt::Debug,
        row: impl Into<String> + std::fmt::Debug,
        column: impl Into<String> + std::fmt::Debug,
        value: CellValue,
    ) -> Result<()> {
        let (data_type, value) = encode(&value);
        self.save_change_raw(table, row, column, data_type, value).await
    }

    /// Like [`Self::save_change`] but with a caller-supplied `data_type`;
    /// `value` is stored verbatim rather than encoded.
    #[instrument(skip(self, value))]
    pub async fn save_change_raw(
        &self,
        table: impl Into<String> + std::fmt::Debug,
        row: impl Into<String> + std::fmt::Debug,
        column: impl Into<String> + std::fmt::Debug,
        data_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }

        let message = self.build_message(
            &mut state,
            table.into(),
            row.into(),
            column.into(),
            data_type.into(),
            value.into(),
        );

        self.inner
            .local
            .save_local_change(&message)
            .await
            .map_err(|e| Error::Local(Box::new(e)))?;

        self.inner
            .tx
            .send(ChangeEvent {
                source: ChangeSource::Local,
                messages: vec![message],
            })
            .ok();

        if state.sync_enabled {
            self.schedule_push(&mut state);
        }

        Ok(())
    }

    /// Writes several cell mutations as one batch, emitting exactly one
    /// change event for the whole batch. An empty `changes` list has no
    /// effect: no event, no sync schedule.
    #[instrument(skip(self, changes), fields(count = changes.len()))]
    pub async fn save_changes(&self, changes: Vec<ChangeInput>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        if changes.is_empty() {
            return Ok(());
        }

        let mut messages = Vec::with_capacity(changes.len());
        for change in changes {
            let (data_type, value) = encode(&change.value);
            let message = self.build_message(
                &mut state,
                change.table,
                change.row,
                change.column,
                data_type,
                value,
            );

            self.inner
                .local
                .save_local_change(&message)
                .await
                .map_err(|e| Error::Local(Box::new(e)))?;

            messages.push(message);
        }

        self.inner
            .tx
            .send(ChangeEvent {
                source: ChangeSource::Local,
                messages,
            })
            .ok();

        if state.sync_enabled {
            self.schedule_push(&mut state);
        }

        Ok(())
    }

    fn build_message(
        &self,
        state: &mut State,
        table: String,
        row: String,
        column: String,
        data_type: String,
        value: String,
    ) -> Message {
        let timestamp = state.hlc.send();
        Message {
            id: self.inner.id_gen.generate(),
            table,
            row,
            column,
            data_type,
            value,
            local_timestamp: timestamp.pack(),
            server_timestamp: None,
            user_id: self.inner.user_id.clone(),
            client_id: self.inner.client_id.clone(),
            has_been_applied: false,
            has_been_synced: false,
        }
    }

    fn schedule_push(&self, state: &mut State) {
        if let Some(handle) = state.debounce_handle.take() {
            handle.abort();
        }

        let replicator = self.clone();

        if self.inner.config.push_immediately || self.inner.config.push_debounce.is_zero() {
            state.debounce_handle = Some(tokio::spawn(async move {
                if let Err(err) = replicator.push().await {
                    warn!(%err, "push failed");
                }
            }));
            return;
        }

        let delay = self.inner.config.push_debounce;
        state.debounce_handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = replicator.push().await {
                warn!(%err, "debounced push failed");
            }
        }));
    }

    /// Performs [`Self::push`] then [`Self::pull`], sequentially, under a
    /// single lock acquisition.
    #[instrument(skip(self))]
    pub async fn run_sync(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        self.push_locked().await?;
        self.pull_locked(&mut state).await
    }

    /// Pushes every unsynced message to the remote store in batches,
    /// stopping at the first partially-accepted batch so the rest stay
    /// queued for the next push.
    #[instrument(skip(self))]
    pub async fn push(&self) -> Result<()> {
        let state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        self.push_locked().await
    }

    /// Assumes the caller already holds `state`'s lock for the duration of
    /// this call.
    async fn push_locked(&self) -> Result<()> {
        let unsynced = match self.inner.local.unsynced().await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%err, "push: failed to read unsynced messages, will retry next push");
                return Ok(());
            }
        };

        let batch_size = self.inner.config.batch_size.max(1);
        for batch in unsynced.chunks(batch_size) {
            let batch = batch.to_vec();
            let accepted = match self.inner.remote.send_batch(batch.clone()).await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "push: remote rejected batch, will retry next push");
                    break;
                }
            };

            if let Err(err) = self.inner.local.mark_synced(&accepted).await {
                warn!(%err, "push: failed to mark messages synced");
                break;
            }

            if accepted.len() < batch.len() {
                debug!(
                    accepted = accepted.len(),
                    attempted = batch.len(),
                    "push: partial batch acceptance, stopping"
                );
                break;
            }
        }

        Ok(())
    }

    /// Pulls new messages from the remote store since the local cursor.
    #[instrument(skip(self))]
    pub async fn pull(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        self.pull_locked(&mut state).await
    }

    async fn pull_locked(&self, state: &mut State) -> Result<()> {
        let cursor = match self.inner.local.read_cursor().await {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!(%err, "pull: failed to read cursor, will retry next pull");
                return Ok(());
            }
        };

        let messages = match self
            .inner
            .remote
            .fetch_since(cursor, &self.inner.user_id, &self.inner.client_id)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(%err, "pull: remote fetch_since failed, will retry next pull");
                return Ok(());
            }
        };

        self.ingest_batch_locked(state, messages).await
    }

    /// Filters, advances the HLC, and hands a batch to the local store.
    /// Shared by both the pull path and the live-tail path (spec.md §4.4).
    async fn ingest_batch_locked(&self, state: &mut State, batch: Vec<Message>) -> Result<()> {
        let mut filtered: Vec<Message> = batch
            .into_iter()
            .filter(|m| m.client_id != self.inner.client_id && m.user_id == self.inner.user_id)
            .collect();

        if filtered.is_empty() {
            return Ok(());
        }

        // These messages were already accepted by the remote log, so they
        // are synced by definition (spec.md §3). Marking them here before
        // they ever reach `unsynced()` keeps a later `push()` from
        // re-uploading a peer's write back to the remote, which would echo
        // it straight back to its own originating replica.
        for message in &mut filtered {
            message.has_been_synced = true;
        }

        for message in &filtered {
            match Hlc::parse(&message.local_timestamp) {
                Some(remote_hlc) => {
                    if let Err(err) =
                        state
                            .hlc
                            .receive(&remote_hlc, None, self.inner.config.max_drift_ms)
                    {
                        warn!(%err, message_id = %message.id, "clock drift rejected, HLC not advanced for this message");
                    }
                }
                None => warn!(message_id = %message.id, "incoming message has an unparseable local_timestamp"),
            }
        }

        if let Err(err) = self.inner.local.save_server_batch(&filtered).await {
            warn!(%err, "failed to persist incoming batch, will be retried on next sync");
            return Ok(());
        }

        self.inner
            .tx
            .send(ChangeEvent {
                source: ChangeSource::Server,
                messages: filtered,
            })
            .ok();

        Ok(())
    }

    /// Cancels any pending debounced push and pushes immediately.
    #[instrument(skip(self))]
    pub async fn force_push(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        if let Some(handle) = state.debounce_handle.take() {
            handle.abort();
        }
        self.push_locked().await
    }

    /// Schedules [`Self::run_sync`] on `interval` while sync is enabled.
    /// Replacing an existing schedule cancels the previous timer.
    pub async fn start_periodic_sync(&self, interval: Duration) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        if let Some(handle) = state.periodic_handle.take() {
            handle.abort();
        }

        let replicator = self.clone();
        state.periodic_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; consume it
            loop {
                ticker.tick().await;
                if replicator.is_sync_enabled().await {
                    if let Err(err) = replicator.run_sync().await {
                        warn!(%err, "periodic run_sync failed");
                    }
                }
            }
        }));

        Ok(())
    }

    pub async fn stop_periodic_sync(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Err(Error::Disposed);
        }
        if let Some(handle) = state.periodic_handle.take() {
            handle.abort();
        }
        Ok(())
    }

    /// Cancels the subscription and all timers, and closes the replicator
    /// for further operations. Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return Ok(());
        }
        state.disposed = true;

        if let Some(handle) = state.subscription_handle.take() {
            handle.abort();
        }
        if let Some(handle) = state.debounce_handle.take() {
            handle.abort();
        }
        if let Some(handle) = state.periodic_handle.take() {
            handle.abort();
        }

        Ok(())
    }
}
