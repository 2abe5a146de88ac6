//! In-memory `RemoteStore` shared across multiple `Replicator`s via
//! `Arc<Mutex<...>>`, the same sharing pattern `MockTransport::new_pair`
//! uses in `core/tests/helpers/sync_transport.rs` to let two devices see
//! one logical network.

use std::sync::Mutex;

use async_trait::async_trait;
use cellsync_core::{Message, RemoteStore, StoreError, Subscription};
use tokio::sync::mpsc;

struct RemoteSubscriber {
    user_id: String,
    client_id: String,
    sender: mpsc::UnboundedSender<Vec<Message>>,
}

struct Inner {
    next_server_ts: u64,
    log: Vec<Message>,
    subscribers: Vec<RemoteSubscriber>,
    /// If `Some(n)`, the next `send_batch` accepts only the first `n`
    /// messages and resets to `None`, exercising the partial-acceptance
    /// stop condition in `Replicator::push`.
    accept_limit: Option<usize>,
}

pub struct MockRemoteStore {
    inner: Mutex<Inner>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_server_ts: 1,
                log: Vec::new(),
                subscribers: Vec::new(),
                accept_limit: None,
            }),
        }
    }

    /// The next `send_batch` will only accept the first `n` messages.
    pub fn limit_next_batch_acceptance(&self, n: usize) {
        self.inner.lock().unwrap().accept_limit = Some(n);
    }

    pub fn server_log_len(&self) -> usize {
        self.inner.lock().unwrap().log.len()
    }

    fn visible_to<'a>(
        log: impl Iterator<Item = &'a Message>,
        cursor: Option<u64>,
        user_id: &str,
        client_id: &str,
    ) -> Vec<Message> {
        log.filter(|m| {
            m.user_id == user_id
                && m.client_id != client_id
                && m.server_timestamp.map(|ts| ts > cursor.unwrap_or(0)).unwrap_or(false)
        })
        .cloned()
        .collect()
    }

    fn accept(inner: &mut Inner, mut message: Message) -> Message {
        let ts = inner.next_server_ts;
        inner.next_server_ts += 1;
        message.server_timestamp = Some(ts);
        inner.log.push(message.clone());

        inner.subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in &inner.subscribers {
            if sub.user_id == message.user_id && sub.client_id != message.client_id {
                let _ = sub.sender.send(vec![message.clone()]);
            }
        }

        message
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn fetch_since(
        &self,
        cursor: Option<u64>,
        user_id: &str,
        client_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::visible_to(inner.log.iter(), cursor, user_id, client_id))
    }

    async fn send_message(&self, message: Message) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::accept(&mut inner, message);
        Ok(true)
    }

    async fn send_batch(&self, messages: Vec<Message>) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let limit = inner.accept_limit.take().unwrap_or(messages.len());

        let mut accepted = Vec::with_capacity(messages.len());
        for message in messages.into_iter().take(limit) {
            let id = message.id.clone();
            Self::accept(&mut inner, message);
            accepted.push(id);
        }
        Ok(accepted)
    }

    async fn subscribe(
        &self,
        user_id: String,
        client_id: String,
        cursor: Option<u64>,
    ) -> Result<Box<dyn Subscription>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock().unwrap();
        let backlog = Self::visible_to(inner.log.iter(), cursor, &user_id, &client_id);
        if !backlog.is_empty() {
            let _ = tx.send(backlog);
        }

        inner.subscribers.push(RemoteSubscriber {
            user_id,
            client_id,
            sender: tx,
        });

        Ok(Box::new(MockSubscription { receiver: rx }))
    }
}

pub struct MockSubscription {
    receiver: mpsc::UnboundedReceiver<Vec<Message>>,
}

#[async_trait]
impl Subscription for MockSubscription {
    async fn next_batch(&mut self) -> Option<Vec<Message>> {
        self.receiver.recv().await
    }
}
