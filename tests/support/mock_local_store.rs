//! In-memory `LocalStore` for scenario tests. Not a shipped persistence
//! backend, everything lives in `Mutex`-guarded collections for the
//! lifetime of the test process, mirroring the mock transport pattern in
//! `core/tests/helpers/sync_transport.rs` (`Arc<Mutex<HashMap<...>>>`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cellsync_core::{LocalStore, Message, StoreError};

type CellKey = (String, String, String);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MockError(String);

/// Which operation the mock should fail on its next call.
#[derive(Default)]
struct Faults {
    apply_to_view: bool,
    append_to_log: bool,
}

#[derive(Default)]
struct Inner {
    log: Vec<Message>,
    view: HashMap<CellKey, String>,
    cursor: Option<u64>,
    faults: Faults,
}

pub struct MockLocalStore {
    inner: Mutex<Inner>,
}

impl MockLocalStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Makes the next `apply_to_view` call fail, exercising the
    /// non-fatal-apply-failure edge case (spec.md §4.3, §6).
    pub fn fail_next_apply_to_view(&self) {
        self.inner.lock().unwrap().faults.apply_to_view = true;
    }

    /// Makes the next `append_to_log` call fail.
    pub fn fail_next_append_to_log(&self) {
        self.inner.lock().unwrap().faults.append_to_log = true;
    }

    pub fn log(&self) -> Vec<Message> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn view(&self) -> HashMap<CellKey, String> {
        self.inner.lock().unwrap().view.clone()
    }

    pub fn cell_value(&self, table: &str, row: &str, column: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .view
            .get(&(table.to_string(), row.to_string(), column.to_string()))
            .cloned()
    }
}

impl Default for MockLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MockLocalStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn apply_to_view(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.apply_to_view {
            inner.faults.apply_to_view = false;
            return Err(StoreError::new(MockError("apply_to_view injected failure".into())));
        }
        inner.view.insert(
            (message.table.clone(), message.row.clone(), message.column.clone()),
            message.value.clone(),
        );
        Ok(())
    }

    async fn append_to_log(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.faults.append_to_log {
            inner.faults.append_to_log = false;
            return Err(StoreError::new(MockError("append_to_log injected failure".into())));
        }
        if inner.log.iter().any(|m| m.id == message.id) {
            return Ok(());
        }
        inner.log.push(message.clone());
        Ok(())
    }

    async fn get_latest_cell_timestamp(
        &self,
        table: &str,
        row: &str,
        column: &str,
    ) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let latest = inner
            .log
            .iter()
            .filter(|m| m.table == table && m.row == row && m.column == column)
            .map(|m| m.local_timestamp.clone())
            .max_by(|a, b| cellsync_core::compare_packed(a, b));
        Ok(latest)
    }

    async fn read_cursor(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().unwrap().cursor)
    }

    async fn write_cursor(&self, cursor: u64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().cursor = Some(cursor);
        Ok(())
    }

    async fn unsynced(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|m| !m.has_been_synced)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for message in inner.log.iter_mut() {
            if ids.iter().any(|id| id == &message.id) {
                message.has_been_synced = true;
            }
        }
        Ok(())
    }
}
