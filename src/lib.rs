//! Offline-first replication core.
//!
//! An HLC-timestamped, last-writer-wins replication engine for a
//! `(table, row, column)` cell store. The crate is transport- and
//! persistence-agnostic: integrators implement [`store::LocalStore`] and
//! [`store::RemoteStore`] over their own database and network stack, and
//! drive everything else through a [`replicator::Replicator`].

pub mod codec;
pub mod error;
pub mod hlc;
pub mod merge;
pub mod message;
pub mod replicator;
pub mod store;

pub use codec::CellValue;
pub use error::{Error, Result};
pub use hlc::{compare_hlc, compare_packed, Hlc, HlcClock};
pub use merge::Decision;
pub use message::Message;
pub use replicator::{
    ChangeEvent, ChangeInput, ChangeSource, IdGenerator, Replicator, ReplicatorConfig,
    UuidIdGenerator,
};
pub use store::{LocalStore, RemoteStore, StoreError, Subscription};
