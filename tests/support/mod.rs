pub mod mock_local_store;
pub mod mock_remote_store;

pub use mock_local_store::MockLocalStore;
pub use mock_remote_store::MockRemoteStore;
