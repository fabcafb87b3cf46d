//! Session stores
//!
//! A session store is the persisted key-value storage that outlives any one
//! manager instance for the length of a session. Stores are shared, so all
//! operations take `&self` and implementations provide their own interior
//! synchronization.

use async_trait::async_trait;

use crate::error::BoxError;

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileSessionStore;
pub use in_memory::InMemorySessionStore;

/// An asynchronous, session-scoped key-value store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Reads the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, BoxError>;

    /// Stores `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<(), BoxError>;

    /// Removes the value stored under `key`
    ///
    /// Removing a key that is not present succeeds.
    async fn remove(&self, key: &str) -> Result<(), BoxError>;
}
