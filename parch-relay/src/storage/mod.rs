//! Host directory for parch-relay.
//!
//! The relay does not own host data. It only needs to resolve a host id to
//! the author id and signing key the host registered with.

mod sqlite;

pub use sqlite::SqliteHostStore;

use crate::error::StorageError;
use async_trait::async_trait;

/// A registered host backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Host id clients join with.
    pub host_id: String,
    /// Author id the host registered.
    pub author_id: String,
    /// Base64 Ed25519 public key the author signs with.
    pub signing_public_key: Option<String>,
}

/// Lookup of registered hosts.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Find a host by id.
    ///
    /// Returns `None` for unknown hosts.
    async fn lookup_host(&self, host_id: &str) -> Result<Option<HostRecord>, StorageError>;

    /// Register a new host.
    ///
    /// Fails with [`StorageError::DuplicateHost`] if the id is taken.
    async fn register_host(&self, record: &HostRecord) -> Result<(), StorageError>;
}
