use chrono::{DateTime, Utc};
use thiserror::Error;

/// What the remote store knows about the ledger object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub last_modified: DateTime<Utc>,
}

/// Failures of the remote object channel, classified by how sync reacts to them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Nothing has been uploaded yet.
    #[error("remote object not found")]
    NotFound,
    /// Credentials were rejected; sync stays off until an operator refreshes them.
    #[error("remote store rejected our credentials: {0}")]
    AuthExpired(String),
    /// Network or service trouble; the next trigger simply tries again.
    #[error("remote store unavailable: {0}")]
    Transient(String),
}

/// A blob channel to an object store. Every call addresses one object by `path`;
/// writes overwrite unconditionally.
#[rocket::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self, path: &str) -> String;

    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, RemoteError>;
}
