//! Boundary to the remote drive.
//!
//! The core never speaks the drive protocol itself. A bridge performs the
//! password exchange and hands back an opaque [`SessionRecord`] that the core
//! encrypts, persists and restores.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::SessionRecord;

/// Causes a bridge can attach to its `anyhow` errors so the classifier can
/// tell a bad password from a flaky network.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("credentials were rejected by the server")]
    InvalidCredentials,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DriveBridge: Send + Sync {
    async fn login(&self, principal: &str, password: &[u8]) -> anyhow::Result<SessionRecord>;

    /// Confirm a persisted session is still usable. May return a refreshed record.
    async fn resume(&self, principal: &str, record: &SessionRecord)
        -> anyhow::Result<SessionRecord>;

    async fn logout(&self, principal: &str, record: &SessionRecord) -> anyhow::Result<()>;
}
