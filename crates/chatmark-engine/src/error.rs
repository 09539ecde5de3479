use thiserror::Error;

/// Failures talking to the remote replica.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Replication is scoped per signed-in user; nothing to sync against
    /// before sign-in.
    #[error("no signed-in user")]
    NoUser,

    #[error("remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {0}")]
    Status(u16),
}

/// Failures of a replication pass. A busy-skip is not an error; see
/// [`crate::replication::SyncOutcome`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Storage(err)
    }
}
