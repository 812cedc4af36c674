use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("transfer failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("no internet connection")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("no OTA update partition")]
    NoUpdatePartition,
    #[error("could not open update partition: {0}")]
    Begin(String),
    #[error("partition write failed: {0}")]
    Write(String),
    #[error("image verification failed: {0}")]
    Verify(String),
    #[error("image checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("image is empty")]
    EmptyImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("update already in progress")]
    Busy,
}

/// Every failure of the update pipeline. All of them are recoverable: the
/// pipeline returns to `Idle` and the next check tries again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("server returned HTTP {status}")]
    Server { status: u16 },
    #[error("invalid manifest: {0}")]
    Parse(String),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("could not start update task: {0}")]
    Spawn(String),
}

impl From<TransportError> for UpdateError {
    fn from(err: TransportError) -> Self {
        UpdateError::Network(NetworkError::Transport(err))
    }
}

impl UpdateError {
    /// Short text for the status page when a manifest check fails.
    pub fn check_message(&self) -> String {
        match self {
            UpdateError::Network(NetworkError::NotConnected) => "No internet connection".to_string(),
            UpdateError::Network(NetworkError::Transport(_)) => {
                "Server communication failed".to_string()
            }
            UpdateError::Server { status } => format!("Server error (HTTP {})", status),
            UpdateError::Parse(_) => "Invalid server response".to_string(),
            UpdateError::State(StateError::Busy) => "Update already in progress".to_string(),
            other => format!("Update failed: {}", other),
        }
    }
}
