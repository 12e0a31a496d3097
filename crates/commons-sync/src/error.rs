use thiserror::Error;

use commons_types::{MessageId, Subject, ThreadId};

/// Failure reported by a transport collaborator (REST client or push channel).
///
/// The engine does not distinguish between these: any of them marks the
/// affected optimistic entity failed and is never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Request timed out")]
    Timeout,

    #[error("Push channel disconnected")]
    Disconnected,

    #[error("Server rejected call: {0}")]
    Rejected(String),

    #[error("Malformed payload: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network call failed: {0}")]
    Network(#[from] TransportError),

    #[error("Upload of {file_name} failed: {source}")]
    Upload {
        file_name: String,
        source: TransportError,
    },

    #[error("Request superseded by a newer one")]
    Cancelled,

    #[error("Thread {0} is not loaded")]
    UnknownThread(ThreadId),

    #[error("Message {0} not found")]
    UnknownMessage(MessageId),

    #[error("Subject {0:?} not found")]
    UnknownSubject(Subject),

    #[error("Message {0} is not in a retryable state")]
    NotRetryable(MessageId),

    #[error("Thread {0} cannot accept this operation")]
    Unsupported(ThreadId),

    #[error("Sync state lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, SyncError>;
