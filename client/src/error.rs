//! Error types for the replication client.

use ripple_engine::RpcError;
use thiserror::Error;

/// Failures reported by a [`Transport`](crate::Transport).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Not connected; the call was not delivered.
    #[error("transport disconnected")]
    Disconnected,

    /// The peer answered with an error.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The transport has shut down for good.
    #[error("transport closed")]
    Closed,
}

impl From<RpcError> for TransportError {
    fn from(e: RpcError) -> Self {
        TransportError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

/// All possible errors from the replication client.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] ripple_engine::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("client already started")]
    AlreadyStarted,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Engine(e.into())
    }
}

impl Error {
    /// Whether the failure means "not delivered yet" rather than "rejected".
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::Disconnected | TransportError::Closed)
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_become_remote() {
        let err: TransportError = RpcError::new(-32000, "Database not found: x").into();
        assert_eq!(
            err,
            TransportError::Remote {
                code: -32000,
                message: "Database not found: x".into()
            }
        );
        assert_eq!(err.to_string(), "remote error -32000: Database not found: x");
    }

    #[test]
    fn disconnected_classification() {
        assert!(Error::from(TransportError::Disconnected).is_disconnected());
        assert!(!Error::from(TransportError::Remote {
            code: 1,
            message: "no".into()
        })
        .is_disconnected());
        assert!(!Error::DatabaseNotFound("x".into()).is_disconnected());
    }
}
