//! Error types for the remote API module

use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The server could not be reached at all.
    #[error("Server unreachable: {reason}")]
    Unreachable { reason: String },

    /// The server answered with a non-success status.
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The server answered but the body could not be understood.
    #[error("Invalid server response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Invalid remote configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl RemoteError {
    /// Check if this error means the network is down, as opposed to the server saying no.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Unreachable { .. })
    }

    /// Check if the server was reached and refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }

    /// HTTP status of a rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<RemoteError> for crate::Error {
    fn from(err: RemoteError) -> Self {
        crate::Error::Remote(err)
    }
}
