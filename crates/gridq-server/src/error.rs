//! Lease server error types and their gRPC status mapping.
//!
//! The taxonomy distinguishes protocol errors (fail the call, the
//! executor resends), session conflicts, and transient infrastructure
//! failures (retryable). Lease-state mismatches are not errors at all:
//! renew/done report them through differential id lists.

use thiserror::Error;

use gridq_core::QuantityError;
use gridq_state::StateError;

#[derive(Debug, Error)]
pub enum LeaseError {
    /// Malformed request: missing cluster id, bad handshake.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unparseable resource quantity in a request.
    #[error("protocol error: {0}")]
    Quantity(#[from] QuantityError),

    /// A second concurrent session claimed an already-held cluster/pool.
    #[error("session conflict: {0}")]
    Conflict(String),

    /// The durable store failed; the call is retryable.
    #[error(transparent)]
    State(#[from] StateError),

    /// The fairness oracle failed; the call is retryable.
    #[error("oracle failure: {0}")]
    Oracle(String),
}

pub type LeaseResult<T> = Result<T, LeaseError>;

impl From<LeaseError> for tonic::Status {
    fn from(err: LeaseError) -> Self {
        match err {
            LeaseError::Protocol(_) | LeaseError::Quantity(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            LeaseError::Conflict(_) => tonic::Status::already_exists(err.to_string()),
            LeaseError::State(_) | LeaseError::Oracle(_) => {
                tonic::Status::unavailable(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let status: tonic::Status = LeaseError::Protocol("missing cluster id".into()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = LeaseError::Conflict("c1/default".into()).into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);

        let status: tonic::Status = LeaseError::Oracle("timeout".into()).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
