//! Authentication error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials were presented with the request.
    #[error("missing bearer token")]
    MissingToken,

    /// Credentials were presented but rejected.
    #[error("invalid token")]
    InvalidToken,

    /// The reviewer could not be reached or returned a non-verdict failure.
    #[error("token review failed: {0}")]
    ReviewFailed(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<AuthError> for tonic::Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken => {
                tonic::Status::unauthenticated(err.to_string())
            }
            AuthError::ReviewFailed(_) => tonic::Status::unavailable(err.to_string()),
        }
    }
}
