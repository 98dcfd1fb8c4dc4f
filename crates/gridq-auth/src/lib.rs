//! gridq-auth — bearer-token authentication for the lease server.
//!
//! Token review is delegated to a pluggable [`TokenReviewer`]; outcomes
//! are cached with separate TTLs for valid and invalid tokens so a
//! flood of bad credentials can't hammer the reviewer.

pub mod cache;
pub mod error;
pub mod service;

pub use cache::{CachedOutcome, TokenCache};
pub use error::{AuthError, AuthResult};
pub use service::{AuthService, Principal, TokenReviewer, bearer_token};
