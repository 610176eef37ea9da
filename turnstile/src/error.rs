use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::session::StoreError;

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

const MISSING_SESSION: &str = "Login sessions require session support. Did you forget to install the session middleware?";

#[derive(ThisError, Debug)]
pub enum AuthError {
    /// The request carries no session, so login state cannot be read or written
    #[error("{}", MISSING_SESSION)]
    MissingSession,

    /// A strategy name in the chain has no registration
    #[error("Unknown authentication strategy \"{name}\"")]
    UnknownStrategy { name: String },

    /// `use` was called with a strategy that reports no name
    #[error("Authentication strategies must have a name")]
    UnnamedStrategy,

    /// Every serializer passed
    #[error("Failed to serialize user into session")]
    SerializeFailed,

    /// Every deserializer passed
    #[error("Failed to deserialize user out of session")]
    DeserializeFailed,

    /// Session store save/regenerate/load failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// All strategies failed and the caller asked for an error instead of a response
    #[error("{message}")]
    Authentication { message: String, status: StatusCode },

    /// Internal error reported by a strategy or a codec link
    #[error("Strategy error: {message}")]
    Strategy { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuthError {
    /// Convenience constructor for strategies and codec links.
    pub fn strategy(message: impl Into<String>) -> Self {
        AuthError::Strategy { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Authentication { status, .. } => *status,
            AuthError::MissingSession
            | AuthError::UnknownStrategy { .. }
            | AuthError::UnnamedStrategy
            | AuthError::SerializeFailed
            | AuthError::DeserializeFailed
            | AuthError::Store(_)
            | AuthError::Strategy { .. }
            | AuthError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Authentication { message, .. } => message.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Authentication { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            AuthError::MissingSession | AuthError::UnknownStrategy { .. } | AuthError::UnnamedStrategy => {
                tracing::error!("Authentication misconfigured: {}", self);
            }
            _ => {
                tracing::error!("Internal authentication error: {:#}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}
