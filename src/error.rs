//! Error types for the roleplay core.

use std::time::Duration;

use thiserror::Error;

/// Why a turn did not produce a reply.
///
/// Every variant leaves the conversation exactly as it was before the turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("malformed model response: {0}")]
    MalformedModelResponse(String),

    /// The model answered, but nothing survived post-processing.
    #[error("model produced no usable text")]
    EmptyGeneration,

    #[error("unrecognized message kind `{0}`")]
    UnrecognizedMessageKind(String),

    #[error("model did not answer within {0:?}")]
    Timeout(Duration),

    #[error("turn cancelled")]
    Cancelled,

    #[error("character has no name yet")]
    CharacterInactive,

    #[error("prompt template error: {0}")]
    Template(String),
}

/// Failure reported by a [`crate::llm::ChatBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<BackendError> for TurnError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => TurnError::ModelUnavailable(msg),
            BackendError::Malformed(msg) => TurnError::MalformedModelResponse(msg),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CharacterError {
    #[error("character is already named `{0}`")]
    AlreadyNamed(String),

    #[error("character name must not be empty")]
    EmptyName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_turn_errors() {
        assert_eq!(
            TurnError::from(BackendError::Unavailable("refused".into())),
            TurnError::ModelUnavailable("refused".into())
        );
        assert_eq!(
            TurnError::from(BackendError::Malformed("no choices".into())),
            TurnError::MalformedModelResponse("no choices".into())
        );
    }
}
