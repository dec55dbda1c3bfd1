use crate::{
    error::BackendError,
    llm::{ChatBackend, Completion, CompletionRequest},
    sys::llm::Role,
};

/// Answers every request with the last user turn, i.e. the rendered prompt.
pub struct EchoBackend;

impl ChatBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        request
            .messages
            .iter()
            .rev()
            .find(|c| c.role == Role::User)
            .map(|c| Completion::assistant(c.content.clone()))
            .ok_or_else(|| BackendError::Malformed("no user turn to echo".into()))
    }
}
