//! Model-invocation boundary: chat-completion requests go in, one top choice comes out.

use crossbeam::channel::{self, Receiver, Sender};

use crate::{
    error::BackendError,
    sys::llm::{Content, Role},
};

pub mod local_llm;
pub mod openai;

pub use local_llm::{ModelHandle, ModelWorker, PendingCompletion};
pub use openai::OpenAiCompatBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub messages: Vec<Content>,
    pub max_tokens: u32,
}

/// The top-ranked choice of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub role: Role,
    pub content: String,
}

impl Completion {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Anything that can answer a chat-completion request.
///
/// Calls may block for the whole inference; [`ModelWorker`] keeps them off the caller's thread.
pub trait ChatBackend {
    fn name(&self) -> &str;

    fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

impl<B: ChatBackend + ?Sized> ChatBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        (**self).complete(request)
    }
}

/// Creates a linked cancel handle and token.
///
/// Only [`CancelHandle::cancel`] fires the token; dropping the handle does not.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = channel::bounded(1);
    (
        CancelHandle { tx: tx.clone() },
        CancelToken {
            rx,
            _keep_open: Some(tx),
        },
    )
}

#[derive(Debug)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {
        let _ = self.tx.try_send(());
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
    // the channel never disconnects, so a dropped handle reads as "not cancelled"
    _keep_open: Option<Sender<()>>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        Self {
            rx: channel::never(),
            _keep_open: None,
        }
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
