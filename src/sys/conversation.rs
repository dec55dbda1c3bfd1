use std::{fmt::Display, time::Duration};

use crossbeam::channel;

use crate::{
    error::TurnError,
    llm::{CancelToken, Completion, CompletionRequest, PendingCompletion},
};

use super::{
    llm::{Content, Message, PromptTemplate, Role},
    personality::PersonalityStore,
    post_process::PostProcessor,
    Character,
};

pub const DEFAULT_MAX_TOKENS: u32 = 75;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_CONTEXT_SNIPPETS: usize = 3;

/// Message history of one roleplay session and the turn loop around it.
///
/// `history` is what the user sees; `serialized_history` is what the model
/// sees. Both always hold the same messages in the same order.
#[derive(Debug, Clone)]
pub struct Conversation {
    history: Vec<Message>,
    serialized_history: Vec<Content>,
    template: PromptTemplate,
    max_tokens: u32,
    post_processor: PostProcessor,
    timeout: Duration,
    max_context_snippets: usize,
}

impl Conversation {
    pub fn new(template: PromptTemplate, max_tokens: u32, post_processor: PostProcessor) -> Self {
        Self {
            history: Vec::new(),
            serialized_history: Vec::new(),
            template,
            max_tokens,
            post_processor,
            timeout: DEFAULT_TIMEOUT,
            max_context_snippets: DEFAULT_MAX_CONTEXT_SNIPPETS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_context_snippets(mut self, max_context_snippets: usize) -> Self {
        self.max_context_snippets = max_context_snippets;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn serialized_history(&self) -> &[Content] {
        &self.serialized_history
    }

    pub fn add_message(&mut self, message: Message) {
        self.serialized_history.push(Self::serialize(&message));
        self.history.push(message);
    }

    pub fn find_role(message: &Message) -> Role {
        match message {
            Message::System(_) => Role::System,
            Message::Human(_) => Role::User,
            Message::Ai(_) => Role::Assistant,
        }
    }

    pub fn serialize(message: &Message) -> Content {
        Content {
            role: Self::find_role(message),
            content: message.content().to_string(),
        }
    }

    /// Runs one turn and returns the character's cleaned reply.
    ///
    /// `human` is the raw utterance; it is always recorded as a [`Message::Human`].
    pub fn interact(
        &mut self,
        character: &Character,
        human: impl Into<String>,
        store: &dyn PersonalityStore,
    ) -> Result<String, TurnError> {
        self.interact_with_cancel(character, human, store, &CancelToken::never())
    }

    /// Like [`Conversation::interact`], but gives up when `cancel` fires.
    ///
    /// The model sees the history plus the utterance wrapped in the prompt
    /// template. Only the plain utterance and the reply are recorded, and only
    /// once the reply is usable; on any error both histories are untouched.
    pub fn interact_with_cancel(
        &mut self,
        character: &Character,
        human: impl Into<String>,
        store: &dyn PersonalityStore,
        cancel: &CancelToken,
    ) -> Result<String, TurnError> {
        let name = character.name().ok_or(TurnError::CharacterInactive)?;
        let human = Message::Human(human.into());

        let context = self.retrieve_context(name, store);
        let prompt = self.template.render(name, human.content(), &context)?;

        let mut messages = Vec::with_capacity(self.serialized_history.len() + 1);
        messages.extend_from_slice(&self.serialized_history);
        messages.push(Self::serialize(&Message::Human(prompt)));

        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        let pending = character.model().submit(CompletionRequest {
            messages,
            max_tokens: self.max_tokens,
        })?;
        let completion = self.wait_for(pending, cancel)?;

        if completion.role != Role::Assistant {
            return Err(TurnError::MalformedModelResponse(format!(
                "top choice has role `{}`",
                completion.role
            )));
        }
        let answer = self.post_processor.clean(&completion.content);
        if answer.is_empty() {
            log::warn!("nothing left of {:?} after cleaning", completion.content);
            return Err(TurnError::EmptyGeneration);
        }

        self.add_message(human);
        self.add_message(Message::Ai(answer.clone()));
        log::info!("turn {} done for `{}`", self.history.len() / 2, name);
        Ok(answer)
    }

    /// The timeout runs from the moment the model starts on this turn, not
    /// while it is still busy with an abandoned earlier one.
    fn wait_for(
        &self,
        pending: PendingCompletion,
        cancel: &CancelToken,
    ) -> Result<Completion, TurnError> {
        crossbeam::select! {
            recv(pending.started()) -> _ => {},
            recv(cancel.receiver()) -> _ => return Err(TurnError::Cancelled),
        }
        crossbeam::select! {
            recv(pending.receiver()) -> reply => Ok(pending.resolve(reply)?),
            recv(cancel.receiver()) -> _ => Err(TurnError::Cancelled),
            recv(channel::after(self.timeout)) -> _ => Err(TurnError::Timeout(self.timeout)),
        }
    }

    fn retrieve_context(&self, name: &str, store: &dyn PersonalityStore) -> Vec<String> {
        match store.retrieve_context(name) {
            Ok(mut snippets) => {
                if snippets.is_empty() {
                    log::debug!("no stored context for `{}`", name);
                }
                snippets.truncate(self.max_context_snippets);
                snippets
            }
            Err(e) => {
                log::warn!("context lookup for `{}` failed, continuing without: {e:#}", name);
                Vec::new()
            }
        }
    }
}

impl Display for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Messages:")?;
        for (i, message) in self.history.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, message)?;
        }
        Ok(())
    }
}
