use std::fmt::Display;

use crate::{error::CharacterError, llm::ModelHandle};

pub mod conversation;
pub mod llm;
pub mod personality;
pub mod post_process;

/// The entity being roleplayed.
///
/// Starts without a name; naming it once makes it active for the rest of the session.
#[derive(Debug, Clone)]
pub struct Character {
    name: Option<String>,
    model: ModelHandle,
    onboarded: bool,
}

impl Character {
    pub fn new(model: ModelHandle) -> Self {
        Self {
            name: None,
            model,
            onboarded: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// Whether reference material for this character reached the personality store.
    pub fn onboarded(&self) -> bool {
        self.onboarded
    }

    pub fn mark_onboarded(&mut self) {
        self.onboarded = true;
    }

    pub fn assign_name(&mut self, name: &str) -> Result<(), CharacterError> {
        if let Some(current) = &self.name {
            return Err(CharacterError::AlreadyNamed(current.clone()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(CharacterError::EmptyName);
        }
        self.name = Some(name.to_string());
        Ok(())
    }
}

impl Display for Character {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Character Name: {} with model {}",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.model.name()
        )
    }
}
