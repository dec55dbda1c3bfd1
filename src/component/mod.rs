use std::{collections::HashMap, path::PathBuf};

use anyhow::Context;

use crate::{
    error::TurnError,
    llm::CancelToken,
    sys::{
        conversation::Conversation, llm::Message, personality::PersonalityStore, Character,
    },
};

pub mod chat;

/// Everything one user session needs, passed around explicitly.
pub struct Session {
    pub conversation: Conversation,
    pub character: Character,
    store: Box<dyn PersonalityStore + Send>,
    lore: HashMap<String, PathBuf>,
}

impl Session {
    pub fn new(
        conversation: Conversation,
        character: Character,
        store: Box<dyn PersonalityStore + Send>,
        lore: HashMap<String, PathBuf>,
    ) -> Self {
        Self {
            conversation,
            character,
            store,
            lore,
        }
    }

    pub fn store(&self) -> &dyn PersonalityStore {
        self.store.as_ref()
    }

    /// Names the character, loads its reference material and records the
    /// acknowledgement messages.
    pub fn onboard(&mut self, name: &str) -> anyhow::Result<()> {
        self.character.assign_name(name)?;
        let name = self.character.name().unwrap_or(name).to_string();

        self.conversation.add_message(Message::System(format!(
            "You are going to be roleplaying {name}."
        )));

        match self.load_lore(&name) {
            Ok(Some(document)) => {
                self.store.add_character(&name, &document);
            }
            Ok(None) => log::info!("no lore configured for `{}`", name),
            Err(e) => log::warn!("{e:#}"),
        }
        if self.store.contains(&name) {
            self.character.mark_onboarded();
        }

        self.conversation.add_message(Message::Ai(format!(
            "I will be roleplaying {name}."
        )));
        log::info!("{}", self.character);
        Ok(())
    }

    pub fn chat(&mut self, text: &str, cancel: &CancelToken) -> Result<String, TurnError> {
        self.conversation
            .interact_with_cancel(&self.character, text, self.store.as_ref(), cancel)
    }

    fn load_lore(&self, name: &str) -> anyhow::Result<Option<String>> {
        let Some(path) = self
            .lore
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, path)| path)
        else {
            return Ok(None);
        };
        let document = std::fs::read_to_string(path)
            .with_context(|| format!("lore file `{}` for `{name}` not readable", path.display()))?;
        Ok(Some(document))
    }
}
