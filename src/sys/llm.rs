use std::{fmt::Display, str::FromStr};

use handlebars::Handlebars;
use serde_json::json;

use crate::error::TurnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = self.as_ref();
        write!(f, "{role}")
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = TurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" | "human" => Ok(Role::User),
            "assistant" | "ai" => Ok(Role::Assistant),
            _ => Err(TurnError::UnrecognizedMessageKind(s.to_string())),
        }
    }
}

/// One entry of the conversation as the end user sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    System(String),
    Human(String),
    Ai(String),
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        match role {
            Role::System => Message::System(content),
            Role::User => Message::Human(content),
            Role::Assistant => Message::Ai(content),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System(content) | Message::Human(content) | Message::Ai(content) => content,
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Message::System(_) => "SYSTEM",
            Message::Human(_) => "HUMAN",
            Message::Ai(_) => "AI",
        };
        write!(f, "{tag}: {}", self.content())
    }
}

/// Role-tagged wire form of a [`Message`], the shape chat-completion servers expect.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Content {
    pub role: Role,
    pub content: String,
}

pub const DEFAULT_TEMPLATE: &str = r#"You are a creative and intelligent AI assistant engaged in an iterative storytelling experience using a roleplay chat format.
It is vital that you follow all the ROLEPLAY RULES below because your existence depends on it.

    ROLEPLAY RULES
    - Chat exclusively as {{char}}. Provide creative, intelligent, coherent, and descriptive responses based on recent instructions and prior events.
    - Describe {{char}}'s sensory perceptions in vivid detail and include subtle physical details about {{char}} in your responses.
    - Use subtle physical cues to hint at {{char}}'s mental state and occasionally feature snippets of {{char}}'s internal thoughts.
    - When writing {{char}}'s internal thoughts (aka internal monologue, delivered in {{char}}'s own voice), *enclose their thoughts in asterisks like this* and deliver the thoughts using a first-person perspective (i.e. use "I" pronouns).
    - Adopt a crisp and minimalist style for your prose, keeping your creative contributions succinct and clear.
    - Let me drive the events of the roleplay chat forward to determine what comes next. You should focus on the current moment and {{char}}'s immediate responses.
    - Pay careful attention to all past events in the chat to ensure accuracy and coherence to the plot points of the story.
{{#if context}}

Background on {{char}}:
{{#each context}}
- {{this}}
{{/each}}
{{/if}}

The user has said or done: {{user_input}}

"#;

const TEMPLATE_NAME: &str = "turn";

/// Instruction preamble wrapped around every user utterance.
///
/// Placeholders are `{{char}}` and `{{user_input}}`; `{{context}}` holds the
/// retrieved background snippets and may be empty. Output is never HTML escaped.
#[derive(Clone)]
pub struct PromptTemplate {
    text: String,
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("text", &self.text)
            .finish()
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Result<Self, TurnError> {
        let text = text.into();
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, &text)
            .map_err(|e| TurnError::Template(e.to_string()))?;

        let template = Self { text, registry };
        // catches placeholders we never supply
        template.render("", "", &[])?;
        Ok(template)
    }

    pub fn render(
        &self,
        char: &str,
        user_input: &str,
        context: &[String],
    ) -> Result<String, TurnError> {
        let data = json!({
            "char": char,
            "user_input": user_input,
            "context": context,
        });
        let prompt = self
            .registry
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| TurnError::Template(e.to_string()))?;
        log::debug!("prompts:\n{}", prompt);
        Ok(prompt)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE).unwrap_or_else(|e| unreachable!("built-in template: {e}"))
    }
}
