use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use clap::Parser;
use component::{
    chat::{spawn_session, TerminalApp},
    Session,
};
use llm::{ChatBackend, ModelWorker, OpenAiCompatBackend};
use sys::{
    conversation::{Conversation, DEFAULT_MAX_CONTEXT_SNIPPETS, DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT},
    llm::{Message, PromptTemplate},
    personality::{InMemoryPersonalityStore, DEFAULT_CHUNK_SIZE},
    post_process::PostProcessor,
    Character,
};

mod component;
mod debug_tool;
mod error;
mod llm;
mod sys;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, short, required = true)]
    project_path: PathBuf,

    /// answer with the rendered prompt instead of calling the model server
    #[arg(long)]
    debug_llm: bool,

    /// character to roleplay, asked for interactively when missing
    #[arg(long, short)]
    character: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Project {
    model_name: String,
    #[serde(default)]
    prompts: Option<PathBuf>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    run: RunOptions,
    #[serde(default)]
    templates: HashMap<String, TemplateConfig>,
    #[serde(default)]
    lore: HashMap<String, PathBuf>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TemplateConfig {
    text: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RunOptions {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    max_tokens: u32,
    #[serde(default)]
    timeout_secs: u64,
    #[serde(default)]
    max_context_snippets: usize,
    #[serde(default)]
    chunk_size: usize,
    #[serde(default)]
    stops: Vec<String>,
}

impl RunOptions {
    fn fill_default_value(&mut self) {
        if self.endpoint.is_empty() {
            self.endpoint = "http://127.0.0.1:8080".to_string();
        }
        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = DEFAULT_TIMEOUT.as_secs();
        }
        if self.max_context_snippets == 0 {
            self.max_context_snippets = DEFAULT_MAX_CONTEXT_SNIPPETS;
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
    }
}

impl Project {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("project file `{}` not found", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
            .with_context(|| format!("project file `{}` is invalid", path.display()))
    }

    /// Relative `prompts` and `lore` paths are taken from `base`.
    fn parse(text: &str, base: &Path) -> anyhow::Result<Self> {
        let mut project: Project = toml::from_str(text)?;
        project.run.fill_default_value();
        if let Some(prompts) = &mut project.prompts {
            *prompts = base.join(&*prompts);
        }
        for path in project.lore.values_mut() {
            *path = base.join(&*path);
        }
        Ok(project)
    }

    fn prompt_template(&self) -> anyhow::Result<PromptTemplate> {
        let Some(key) = &self.template else {
            return Ok(PromptTemplate::default());
        };
        let template = self
            .templates
            .get(key)
            .ok_or(anyhow!("template `{key}` not found"))?;
        Ok(PromptTemplate::new(template.text.clone())?)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct SeedContent {
    role: String,
    message: String,
}

fn loader_prompt(prompt_file_path: &Path) -> anyhow::Result<Vec<Message>> {
    let prompt = std::fs::read_to_string(prompt_file_path).map_err(|_| {
        anyhow!("prompt file `{}` not found", prompt_file_path.display())
    })?;
    parse_prompts(&prompt)
}

fn parse_prompts(prompt: &str) -> anyhow::Result<Vec<Message>> {
    let mut prompt: HashMap<String, Vec<SeedContent>> = toml::from_str(prompt)?;
    let prompts = prompt
        .remove("content")
        .ok_or(anyhow!("'content' not exist!"))?;

    prompts
        .into_iter()
        .map(|seed| -> anyhow::Result<Message> {
            Ok(Message::new(seed.role.parse()?, seed.message))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Args::parse();
    let project = Project::load(&cli.project_path)?;
    let run = &project.run;
    let timeout = Duration::from_secs(run.timeout_secs);

    let backend: Box<dyn ChatBackend + Send> = if cli.debug_llm {
        Box::new(debug_tool::EchoBackend)
    } else {
        let backend = OpenAiCompatBackend::new(&run.endpoint, &project.model_name, timeout)?
            .with_stops(run.stops.clone());
        log::info!("using {} at {}", project.model_name, backend.url());
        Box::new(backend)
    };
    let (model, _worker) = ModelWorker::spawn(backend);

    let mut conversation = Conversation::new(
        project.prompt_template()?,
        run.max_tokens,
        PostProcessor::new().with_stops(run.stops.clone()),
    )
    .with_timeout(timeout)
    .with_max_context_snippets(run.max_context_snippets);

    if let Some(prompts) = &project.prompts {
        for message in loader_prompt(prompts)? {
            conversation.add_message(message);
        }
    }

    let session = Session::new(
        conversation,
        Character::new(model),
        Box::new(InMemoryPersonalityStore::new(run.chunk_size)),
        project.lore.clone(),
    );
    let (commands, events, session_thread) = spawn_session(session);

    let app = TerminalApp::new(commands, events, cli.character, std::io::stdout())?;
    let res = app.run_loop();

    if session_thread.join().is_err() {
        log::error!("session thread panicked");
    }
    res
}
