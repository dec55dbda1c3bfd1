use std::collections::{HashMap, HashSet};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Background text about characters, looked up by name.
pub trait PersonalityStore {
    /// Indexes `document` for `name`. Returns `false` and changes nothing
    /// when the name is already known.
    fn add_character(&mut self, name: &str, document: &str) -> bool;

    fn contains(&self, name: &str) -> bool;

    /// Snippets stored for `name`, in document order. Unknown names yield nothing.
    fn retrieve_context(&self, name: &str) -> anyhow::Result<Vec<String>>;

    /// Number of stored snippets across all characters.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryPersonalityStore {
    chunk_size: usize,
    character_names: HashSet<String>,
    snippets: HashMap<String, Vec<String>>,
}

impl Default for InMemoryPersonalityStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl InMemoryPersonalityStore {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            character_names: HashSet::new(),
            snippets: HashMap::new(),
        }
    }

    pub fn character_names(&self) -> impl Iterator<Item = &str> {
        self.character_names.iter().map(String::as_str)
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PersonalityStore for InMemoryPersonalityStore {
    fn add_character(&mut self, name: &str, document: &str) -> bool {
        let key = key(name);
        if self.character_names.contains(&key) {
            log::debug!("`{}` already in personality store", name);
            return false;
        }

        let chunks = chunk_document(document, self.chunk_size);
        log::info!("stored {} snippets for `{}`", chunks.len(), name);
        self.snippets.insert(key.clone(), chunks);
        self.character_names.insert(key);
        true
    }

    fn contains(&self, name: &str) -> bool {
        self.character_names.contains(&key(name))
    }

    fn retrieve_context(&self, name: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.snippets.get(&key(name)).cloned().unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.snippets.values().map(Vec::len).sum()
    }
}

/// Splits text into chunks of at most `chunk_size` characters without overlap,
/// preferring paragraph breaks, then word breaks.
pub fn chunk_document(document: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let document = document.replace("\r\n", "\n");
    let paragraphs = document
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty());

    for paragraph in paragraphs {
        let len = paragraph.chars().count();
        if fits(&current, len, chunk_size) {
            push_piece(&mut current, &paragraph, "\n");
            continue;
        }
        flush(&mut chunks, &mut current);
        if len <= chunk_size {
            current = paragraph;
            continue;
        }

        for word in paragraph.split(' ') {
            let word_len = word.chars().count();
            if fits(&current, word_len, chunk_size) {
                push_piece(&mut current, word, " ");
                continue;
            }
            flush(&mut chunks, &mut current);
            if word_len <= chunk_size {
                current.push_str(word);
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(chunk_size) {
                chunks.push(piece.iter().collect());
            }
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

fn fits(current: &str, len: usize, chunk_size: usize) -> bool {
    if current.is_empty() {
        return len <= chunk_size;
    }
    current.chars().count() + 1 + len <= chunk_size
}

fn push_piece(current: &mut String, piece: &str, separator: &str) {
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}
