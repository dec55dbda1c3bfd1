use std::sync::LazyLock;

use regex::Regex;

/// `.`, `!` or `?`, then whitespace, then an uppercase letter.
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s+(\p{Lu})").unwrap());

const TERMINALS: [char; 3] = ['.', '!', '?'];
/// Allowed after the terminal mark, e.g. `*I wonder.*` or `"Go!"`.
const CLOSERS: [char; 6] = ['*', '"', '\'', ')', '\u{201d}', '\u{2019}'];

/// Turns raw model output into prose that ends on a full sentence.
///
/// Splitting is a heuristic, not real segmentation: abbreviations such as
/// `Mr. Smith` split too, which is harmless because the units are rejoined.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    stops: Vec<String>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop sequences that some servers leave at the end of a completion.
    pub fn with_stops(mut self, stops: Vec<String>) -> Self {
        self.stops = stops.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    pub fn clean(&self, raw: &str) -> String {
        let text = self.strip_stops(raw).trim();
        if text.is_empty() {
            return String::new();
        }

        let mut sentences = split_sentences(text);
        if let Some(last) = sentences.last() {
            if !ends_sentence(last) {
                sentences.pop();
            }
        }

        sentences.join(" ")
    }

    fn strip_stops<'a>(&self, raw: &'a str) -> &'a str {
        let trimmed = raw.trim_end();
        for stop in &self.stops {
            if let Some(rest) = trimmed.strip_suffix(stop.as_str()) {
                return rest;
            }
        }
        trimmed
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for caps in SENTENCE_BOUNDARY.captures_iter(text) {
        let (Some(boundary), Some(next)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // the terminal mark is a single byte
        sentences.push(&text[start..boundary.start() + 1]);
        start = next.start();
    }
    sentences.push(&text[start..]);
    sentences
}

fn ends_sentence(unit: &str) -> bool {
    unit.trim_end_matches(CLOSERS)
        .ends_with(TERMINALS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(raw: &str) -> String {
        PostProcessor::new().clean(raw)
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n"), "");
    }

    #[test]
    fn complete_sentence_is_kept() {
        assert_eq!(clean("Hello world."), "Hello world.");
    }

    #[test]
    fn trailing_fragment_is_dropped() {
        assert_eq!(clean("Hello world. And then it"), "Hello world.");
        assert_eq!(
            clean("I see you! Who are you? Come closer and"),
            "I see you! Who are you?"
        );
    }

    #[test]
    fn single_unit_without_punctuation_is_dropped() {
        assert_eq!(clean("no punctuation at all"), "");
    }

    #[test]
    fn whitespace_between_sentences_is_normalized() {
        assert_eq!(clean("One.\n\nTwo!   Three?"), "One. Two! Three?");
        assert_eq!(clean("Hello world.  \n"), "Hello world.");
    }

    #[test]
    fn lowercase_after_period_is_not_a_boundary() {
        assert_eq!(clean("It was 3 p.m. already. She"), "It was 3 p.m. already.");
    }

    #[test]
    fn closing_marks_after_terminal_count_as_complete() {
        assert_eq!(
            clean("She smiles. *I wonder what he wants.*"),
            "She smiles. *I wonder what he wants.*"
        );
        assert_eq!(clean("\"Run!\""), "\"Run!\"");
    }

    #[test]
    fn stop_sequences_are_stripped() {
        let processor = PostProcessor::new().with_stops(vec!["###".into(), "</s>".into()]);
        assert_eq!(processor.clean("Fine, come in.###"), "Fine, come in.");
        assert_eq!(processor.clean("Fine, come in.</s>\n"), "Fine, come in.");
    }

    #[test]
    fn non_ascii_text_is_split_safely() {
        assert_eq!(clean("Ça va. Élise arrive. Ü"), "Ça va. Élise arrive.");
    }
}
