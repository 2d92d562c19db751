//! Text Normalization
//!
//! Cleans recognizer output before it reaches the language model and strips
//! formatting from model replies before they reach the synthesizer.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

lazy_static! {
    static ref LEADING_FILLERS: Regex =
        Regex::new(r"(?i)^\s*(?:(?:um+|uh+|erm?|hmm+)\b[,.]*\s*)+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```.*?```").unwrap();
    static ref INLINE_CODE: Regex = Regex::new(r"`([^`]*)`").unwrap();
    static ref LINK: Regex = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref HEADING: Regex = Regex::new(r"(?m)^\s*#{1,6}\s*").unwrap();
    static ref BULLET: Regex = Regex::new(r"(?m)^\s*[-*+]\s+").unwrap();
    static ref BOLD: Regex = Regex::new(r"(\*\*|__)(.+?)(\*\*|__)").unwrap();
    static ref ITALIC: Regex = Regex::new(r"\*([^*\s][^*]*)\*").unwrap();
}

/// Normalizes text on both sides of the language model
pub struct TextNormalizer {
    /// Manual corrections from config, matched as whole words
    corrections: Vec<(Regex, String)>,
}

impl TextNormalizer {
    /// Create a new text normalizer
    pub fn new(corrections: &HashMap<String, String>) -> Self {
        let mut compiled: Vec<(Regex, String)> = corrections
            .iter()
            .filter(|(from, _)| !from.trim().is_empty())
            .filter_map(|(from, to)| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(from.trim()));
                match Regex::new(&pattern) {
                    Ok(re) => Some((re, to.clone())),
                    Err(e) => {
                        warn!("Skipping voice correction '{}': {}", from, e);
                        None
                    }
                }
            })
            .collect();
        // Longest first so "fire physics" beats "physics"
        compiled.sort_by_key(|(re, _)| std::cmp::Reverse(re.as_str().len()));

        Self {
            corrections: compiled,
        }
    }

    /// Clean a final transcript. An empty result means nothing was said.
    pub fn clean_transcript(&self, text: &str) -> String {
        let mut result = text.to_string();

        for (pattern, replacement) in &self.corrections {
            result = pattern
                .replace_all(&result, regex::NoExpand(replacement))
                .into_owned();
        }

        let result = LEADING_FILLERS.replace(&result, "");
        let result = WHITESPACE.replace_all(&result, " ");
        result
            .trim()
            .trim_start_matches(|c: char| c == ',' || c == '.')
            .trim()
            .to_string()
    }

    /// Strip markdown so the synthesizer does not read symbols aloud
    pub fn prepare_for_speech(&self, reply: &str) -> String {
        let text = CODE_FENCE.replace_all(reply, " ");
        let text = LINK.replace_all(&text, "$1");
        let text = HEADING.replace_all(&text, "");
        let text = BULLET.replace_all(&text, "");
        let text = BOLD.replace_all(&text, "$2");
        let text = ITALIC.replace_all(&text, "$1");
        let text = INLINE_CODE.replace_all(&text, "$1");
        WHITESPACE.replace_all(&text, " ").trim().to_string()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}
