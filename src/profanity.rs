//! Profanity filtering for model output.
//!
//! The filter compiles a wordlist plus a homoglyph map into a single regex
//! that tolerates leetspeak substitutions and punctuation inserted between
//! letters, then masks matches with `*` so the output length is unchanged.

use crate::error::{FigmentError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Embedded default wordlist.
const DEFAULT_WORDS: &str = include_str!("../resources/profanity.txt");

/// Embedded default homoglyph map.
const DEFAULT_CHARACTER_MAP: &str = include_str!("../resources/character_map.json");

/// All ASCII punctuation, escaped for use inside a character class.
fn punctuation_class() -> String {
    let body: String = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##
        .chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect();
    format!("[{body}]")
}

/// Length-preserving profanity filter.
pub struct Profanity {
    regex: Regex,
}

impl Profanity {
    /// Build a filter from a wordlist and a homoglyph map.
    ///
    /// Each map entry lists the characters that may stand in for a letter;
    /// unlisted characters only match themselves. Whitespace inside a word
    /// matches any whitespace.
    pub fn new<I, S>(words: I, character_map: &HashMap<char, Vec<char>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let punct = punctuation_class();
        let word_patterns: Vec<String> = words
            .into_iter()
            .map(|word| word_pattern(word.as_ref(), character_map, &punct))
            .collect();
        if word_patterns.is_empty() {
            return Err(FigmentError::Config("empty profanity wordlist".to_owned()));
        }

        // The trailing whitespace/end group is re-emitted verbatim by the
        // replacer, so it behaves like a lookahead.
        let pattern = format!(r"(?i)\b({})(\s|$)", word_patterns.join("|"));
        let regex = Regex::new(&pattern)
            .map_err(|e| FigmentError::Config(format!("profanity regex: {e}")))?;

        Ok(Self { regex })
    }

    /// Build a filter from files on disk.
    pub fn from_paths(wordlist: &Path, character_map: &Path) -> Result<Self> {
        let words = std::fs::read_to_string(wordlist)?;
        let map = std::fs::read_to_string(character_map)?;
        Self::from_contents(&words, &map)
    }

    /// Build the filter from the embedded default resources.
    pub fn embedded() -> Result<Self> {
        Self::from_contents(DEFAULT_WORDS, DEFAULT_CHARACTER_MAP)
    }

    fn from_contents(words: &str, character_map: &str) -> Result<Self> {
        let raw_map: HashMap<String, Vec<String>> = serde_json::from_str(character_map)
            .map_err(|e| FigmentError::Config(format!("invalid character map: {e}")))?;

        let mut map = HashMap::new();
        for (key, values) in raw_map {
            let Some(key) = key.chars().next() else {
                continue;
            };
            map.insert(
                key,
                values.iter().filter_map(|v| v.chars().next()).collect(),
            );
        }

        let words = words
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        Self::new(words, &map)
    }

    /// Replace every profane match with `*` repeated to the match's length.
    ///
    /// Idempotent and length-preserving.
    pub fn filter(&self, text: &str) -> String {
        self.regex
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let word = caps.get(1).map_or("", |m| m.as_str());
                let tail = caps.get(2).map_or("", |m| m.as_str());
                format!("{}{tail}", "*".repeat(word.chars().count()))
            })
            .into_owned()
    }
}

/// Compile one word into a substitution-tolerant pattern.
///
/// Every letter becomes a character class of its homoglyphs followed by an
/// optional punctuation run; whitespace becomes `\s`.
fn word_pattern(word: &str, character_map: &HashMap<char, Vec<char>>, punct: &str) -> String {
    let mut pattern = String::new();
    for c in word.chars() {
        if c.is_whitespace() {
            pattern.push_str(r"\s");
        } else {
            let substitutions = character_map
                .get(&c)
                .cloned()
                .unwrap_or_else(|| vec![c]);
            let class: String = substitutions
                .into_iter()
                .map(|s| {
                    if s.is_ascii_punctuation() {
                        format!("\\{s}")
                    } else {
                        s.to_string()
                    }
                })
                .collect();
            pattern.push_str(&format!("[{class}]"));
        }
        pattern.push_str(punct);
        pattern.push('*');
    }
    pattern
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use proptest::prelude::*;

    fn filter() -> Profanity {
        Profanity::embedded().unwrap()
    }

    #[test]
    fn masks_a_plain_word() {
        assert_eq!(filter().filter("well damn that"), "well **** that");
    }

    #[test]
    fn masks_at_end_of_text() {
        assert_eq!(filter().filter("oh crap"), "oh ****");
    }

    #[test]
    fn masks_homoglyph_variants() {
        assert_eq!(filter().filter("d@mn it"), "**** it");
        assert_eq!(filter().filter("sh1t happens"), "**** happens");
    }

    #[test]
    fn masks_punctuation_interleaved_words() {
        assert_eq!(filter().filter("d.a.m.n right"), "******* right");
    }

    #[test]
    fn masks_case_insensitively() {
        assert_eq!(filter().filter("DAMN"), "****");
    }

    #[test]
    fn masks_multiword_phrases() {
        let out = filter().filter("you son of a bitch !");
        assert_eq!(out, "you ************** !");
    }

    #[test]
    fn ignores_words_continuing_into_letters() {
        // `damnation` must not match: the word is not followed by
        // whitespace or end of text.
        assert_eq!(filter().filter("damnation"), "damnation");
    }

    #[test]
    fn preserves_clean_text() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(filter().filter(text), text);
    }

    #[test]
    fn is_idempotent() {
        let once = filter().filter("well damn that sh1t");
        assert_eq!(filter().filter(&once), once);
    }

    #[test]
    fn from_paths_reads_resources() {
        let dir = tempfile::tempdir().unwrap();
        let words = dir.path().join("words.txt");
        let map = dir.path().join("map.json");
        std::fs::write(&words, "zounds\n").unwrap();
        std::fs::write(&map, r#"{"z": ["z", "2"]}"#).unwrap();

        let profanity = Profanity::from_paths(&words, &map).unwrap();
        // Trailing punctuation is absorbed by the punctuation run.
        assert_eq!(profanity.filter("2ounds!"), "*******");
        assert_eq!(profanity.filter("2ounds again"), "****** again");
    }

    proptest! {
        #[test]
        fn filter_preserves_length(text in "\\PC{0,200}") {
            let filtered = filter().filter(&text);
            prop_assert_eq!(filtered.chars().count(), text.chars().count());
        }
    }
}
