//! Generation ranges and the chunkers that measure them.
//!
//! A [`Range`] is an RFC 7233-style description of what portion of a figment
//! to generate, measured in one of four units. The wire form mirrors the HTTP
//! `Range` header grammar: `unit=start-end,start-end,...` with inclusive
//! bounds and either bound optional.

use crate::error::FigmentError;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Markdown symbols that may wrap a sentence boundary.
const MARKDOWN_SYMBOLS: &str = "*_~\"";
/// Quotation marks that may open a sentence.
const START_QUOTATION_MARKS: &str = "'\"\u{201C}`\u{2018}";
/// Quotation marks that may close a sentence.
const END_QUOTATION_MARKS: &str = "'\"\u{201D}\u{00B4}\u{2019}\u{201A},\u{201E}";

/// Escape a character for use inside a regex character class.
fn class_escape(c: char) -> String {
    if c.is_ascii_punctuation() {
        regex::escape(&c.to_string())
    } else {
        c.to_string()
    }
}

/// A character class matching every char in `chars`.
fn char_class(chars: &str) -> String {
    let body: String = chars.chars().map(class_escape).collect();
    format!("[{body}]")
}

/// Word tokenizer: runs of word chars, or runs of non-word non-space chars.
static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]+").unwrap_or_else(|e| panic!("word regex: {e}")));

/// A run of whitespace, the candidate sentence separator.
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("whitespace regex: {e}")));

/// Matches when the text *ends* like a sentence: two word chars, optional
/// punctuation, one or more terminal marks, optional closing quote/markdown.
static SENTENCE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    let punct = char_class(ascii_punctuation());
    let ends = char_class(&format!("{MARKDOWN_SYMBOLS}{END_QUOTATION_MARKS}"));
    let pattern = format!(r"\w\w{punct}*[.?!]+{ends}*\z");
    Regex::new(&pattern).unwrap_or_else(|e| panic!("sentence prefix regex: {e}"))
});

/// Matches when the text *starts* like a sentence: optional opening
/// quote/markdown followed by an uppercase letter.
static SENTENCE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    let starts = char_class(&format!("{MARKDOWN_SYMBOLS}{START_QUOTATION_MARKS}"));
    let pattern = format!(r"\A{starts}*[A-Z]");
    Regex::new(&pattern).unwrap_or_else(|e| panic!("sentence suffix regex: {e}"))
});

/// All ASCII punctuation characters.
fn ascii_punctuation() -> &'static str {
    r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##
}

/// The unit a range is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeUnit {
    /// Unicode scalar values of the NFC-normalized text.
    Chars,
    /// Word-or-punctuation runs.
    Words,
    /// Whitespace-separated tokens.
    Tokens,
    /// Sentences found by an English-centric boundary heuristic.
    Sentences,
}

impl RangeUnit {
    /// The wire name of the unit.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chars => "chars",
            Self::Words => "words",
            Self::Tokens => "tokens",
            Self::Sentences => "sentences",
        }
    }

    /// Split `text` into this unit's chunks.
    ///
    /// With `keep_fragments` set, a trailing sentence fragment is kept as its
    /// own chunk; otherwise it is dropped. The flag only affects sentences.
    pub fn chunk(self, text: &str, keep_fragments: bool) -> Chunks {
        match self {
            Self::Chars => Chunks::Chars(text.nfc().collect()),
            Self::Words => Chunks::Pieces(
                WORD_REGEX
                    .find_iter(text)
                    .map(|m| m.as_str().to_owned())
                    .collect(),
            ),
            Self::Tokens => {
                Chunks::Pieces(text.split_whitespace().map(str::to_owned).collect())
            }
            Self::Sentences => Chunks::Pieces(split_sentences(text, keep_fragments)),
        }
    }
}

impl Default for RangeUnit {
    fn default() -> Self {
        Self::Words
    }
}

impl fmt::Display for RangeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeUnit {
    type Err = FigmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chars" => Ok(Self::Chars),
            "words" => Ok(Self::Words),
            "tokens" => Ok(Self::Tokens),
            "sentences" => Ok(Self::Sentences),
            other => Err(FigmentError::RangeNotSatisfiable(format!(
                "unknown range unit `{other}`"
            ))),
        }
    }
}

/// The chunks of a text under some [`RangeUnit`].
///
/// Character chunking yields a normalized string whose length is its scalar
/// count; every other unit yields discrete pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunks {
    /// NFC-normalized text; each Unicode scalar is one chunk.
    Chars(String),
    /// Discrete chunk strings.
    Pieces(Vec<String>),
}

impl Chunks {
    /// Number of chunks.
    pub fn len(&self) -> usize {
        match self {
            Self::Chars(text) => text.chars().count(),
            Self::Pieces(pieces) => pieces.len(),
        }
    }

    /// Whether there are no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The chunk at `index`, as an owned string.
    pub fn get(&self, index: usize) -> Option<String> {
        match self {
            Self::Chars(text) => text.chars().nth(index).map(String::from),
            Self::Pieces(pieces) => pieces.get(index).cloned(),
        }
    }
}

/// A portion of a range, which may have a start and/or an end (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subrange {
    /// Inclusive start chunk index.
    pub start: Option<u64>,
    /// Inclusive end chunk index.
    pub end: Option<u64>,
}

/// A half-open `[start, stop)` view of a [`Subrange`].
///
/// `stop` is `end + 1` only when both bounds are present; a suffix range
/// (`-N`) keeps `stop == N` unconverted, matching the wire semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSlice {
    /// Start chunk index, unbounded when `None`.
    pub start: Option<u64>,
    /// Stop chunk index (exclusive), unbounded when `None`.
    pub stop: Option<u64>,
}

impl Subrange {
    /// Convert to a half-open slice.
    pub fn slice(&self) -> RangeSlice {
        RangeSlice {
            start: self.start,
            stop: match (self.start, self.end) {
                (Some(_), Some(end)) => Some(end + 1),
                (_, end) => end,
            },
        }
    }
}

/// A generation range: a unit plus an ordered list of subranges.
///
/// To request only the first word, use `words=0-0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Range {
    /// The unit the bounds are measured in.
    pub unit: RangeUnit,
    /// Ordered subranges with inclusive bounds.
    pub ranges: Vec<Subrange>,
}

impl Range {
    /// All subranges as half-open slices.
    pub fn slices(&self) -> Vec<RangeSlice> {
        self.ranges.iter().map(Subrange::slice).collect()
    }

    /// Whether this is a single subrange with both bounds present.
    pub fn is_finite(&self) -> bool {
        match self.ranges.as_slice() {
            [only] => only.start.is_some() && only.end.is_some(),
            _ => false,
        }
    }

    /// Trim any excess text outside the defined range.
    ///
    /// Only meaningful for a single-subrange range with a bounded end: when
    /// the chunk count exceeds the slice stop, the text is cut at the
    /// rightmost occurrence of the first out-of-range chunk, so the result
    /// terminates on a whole-chunk boundary.
    pub fn trim<'a>(&self, text: &'a str) -> &'a str {
        debug_assert_eq!(self.ranges.len(), 1);
        let Some(subrange) = self.ranges.first() else {
            return text;
        };
        let Some(stop) = subrange.slice().stop else {
            return text;
        };

        let chunks = self.unit.chunk(text, true);
        if (chunks.len() as u64) > stop {
            if let Some(boundary) = chunks.get(stop as usize) {
                if let Some(at) = text.rfind(boundary.as_str()) {
                    return &text[..at];
                }
            }
        }

        text
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.unit)?;
        for (i, subrange) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if let Some(start) = subrange.start {
                write!(f, "{start}")?;
            }
            f.write_str("-")?;
            if let Some(end) = subrange.end {
                write!(f, "{end}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for Range {
    type Err = FigmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FigmentError::RangeNotSatisfiable(format!("unable to parse range `{s}`"));

        let (unit, rest) = s.split_once('=').ok_or_else(invalid)?;
        let unit: RangeUnit = unit.parse()?;

        // A single leading comma directly after `=` is reserved and skipped.
        let rest = rest.strip_prefix(',').unwrap_or(rest);

        let mut ranges = Vec::new();
        for piece in rest.split(',') {
            let (start, end) = piece.split_once('-').ok_or_else(invalid)?;
            let start = parse_bound(start).map_err(|_| invalid())?;
            let end = parse_bound(end).map_err(|_| invalid())?;
            if start.is_none() && end.is_none() {
                return Err(invalid());
            }
            ranges.push(Subrange { start, end });
        }
        if ranges.is_empty() {
            return Err(invalid());
        }

        Ok(Range { unit, ranges })
    }
}

/// Parse one optional decimal bound. Only plain digit runs are accepted;
/// signs are not part of the grammar.
fn parse_bound(raw: &str) -> Result<Option<u64>, ()> {
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    raw.parse().map(Some).map_err(|_| ())
}

impl Serialize for Range {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Range {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Split text into sentences using the boundary heuristic.
///
/// A boundary is a whitespace run whose left context ends like a sentence and
/// whose right context starts like one. Interior whitespace runs within a
/// sentence are preserved; boundary runs are dropped. English-centric: the
/// right context must start with an (optionally quoted) uppercase ASCII
/// letter.
pub fn split_sentences(text: &str, keep_fragments: bool) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for separator in WHITESPACE_RUN.find_iter(text) {
        if SENTENCE_PREFIX.is_match(&text[..separator.start()])
            && SENTENCE_SUFFIX.is_match(&text[separator.end()..])
        {
            sentences.push(text[last..separator.start()].to_owned());
            last = separator.end();
        }
    }
    sentences.push(text[last..].to_owned());

    if !keep_fragments {
        // Re-test the last piece with a token that would begin a new
        // sentence; if no boundary appears, the piece is a fragment.
        if let Some(last_sentence) = sentences.last() {
            let probe = format!("{last_sentence} A");
            if split_sentences(&probe, true).len() == 1 {
                sentences.pop();
            }
        }
    }

    sentences
}

/// Compute the next subrange to request after `text`, of size at most
/// `chunk_size`, bounded by `max_length` total chunks.
///
/// Returns a zero-length subrange at the current offset when the text has
/// already reached `max_length`, and an empty range when it is past it.
pub fn compute_next_range(
    text: &str,
    unit: RangeUnit,
    max_length: u64,
    chunk_size: u64,
) -> Range {
    debug_assert!(chunk_size > 0);
    let text_len = unit.chunk(text, false).len() as u64;
    let mut ranges = Vec::new();

    if text_len < max_length {
        let remaining = max_length - text_len;
        let size = remaining.min(chunk_size);
        if size == remaining {
            ranges.push(Subrange {
                start: Some(text_len),
                end: Some(text_len + remaining - 1),
            });
        } else {
            ranges.push(Subrange {
                start: None,
                end: Some(size),
            });
        }
    } else if text_len == max_length {
        ranges.push(Subrange {
            start: Some(text_len),
            end: Some(text_len),
        });
    }

    Range { unit, ranges }
}

/// Compute the full range for a figment of `max_length` chunks.
pub fn compute_full_range(unit: RangeUnit, max_length: u64) -> Range {
    Range {
        unit,
        ranges: vec![Subrange {
            start: Some(0),
            end: Some(max_length.saturating_sub(1)),
        }],
    }
}
