//! Fact corpus loading and verbalization
//!
//! Each corpus line is a JSON array `["subject", "object"]`. A fact is
//! verbalized into the sentence `"<article> subject is <article> object"` and
//! tokenized once at construction time; the resulting examples are immutable
//! for the rest of the run.

use crate::model::TextTokenizer;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// One relational fact parsed from a corpus line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub subject: String,
    pub object: String,
}

impl Fact {
    /// Parse a single corpus line. Anything other than a two-element array of
    /// non-empty strings is a malformed line.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<String> =
            serde_json::from_str(line).context("corpus line is not a JSON string array")?;
        if parts.len() != 2 {
            bail!("corpus line has {} elements, expected 2", parts.len());
        }
        let mut parts = parts.into_iter();
        let subject = parts.next().unwrap_or_default();
        let object = parts.next().unwrap_or_default();
        if subject.is_empty() || object.is_empty() {
            bail!("corpus line contains an empty phrase");
        }
        Ok(Self { subject, object })
    }

    /// Render the fact as a natural-language sentence.
    pub fn verbalize(&self) -> String {
        format!(
            "{} is {}",
            with_article(&self.subject),
            with_article(&self.object)
        )
    }
}

/// Prefix a phrase with "an" if it starts with a lowercase vowel letter,
/// "a" otherwise. The check is case-sensitive against the literal set
/// {a,e,i,o,u}, matching the source corpus convention.
fn with_article(phrase: &str) -> String {
    let vowel = phrase.chars().next().is_some_and(|c| "aeiou".contains(c));
    if vowel {
        format!("an {phrase}")
    } else {
        format!("a {phrase}")
    }
}

/// One tokenized training example. Labels equal the input ids (same-sequence
/// language-modeling target) and the mask is all ones before padding.
#[derive(Debug, Clone)]
pub struct Example {
    pub input_ids: Vec<i64>,
    pub label_ids: Vec<i64>,
    pub attention_mask: Vec<u8>,
}

impl Example {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// In-memory fact dataset, read-only after construction.
pub struct FactDataset {
    examples: Vec<Example>,
}

/// Parse every non-blank line of a corpus file. Malformed lines are rejected
/// here with their line number, never deferred into training.
pub fn load_facts(path: &Path) -> Result<Vec<Fact>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read corpus: {}", path.display()))?;
    parse_facts(&text)
}

/// Parse newline-delimited corpus text into facts.
pub fn parse_facts(text: &str) -> Result<Vec<Fact>> {
    let mut facts = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        facts.push(Fact::parse(line).with_context(|| format!("corpus line {}", idx + 1))?);
    }
    Ok(facts)
}

impl FactDataset {
    /// Tokenize every fact once; the examples are immutable afterwards.
    pub fn from_facts(facts: &[Fact], tokenizer: &dyn TextTokenizer) -> Self {
        let examples = facts
            .iter()
            .map(|fact| {
                let input_ids = tokenizer.tokenize(&fact.verbalize());
                let attention_mask = vec![1u8; input_ids.len()];
                Example {
                    label_ids: input_ids.clone(),
                    input_ids,
                    attention_mask,
                }
            })
            .collect();
        Self { examples }
    }

    /// Load and tokenize the corpus from a newline-delimited UTF-8 file.
    pub fn from_file(path: &Path, tokenizer: &dyn TextTokenizer) -> Result<Self> {
        Ok(Self::from_facts(&load_facts(path)?, tokenizer))
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }
}
