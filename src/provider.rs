//! Reference model/tokenizer provider
//!
//! A minimal concrete implementation of the [`crate::model`] collaborator
//! traits so the binary runs end to end: a whitespace word-level tokenizer and
//! a bigram language model with an analytic softmax/cross-entropy backward
//! pass. The forward pass rounds logits through f16, the reduced-precision
//! convention the loss scaler exists for.
//!
//! On-disk layout of a model directory: `vocab.json` (word -> id map) and
//! `weights.json` (flat logit table). A directory with a vocabulary but no
//! weights loads with seeded random initialization.

use crate::dataloader::PaddedBatch;
use crate::model::{CausalLm, TextTokenizer, IGNORE_INDEX};
use anyhow::{bail, Context, Result};
use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const PAD_TOKEN: &str = "<pad>";
pub const UNK_TOKEN: &str = "<unk>";

const VOCAB_FILE: &str = "vocab.json";
const WEIGHTS_FILE: &str = "weights.json";

/// Whitespace word-level tokenizer with a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    vocab: HashMap<String, i64>,
    pad_id: i64,
    unk_id: i64,
}

impl WordTokenizer {
    /// Build a vocabulary from sentences, assigning ids in first-appearance
    /// order; the pad and unk entries are appended last.
    pub fn fit<S: AsRef<str>>(sentences: &[S]) -> Self {
        let mut vocab: HashMap<String, i64> = HashMap::new();
        for sentence in sentences {
            for word in sentence.as_ref().split_whitespace() {
                let next_id = vocab.len() as i64;
                vocab.entry(word.to_string()).or_insert(next_id);
            }
        }
        let pad_id = vocab.len() as i64;
        vocab.insert(PAD_TOKEN.to_string(), pad_id);
        let unk_id = vocab.len() as i64;
        vocab.insert(UNK_TOKEN.to_string(), unk_id);
        Self {
            vocab,
            pad_id,
            unk_id,
        }
    }

    /// Load `vocab.json` from a model directory.
    pub fn from_directory(dir: &Path) -> Result<Self> {
        let path = dir.join(VOCAB_FILE);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read vocabulary: {}", path.display()))?;
        let vocab: HashMap<String, i64> =
            serde_json::from_str(&text).context("vocabulary file is not a word -> id map")?;
        let pad_id = match vocab.get(PAD_TOKEN) {
            Some(&id) => id,
            None => bail!("vocabulary has no {PAD_TOKEN} entry"),
        };
        let unk_id = match vocab.get(UNK_TOKEN) {
            Some(&id) => id,
            None => bail!("vocabulary has no {UNK_TOKEN} entry"),
        };
        Ok(Self {
            vocab,
            pad_id,
            unk_id,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

impl TextTokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<i64> {
        text.split_whitespace()
            .map(|word| self.vocab.get(word).copied().unwrap_or(self.unk_id))
            .collect()
    }

    fn pad_id(&self) -> i64 {
        self.pad_id
    }

    fn save_pretrained(&self, dir: &Path) -> Result<()> {
        let path = dir.join(VOCAB_FILE);
        let text = serde_json::to_string_pretty(&self.vocab)?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write vocabulary: {}", path.display()))
    }
}

#[derive(Serialize, Deserialize)]
struct WeightsFile {
    vocab_size: usize,
    weights: Vec<f32>,
}

struct PositionCache {
    current: usize,
    target: usize,
    probs: Vec<f32>,
}

/// Bigram causal language model: one logit row per current token, next-token
/// cross-entropy with [`IGNORE_INDEX`] positions excluded from the loss.
pub struct BigramLm {
    vocab_size: usize,
    pad_id: i64,
    params: Vec<f32>,
    grads: Vec<f32>,
    cache: Vec<PositionCache>,
}

impl BigramLm {
    /// Fresh model with small seeded uniform initialization.
    pub fn new(vocab_size: usize, pad_id: i64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let params = (0..vocab_size * vocab_size)
            .map(|_| rng.gen_range(-0.02..0.02))
            .collect();
        Self {
            vocab_size,
            pad_id,
            params,
            grads: vec![0.0; vocab_size * vocab_size],
            cache: Vec::new(),
        }
    }

    /// Load `weights.json` from a model directory, or fall back to seeded
    /// initialization when only the vocabulary exists.
    pub fn from_directory(dir: &Path, vocab_size: usize, pad_id: i64, seed: u64) -> Result<Self> {
        let path = dir.join(WEIGHTS_FILE);
        if !path.exists() {
            return Ok(Self::new(vocab_size, pad_id, seed));
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read weights: {}", path.display()))?;
        let file: WeightsFile = serde_json::from_str(&text).context("malformed weights file")?;
        if file.vocab_size != vocab_size {
            bail!(
                "weights are for vocab size {}, tokenizer has {}",
                file.vocab_size,
                vocab_size
            );
        }
        if file.weights.len() != vocab_size * vocab_size {
            bail!(
                "weights file has {} values, expected {}",
                file.weights.len(),
                vocab_size * vocab_size
            );
        }
        Ok(Self {
            vocab_size,
            pad_id,
            params: file.weights,
            grads: vec![0.0; vocab_size * vocab_size],
            cache: Vec::new(),
        })
    }

    fn token_index(&self, id: i64) -> Result<usize> {
        let id = if id == IGNORE_INDEX { self.pad_id } else { id };
        if id < 0 || id as usize >= self.vocab_size {
            bail!("token id {} out of range for vocab size {}", id, self.vocab_size);
        }
        Ok(id as usize)
    }

    /// Softmax over one logit row, each logit rounded through f16 first.
    fn row_probs(&self, current: usize) -> Vec<f32> {
        let row = &self.params[current * self.vocab_size..(current + 1) * self.vocab_size];
        let logits: Vec<f32> = row
            .iter()
            .map(|&w| f16::from_f32(w).to_f32())
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }
}

impl CausalLm for BigramLm {
    fn forward(&mut self, batch: &PaddedBatch) -> Result<f32> {
        self.cache.clear();
        let mut loss = 0.0f32;
        for (row, labels) in batch.input_ids.iter().zip(&batch.label_ids) {
            for t in 0..batch.seq_len.saturating_sub(1) {
                let target = labels[t + 1];
                if target == IGNORE_INDEX {
                    continue;
                }
                let current = self.token_index(row[t])?;
                let target = self.token_index(target)?;
                let probs = self.row_probs(current);
                loss -= probs[target].max(f32::MIN_POSITIVE).ln();
                self.cache.push(PositionCache {
                    current,
                    target,
                    probs,
                });
            }
        }
        if self.cache.is_empty() {
            return Ok(0.0);
        }
        Ok(loss / self.cache.len() as f32)
    }

    fn backward(&mut self, scale: f32) -> Result<()> {
        if self.cache.is_empty() {
            bail!("backward called before forward");
        }
        let count = self.cache.len() as f32;
        for position in &self.cache {
            let offset = position.current * self.vocab_size;
            for (k, &p) in position.probs.iter().enumerate() {
                let indicator = if k == position.target { 1.0 } else { 0.0 };
                self.grads[offset + k] += scale * (p - indicator) / count;
            }
        }
        self.cache.clear();
        Ok(())
    }

    fn parameters(&self) -> &[f32] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn gradients(&self) -> &[f32] {
        &self.grads
    }

    fn gradients_mut(&mut self) -> &mut [f32] {
        &mut self.grads
    }

    fn zero_grad(&mut self) {
        self.grads.fill(0.0);
    }

    fn save_pretrained(&self, dir: &Path) -> Result<()> {
        let file = WeightsFile {
            vocab_size: self.vocab_size,
            weights: self.params.clone(),
        };
        let path = dir.join(WEIGHTS_FILE);
        let text = serde_json::to_string(&file)?;
        fs::write(&path, text)
            .with_context(|| format!("failed to write weights: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_assigns_ids_in_appearance_order() {
        let tokenizer = WordTokenizer::fit(&["an apple is a fruit"]);
        assert_eq!(tokenizer.tokenize("an apple is a fruit"), vec![0, 1, 2, 3, 4]);
        // duplicates reuse the first id
        assert_eq!(tokenizer.tokenize("apple apple"), vec![1, 1]);
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let tokenizer = WordTokenizer::fit(&["a b"]);
        let ids = tokenizer.tokenize("a zzz");
        assert_eq!(ids[0], 0);
        assert_eq!(ids[1], tokenizer.vocab.get(UNK_TOKEN).copied().unwrap());
    }

    #[test]
    fn test_forward_ignores_sentinel_targets() {
        let tokenizer = WordTokenizer::fit(&["a b c"]);
        let mut model = BigramLm::new(tokenizer.vocab_size(), tokenizer.pad_id(), 1);
        let batch = PaddedBatch {
            input_ids: vec![vec![0, 1, 2], vec![0, 1, IGNORE_INDEX]],
            label_ids: vec![vec![0, 1, 2], vec![0, 1, IGNORE_INDEX]],
            attention_mask: vec![vec![1, 1, 1], vec![1, 1, 0]],
            lens: vec![3, 2],
            seq_len: 3,
        };
        let loss = model.forward(&batch).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        // 2 targets in the first row, 1 in the second
        assert_eq!(model.cache.len(), 3);
    }

    #[test]
    fn test_backward_reduces_loss() {
        let tokenizer = WordTokenizer::fit(&["a b a b a b"]);
        let mut model = BigramLm::new(tokenizer.vocab_size(), tokenizer.pad_id(), 1);
        let ids = tokenizer.tokenize("a b a b a b");
        let batch = PaddedBatch {
            input_ids: vec![ids.clone()],
            label_ids: vec![ids.clone()],
            attention_mask: vec![vec![1; ids.len()]],
            lens: vec![ids.len()],
            seq_len: ids.len(),
        };
        let before = model.forward(&batch).unwrap();
        model.backward(1.0).unwrap();
        let lr = 0.5;
        let grads = model.gradients().to_vec();
        for (p, g) in model.parameters_mut().iter_mut().zip(&grads) {
            *p -= lr * g;
        }
        model.zero_grad();
        let after = model.forward(&batch).unwrap();
        assert!(after < before, "loss should drop: {before} -> {after}");
    }
}
