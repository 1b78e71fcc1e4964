//! Collaborator interfaces for the pretrained model and tokenizer
//!
//! The tensor/autograd runtime behind the model is out of scope here; the
//! training loop only needs a forward/backward contract plus flat views of the
//! parameters and gradients so it can average, unscale and update them without
//! knowing the architecture.

use crate::dataloader::PaddedBatch;
use anyhow::Result;
use std::path::Path;

/// Position sentinel excluded from the loss and replaced by the pad id before
/// embedding lookup.
pub const IGNORE_INDEX: i64 = -100;

/// Tokenizer capability set: text to ids, the pad id substituted for
/// [`IGNORE_INDEX`] input positions, and on-disk persistence.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<i64>;
    fn pad_id(&self) -> i64;
    fn save_pretrained(&self, dir: &Path) -> Result<()>;
}

/// A trainable causal language model.
///
/// `forward` computes the mean language-modeling loss over a collated batch,
/// ignoring positions whose label is [`IGNORE_INDEX`], and caches whatever the
/// backward pass needs. `backward(scale)` accumulates `scale *
/// d(loss)/d(param)` into the gradient buffer; the scale factor is how the
/// loss-scaler injects itself without the model knowing about mixed precision.
pub trait CausalLm: Send {
    fn forward(&mut self, batch: &PaddedBatch) -> Result<f32>;
    fn backward(&mut self, scale: f32) -> Result<()>;

    /// Flat parameter vector, identical layout on every replica.
    fn parameters(&self) -> &[f32];
    fn parameters_mut(&mut self) -> &mut [f32];

    /// Flat gradient vector, same layout as the parameters.
    fn gradients(&self) -> &[f32];
    fn gradients_mut(&mut self) -> &mut [f32];

    fn zero_grad(&mut self);

    /// Persist the model weights into `dir`.
    fn save_pretrained(&self, dir: &Path) -> Result<()>;
}
