//! Checkpoint persistence
//!
//! Layout: `<save_path>/models.<timestamp>/<save_name>.model.<timestamp>.checkpoint/`
//! holding both the model weights and the tokenizer state. The timestamp is
//! captured once at run start, so each epoch's save overwrites the same
//! checkpoint directory. Only rank 0 calls into this module.

use crate::model::{CausalLm, TextTokenizer};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Run start time formatted for directory names.
pub fn run_timestamp() -> String {
    Local::now().format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// Resolve the checkpoint directory for a run, creating it if needed.
pub fn checkpoint_dir(save_path: &Path, save_name: &str, timestamp: &str) -> Result<PathBuf> {
    let dir = save_path
        .join(format!("models.{timestamp}"))
        .join(format!("{save_name}.model.{timestamp}.checkpoint"));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create checkpoint directory: {}", dir.display()))?;
    Ok(dir)
}

/// Persist model and tokenizer into the run's checkpoint directory.
pub fn save(
    model: &dyn CausalLm,
    tokenizer: &dyn TextTokenizer,
    save_path: &Path,
    save_name: &str,
    timestamp: &str,
) -> Result<PathBuf> {
    let dir = checkpoint_dir(save_path, save_name, timestamp)?;
    model
        .save_pretrained(&dir)
        .with_context(|| format!("failed to save model to {}", dir.display()))?;
    tokenizer
        .save_pretrained(&dir)
        .with_context(|| format!("failed to save tokenizer to {}", dir.display()))?;
    Ok(dir)
}
