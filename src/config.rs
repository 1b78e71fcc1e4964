//! Launch configuration for a fine-tuning run
//!
//! All parameters are validated before any worker starts; a missing required
//! name or path is a configuration error and fatal at startup.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hyperparameters and paths for one fine-tuning run.
///
/// Built once from the launch flags and shared read-only across all workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuneConfig {
    /// Random seed (shared by all ranks so epoch permutations agree)
    pub seed: u64,
    /// Identifier of the pretrained model/tokenizer to load
    pub model_id: String,
    /// Path to the fact corpus (one JSON array per line)
    pub data_path: PathBuf,
    /// Batch size per worker
    pub batch_size: usize,
    /// Learning rate for Adam
    pub learning_rate: f32,
    /// Directory checkpoints are written under
    pub save_path: PathBuf,
    /// Directory scalar logs are written under
    pub log_path: PathBuf,
    /// Run name, used in checkpoint and log directory names
    pub save_name: String,
    /// Number of passes over the corpus
    pub epochs: usize,
    /// Steps between metric lines on rank 0
    pub log_interval: usize,
    /// Write the scalar stream to disk (rank 0 only)
    pub save_log: bool,
    /// Persist model and tokenizer after each epoch (rank 0 only)
    pub save_model: bool,
    /// Number of data-parallel workers
    pub world_size: usize,
}

impl TuneConfig {
    /// Reject configurations that must not reach INIT.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.is_empty() {
            bail!("model_id must not be empty");
        }
        if self.save_name.is_empty() {
            bail!("save_name must not be empty");
        }
        if self.data_path.as_os_str().is_empty() {
            bail!("data_path must not be empty");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if self.log_interval == 0 {
            bail!("log_interval must be at least 1");
        }
        if self.world_size == 0 {
            bail!("world_size must be at least 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        Ok(())
    }
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            model_id: String::new(),
            data_path: PathBuf::new(),
            batch_size: 20,
            learning_rate: 4e-5,
            save_path: PathBuf::from("checkpoints"),
            log_path: PathBuf::from("log"),
            save_name: String::new(),
            epochs: 5,
            log_interval: 100,
            save_log: false,
            save_model: false,
            world_size: 1,
        }
    }
}
