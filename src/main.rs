//! Fine-tune a causal language model on a relational-fact corpus
//!
//! # Usage
//!
//! ```bash
//! facttune \
//!   --model-id ./models/base \
//!   --data-path ./facts.jsonl \
//!   --save-name run1 \
//!   [--workers 4] \
//!   [--batch-size 20] \
//!   [--learning-rate 4e-5] \
//!   [--epochs 5] \
//!   [--log-interval 100] \
//!   [--save-log] [--save-model]
//! ```
//!
//! `--model-id` points at a model directory (`vocab.json` + optional
//! `weights.json`). If the directory has no vocabulary, one is fitted from the
//! corpus and the weights start from seeded random initialization.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use facttune::{
    config::TuneConfig,
    dataset::{load_facts, Fact, FactDataset},
    distributed::{LocalGroup, ProcessGroup, SingleProcess},
    model::TextTokenizer,
    provider::{BigramLm, WordTokenizer},
    train::Trainer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Fine-tune a causal language model on a relational-fact corpus
#[derive(Parser, Debug)]
#[command(name = "facttune")]
#[command(about = "Fine-tune a causal language model on a relational-fact corpus", long_about = None)]
struct Args {
    /// Random seed shared by all workers
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Pretrained model directory
    #[arg(long, value_name = "PATH", required = true)]
    model_id: String,

    /// Training corpus, one JSON array per line
    #[arg(long, value_name = "PATH", required = true)]
    data_path: PathBuf,

    /// Batch size per worker
    #[arg(long, default_value = "20")]
    batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value = "4e-5")]
    learning_rate: f32,

    /// Directory checkpoints are written under
    #[arg(long, value_name = "PATH", default_value = "checkpoints")]
    save_path: PathBuf,

    /// Directory scalar logs are written under
    #[arg(long, value_name = "PATH", default_value = "log")]
    log_path: PathBuf,

    /// Run name used in checkpoint and log directory names
    #[arg(long, required = true)]
    save_name: String,

    /// Number of passes over the corpus
    #[arg(long, default_value = "5")]
    epochs: usize,

    /// Steps between metric lines
    #[arg(long, default_value = "100")]
    log_interval: usize,

    /// Persist the scalar stream to disk
    #[arg(long)]
    save_log: bool,

    /// Persist model and tokenizer after each epoch
    #[arg(long)]
    save_model: bool,

    /// Number of data-parallel workers (in-process)
    #[arg(long, default_value = "1")]
    workers: usize,
}

impl Args {
    fn into_config(self) -> TuneConfig {
        TuneConfig {
            seed: self.seed,
            model_id: self.model_id,
            data_path: self.data_path,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            save_path: self.save_path,
            log_path: self.log_path,
            save_name: self.save_name,
            epochs: self.epochs,
            log_interval: self.log_interval,
            save_log: self.save_log,
            save_model: self.save_model,
            world_size: self.workers,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();
    config.validate().context("invalid launch configuration")?;
    run(config)
}

fn run(config: TuneConfig) -> Result<()> {
    let facts = load_facts(&config.data_path)?;
    let tokenizer = Arc::new(load_or_fit_tokenizer(&config, &facts)?);
    let dataset = Arc::new(FactDataset::from_facts(&facts, tokenizer.as_ref()));
    tracing::info!(
        facts = dataset.len(),
        vocab = tokenizer.vocab_size(),
        world_size = config.world_size,
        "corpus loaded"
    );

    if config.world_size == 1 {
        return worker(SingleProcess, dataset, tokenizer, Arc::new(config));
    }

    // one thread per rank; collectives run through the shared in-process group
    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(config.world_size);
    for group in LocalGroup::spawn(config.world_size)? {
        let dataset = Arc::clone(&dataset);
        let tokenizer = Arc::clone(&tokenizer);
        let config = Arc::clone(&config);
        let rank = group.rank();
        let handle = thread::Builder::new()
            .name(format!("worker-{rank}"))
            .spawn(move || worker(group, dataset, tokenizer, config))
            .with_context(|| format!("failed to spawn worker {rank}"))?;
        handles.push((rank, handle));
    }
    for (rank, handle) in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker {rank} panicked"))?
            .with_context(|| format!("worker {rank} failed"))?;
    }
    Ok(())
}

/// Load the tokenizer from the model directory, or fit a fresh vocabulary
/// from the corpus when none exists yet.
fn load_or_fit_tokenizer(config: &TuneConfig, facts: &[Fact]) -> Result<WordTokenizer> {
    let model_dir = PathBuf::from(&config.model_id);
    if model_dir.join("vocab.json").exists() {
        WordTokenizer::from_directory(&model_dir)
            .with_context(|| format!("failed to load tokenizer from {}", model_dir.display()))
    } else {
        tracing::warn!(
            model_id = %config.model_id,
            "no vocabulary found, fitting one from the corpus"
        );
        let sentences: Vec<String> = facts.iter().map(Fact::verbalize).collect();
        Ok(WordTokenizer::fit(&sentences))
    }
}

fn worker<G: ProcessGroup>(
    group: G,
    dataset: Arc<FactDataset>,
    tokenizer: Arc<WordTokenizer>,
    config: Arc<TuneConfig>,
) -> Result<()> {
    let rank = group.rank();
    tracing::info!(rank, world_size = group.world_size(), "worker starting");

    // every rank loads its own replica; INIT's broadcast makes them identical
    let model_dir = PathBuf::from(&config.model_id);
    let model = BigramLm::from_directory(
        &model_dir,
        tokenizer.vocab_size(),
        tokenizer.pad_id(),
        config.seed,
    )
    .with_context(|| format!("failed to load model from {}", model_dir.display()))?;

    let mut trainer = Trainer::new(model, group, config.learning_rate);
    trainer.run(&dataset, tokenizer.as_ref(), &config)
}
