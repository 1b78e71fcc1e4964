//! Distributed fine-tuning orchestrator
//!
//! Per-worker state machine: INIT (parameter broadcast from rank 0), then per
//! epoch SET_EPOCH, per step FORWARD / BACKWARD / SYNC / STEP, an optional
//! rank-0 CHECKPOINT, and DONE. Replicas start identical via the one-time
//! broadcast and stay identical because every step applies the same averaged
//! gradient; buffers are never re-broadcast afterwards.
//!
//! Gradients are averaged across ranks *before* the finite check, so an
//! overflow on any rank poisons the averaged gradient everywhere and all
//! replicas skip the same step.

use crate::checkpoint;
use crate::config::TuneConfig;
use crate::dataloader::{epoch_batches, PaddedBatch, PartitionedSampler};
use crate::dataset::FactDataset;
use crate::distributed::ProcessGroup;
use crate::metrics::{MetricsLogger, ScalarWriter};
use crate::model::{CausalLm, TextTokenizer};
use crate::optimizer::{Adam, AdamConfig};
use crate::scaler::GradScaler;
use anyhow::{bail, Context, Result};

/// Rank whose side effects (checkpoints, metrics) are the job's only writes.
const WRITER_RANK: usize = 0;

/// Mutable training state for one worker: model replica, optimizer, loss
/// scaler and step counter. Lives from INIT to DONE.
pub struct Trainer<M: CausalLm, G: ProcessGroup> {
    model: M,
    group: G,
    optimizer: Adam,
    scaler: GradScaler,
    step: usize,
}

/// Outcome of one optimization step.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub loss: f32,
    /// True when the update was skipped because the synchronized gradients
    /// contained a non-finite value.
    pub skipped: bool,
}

impl<M: CausalLm, G: ProcessGroup> Trainer<M, G> {
    pub fn new(model: M, group: G, learning_rate: f32) -> Self {
        let optimizer = Adam::new(model.parameters().len(), AdamConfig::with_lr(learning_rate));
        Self {
            model,
            group,
            optimizer,
            scaler: GradScaler::new(),
            step: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.group.rank()
    }

    /// Invariant: only this rank writes checkpoints and metrics.
    fn is_writer(&self) -> bool {
        self.group.rank() == WRITER_RANK
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    /// INIT: replicate rank 0's parameters to every worker. After this point
    /// replicas are kept in sync only by gradient averaging.
    pub fn replicate_initial_parameters(&mut self) -> Result<()> {
        self.group
            .broadcast(self.model.parameters_mut(), WRITER_RANK)
            .context("initial parameter broadcast failed")
    }

    /// One FORWARD / BACKWARD / SYNC / STEP cycle over a collated batch.
    pub fn train_step(&mut self, batch: &PaddedBatch) -> Result<StepOutcome> {
        self.step += 1;
        self.model.zero_grad();

        // FORWARD under the provider's reduced-precision convention
        let loss = self.model.forward(batch).context("forward pass failed")?;

        // BACKWARD with the dynamic loss scale
        self.model
            .backward(self.scaler.loss_scale())
            .context("backward pass failed")?;

        // SYNC: every replica ends up with the identical averaged gradient
        self.group
            .all_reduce_mean(self.model.gradients_mut())
            .context("gradient all-reduce failed")?;

        // STEP, unless the scaled gradients overflowed; the skip is not an
        // error and the scale backs off for the next step
        let found_inf = self.scaler.unscale(self.model.gradients_mut());
        if !found_inf {
            let grads = self.model.gradients().to_vec();
            self.optimizer.step(self.model.parameters_mut(), &grads)?;
        }
        self.scaler.update(found_inf);

        Ok(StepOutcome {
            loss,
            skipped: found_inf,
        })
    }

    /// SYNC/STEP with a zero local contribution. Ranks whose partition yields
    /// fewer batches than the largest rank run this so every rank makes the
    /// same number of collective calls per epoch and replicas keep applying
    /// identical updates.
    fn idle_step(&mut self) -> Result<()> {
        self.model.zero_grad();
        self.group
            .all_reduce_mean(self.model.gradients_mut())
            .context("gradient all-reduce failed")?;
        let found_inf = self.scaler.unscale(self.model.gradients_mut());
        if !found_inf {
            let grads = self.model.gradients().to_vec();
            self.optimizer.step(self.model.parameters_mut(), &grads)?;
        }
        self.scaler.update(found_inf);
        Ok(())
    }

    /// Drive the full epoch/step loop to completion.
    pub fn run(
        &mut self,
        dataset: &FactDataset,
        tokenizer: &dyn TextTokenizer,
        config: &TuneConfig,
    ) -> Result<()> {
        if dataset.is_empty() {
            bail!("training corpus is empty");
        }

        self.replicate_initial_parameters()?;

        let mut sampler = PartitionedSampler::new(
            dataset.len(),
            self.group.world_size(),
            self.group.rank(),
            config.seed,
        )?;

        let timestamp = checkpoint::run_timestamp();
        let mut logger = if self.is_writer() {
            let writer = if config.save_log {
                let writer =
                    ScalarWriter::create(&config.log_path, &config.save_name, &timestamp)?;
                tracing::info!(dir = %writer.dir().display(), "scalar stream opened");
                Some(writer)
            } else {
                None
            };
            Some(MetricsLogger::new(config.log_interval, writer))
        } else {
            None
        };

        for epoch in 0..config.epochs {
            // SET_EPOCH must precede iteration, or every epoch would silently
            // reuse epoch 0's permutation
            sampler.set_epoch(epoch as u64);

            let batches = epoch_batches(dataset, &sampler, config.batch_size)?;
            let max_batches = sampler.max_local_len().div_ceil(config.batch_size);
            let idle_steps = max_batches - batches.len();

            for batch in &batches {
                let outcome = self.train_step(batch)?;
                if let Some(logger) = logger.as_mut() {
                    logger.log_step(self.step, outcome.loss, self.scaler_scale())?;
                }
            }
            // exact partitions can leave short ranks one batch behind
            for _ in 0..idle_steps {
                self.idle_step()?;
            }

            // CHECKPOINT?: rank 0 persists, everyone meets at the epoch barrier
            if self.is_writer() && config.save_model {
                let dir = checkpoint::save(
                    &self.model,
                    tokenizer,
                    &config.save_path,
                    &config.save_name,
                    &timestamp,
                )?;
                tracing::info!(epoch, dir = %dir.display(), "checkpoint saved");
            }
            self.group.barrier()?;
        }

        if self.is_writer() {
            let elapsed = logger
                .as_ref()
                .map(|l| l.elapsed())
                .unwrap_or_else(|| "0:00:00".to_string());
            println!();
            println!("Training complete!");
            println!("Total training took {elapsed} (h:mm:ss)");
        }
        Ok(())
    }

    pub fn scaler_scale(&self) -> f32 {
        self.scaler.loss_scale()
    }
}
