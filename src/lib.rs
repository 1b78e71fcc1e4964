//! Distributed fine-tuning of a causal language model on a relational-fact corpus.
//!
//! The corpus is newline-delimited JSON arrays `["subject", "object"]`. Each fact
//! is verbalized into a natural-language sentence, tokenized, partitioned across
//! workers per epoch, collated into padded batches, and fed through a
//! data-parallel training loop with dynamic loss scaling. Only rank 0 writes
//! checkpoints and metrics.

pub mod checkpoint;
pub mod config;
pub mod dataloader;
pub mod dataset;
pub mod distributed;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod provider;
pub mod scaler;
pub mod train;
