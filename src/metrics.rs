//! Training metrics: rank-0 console lines and an append-only scalar stream
//!
//! Only the designated writer rank constructs these; every other rank holds
//! nothing and performs no I/O.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One scalar sample keyed by step number.
#[derive(Debug, Serialize)]
pub struct Scalar<'a> {
    pub step: usize,
    pub key: &'a str,
    pub value: f32,
}

/// Append-only JSONL scalar sink under `<log_path>/<save_name>.<timestamp>/`.
pub struct ScalarWriter {
    file: File,
    dir: PathBuf,
}

impl ScalarWriter {
    pub fn create(log_path: &Path, save_name: &str, timestamp: &str) -> Result<Self> {
        let dir = log_path.join(format!("{save_name}.{timestamp}"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
        let path = dir.join("scalars.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open scalar stream: {}", path.display()))?;
        Ok(Self { file, dir })
    }

    pub fn add_scalar(&mut self, key: &str, value: f32, step: usize) -> Result<()> {
        let line = serde_json::to_string(&Scalar { step, key, value })?;
        writeln!(self.file, "{line}").context("failed to append scalar")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Step-interval console logger with a fixed-width loss line.
pub struct MetricsLogger {
    log_interval: usize,
    started: Instant,
    writer: Option<ScalarWriter>,
}

impl MetricsLogger {
    pub fn new(log_interval: usize, writer: Option<ScalarWriter>) -> Self {
        Self {
            log_interval,
            started: Instant::now(),
            writer,
        }
    }

    /// Record one step's loss; prints and appends only on interval steps.
    pub fn log_step(&mut self, step: usize, loss: f32, grad_scale: f32) -> Result<()> {
        if step % self.log_interval != 0 {
            return Ok(());
        }
        let elapsed = format_elapsed(self.started.elapsed().as_secs());
        println!("  steps {step:>5}.  Loss: {loss:>8.4}. Elapsed: {elapsed}");
        if let Some(writer) = self.writer.as_mut() {
            writer.add_scalar("train/loss", loss, step)?;
            writer.add_scalar("train/grad_scale", grad_scale, step)?;
        }
        Ok(())
    }

    pub fn elapsed(&self) -> String {
        format_elapsed(self.started.elapsed().as_secs())
    }
}

/// Whole seconds as `h:mm:ss`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0:00:00");
        assert_eq!(format_elapsed(61), "0:01:01");
        assert_eq!(format_elapsed(3600 * 2 + 60 * 3 + 4), "2:03:04");
    }
}
