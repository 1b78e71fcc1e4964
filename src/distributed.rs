//! Collective communication between data-parallel workers
//!
//! Every collective is a synchronous barrier: all ranks must call it together
//! and each blocks until the last rank arrives. A rank that never arrives
//! hangs the job; there is no elastic recovery.
//!
//! [`LocalGroup`] runs the whole world inside one process with one thread per
//! rank. It doubles as the launcher for `--workers N` and as a deterministic
//! test double for the gradient-averaging math.

use anyhow::{bail, Result};
use std::sync::{Arc, Barrier, Mutex};

/// Capability set of a process group, mirroring the usual all-reduce/broadcast
/// collectives over flat f32 buffers.
pub trait ProcessGroup: Send {
    fn world_size(&self) -> usize;
    fn rank(&self) -> usize;

    /// Element-wise mean of `buffer` across all ranks, written back in place
    /// on every rank.
    fn all_reduce_mean(&self, buffer: &mut [f32]) -> Result<()>;

    /// Copy `buffer` from `root` into every rank's buffer.
    fn broadcast(&self, buffer: &mut [f32], root: usize) -> Result<()>;

    /// Block until every rank has arrived.
    fn barrier(&self) -> Result<()>;
}

/// Trivial group for single-worker runs; every collective is a no-op.
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn world_size(&self) -> usize {
        1
    }

    fn rank(&self) -> usize {
        0
    }

    fn all_reduce_mean(&self, _buffer: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _buffer: &mut [f32], _root: usize) -> Result<()> {
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

struct ReduceState {
    sum: Vec<f32>,
    contributed: usize,
    read: usize,
}

struct GroupShared {
    barrier: Barrier,
    state: Mutex<ReduceState>,
}

/// In-process group: one member handle per rank, all backed by the same
/// shared accumulation buffer and barrier.
pub struct LocalGroup {
    world_size: usize,
    rank: usize,
    shared: Arc<GroupShared>,
}

impl LocalGroup {
    /// Create handles for a world of `world_size` ranks. Each handle is moved
    /// into its worker thread.
    pub fn spawn(world_size: usize) -> Result<Vec<LocalGroup>> {
        if world_size == 0 {
            bail!("world_size must be at least 1");
        }
        let shared = Arc::new(GroupShared {
            barrier: Barrier::new(world_size),
            state: Mutex::new(ReduceState {
                sum: Vec::new(),
                contributed: 0,
                read: 0,
            }),
        });
        Ok((0..world_size)
            .map(|rank| LocalGroup {
                world_size,
                rank,
                shared: Arc::clone(&shared),
            })
            .collect())
    }

    /// Two-phase exchange: every rank writes under the lock, waits, then reads
    /// the combined result. The last reader resets the shared state, and the
    /// trailing barrier keeps the next collective from starting before that.
    fn exchange<W, R>(&self, write: W, read: R) -> Result<()>
    where
        W: FnOnce(&mut ReduceState),
        R: FnOnce(&ReduceState),
    {
        {
            let mut state = self
                .shared
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("process group lock poisoned"))?;
            write(&mut state);
            state.contributed += 1;
        }
        self.shared.barrier.wait();
        {
            let mut state = self
                .shared
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("process group lock poisoned"))?;
            read(&state);
            state.read += 1;
            if state.read == self.world_size {
                state.sum.clear();
                state.contributed = 0;
                state.read = 0;
            }
        }
        self.shared.barrier.wait();
        Ok(())
    }
}

impl ProcessGroup for LocalGroup {
    fn world_size(&self) -> usize {
        self.world_size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_mean(&self, buffer: &mut [f32]) -> Result<()> {
        let len = buffer.len();
        let world = self.world_size as f32;
        let local: Vec<f32> = buffer.to_vec();
        self.exchange(
            |state| {
                if state.contributed == 0 {
                    state.sum = vec![0.0; len];
                }
                debug_assert_eq!(state.sum.len(), len, "mismatched all_reduce buffer sizes");
                for (acc, value) in state.sum.iter_mut().zip(&local) {
                    *acc += value;
                }
            },
            |state| {
                for (dst, acc) in buffer.iter_mut().zip(&state.sum) {
                    *dst = acc / world;
                }
            },
        )
    }

    fn broadcast(&self, buffer: &mut [f32], root: usize) -> Result<()> {
        if root >= self.world_size {
            bail!("broadcast root {} out of range", root);
        }
        let is_root = self.rank == root;
        let local: Vec<f32> = if is_root { buffer.to_vec() } else { Vec::new() };
        self.exchange(
            |state| {
                if is_root {
                    state.sum = local.clone();
                }
            },
            |state| {
                if !is_root {
                    buffer.copy_from_slice(&state.sum);
                }
            },
        )
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait();
        Ok(())
    }
}
