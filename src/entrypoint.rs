//! Process start-up for the queue worker.
//!
//! The address-space ceiling goes in first; the processing routine only runs
//! once it is in place. Failures from either step are returned untouched so
//! `main` turns them into a non-zero exit status.

use anyhow::{Context, Result};

use crate::limits::{MemoryLimit, MemoryLimiter};

/// Install `limit` through `limiter`, then call `routine` exactly once.
pub fn run_with_memory_limit<L, F>(limiter: &L, limit: MemoryLimit, routine: F) -> Result<()>
where
    L: MemoryLimiter + ?Sized,
    F: FnOnce() -> Result<()>,
{
    limiter
        .install(limit)
        .context("failed to install the process memory limit")?;

    routine()
}
