//! Process-wide pipeline id allocation.
//!
//! Every pipeline instance holds a small integer id, unique across the
//! process for the lifetime of the pipeline value. Ids come from one
//! global lowest-free pool behind a single mutex; dropping the id hands
//! it back, so the lowest freed id is always reused first.

use std::fmt;
use std::sync::Mutex;

use crate::slots::SlotPool;

static PIPELINE_IDS: Mutex<SlotPool> = Mutex::new(SlotPool::unbounded());

/// Process-wide unique pipeline id, released on drop.
#[derive(Debug)]
pub struct PipelineId(usize);

impl PipelineId {
    pub(crate) fn acquire() -> Self {
        let mut pool = PIPELINE_IDS.lock().unwrap();
        // The pool is unbounded, so acquisition cannot fail.
        let id = pool.acquire().expect("unbounded pool");
        tracing::debug!("acquired pipeline id {}", id);
        Self(id)
    }

    /// Numeric value of the id.
    pub fn value(&self) -> usize {
        self.0
    }
}

impl Drop for PipelineId {
    fn drop(&mut self) {
        if let Ok(mut pool) = PIPELINE_IDS.lock() {
            pool.release(self.0);
            tracing::debug!("released pipeline id {}", self.0);
        }
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}
