//! Cluster-wide child-thread index synchronization
//!
//! Application code on different nodes may spawn a different number of
//! child threads between two checkpoints (platform-dependent branches,
//! device availability). Child threads get their identity from a per-parent
//! [`ChildIndexCounter`], and that identity must match across nodes: a
//! child may itself open a [`MulticastPipe`](crate::MulticastPipe), and
//! those must correspond 1:1 cluster-wide.
//!
//! A [`ThreadSynchronizer`] is a scoped guard around a code region that may
//! spawn unevenly. At every checkpoint it gathers the per-node spawn count
//! with a `Max` reduction and pads each node's counter up to the busiest
//! node, so the next child created anywhere receives the same index.

use crate::error::Result;
use crate::multiplexer::{GatherOp, Multiplexer};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Monotonic child-index source for one parent thread
#[derive(Debug, Default)]
pub struct ChildIndexCounter {
    next: AtomicU32,
}

impl ChildIndexCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next spawned child will receive
    pub fn get_next_child_index(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    /// Claim an index for a child being spawned now
    pub fn allocate_child_index(&self) -> u32 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Skip `delta` indices to match nodes that spawned more children
    pub fn advance(&self, delta: u32) {
        self.next.fetch_add(delta, Ordering::SeqCst);
    }
}

/// Scoped checkpoint guard for child-thread index consistency
///
/// Dropping the guard performs a final checkpoint; [`sync`](Self::sync) may
/// be called any number of times before that to checkpoint intermediate
/// intervals. With no multiplexer (a single-node run) every operation is a
/// no-op.
pub struct ThreadSynchronizer<'a> {
    mux: Option<Arc<dyn Multiplexer>>,
    counter: &'a ChildIndexCounter,
    start_child_index: u32,
}

impl<'a> ThreadSynchronizer<'a> {
    pub fn new(mux: Option<Arc<dyn Multiplexer>>, counter: &'a ChildIndexCounter) -> Self {
        Self {
            mux,
            counter,
            start_child_index: counter.get_next_child_index(),
        }
    }

    /// Checkpoint now and start a fresh interval.
    ///
    /// On return, every node's counter has advanced by the cluster-wide
    /// maximum number of children spawned since the last checkpoint.
    pub fn sync(&mut self) -> Result<()> {
        self.checkpoint()?;
        self.start_child_index = self.counter.get_next_child_index();
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        let Some(mux) = &self.mux else {
            return Ok(());
        };
        let spawned = self.counter.get_next_child_index() - self.start_child_index;
        let max_spawned = mux.gather(spawned, GatherOp::Max)?;
        self.counter.advance(max_spawned - spawned);
        Ok(())
    }
}

impl Drop for ThreadSynchronizer<'_> {
    fn drop(&mut self) {
        // The teardown checkpoint is a collective; peers block until it
        // runs, so a failure here is logged rather than swallowed silently.
        if let Err(e) = self.checkpoint() {
            log::error!("thread synchronizer teardown checkpoint failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_allocation_is_monotonic() {
        let counter = ChildIndexCounter::new();
        assert_eq!(counter.allocate_child_index(), 0);
        assert_eq!(counter.allocate_child_index(), 1);
        assert_eq!(counter.get_next_child_index(), 2);
        counter.advance(3);
        assert_eq!(counter.allocate_child_index(), 5);
    }

    #[test]
    fn test_single_node_is_noop() {
        let counter = ChildIndexCounter::new();
        {
            let mut guard = ThreadSynchronizer::new(None, &counter);
            counter.allocate_child_index();
            guard.sync().unwrap();
        }
        assert_eq!(counter.get_next_child_index(), 1);
    }
}
