//! Deferred per-context actions
//!
//! Consumers sometimes need work to run on a specific thread's next cycle
//! (a sampling loop applying reconfiguration, a render loop destroying
//! context resources). An [`ActionQueue`] is owned by that context and
//! passed by reference to whoever registers actions — there is no
//! process-wide state.
//!
//! Actions deferred while a batch is being processed land in the pending
//! queue and run on the following cycle, so a callback may re-defer.

use std::sync::Mutex;

/// Two-phase deferred action queue
pub struct ActionQueue<A> {
    pending: Mutex<Vec<A>>,
}

impl<A> ActionQueue<A> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Register an action for the owning context's next cycle.
    ///
    /// Callable from any thread.
    pub fn defer(&self, action: A) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(action);
    }

    /// Number of actions waiting for the next cycle
    pub fn pending_len(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.len()
    }

    /// Run one processing cycle: take the pending batch and invoke `f` on
    /// each action in registration order. The lock is not held across
    /// callbacks. Returns the number of actions processed.
    pub fn process<F: FnMut(A)>(&self, mut f: F) -> usize {
        let processing = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        let count = processing.len();
        for action in processing {
            f(action);
        }
        count
    }
}

impl<A> Default for ActionQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_process_drains_in_order() {
        let queue = ActionQueue::new();
        queue.defer(1);
        queue.defer(2);
        queue.defer(3);

        let mut seen = Vec::new();
        let n = queue.process(|a| seen.push(a));
        assert_eq!(n, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_redefer_during_processing_waits_a_cycle() {
        let queue = Arc::new(ActionQueue::new());
        queue.defer(10);

        let q = Arc::clone(&queue);
        let n = queue.process(move |a| {
            if a == 10 {
                q.defer(20);
            }
        });
        assert_eq!(n, 1);
        assert_eq!(queue.pending_len(), 1);

        let mut seen = Vec::new();
        queue.process(|a| seen.push(a));
        assert_eq!(seen, vec![20]);
    }

    #[test]
    fn test_empty_cycle_is_cheap() {
        let queue: ActionQueue<u8> = ActionQueue::new();
        assert_eq!(queue.process(|_| {}), 0);
    }
}
