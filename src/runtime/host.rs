//! Host event loop - cooperative FIFO task queue
//!
//! Everything the engine defers (model change notifications, mutation
//! observer deliveries, deferred re-renders) is queued here and runs to
//! completion, one task at a time, in the order it was queued. Nothing runs
//! in parallel and nothing blocks.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::warn;

use crate::util::constants::MAX_HOST_TASKS;

type Task = Box<dyn FnOnce()>;

/// Handle to the host loop; clones share one queue
#[derive(Clone, Default)]
pub struct HostLoop {
    queue: Rc<RefCell<VecDeque<Task>>>,
    running: Rc<Cell<bool>>,
}

impl HostLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task for a later turn
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run queued tasks (including ones queued meanwhile) until the queue is
    /// empty. Returns how many ran.
    ///
    /// Calling this from inside a running task is a no-op: the outer call
    /// drains the queue anyway.
    pub fn run_until_idle(&self) -> usize {
        if self.running.replace(true) {
            return 0;
        }

        let mut ran = 0;
        while ran < MAX_HOST_TASKS {
            // Pop in its own statement so the queue is not borrowed while the
            // task runs (tasks may defer more tasks).
            let next = self.queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        if ran == MAX_HOST_TASKS && self.pending() > 0 {
            warn!(
                pending = self.pending(),
                "Host loop stopped after {} tasks; a feedback cycle is likely", MAX_HOST_TASKS
            );
        }

        self.running.set(false);
        ran
    }
}

impl std::fmt::Debug for HostLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoop")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_tasks_in_fifo_order() {
        let host = HostLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let seen = Rc::clone(&seen);
            host.defer(move || seen.borrow_mut().push(i));
        }
        assert_eq!(host.pending(), 3);
        assert_eq!(host.run_until_idle(), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn tasks_queued_by_tasks_run_in_same_drain() {
        let host = HostLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let inner_host = host.clone();
        let inner_seen = Rc::clone(&seen);
        host.defer(move || {
            inner_seen.borrow_mut().push("outer");
            let s = Rc::clone(&inner_seen);
            inner_host.defer(move || s.borrow_mut().push("inner"));
        });
        assert_eq!(host.run_until_idle(), 2);
        assert_eq!(*seen.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn nested_drain_is_noop() {
        let host = HostLoop::new();
        let nested = Rc::new(Cell::new(usize::MAX));
        let h = host.clone();
        let n = Rc::clone(&nested);
        host.defer(move || n.set(h.run_until_idle()));
        host.run_until_idle();
        assert_eq!(nested.get(), 0);
    }
}
