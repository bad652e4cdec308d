//! One-shot task scheduling on a dedicated loop thread.
//!
//! Stands in for the host framework's main loop: a single named thread
//! drains a deadline-ordered queue of boxed one-shot tasks. Scheduling
//! never blocks on execution, tasks run exactly once and in deadline
//! order, and there is no cancel path — once scheduled, a task runs
//! unless the loop itself shuts down first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Scheduled {
    deadline: Instant,
    seq: u64,
    id: TimerId,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry; invert so the earliest
        // deadline wins, with submission order breaking ties.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl Shared {
    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut queue = self.queue.lock().unwrap();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        let id = TimerId(seq);
        if queue.shutdown {
            tracing::warn!("main loop is shut down, dropping scheduled task");
            return id;
        }
        queue.heap.push(Scheduled {
            deadline: Instant::now() + delay,
            seq,
            id,
            task,
        });
        drop(queue);
        self.wakeup.notify_one();
        id
    }
}

/// The loop thread and its task queue.
///
/// Dropping the `MainLoop` stops the thread and joins it; tasks still
/// queued at that point are dropped, not run.
pub struct MainLoop {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MainLoop {
    /// Start the loop thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wakeup: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("manifold-loop".to_string())
            .spawn(move || run(loop_shared))
            .expect("failed to spawn main loop thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Schedule a task to run once on the loop thread after `delay`.
    pub fn schedule_once(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        self.shared.schedule(delay, Box::new(task))
    }

    /// Cheap clonable handle for scheduling from elsewhere.
    pub fn handle(&self) -> MainLoopHandle {
        MainLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutdown = true;
        }
        self.shared.wakeup.notify_one();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("main loop thread panicked");
            }
        }
    }
}

/// Scheduling handle onto a [`MainLoop`].
///
/// Handles stay valid after the loop shuts down; tasks scheduled then
/// are dropped with a warning.
#[derive(Clone)]
pub struct MainLoopHandle {
    shared: Arc<Shared>,
}

impl MainLoopHandle {
    /// Schedule a task to run once on the loop thread after `delay`.
    pub fn schedule_once(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        self.shared.schedule(delay, Box::new(task))
    }
}

fn run(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock().unwrap();
    loop {
        if queue.shutdown {
            let pending = queue.heap.len();
            if pending > 0 {
                tracing::warn!("main loop shutting down, dropping {} pending task(s)", pending);
            }
            queue.heap.clear();
            return;
        }
        let now = Instant::now();
        let due = queue.heap.peek().map(|s| s.deadline);
        match due {
            Some(deadline) if deadline <= now => {
                let entry = queue.heap.pop();
                drop(queue);
                if let Some(entry) = entry {
                    tracing::trace!("running scheduled task {:?}", entry.id);
                    (entry.task)();
                }
                queue = shared.queue.lock().unwrap();
            }
            Some(deadline) => {
                let (guard, _) = shared
                    .wakeup
                    .wait_timeout(queue, deadline - now)
                    .unwrap();
                queue = guard;
            }
            None => {
                queue = shared.wakeup.wait(queue).unwrap();
            }
        }
    }
}
