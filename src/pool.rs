use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// One submitted unit of work: an identifier, a priority, and a job run
/// exactly once by exactly one worker.
pub(crate) struct Task {
    id: u64,
    priority: i32,
    job: Box<dyn FnOnce() + Send>,
}

// Tasks are ordered by priority alone; the heap breaks ties arbitrarily.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority.cmp(&other.priority)
    }
}

struct PoolState {
    queue: BinaryHeap<Task>,
    stop: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    task_ready: Condvar,
}

/// Fixed set of worker threads draining one max-priority task queue.
/// `submit` never blocks (the queue is unbounded); dropping the pool performs
/// a drain-and-join shutdown: every task still queued runs to completion
/// before the destructor returns, then all workers are joined.
pub struct PriorityTaskPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityTaskPool {
    /// Starts `worker_count` worker threads immediately.
    pub fn new(worker_count: usize) -> PriorityTaskPool {
        assert!(worker_count > 0, "pool needs at least one worker");

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: BinaryHeap::new(),
                stop: false,
            }),
            task_ready: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("pool-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!("pool started with {worker_count} workers");
        Self { shared, workers }
    }

    /// Enqueues a job under the given id and priority and wakes one idle
    /// worker. Higher priorities are dequeued first; equal priorities run in
    /// no particular order.
    pub fn submit<F>(&self, id: u64, priority: i32, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            state.queue.push(Task {
                id,
                priority,
                job: Box::new(job),
            });
        }
        self.shared.task_ready.notify_one();
    }

    /// Tasks currently queued and not yet picked up. Diagnostic only.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for PriorityTaskPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stop = true;
        }
        self.shared.task_ready.notify_all();

        debug!("pool shutting down, joining workers");
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked outside a task");
            }
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                // popping before consulting `stop` drains queued work during
                // shutdown
                if let Some(task) = state.queue.pop() {
                    break task;
                }
                if state.stop {
                    return;
                }
                shared.task_ready.wait(&mut state);
            }
        };

        trace!("running task {} (priority {})", task.id, task.priority);
        // a panicking job must not take the worker down with it
        if catch_unwind(AssertUnwindSafe(task.job)).is_err() {
            error!("task {} panicked", task.id);
        }
    }
}
