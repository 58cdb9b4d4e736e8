//! Rasterization worker pool.
//!
//! Workers block on a condition variable until a batch is published, drain
//! the shared job queue, and the last one out signals completion back to the
//! submitting thread. Jobs are raw pointers into the caller's stack frame;
//! `execute` does not return until every job has run, which keeps that safe.

use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{available_parallelism, JoinHandle};

type Runner = dyn Fn(*const (), usize) + Send + Sync;

struct Batch {
    jobs: Vec<*const ()>,
    runner: Option<NonNull<Runner>>,
    /// Jobs taken but not yet finished.
    in_flight: usize,
    closed: bool,
}

unsafe impl Send for Batch {}

struct Shared {
    state: Mutex<Batch>,
    work_ready: Condvar,
    batch_done: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new() -> WorkerPool {
        WorkerPool::with_threads(available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    pub fn with_threads(count: usize) -> WorkerPool {
        let shared = Arc::new(Shared {
            state: Mutex::new(Batch {
                jobs: Vec::new(),
                runner: None,
                in_flight: 0,
                closed: false,
            }),
            work_ready: Condvar::new(),
            batch_done: Condvar::new(),
        });

        let threads = (0..count.max(1) - 1)
            .map(|index| {
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(&shared, index + 1))
            })
            .collect();

        WorkerPool { shared, threads }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len() + 1
    }

    /// Run `work` over every job; blocks until the batch is fully drained.
    pub fn execute<'a, T: Sync + 'a>(&self, jobs: impl IntoIterator<Item = &'a T>, work: impl Fn(&T, usize) + Send + Sync) {
        let runner = |job: *const (), thread: usize| {
            // SAFETY: jobs outlive execute(), which awaits the batch.
            work(unsafe { &*(job as *const T) }, thread);
        };
        // SAFETY: the borrowed closure is only ever invoked from within this
        // call, which does not return until the batch (and thus every use of
        // the erased 'static lifetime below) has completed.
        let runner: &Runner = unsafe {
            std::mem::transmute::<&(dyn Fn(*const (), usize) + Send + Sync + '_), &Runner>(&runner)
        };

        {
            let mut state = self.shared.state.lock().unwrap();
            debug_assert!(state.jobs.is_empty() && state.in_flight == 0);
            state.jobs
                .extend(jobs.into_iter().map(|j| j as *const T as *const ()));
            if state.jobs.is_empty() {
                return;
            }
            // The runner pointer only lives for this batch; workers never
            // touch it after the final `batch_done` signal.
            state.runner = NonNull::new(runner as *const Runner as *mut Runner);
            self.shared.work_ready.notify_all();
        }

        // The submitting thread works too.
        drain(&self.shared, 0);

        let mut state = self.shared.state.lock().unwrap();
        while !state.jobs.is_empty() || state.in_flight > 0 {
            state = self.shared.batch_done.wait(state).unwrap();
        }
        state.runner = None;
    }
}

fn drain(shared: &Shared, thread: usize) {
    loop {
        let (job, runner) = {
            let mut state = shared.state.lock().unwrap();
            let Some(job) = state.jobs.pop() else {
                return;
            };
            state.in_flight += 1;
            (job, state.runner.unwrap())
        };

        // SAFETY: the runner stays valid while jobs remain in the batch.
        unsafe { runner.as_ref()(job, thread) };

        let mut state = shared.state.lock().unwrap();
        state.in_flight -= 1;
        if state.jobs.is_empty() && state.in_flight == 0 {
            shared.batch_done.notify_all();
        }
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            while state.jobs.is_empty() && !state.closed {
                state = shared.work_ready.wait(state).unwrap();
            }
            if state.closed {
                return;
            }
        }
        drain(shared, index);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closed = true;
            self.shared.work_ready.notify_all();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn batch_runs_every_job() {
        let pool = WorkerPool::with_threads(4);
        let counter = AtomicUsize::new(0);

        let jobs: Vec<usize> = (1..=100).collect();
        pool.execute(&jobs, |job, _| {
            counter.fetch_add(*job, Ordering::Relaxed);
        });

        assert_eq!(counter.load(Ordering::Relaxed), 5050);
    }

    #[test]
    fn sequential_batches_reuse_workers() {
        let pool = WorkerPool::with_threads(2);
        for round in 0..5 {
            let counter = AtomicUsize::new(0);
            let jobs: Vec<usize> = (0..10).collect();
            pool.execute(&jobs, |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(counter.load(Ordering::Relaxed), 10, "round {round}");
        }
    }
}
