//! Work-queue scheduler for parallel texture processing.
//!
//! N worker threads share a FIFO of jobs behind one mutex and two condition
//! variables. Workers capture panics from their jobs and park them for the
//! caller; `wait_for_all_complete` and `stop` re-raise the first one. With
//! zero workers, `schedule` runs jobs synchronously on the caller's thread.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;
type Panic = Box<dyn Any + Send + 'static>;

const WORKER_MAX: usize = 64;

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    running: usize,
    stopping: bool,
    panics: VecDeque<Panic>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    job_added_or_stopping: Condvar,
    job_done: Condvar,
}

/// Fixed-size worker pool draining a job FIFO.
#[derive(Default)]
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Creates a scheduler with no workers; call [`Scheduler::start`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `worker_count` worker threads (clamped to a sane maximum).
    pub fn start(&mut self, worker_count: usize) {
        let worker_count = worker_count.min(WORKER_MAX);
        debug_assert!(self.workers.is_empty());
        for _ in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            self.workers.push(std::thread::spawn(move || {
                worker_thread(&shared);
            }));
        }
    }

    /// Enqueues a job, or runs it synchronously when there are no workers.
    pub fn schedule<F: FnOnce() + Send + 'static>(&self, job: F) {
        if self.workers.is_empty() {
            job();
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        state.queue.push_back(Box::new(job));
        self.shared.job_added_or_stopping.notify_all();
    }

    /// Blocks until every enqueued job has run, then re-raises the first
    /// panic captured by any worker.
    pub fn wait_for_all_complete(&self) {
        let mut panics;
        {
            let mut state = self.shared.state.lock().unwrap();
            while !state.queue.is_empty() || state.running != 0 {
                state = self.shared.job_done.wait(state).unwrap();
            }
            panics = std::mem::take(&mut state.panics);
        }
        if let Some(panic) = panics.pop_front() {
            resume_unwind(panic);
        }
    }

    /// Signals all workers to finish their current job and exit, joins
    /// them, and re-raises the first captured panic.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
            self.shared.job_added_or_stopping.notify_all();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        let panic = {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = false;
            state.panics.pop_front()
        };
        if let Some(panic) = panic {
            resume_unwind(panic);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
            self.shared.job_added_or_stopping.notify_all();
            drop(state);
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

fn worker_thread(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.stopping {
                    // Waiting consumed the signal; re-broadcast so the
                    // remaining workers wake up to exit too.
                    shared.job_added_or_stopping.notify_all();
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    state.running += 1;
                    break job;
                }
                state = shared.job_added_or_stopping.wait(state).unwrap();
            }
        };

        let result = catch_unwind(AssertUnwindSafe(job));
        {
            let mut state = shared.state.lock().unwrap();
            state.running -= 1;
            if let Err(panic) = result {
                state.panics.push_back(panic);
            }
        }
        shared.job_done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_jobs() {
        let mut scheduler = Scheduler::new();
        scheduler.start(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            scheduler.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.wait_for_all_complete();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
        scheduler.stop();
    }

    #[test]
    fn zero_workers_run_synchronously() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&counter);
        scheduler.schedule(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn captures_and_rethrows_panics() {
        let mut scheduler = Scheduler::new();
        scheduler.start(2);
        scheduler.schedule(|| panic!("job failed"));
        let result = catch_unwind(AssertUnwindSafe(|| scheduler.wait_for_all_complete()));
        assert!(result.is_err());
        scheduler.stop();
    }

    #[test]
    fn stop_is_idempotent_after_wait() {
        let mut scheduler = Scheduler::new();
        scheduler.start(2);
        scheduler.schedule(|| {});
        scheduler.wait_for_all_complete();
        scheduler.stop();
        scheduler.stop();
    }
}
