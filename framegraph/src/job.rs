//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! A minimal job-group abstraction over the standard library's thread
//! primitives: jobs are fire-and-forget closures dispatched to their own
//! threads, joined as a batch. `std::thread::spawn`/`JoinHandle::join`
//! already capture a panicking job via `thread::Result`, so propagating a
//! closure panic to the joining thread (per the engine's "forward to the
//! next touchpoint" exception policy) falls out of `join()` for free.
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A batch of jobs to be run to completion (or dispatched and joined later).
#[derive(Default)]
pub struct JobGroup {
    jobs: Vec<Job>,
}

impl JobGroup {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Pre-allocate storage for `additional` more jobs.
    pub fn reserve(&mut self, additional: usize) {
        self.jobs.reserve(additional);
    }

    /// Queue `job` to run on its own worker thread once the group executes.
    pub fn add_job<F>(&mut self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs.push(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Dispatch every queued job and block until all of them complete. If
    /// any job panicked, the panic is re-raised here after every job has
    /// been joined.
    pub fn execute_jobs(self) {
        self.execute_jobs_async().join();
    }

    /// Dispatch every queued job without blocking; returns a handle the
    /// caller joins explicitly once it needs the results.
    pub fn execute_jobs_async(self) -> JobGroupHandle {
        let handles = self.jobs.into_iter().map(thread::spawn).collect();
        JobGroupHandle { handles }
    }
}

/// A set of in-flight jobs dispatched by [`JobGroup::execute_jobs_async`].
#[must_use = "a dispatched job group must be joined or its panics are silently dropped"]
pub struct JobGroupHandle {
    handles: Vec<JoinHandle<()>>,
}

impl JobGroupHandle {
    /// Block until every dispatched job has finished. Re-raises the first
    /// captured panic, if any, only after every handle has been joined.
    pub fn join(self) {
        let mut first_panic = None;
        for handle in self.handles {
            if let Err(payload) = handle.join() {
                if first_panic.is_none() {
                    first_panic = Some(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn all_jobs_run_before_execute_returns() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = JobGroup::new();
        group.reserve(8);
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            group.add_job(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.execute_jobs();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn panic_in_job_propagates_at_join() {
        let mut group = JobGroup::new();
        group.add_job(|| {
            panic!("boom");
        });
        group.execute_jobs();
    }

    #[test]
    fn async_dispatch_can_be_joined_later() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = JobGroup::new();
        {
            let counter = Arc::clone(&counter);
            group.add_job(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let handle = group.execute_jobs_async();
        handle.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
