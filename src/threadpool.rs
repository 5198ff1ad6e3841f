// Copyright 2022-2023 Andrew D. Straw.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fixed-size worker pool (spec §4.3).
//!
//! Three FIFO queues (`uninit`, `run`, `done`) of jobs move between worker
//! threads and the submitting thread, synchronized with a `Mutex` + `Condvar`
//! pair per queue, the same structure as x264's `x264_threadpool_t`.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type JobFn = Box<dyn FnOnce() -> Box<dyn std::any::Any + Send> + Send>;

struct Job {
    func: JobFn,
    /// Identifies this job to `wait()`; callers pass back the same pointer
    /// value they received from `submit()`.
    token: usize,
    ret: Option<Box<dyn std::any::Any + Send>>,
}

struct Queue {
    jobs: Mutex<VecDeque<Job>>,
    cv_fill: Condvar,
}

impl Queue {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            cv_fill: Condvar::new(),
        }
    }
}

/// The run queue's jobs and its exit flag share one mutex: a worker must be
/// able to check `exit` and wait on `cv_fill` as a single atomic step, or a
/// `notify_all` landing between the check and the wait is lost forever.
struct RunState {
    jobs: VecDeque<Job>,
    exit: bool,
}

struct RunQueue {
    state: Mutex<RunState>,
    cv_fill: Condvar,
}

impl RunQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunState {
                jobs: VecDeque::new(),
                exit: false,
            }),
            cv_fill: Condvar::new(),
        }
    }
}

struct Shared {
    run: RunQueue,
    done: Queue,
}

/// A fixed-size worker pool matching x264's `x264_threadpool_t`.
///
/// Jobs are arbitrary closures; [`ThreadPool::submit`] hands one to the pool
/// and returns a [`JobHandle`] token, which [`ThreadPool::wait`] exchanges
/// for the closure's return value once a worker has run it.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    next_token: usize,
}

/// Opaque handle returned by [`ThreadPool::submit`], consumed by
/// [`ThreadPool::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle(usize);

impl ThreadPool {
    /// Spawn `thread_count` worker threads (x264's `x264_threadpool_init`).
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            run: RunQueue::new(),
            done: Queue::new(),
        });

        let threads = (0..thread_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self {
            shared,
            threads,
            next_token: 0,
        }
    }

    /// `x264_threadpool_run`: hand a job to a worker thread, FIFO.
    pub fn submit<F, R>(&mut self, func: F) -> JobHandle
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);

        let job = Job {
            func: Box::new(move || Box::new(func()) as Box<dyn std::any::Any + Send>),
            token,
            ret: None,
        };

        let mut run = self.shared.run.state.lock().unwrap();
        run.jobs.push_back(job);
        self.shared.run.cv_fill.notify_one();
        JobHandle(token)
    }

    /// `x264_threadpool_wait`: block until the job identified by `handle`
    /// has finished, then return its result. Matches the teacher's C code's
    /// linear scan of the `done` queue by pointer identity.
    pub fn wait<R: Send + 'static>(&mut self, handle: JobHandle) -> R {
        let mut done = self.shared.done.jobs.lock().unwrap();
        loop {
            if let Some(pos) = done.iter().position(|j| j.token == handle.0) {
                let job = done.remove(pos).unwrap();
                let boxed = job.ret.expect("completed job always carries a result");
                return *boxed
                    .downcast::<R>()
                    .expect("job return type matches submit's type parameter");
            }
            done = self.shared.done.cv_fill.wait(done).unwrap();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut run = shared.run.state.lock().unwrap();
        loop {
            if !run.jobs.is_empty() {
                break;
            }
            if run.exit {
                return;
            }
            run = shared.run.cv_fill.wait(run).unwrap();
        }
        let mut job = run.jobs.pop_front().unwrap();
        drop(run);

        let ret = (job.func)();
        job.ret = Some(ret);

        let mut done = shared.done.jobs.lock().unwrap();
        done.push_back(job);
        shared.done.cv_fill.notify_one();
    }
}

impl Drop for ThreadPool {
    /// `x264_threadpool_delete`: set the exit flag, wake every worker and
    /// join them.
    fn drop(&mut self) {
        self.shared.run.state.lock().unwrap().exit = true;
        self.shared.run.cv_fill.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_submit_wait_roundtrip() {
        let mut pool = ThreadPool::new(2);
        let h1 = pool.submit(|| 2 + 2);
        let h2 = pool.submit(|| 3 * 3);
        let r2: i32 = pool.wait(h2);
        let r1: i32 = pool.wait(h1);
        assert_eq!(r1, 4);
        assert_eq!(r2, 9);
    }

    #[test]
    fn test_many_jobs_fifo_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = ThreadPool::new(4);
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            let r: i32 = pool.wait(h);
            assert_eq!(r, i as i32);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_drop_joins_threads_without_hang() {
        let pool = ThreadPool::new(3);
        drop(pool);
    }

    /// Regression for the exit/run-queue lost-wakeup race: with idle
    /// workers already parked on `cv_fill`, `Drop` setting `exit` and
    /// broadcasting must still wake every one of them every time, or this
    /// hangs instead of returning.
    #[test]
    fn test_drop_wakes_idle_workers_repeatedly() {
        for _ in 0..50 {
            let pool = ThreadPool::new(4);
            std::thread::sleep(std::time::Duration::from_millis(1));
            drop(pool);
        }
    }
}
