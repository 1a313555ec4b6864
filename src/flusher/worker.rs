//! Master/slave drain (spec §4.7): a stage's dirty buffers are dispatched
//! across a small worker pool and the master blocks until the whole stage
//! completes before advancing to the next one. Grounded on the teacher's
//! `disk_v2` writer task model, adapted from an async task queue to a plain
//! thread pool fed over `crossbeam_channel` since this crate's I/O layer is
//! synchronous.

use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::Result;

type Job = Box<dyn FnOnce() + Send>;

pub struct FlushWorkerPool {
    job_tx: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl FlushWorkerPool {
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let handles = (0..workers.max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        job();
                    }
                })
            })
            .collect();
        FlushWorkerPool { job_tx, handles }
    }

    /// Dispatches every job in `jobs` to the pool and blocks until all have
    /// returned, surfacing the first error encountered (later jobs still
    /// run to completion so a failing buffer doesn't leave siblings
    /// half-written).
    pub fn run_stage<F>(&self, jobs: Vec<F>) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let n = jobs.len();
        if n == 0 {
            return Ok(());
        }
        let (result_tx, result_rx) = crossbeam_channel::bounded(n);
        for job in jobs {
            let result_tx = result_tx.clone();
            let boxed: Job = Box::new(move || {
                let res = job();
                let _ = result_tx.send(res);
            });
            self.job_tx.send(boxed).expect("flush worker pool channel closed");
        }

        let mut first_err = None;
        for _ in 0..n {
            if let Ok(Err(e)) = result_rx.recv() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for FlushWorkerPool {
    fn drop(&mut self) {
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.join();
        }
    }
}
