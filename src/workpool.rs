// src/workpool.rs

//! Bounded worker pool for orchestrator-level parallelism
//!
//! Jobs are closures queued over a channel and drained by N worker
//! threads. The pool is the only place porg runs builds concurrently;
//! everything inside one job stays sequential.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool with a shared queue
pub struct WorkPool {
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkPool {
    /// Spawn `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|n| {
                let receiver = Arc::clone(&receiver);
                std::thread::spawn(move || loop {
                    let job = {
                        let guard = match receiver.lock() {
                            Ok(g) => g,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => {
                            debug!("worker {} picked up a job", n);
                            job();
                        }
                        Err(_) => break,
                    }
                })
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a job; it runs as soon as a worker frees up
    pub fn submit<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    /// Close the queue and wait for every queued job to finish
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
