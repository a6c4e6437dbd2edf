//! Fixed-size worker pool with owned result cells.
//!
//! Every submitted job gets its own one-shot [`Task`] handle. Handles are
//! awaited in whatever order the caller likes, so the order results are
//! consumed in never depends on the order workers finish in.
//!
//! ## Failure Capture
//!
//! A failure nobody is waiting for must not disappear. Two situations are
//! recorded in the pool's [`PendingFailure`] slot:
//!
//! - a job panicked (its waiter, if any, sees [`Error::TaskLost`])
//! - a job returned `Err` but its [`Task`] was dropped without being waited on
//!
//! [`WorkerPool::shutdown`] escalates the first recorded failure as
//! [`Error::Uncaught`].

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// At most one failure that no caller observed; the first one wins
#[derive(Debug, Default)]
pub struct PendingFailure {
    slot: Mutex<Option<(String, Error)>>,
}

impl PendingFailure {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure unless one is already held.
    ///
    /// Returns whether this failure was kept.
    pub fn record(&self, origin: impl Into<String>, cause: Error) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            trace!("dropping secondary failure: {}", cause);
            return false;
        }
        *slot = Some((origin.into(), cause));
        true
    }

    /// Take the recorded failure, leaving the slot empty
    pub fn take(&self) -> Option<(String, Error)> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Fail with [`Error::Uncaught`] if a failure was recorded
    pub fn check(&self) -> Result<()> {
        match self.take() {
            Some((origin, cause)) => Err(Error::Uncaught {
                origin,
                source: Box::new(cause),
            }),
            None => Ok(()),
        }
    }
}

/// Handle to the eventual result of one submitted job
#[derive(Debug)]
pub struct Task<T> {
    origin: String,
    receiver: Receiver<Result<T>>,
    pending: Arc<PendingFailure>,
}

impl<T> Task<T> {
    /// Label the job was submitted under
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Block until the job finishes and return its result
    pub fn wait(self) -> Result<T> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::TaskLost {
                origin: self.origin.clone(),
            }),
        }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        // A result delivered but never collected
        if let Ok(Err(cause)) = self.receiver.try_recv() {
            self.pending.record(self.origin.clone(), cause);
        }
    }
}

/// Fixed number of named threads draining a shared job queue
#[derive(Debug)]
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<PendingFailure>,
}

impl WorkerPool {
    /// Start `size` worker threads
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConcurrency { value: 0 });
        }

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("renum-worker-{}", n))
                .spawn(move || {
                    for job in receiver {
                        job();
                    }
                })
                .map_err(Error::WorkerSpawn)?;
            workers.push(handle);
        }
        debug!("Started {} worker threads", size);

        Ok(Self {
            sender: Some(sender),
            workers,
            pending: Arc::new(PendingFailure::new()),
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Failure slot shared with every task of this pool
    pub fn pending(&self) -> &Arc<PendingFailure> {
        &self.pending
    }

    /// Queue `job` and return a handle to its result
    pub fn submit<T, F>(&self, origin: impl Into<String>, job: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let origin = origin.into();
        let (result_tx, result_rx) = bounded::<Result<T>>(1);
        let pending = Arc::clone(&self.pending);

        let job_origin = origin.clone();
        let job: Job = Box::new(move || {
            trace!("running {}", job_origin);
            match catch_unwind(AssertUnwindSafe(job)) {
                Ok(result) => {
                    // Fails only when the handle is already gone
                    if let Err(undelivered) = result_tx.send(result) {
                        if let Err(cause) = undelivered.into_inner() {
                            pending.record(job_origin, cause);
                        }
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("{} panicked: {}", job_origin, message);
                    pending.record(job_origin, Error::WorkerPanic(message));
                    // result_tx is dropped here; the waiter sees TaskLost
                }
            }
        });

        match &self.sender {
            Some(sender) => {
                if let Err(rejected) = sender.send(job) {
                    // Every worker is gone; run the job here so its result still resolves
                    (rejected.into_inner())();
                }
            }
            None => job(),
        }

        Task {
            origin,
            receiver: result_rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Stop accepting jobs, join every worker, then escalate any recorded
    /// failure as [`Error::Uncaught`]
    pub fn shutdown(mut self) -> Result<()> {
        self.close();
        debug!("Worker pool shut down");
        self.pending.check()
    }

    fn close(&mut self) {
        // Closing the queue ends each worker's loop once it drains
        self.sender.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_owned();
            if worker.join().is_err() {
                self.pending
                    .record(name, Error::WorkerPanic("worker thread died".into()));
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
