//! Fixed-size pool of worker threads fed through a bounded queue.
//!
//! The queue holds as many jobs as there are workers, so `add` blocks the
//! producer when workers fall behind. A failing or panicking job is reported
//! on the console and the worker moves on to the next one.

use crate::api_client::SmugError;
use crate::foundation::console::Console;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub type Job = Box<dyn FnOnce() -> Result<(), SmugError> + Send + 'static>;

/// How long idle workers and `join` wait before looking at the stop flag again.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `threads` workers (at least one).
    pub fn new(name: &str, threads: usize, console: Console) -> Arc<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(threads);
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let stopping = Arc::new(AtomicBool::new(false));

        let workers = (0..threads)
            .map(|index| {
                let receiver = receiver.clone();
                let pending = pending.clone();
                let stopping = stopping.clone();
                let console = console.clone();
                thread::Builder::new()
                    .name(format!("{name}-{index}"))
                    .spawn(move || worker_loop(receiver, pending, stopping, console))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Failed to spawn {} worker: {}", name, e);
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(pool = name, threads = workers.len(), "worker pool started");

        Arc::new(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pending,
            stopping,
        })
    }

    /// Queues `job`, blocking while the queue is full.
    pub fn add<F>(&self, job: F)
    where
        F: FnOnce() -> Result<(), SmugError> + Send + 'static,
    {
        let Some(sender) = self.sender.lock().clone() else {
            warn!(pool = %self.name, "job submitted after join, dropping it");
            return;
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(Box::new(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(pool = %self.name, "workers are gone, dropping job");
        }
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits for every queued job to finish, then stops the workers.
    ///
    /// Polls rather than blocking on the threads so the caller stays
    /// responsive to interrupt signals. Safe to call more than once.
    pub fn join(&self) {
        while self.pending() > 0 {
            thread::sleep(POLL_INTERVAL);
        }
        self.stopping.store(true, Ordering::SeqCst);
        self.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
        debug!(pool = %self.name, "worker pool joined");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(
    receiver: Arc<Mutex<Receiver<Job>>>,
    pending: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
    console: Console,
) {
    loop {
        let next = receiver.lock().recv_timeout(POLL_INTERVAL);
        match next {
            Ok(job) => {
                run_job(job, &console);
                pending.fetch_sub(1, Ordering::SeqCst);
            }
            Err(RecvTimeoutError::Timeout) => {
                if stopping.load(Ordering::SeqCst) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn run_job(job: Job, console: &Console) {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => console.println(e.to_string()),
        Err(payload) => console.println(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Task panicked.".to_string()
    }
}
