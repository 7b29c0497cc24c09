use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::DispatcherConfig;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::DispatchError;
use crate::job::Job;

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// A job with the same key was already queued; nothing new was enqueued.
    Coalesced,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
    pub workers: usize,
    pub queued: usize,
    pub running: usize,
    /// Jobs waiting on `submit_after` to enter the queue.
    pub delayed: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub coalesced: u64,
    pub saturated: bool,
    /// Accepted submissions per job name.
    pub submitted_by_job: BTreeMap<String, u64>,
}

struct Envelope {
    job: Box<dyn Job>,
    key: Option<String>,
    enqueued_at: Instant,
}

struct Inner {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    queued_keys: DashSet<String>,
    submitted_by_job: DashMap<&'static str, u64>,

    workers: AtomicUsize,
    queued: AtomicUsize,
    running: AtomicUsize,
    delayed: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    coalesced: AtomicU64,

    saturation_threshold: usize,
    saturated: AtomicBool,
    idle: Notify,
    shutdown: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the worker pool. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(config: &DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                tx,
                rx: Mutex::new(rx),
                queued_keys: DashSet::new(),
                submitted_by_job: DashMap::new(),
                workers: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                delayed: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                saturation_threshold: config.saturation_threshold.max(1),
                saturated: AtomicBool::new(false),
                idle: Notify::new(),
                shutdown: CancellationToken::new(),
                handles: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn `n` more workers. Must be called inside a tokio runtime.
    pub fn start(&self, n: usize) {
        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for _ in 0..n {
            let worker_id = self.inner.workers.fetch_add(1, Ordering::SeqCst);
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(worker_loop(inner, worker_id)));
        }
        info!(added = n, total = self.inner.workers.load(Ordering::SeqCst), "Workers started");
    }

    /// Enqueue a job without waiting for it to run.
    pub fn submit<J: Job>(&self, job: J) -> Result<Submission, DispatchError> {
        self.submit_boxed(Box::new(job))
    }

    pub fn submit_boxed(&self, job: Box<dyn Job>) -> Result<Submission, DispatchError> {
        let name = job.name();
        if self.inner.shutdown.is_cancelled() {
            return Err(DispatchError::ShutDown(name));
        }

        let key = job.key();
        if let Some(key) = &key {
            if !self.inner.queued_keys.insert(key.clone()) {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(job = name, key = %key, "Coalesced into queued job");
                return Ok(Submission::Coalesced);
            }
        }

        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope {
            job,
            key: key.clone(),
            enqueued_at: Instant::now(),
        };
        if self.inner.tx.send(envelope).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            if let Some(key) = &key {
                self.inner.queued_keys.remove(key);
            }
            return Err(DispatchError::ShutDown(name));
        }

        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        *self.inner.submitted_by_job.entry(name).or_insert(0) += 1;
        self.inner.check_saturation();
        Ok(Submission::Accepted)
    }

    /// Submit `job` once `delay` has elapsed. The job counts as outstanding work meanwhile.
    pub fn submit_after<J: Job>(&self, job: J, delay: Duration) {
        let this = self.clone();
        self.inner.delayed.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::select! {
                _ = this.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = this.submit(job) {
                        warn!(error = %e, "Delayed submission dropped");
                    }
                }
            }
            this.inner.delayed.fetch_sub(1, Ordering::SeqCst);
            this.inner.notify_if_drained();
        });
    }

    pub fn pending(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// True when nothing is queued, running or waiting to be submitted.
    pub fn is_drained(&self) -> bool {
        self.inner.is_drained()
    }

    /// Resolve once all submitted work has drained.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let inner = &self.inner;
        DispatcherStats {
            workers: inner.workers.load(Ordering::SeqCst),
            queued: inner.queued.load(Ordering::SeqCst),
            running: inner.running.load(Ordering::SeqCst),
            delayed: inner.delayed.load(Ordering::SeqCst),
            submitted: inner.submitted.load(Ordering::Relaxed),
            completed: inner.completed.load(Ordering::Relaxed),
            failed: inner.failed.load(Ordering::Relaxed),
            panicked: inner.panicked.load(Ordering::Relaxed),
            coalesced: inner.coalesced.load(Ordering::Relaxed),
            saturated: inner.saturated.load(Ordering::Relaxed),
            submitted_by_job: inner
                .submitted_by_job
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }

    /// Accepted submissions of the named job so far.
    pub fn submitted_count(&self, name: &str) -> u64 {
        self.inner
            .submitted_by_job
            .iter()
            .find(|entry| *entry.key() == name)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Stop accepting work and let workers exit after their current job.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<_> = {
            let mut guard = self
                .inner
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("Dispatcher shut down");
    }
}

impl Inner {
    fn is_drained(&self) -> bool {
        self.queued.load(Ordering::SeqCst) == 0
            && self.running.load(Ordering::SeqCst) == 0
            && self.delayed.load(Ordering::SeqCst) == 0
    }

    fn notify_if_drained(&self) {
        if self.is_drained() {
            self.idle.notify_waiters();
        }
    }

    fn check_saturation(&self) {
        let depth = self.queued.load(Ordering::SeqCst);
        if depth >= self.saturation_threshold {
            if !self.saturated.swap(true, Ordering::Relaxed) {
                warn!(
                    queued = depth,
                    threshold = self.saturation_threshold,
                    "Job queue saturated"
                );
            }
        } else if depth < self.saturation_threshold / 2 && self.saturated.swap(false, Ordering::Relaxed) {
            info!(queued = depth, "Job queue back below saturation");
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, worker_id: usize) {
    loop {
        let envelope = {
            let mut rx = inner.rx.lock().await;
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => None,
                envelope = rx.recv() => envelope,
            }
        };
        let Some(envelope) = envelope else {
            break;
        };

        inner.running.fetch_add(1, Ordering::SeqCst);
        inner.queued.fetch_sub(1, Ordering::SeqCst);
        if let Some(key) = &envelope.key {
            inner.queued_keys.remove(key);
        }
        inner.check_saturation();

        let name = envelope.job.name();
        let waited_ms = envelope.enqueued_at.elapsed().as_millis() as u64;
        let started = Instant::now();

        match AssertUnwindSafe(envelope.job.run()).catch_unwind().await {
            Ok(Ok(())) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id,
                    job = name,
                    waited_ms,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Ok(Err(e)) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker_id, job = name, error = format!("{e:#}"), "Job failed");
            }
            Err(panic) => {
                inner.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker_id,
                    job = name,
                    panic = panic_message(&*panic),
                    "Job panicked"
                );
            }
        }

        inner.running.fetch_sub(1, Ordering::SeqCst);
        inner.notify_if_drained();
    }
    debug!(worker_id, "Worker exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
