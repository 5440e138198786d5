//! Bounded worker pool for blocking inference.
//!
//! The pool owns a fixed set of OS threads, each initialized once with its
//! own [`ScoringModel`]. [`ScorerPool::score`] is the bridge between the
//! async request tasks and the blocking workers: it queues a job and awaits
//! a oneshot reply, suspending only the calling task. Workers are fungible;
//! no ordering is guaranteed across requests.

use std::path::PathBuf;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::scoring::model::ScoringModel;

/// Configuration for the scorer pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn.
    pub pool_size: usize,
    /// Weight file each worker loads at startup.
    pub model_path: PathBuf,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            model_path: PathBuf::from("model/weights.bin"),
        }
    }
}

/// One queued unit of blocking work.
struct Job {
    audio: Vec<f32>,
    reply: oneshot::Sender<Result<f32>>,
}

/// Fixed-size pool of scoring workers, created once at startup.
#[derive(Debug)]
pub struct ScorerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    active: usize,
}

impl ScorerPool {
    /// Spawn the workers and wait for each to report model initialization.
    ///
    /// A worker whose model fails to load is logged and skipped; the pool
    /// serves with reduced capacity. Startup fails only when no worker
    /// initialized at all.
    pub fn start(config: &PoolConfig) -> Result<Self> {
        let (jobs_tx, jobs_rx) = channel::unbounded::<Job>();
        let (init_tx, init_rx) = std::sync::mpsc::channel::<bool>();

        let mut workers = Vec::with_capacity(config.pool_size);
        for worker_id in 0..config.pool_size {
            let jobs_rx = jobs_rx.clone();
            let init_tx = init_tx.clone();
            let model_path = config.model_path.clone();
            let handle = thread::Builder::new()
                .name(format!("scorer-{}", worker_id))
                .spawn(move || worker_loop(worker_id, &model_path, jobs_rx, init_tx))
                .map_err(|e| AppError::Config(format!("cannot spawn worker thread: {}", e)))?;
            workers.push(handle);
        }
        drop(init_tx);

        let active = init_rx.iter().filter(|ok| *ok).count();
        if active == 0 {
            return Err(AppError::Config(format!(
                "no scoring worker initialized from {}",
                config.model_path.display()
            )));
        }
        if active < config.pool_size {
            warn!(
                "scorer pool running at reduced capacity: {}/{} workers",
                active, config.pool_size
            );
        }
        info!("scorer pool started with {} workers", active);

        Ok(Self {
            jobs: Some(jobs_tx),
            workers,
            active,
        })
    }

    /// Number of workers that initialized successfully.
    pub fn active_workers(&self) -> usize {
        self.active
    }

    /// Submit one blocking score to an idle worker and await the outcome.
    ///
    /// Suspends only the calling task; concurrent requests keep flowing. Any
    /// worker-side failure comes back as `InferenceFailed`.
    pub async fn score(&self, audio: Vec<f32>) -> Result<f32> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| AppError::InferenceFailed("pool is shut down".to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        jobs.send(Job {
            audio,
            reply: reply_tx,
        })
        .map_err(|_| AppError::InferenceFailed("pool is shut down".to_string()))?;

        reply_rx
            .await
            .map_err(|_| AppError::InferenceFailed("worker dropped the request".to_string()))?
    }
}

impl Drop for ScorerPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker's recv() fail and exit.
        self.jobs.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    worker_id: usize,
    model_path: &std::path::Path,
    jobs: Receiver<Job>,
    init_tx: std::sync::mpsc::Sender<bool>,
) {
    let model = match ScoringModel::load(model_path) {
        Ok(model) => {
            let _ = init_tx.send(true);
            model
        }
        Err(e) => {
            warn!("worker {} failed to initialize: {}", worker_id, e);
            let _ = init_tx.send(false);
            return;
        }
    };
    drop(init_tx);

    while let Ok(job) = jobs.recv() {
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| model.score(&job.audio)))
                .unwrap_or_else(|_| {
                    Err(AppError::InferenceFailed("scoring panicked".to_string()))
                });
        // The requester may have gone away; that is its problem, not ours.
        let _ = job.reply.send(outcome);
    }
}
