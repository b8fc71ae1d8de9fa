//! Bounded derivation queue drained by a fixed pool of workers.
//!
//! Submitting never blocks: a full queue is reported as QUEUE_FULL and the
//! caller decides what to do. Each job runs in its own task so a panic in
//! one derivation is reported as a failure instead of killing the worker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::{DerivationJob, JobKind};

use super::retry::RetryPolicy;

/// Capacity of the result broadcast channel.
const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Runner sizing and retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl RunnerConfig {
    /// Takes sizing and retry settings from the daemon configuration.
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a job, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// The artifact was produced.
    Complete {
        job_id: String,
        track_id: String,
        kind: JobKind,
        attempts: u32,
    },
    /// The job gave up.
    Failed {
        job_id: String,
        track_id: String,
        kind: JobKind,
        attempts: u32,
        error_code: ErrorCode,
        error_message: String,
    },
}

impl JobResult {
    /// Id of the job this result belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            JobResult::Complete { job_id, .. } | JobResult::Failed { job_id, .. } => job_id,
        }
    }
}

type ProcessFn = Arc<dyn Fn(DerivationJob) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Cloneable submission handle.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<DerivationJob>,
    results: broadcast::Sender<JobResult>,
    capacity: usize,
}

impl JobQueue {
    /// Enqueues a job without waiting.
    pub fn submit(&self, job: DerivationJob) -> Result<()> {
        let job_id = job.job_id.clone();
        match self.sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "job queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(DaemonError::queue_full(self.capacity)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(DaemonError::internal("Job runner is shut down"))
            }
        }
    }

    /// Enqueues the waveform and transcode jobs for a new track.
    ///
    /// Returns the ids of the jobs that were queued. Stops at the first
    /// rejected job.
    pub fn submit_track(&self, track_id: &str) -> Result<Vec<String>> {
        let mut queued = Vec::with_capacity(2);
        for kind in [JobKind::Waveform, JobKind::Transcode] {
            let job = DerivationJob::new(track_id, kind);
            let job_id = job.job_id.clone();
            self.submit(job)?;
            queued.push(job_id);
        }
        Ok(queued)
    }

    /// Subscribes to job results.
    pub fn subscribe(&self) -> broadcast::Receiver<JobResult> {
        self.results.subscribe()
    }

    /// Maximum number of pending jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Owns the worker tasks draining a [`JobQueue`].
pub struct JobRunner {
    queue: JobQueue,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl JobRunner {
    /// Starts `config.workers` workers that call `process_fn` for each job.
    pub fn new<F, Fut>(config: RunnerConfig, process_fn: F) -> Self
    where
        F: Fn(DerivationJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (results, _) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let process: ProcessFn = Arc::new(move |job: DerivationJob| process_fn(job).boxed());
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    shutdown_rx.clone(),
                    Arc::clone(&process),
                    config.retry,
                    results.clone(),
                ))
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            queue_capacity = capacity,
            max_retries = config.retry.max_retries,
            "job runner started"
        );

        Self {
            queue: JobQueue {
                sender,
                results,
                capacity,
            },
            shutdown,
            workers,
        }
    }

    /// Returns a submission handle.
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Enqueues a job without waiting.
    pub fn submit(&self, job: DerivationJob) -> Result<()> {
        self.queue.submit(job)
    }

    /// Enqueues the waveform and transcode jobs for a new track.
    pub fn submit_track(&self, track_id: &str) -> Result<Vec<String>> {
        self.queue.submit_track(track_id)
    }

    /// Subscribes to job results.
    pub fn subscribe(&self) -> broadcast::Receiver<JobResult> {
        self.queue.subscribe()
    }

    /// Stops the workers after their current job and waits for them.
    ///
    /// Jobs still queued are dropped; the derivers rebuild on demand.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "job worker ended abnormally");
            }
        }
        tracing::info!("job runner stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DerivationJob>>>,
    mut shutdown: watch::Receiver<bool>,
    process: ProcessFn,
    retry: RetryPolicy,
    results: broadcast::Sender<JobResult>,
) {
    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = next else {
            break;
        };
        let result = run_job(job, &process, retry, &mut shutdown).await;
        // No subscribers is fine.
        let _ = results.send(result);
    }
    tracing::debug!(worker, "job worker exiting");
}

/// Resolves once shutdown is requested or the runner is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_job(
    mut job: DerivationJob,
    process: &ProcessFn,
    retry: RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> JobResult {
    loop {
        job.set_running();
        tracing::info!(
            job_id = %job.job_id,
            track_id = %job.track_id,
            kind = %job.kind,
            attempt = job.attempts,
            "job started"
        );

        let outcome = match tokio::spawn(process(job.clone())).await {
            Ok(outcome) => outcome,
            Err(e) => Err(DaemonError::internal(format!("Job task failed: {}", e))),
        };

        let err = match outcome {
            Ok(()) => {
                job.set_complete();
                tracing::info!(
                    job_id = %job.job_id,
                    track_id = %job.track_id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    "job complete"
                );
                return JobResult::Complete {
                    job_id: job.job_id,
                    track_id: job.track_id,
                    kind: job.kind,
                    attempts: job.attempts,
                };
            }
            Err(err) => err,
        };

        if retry.should_retry(err.code, job.attempts) && !*shutdown.borrow() {
            let delay = retry.delay_for(job.attempts);
            tracing::warn!(
                job_id = %job.job_id,
                track_id = %job.track_id,
                kind = %job.kind,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err.message,
                "job failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => continue,
                _ = stopped(shutdown) => {}
            }
        }

        job.set_failed();
        tracing::warn!(
            job_id = %job.job_id,
            track_id = %job.track_id,
            kind = %job.kind,
            attempts = job.attempts,
            code = %err.code,
            error = %err.message,
            "job failed"
        );
        return JobResult::Failed {
            job_id: job.job_id,
            track_id: job.track_id,
            kind: job.kind,
            attempts: job.attempts,
            error_code: err.code,
            error_message: err.message,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(workers: usize, queue_capacity: usize, max_retries: u32) -> RunnerConfig {
        RunnerConfig {
            workers,
            queue_capacity,
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        }
    }

    async fn collect(rx: &mut broadcast::Receiver<JobResult>, n: usize) -> Vec<JobResult> {
        let mut out = Vec::new();
        while out.len() < n {
            let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            out.push(result);
        }
        out
    }

    #[test]
    fn runner_config_follows_daemon_config() {
        let config = DaemonConfig {
            workers: 3,
            queue_capacity: 9,
            max_retries: 4,
            retry_base_ms: 250,
            ..DaemonConfig::default()
        };
        let runner = RunnerConfig::from_config(&config);
        assert_eq!(runner.workers, 3);
        assert_eq!(runner.queue_capacity, 9);
        assert_eq!(runner.retry.max_retries, 4);
        assert_eq!(runner.retry.base_delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn submit_track_runs_both_kinds() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let runner = JobRunner::new(fast_config(2, 8, 0), move |job| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.lock().unwrap().push((job.track_id, job.kind));
                Ok(())
            }
        });
        let mut rx = runner.subscribe();

        let ids = runner.submit_track("t1").unwrap();
        assert_eq!(ids.len(), 2);

        let results = collect(&mut rx, 2).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, JobResult::Complete { .. })));

        let mut kinds: Vec<JobKind> = seen.lock().unwrap().iter().map(|(_, k)| *k).collect();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(kinds, vec![JobKind::Transcode, JobKind::Waveform]);
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn internal_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let runner = JobRunner::new(fast_config(1, 8, 2), move |_job| {
            let calls = Arc::clone(&calls_in);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DaemonError::internal("disk hiccup"))
                } else {
                    Ok(())
                }
            }
        });
        let mut rx = runner.subscribe();

        runner
            .submit(DerivationJob::new("t1", JobKind::Waveform))
            .unwrap();
        let results = collect(&mut rx, 1).await;
        match &results[0] {
            JobResult::Complete { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn permanent_errors_fail_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let runner = JobRunner::new(fast_config(1, 8, 3), move |job| {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DaemonError::source_not_found(&job.track_id))
            }
        });
        let mut rx = runner.subscribe();

        runner
            .submit(DerivationJob::new("t1", JobKind::Transcode))
            .unwrap();
        let results = collect(&mut rx, 1).await;
        match &results[0] {
            JobResult::Failed {
                attempts,
                error_code,
                ..
            } => {
                assert_eq!(*attempts, 1);
                assert_eq!(*error_code, ErrorCode::NotFound);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_worker() {
        let runner = JobRunner::new(fast_config(1, 8, 0), |job: DerivationJob| async move {
            if job.track_id == "boom" {
                panic!("derivation exploded");
            }
            Ok(())
        });
        let mut rx = runner.subscribe();

        runner
            .submit(DerivationJob::new("boom", JobKind::Waveform))
            .unwrap();
        runner
            .submit(DerivationJob::new("fine", JobKind::Waveform))
            .unwrap();

        let results = collect(&mut rx, 2).await;
        let by_id: HashMap<String, bool> = results
            .iter()
            .map(|r| match r {
                JobResult::Complete { track_id, .. } => (track_id.clone(), true),
                JobResult::Failed { track_id, .. } => (track_id.clone(), false),
            })
            .collect();
        assert_eq!(by_id.get("boom"), Some(&false));
        assert_eq!(by_id.get("fine"), Some(&true));
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_is_reported_not_blocking() {
        let (release_tx, release_rx) = watch::channel(false);
        let runner = JobRunner::new(fast_config(1, 1, 0), move |_job| {
            let mut release = release_rx.clone();
            async move {
                let _ = release.wait_for(|go| *go).await;
                Ok(())
            }
        });
        let mut rx = runner.subscribe();

        // One job occupies the worker, one fills the queue.
        runner
            .submit(DerivationJob::new("a", JobKind::Waveform))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner
            .submit(DerivationJob::new("b", JobKind::Waveform))
            .unwrap();

        let err = runner
            .submit(DerivationJob::new("c", JobKind::Waveform))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueueFull);

        release_tx.send_replace(true);
        collect(&mut rx, 2).await;
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let runner = JobRunner::new(fast_config(1, 4, 0), |_job| async { Ok(()) });
        let queue = runner.queue();
        assert_eq!(queue.capacity(), 4);
        runner.shutdown().await;

        let err = queue
            .submit(DerivationJob::new("a", JobKind::Waveform))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
