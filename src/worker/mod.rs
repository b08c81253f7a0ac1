pub mod jobs;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Unit of work the pool dispatches. Modeled on `types.Job` in the original
/// implementation (`Execute`/`ID`), expressed as an async trait since Rust
/// has no green-thread runtime goroutines to block inside.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self) -> Result<(), String>;
    fn id(&self) -> String;
}

/// Bounded channel-backed worker pool. The original's `worker()` wraps
/// `recover()` around its *entire* loop, so one panicking job silently kills
/// that worker for good; here each job runs in its own `tokio::spawn`, so a
/// panic is caught and logged without taking the worker loop down with it.
pub struct WorkerPool {
    tx: mpsc::Sender<Arc<dyn Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(num_workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Arc<dyn Job>>(queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = rx.clone();
            handles.push(tokio::spawn(async move {
                info!(worker_id, "worker ready");
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else {
                        info!(worker_id, "job queue closed, shutting down");
                        break;
                    };

                    let job_id = job.id();
                    info!(worker_id, job_id = %job_id, "starting job");

                    let outcome = tokio::spawn(async move { job.execute().await }).await;

                    match outcome {
                        Ok(Ok(())) => info!(worker_id, job_id = %job_id, "job completed"),
                        Ok(Err(e)) => warn!(worker_id, job_id = %job_id, error = %e, "job failed"),
                        Err(join_err) => {
                            error!(worker_id, job_id = %job_id, error = %join_err, "job panicked")
                        }
                    }
                }
            }));
        }

        info!(num_workers, "started worker pool");
        Self { tx, handles }
    }

    pub async fn submit(&self, job: Arc<dyn Job>) -> Result<(), crate::error::PipelineError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| crate::error::PipelineError::QueueClosed)
    }

    /// Drops the sender (closing the queue) and waits for every worker to
    /// drain and exit, the Rust analogue of the original's `cancel()` +
    /// `close(jobQueue)` + `wg.Wait()` sequence.
    pub async fn stop(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("all workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        id: String,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn execute(&self) -> Result<(), String> {
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn id(&self) -> String {
            self.id.clone()
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        async fn execute(&self) -> Result<(), String> {
            panic!("boom");
        }

        fn id(&self) -> String {
            "panicking".to_string()
        }
    }

    #[tokio::test]
    async fn test_pool_executes_submitted_jobs() {
        let pool = WorkerPool::start(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            pool.submit(Arc::new(CountingJob {
                id: format!("job-{i}"),
                counter: counter.clone(),
            }))
            .await
            .unwrap();
        }

        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_the_worker() {
        let pool = WorkerPool::start(1, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Arc::new(PanickingJob)).await.unwrap();
        pool.submit(Arc::new(CountingJob {
            id: "after-panic".to_string(),
            counter: counter.clone(),
        }))
        .await
        .unwrap();

        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
