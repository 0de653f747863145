use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::job::SessionJob;

/// Executes one job to completion on a worker thread.
pub type JobHandler = Arc<dyn Fn(SessionJob) + Send + Sync>;

pub struct WorkerPool {
    job_sender: Sender<SessionJob>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads (at least one) sharing a job queue of
    /// `worker_count * 2` slots.
    pub fn new(worker_count: usize, handler: JobHandler) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        Self::with_capacity(worker_count, worker_count * 2, handler)
    }

    pub fn with_capacity(
        worker_count: usize,
        queue_capacity: usize,
        handler: JobHandler,
    ) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<SessionJob>(queue_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("sheetloc-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_handler))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            workers,
            shutdown,
        })
    }

    /// Queues a job. Blocks while the queue is full.
    pub fn submit(&self, job: SessionJob) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Jobs waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<SessionJob>,
    shutdown: Arc<AtomicBool>,
    handler: JobHandler,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!(
                    "Worker {} processing {} job for session {} (queued {} ms)",
                    worker_id,
                    job.kind,
                    job.session_id,
                    job.waited().num_milliseconds()
                );

                let session_id = job.session_id.clone();
                if panic::catch_unwind(AssertUnwindSafe(|| handler(job))).is_err() {
                    error!("Worker {} job for session {} panicked", worker_id, session_id);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::JobKind;
    use std::sync::Mutex;
    use std::time::Instant;

    fn collecting_handler() -> (JobHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: JobHandler = Arc::new(move |job: SessionJob| {
            sink.lock().unwrap().push(job.session_id);
        });
        (handler, seen)
    }

    fn wait_for(seen: &Arc<Mutex<Vec<String>>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_jobs_are_executed() {
        let (handler, seen) = collecting_handler();
        let pool = WorkerPool::new(2, handler).unwrap();

        for i in 0..3 {
            pool.submit(SessionJob::new(format!("s{}", i), 0, JobKind::Advance))
                .unwrap();
        }
        wait_for(&seen, 3);

        let mut ids = seen.lock().unwrap().clone();
        ids.sort();
        assert_eq!(ids, vec!["s0", "s1", "s2"]);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (handler, _) = collecting_handler();
        let pool = WorkerPool::new(1, handler).unwrap();
        pool.shutdown();

        assert!(pool.is_shutdown());
        let result = pool.submit(SessionJob::new("s1", 0, JobKind::Advance));
        assert!(matches!(result, Err(WorkerError::ChannelClosed)));
        pool.wait();
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: JobHandler = Arc::new(move |job: SessionJob| {
            if job.session_id == "boom" {
                panic!("job failed");
            }
            sink.lock().unwrap().push(job.session_id);
        });
        let pool = WorkerPool::new(1, handler).unwrap();

        pool.submit(SessionJob::new("boom", 0, JobKind::Advance)).unwrap();
        pool.submit(SessionJob::new("after", 0, JobKind::Advance)).unwrap();
        wait_for(&seen, 1);

        assert_eq!(*seen.lock().unwrap(), vec!["after"]);
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_queued_counts_jobs_behind_busy_worker() {
        let (started_tx, started_rx) = bounded::<()>(1);
        let (release_tx, release_rx) = bounded::<()>(1);
        let handler: JobHandler = Arc::new(move |_job: SessionJob| {
            let _ = started_tx.try_send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });
        let pool = WorkerPool::with_capacity(1, 4, handler).unwrap();

        pool.submit(SessionJob::new("busy", 0, JobKind::Advance)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.queued(), 0);

        pool.submit(SessionJob::new("s1", 0, JobKind::Advance)).unwrap();
        pool.submit(SessionJob::new("s2", 0, JobKind::Advance)).unwrap();
        assert_eq!(pool.queued(), 2);

        drop(release_tx);
        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let (handler, seen) = collecting_handler();
        let pool = WorkerPool::new(0, handler).unwrap();
        pool.submit(SessionJob::new("s1", 0, JobKind::Restart)).unwrap();
        wait_for(&seen, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        pool.shutdown();
        pool.wait();
    }
}
