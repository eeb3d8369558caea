//! The shared analysis worker pool.
//!
//! One pool serves every buffer and kind: workers are plain threads fed
//! over an mpsc channel, and completed results flow back over another.
//! Nothing here is pinned to a thread; the ordering and staleness
//! guarantees live in the [`crate::Orchestrator`], which the host's poll
//! loop feeds with [`AnalysisPool::try_recv`].
//!
//! Workers honor cancellation at their suspension points: a job whose token
//! is cancelled before it starts is skipped outright, and a result computed
//! for a token that was cancelled mid-analysis is dropped rather than sent.
//! Analyzer failures degrade to an [`AnalysisPayload::Empty`] result for
//! that one request: they never take down a worker or affect other
//! buffers, and nothing is retried (the next edit retriggers naturally).

use crate::analyzer::{AnalysisPayload, AnalysisResult, Analyzer, AnalyzerError};
use crate::orchestrator::DispatchItem;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Returned by [`AnalysisPool::dispatch`] after the pool shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("analysis pool is shut down")]
pub struct PoolClosed;

struct Job {
    item: DispatchItem,
    analyzer: Arc<dyn Analyzer>,
}

/// A fixed set of worker threads executing analyzer requests.
pub struct AnalysisPool {
    jobs: Option<Sender<Job>>,
    results: Receiver<AnalysisResult>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for AnalysisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl AnalysisPool {
    /// Spawn a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let (job_tx, job_rx) = channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = channel::<AnalysisResult>();

        let workers = (0..workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&job_rx);
                let tx = result_tx.clone();
                thread::spawn(move || worker_loop(rx, tx))
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
        }
    }

    /// Queue a dispatched request for execution by `analyzer`.
    pub fn dispatch(
        &self,
        item: DispatchItem,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<(), PoolClosed> {
        self.jobs
            .as_ref()
            .ok_or(PoolClosed)?
            .send(Job { item, analyzer })
            .map_err(|_| PoolClosed)
    }

    /// Take the next completed result without blocking.
    pub fn try_recv(&self) -> Option<AnalysisResult> {
        self.results.try_recv().ok()
    }

    /// Wait up to `timeout` for the next completed result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<AnalysisResult> {
        self.results.recv_timeout(timeout).ok()
    }
}

impl Drop for AnalysisPool {
    fn drop(&mut self) {
        // Closing the job channel lets every worker drain and exit.
        self.jobs = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(jobs: Arc<Mutex<Receiver<Job>>>, results: Sender<AnalysisResult>) {
    loop {
        // Hold the lock only while waiting for the next job, so the other
        // workers can take over as soon as this one starts analyzing.
        let job = {
            let Ok(guard) = jobs.lock() else {
                return;
            };
            guard.recv()
        };
        let Ok(Job { item, analyzer }) = job else {
            return;
        };
        let request = item.request;

        if request.token.is_cancelled() {
            continue;
        }

        let payload = match analyzer.analyze(&request, &item.snapshot.text()) {
            Ok(payload) => payload,
            Err(AnalyzerError::Cancelled) => continue,
            Err(err) => {
                log::warn!(
                    "{:?} analyzer failed for buffer {:?} at revision {}: {err}",
                    request.kind,
                    request.buffer,
                    request.revision,
                );
                AnalysisPayload::Empty
            }
        };

        // Cancelled mid-analysis: the requester has moved on.
        if request.token.is_cancelled() {
            continue;
        }

        let delivered = results.send(AnalysisResult {
            buffer: request.buffer,
            revision: request.revision,
            kind: request.kind,
            payload,
        });
        if delivered.is_err() {
            return;
        }
    }
}
