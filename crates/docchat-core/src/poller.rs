//! Processing-status polling for a single message job.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::api::Backend;
use crate::config::PollingConfig;
use crate::error::{Error, Result};
use crate::models::ProcessingJob;

/// How a poll ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job reached `Processado`; carries the final observation.
    Processed(ProcessingJob),
    /// The configured attempt cap was reached first.
    TimedOut { attempts: u32 },
    Cancelled,
}

/// Polls a job's status at a fixed interval until it is processed.
///
/// Query failures never end the poll: the tick is observed as still
/// processing and the next tick follows as usual. Queries never overlap.
#[derive(Clone)]
pub struct StatusPoller {
    backend: Arc<dyn Backend>,
    interval: Duration,
    max_attempts: Option<u32>,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn Backend>, config: &PollingConfig) -> Self {
        Self {
            backend,
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }

    /// Poll `job_id` until terminal, capped or cancelled.
    ///
    /// `observe` sees every observation, including the synthetic ones that
    /// replace failed queries. The first query happens one interval after
    /// the call.
    pub async fn run<F>(&self, job_id: &str, cancel: &CancellationToken, mut observe: F) -> PollOutcome
    where
        F: FnMut(&ProcessingJob) + Send,
    {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            if self.max_attempts.is_some_and(|max| attempts >= max) {
                tracing::warn!(job_id, attempts, "Giving up on job status polling");
                return PollOutcome::TimedOut { attempts };
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = ticker.tick() => {}
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return PollOutcome::Cancelled,
                result = self.backend.job_status(job_id) => result,
            };

            let job = match result {
                Ok(job) => job,
                Err(err) => {
                    tracing::warn!(job_id, attempt = attempts, error = %err, "Status query failed, still waiting");
                    ProcessingJob::still_processing(job_id)
                }
            };
            tracing::debug!(job_id, attempt = attempts, status = %job.status, "Polled job status");
            observe(&job);

            if job.status.is_terminal() {
                tracing::info!(job_id, attempts, "Job processed");
                return PollOutcome::Processed(job);
            }
        }
    }

    /// Run the poll on its own task.
    pub fn spawn<F>(&self, job_id: impl Into<String>, observe: F) -> PollHandle
    where
        F: FnMut(&ProcessingJob) + Send + 'static,
    {
        let poller = self.clone();
        let job_id = job_id.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { poller.run(&job_id, &token, observe).await });
        PollHandle {
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }
}

/// A poll running on its own task. Dropping the handle cancels the poll.
pub struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<PollOutcome>,
    _guard: DropGuard,
}

impl PollHandle {
    /// Stop ticking. The outcome becomes `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the outcome. A crashed poll task is a fatal scheduler error.
    pub async fn join(self) -> Result<PollOutcome> {
        self.join_until(std::future::pending()).await
    }

    /// Like [`join`](Self::join), but cancels the poll once `stop` completes.
    pub async fn join_until<F>(self, stop: F) -> Result<PollOutcome>
    where
        F: Future<Output = ()>,
    {
        let PollHandle {
            cancel,
            mut task,
            _guard,
        } = self;
        let joined = tokio::select! {
            joined = &mut task => joined,
            () = stop => {
                cancel.cancel();
                task.await
            }
        };
        joined.map_err(|err| Error::Scheduler(format!("Status poller task failed: {err}")))
    }
}
