//! Batch trigger and digest workers.
//!
//! When a user's queue reaches the threshold it is drained and handed to a
//! bounded pool of workers. Each worker summarizes the links one by one, renders
//! the digest and mails it. Delivery is best effort: failures are logged and the
//! batch is dropped.

use crate::agent::Summarizer;
use crate::config::BatchConfig;
use crate::mail::{MailError, Mailer, OutgoingMail};
use crate::render::{wrap_document, Digest};
use crate::storage::{LinkStore, StorageError, UserLinks};
use crate::summary::LinkSummary;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("digest queue is full")]
    Overloaded,
    #[error("digest workers are shutting down")]
    ShuttingDown,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// One flushed queue waiting to be summarized and mailed
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub email: String,
    pub links: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<UserLinks> for BatchJob {
    fn from(queue: UserLinks) -> Self {
        Self {
            email: queue.email,
            links: queue.links,
            submitted_at: Utc::now(),
        }
    }
}

/// Summarize → render → send for one batch
pub struct Pipeline {
    summarizer: Arc<dyn Summarizer>,
    mailer: Arc<dyn Mailer>,
    delay: Duration,
    subject: String,
}

impl Pipeline {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        mailer: Arc<dyn Mailer>,
        delay: Duration,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            summarizer,
            mailer,
            delay,
            subject: subject.into(),
        }
    }

    /// Summarize links in order, pausing between calls.
    ///
    /// A failed link yields an error entry; the rest of the batch continues.
    pub async fn summarize_all(&self, links: &[String]) -> Vec<LinkSummary> {
        let mut summaries = Vec::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.summarizer.summarize(link).await {
                Ok(summary) => summaries.push(LinkSummary::ok(link, summary)),
                Err(e) => {
                    warn!(url = %link, error = %e, "summarization failed");
                    summaries.push(LinkSummary::failed(link, e));
                }
            }
        }
        summaries
    }

    /// Render the summaries into the mail sent to `email`
    pub fn compose(&self, email: &str, summaries: &[LinkSummary]) -> OutgoingMail {
        let entries: Vec<String> = summaries.iter().map(LinkSummary::to_entry).collect();
        let digest = Digest::parse(&entries);
        OutgoingMail {
            to: email.to_string(),
            subject: self.subject.clone(),
            html: wrap_document(&self.subject, &digest.to_html(), Utc::now()),
            text: digest.to_text(),
        }
    }

    pub async fn process(&self, job: &BatchJob) -> Result<(), MailError> {
        let queued_ms = (Utc::now() - job.submitted_at).num_milliseconds();
        info!(email = %job.email, links = job.links.len(), queued_ms, "processing digest");
        let summaries = self.summarize_all(&job.links).await;
        let failed = summaries.iter().filter(|s| !s.is_ok()).count();
        if failed > 0 {
            warn!(email = %job.email, failed, "digest contains failed summaries");
        }
        let mail = self.compose(&job.email, &summaries);
        self.mailer.send(&mail).await
    }
}

/// Fixed set of workers fed by a bounded channel
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<BatchJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn the workers on the current tokio runtime
    pub fn start(pipeline: Arc<Pipeline>, config: &BatchConfig) -> Self {
        Self::with_limits(
            pipeline,
            config.workers,
            config.queue_capacity,
            config.deadline(),
        )
    }

    pub fn with_limits(
        pipeline: Arc<Pipeline>,
        workers: usize,
        capacity: usize,
        deadline: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&pipeline),
                    deadline,
                    cancel.clone(),
                ))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            cancel,
        }
    }

    /// Queue a job without waiting for room
    pub fn submit(&self, job: BatchJob) -> Result<(), DispatchError> {
        self.reserve()?.send(job);
        Ok(())
    }

    /// Claim a queue slot up front, so a job is only built once it can be queued.
    ///
    /// Dropping the permit unused gives the slot back.
    pub fn reserve(&self) -> Result<OwnedPermit<BatchJob>, DispatchError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DispatchError::ShuttingDown)?;
        sender.try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Overloaded,
            mpsc::error::TrySendError::Closed(_) => DispatchError::ShuttingDown,
        })
    }

    /// Stop accepting jobs and let workers finish the queued ones.
    ///
    /// Jobs still running after `grace` are cancelled.
    pub async fn shutdown(&self, grace: Duration) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));

        let joined = tokio::time::timeout(grace, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "digest worker panicked");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("digest workers still busy after grace period, cancelling");
        }
        self.cancel.cancel();
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<BatchJob>>>,
    pipeline: Arc<Pipeline>,
    deadline: Duration,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else { break };

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(worker = id, email = %job.email, "digest abandoned on shutdown");
                break;
            }
            result = tokio::time::timeout(deadline, pipeline.process(&job)) => match result {
                Ok(Ok(())) => info!(worker = id, email = %job.email, "sent summaries"),
                Ok(Err(e)) => error!(worker = id, email = %job.email, error = %e, "failed to send email"),
                Err(_) => error!(
                    worker = id,
                    email = %job.email,
                    deadline_secs = deadline.as_secs(),
                    "digest exceeded its deadline"
                ),
            }
        }
    }
}

/// Flushes a queue into the worker pool once it reaches the threshold
#[derive(Clone)]
pub struct BatchTrigger {
    store: Arc<dyn LinkStore>,
    pool: Arc<WorkerPool>,
    threshold: usize,
}

impl BatchTrigger {
    pub fn new(store: Arc<dyn LinkStore>, pool: Arc<WorkerPool>, threshold: usize) -> Self {
        Self {
            store,
            pool,
            threshold: threshold.max(1),
        }
    }

    /// Dispatch a digest if `queue` reached the threshold.
    ///
    /// A worker slot is reserved before the stored queue is emptied; when no slot
    /// is free the links stay stored and the next submission tries again. Returns
    /// whether a job was dispatched.
    pub fn on_append(&self, queue: &UserLinks) -> Result<bool, DispatchError> {
        if queue.len() < self.threshold {
            return Ok(false);
        }
        let permit = self.pool.reserve()?;
        let Some(snapshot) = self.store.drain(&queue.email, self.threshold)? else {
            return Ok(false);
        };
        info!(email = %snapshot.email, links = snapshot.len(), "queue full, dispatching digest");
        permit.send(snapshot.into());
        Ok(true)
    }
}
