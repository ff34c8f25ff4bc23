//! Serial request lane.
//!
//! Every outbound call for one account funnels through a single drain task.
//! Jobs run strictly one at a time in submission order. A failing job stays
//! at the head of the lane and is retried in place after an exponential
//! backoff, so nothing submitted later can overtake it. Every attempt is
//! followed by a randomized pause to smooth the request rate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use threadline_common::ThreadlineError;

use crate::client::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backoff after a failure is `backoff_unit * 2^n`.
    pub backoff_unit: Duration,
    /// Lower bound (inclusive) of the pause after every attempt.
    pub jitter_min: Duration,
    /// Upper bound (exclusive) of the pause after every attempt.
    pub jitter_max: Duration,
    /// Retries allowed per job after its first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backoff_unit: Duration::from_millis(1000),
            jitter_min: Duration::from_millis(1500),
            jitter_max: Duration::from_millis(3500),
            max_retries: None,
        }
    }
}

impl QueueConfig {
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// No pause between attempts. Backoff still applies.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_min = Duration::ZERO;
        self.jitter_max = Duration::ZERO;
        self
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ClientError },

    #[error("Request queue is closed")]
    Closed,
}

impl QueueError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Client(e) if e.is_fatal())
    }
}

impl From<QueueError> for ThreadlineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Client(ClientError::Auth(message)) => ThreadlineError::Auth(message),
            other => ThreadlineError::Client(other.to_string()),
        }
    }
}

/// Backoff before retrying a job that has failed `failures` times while
/// `depth` jobs (itself included) were waiting in the lane.
///
/// The exponent is the depth plus the number of earlier failures of the same
/// job, so a job that keeps failing backs off further on every attempt.
pub fn backoff_delay(unit: Duration, depth: usize, failures: u32) -> Duration {
    let depth = u32::try_from(depth).unwrap_or(u32::MAX);
    let exponent = depth.saturating_add(failures.saturating_sub(1));
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    unit.saturating_mul(factor)
}

fn jitter(config: &QueueConfig) -> Duration {
    let min = config.jitter_min.as_millis() as u64;
    let max = config.jitter_max.as_millis() as u64;
    if max <= min {
        return config.jitter_min;
    }
    Duration::from_millis(rand::rng().random_range(min..max))
}

async fn pace(config: &QueueConfig) {
    let delay = jitter(config);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

type AttemptFuture<'a> = Pin<Box<dyn Future<Output = ClientResult<()>> + Send + 'a>>;

/// A type-erased unit of work. `attempt` may run many times; the typed result
/// is delivered to the submitter on the first success.
trait Job: Send {
    fn label(&self) -> &'static str;

    fn attempt(&mut self) -> AttemptFuture<'_>;

    /// Deliver a terminal error to the submitter.
    fn abandon(self: Box<Self>, err: QueueError);
}

struct Pending<T, F> {
    label: &'static str,
    op: F,
    reply: Option<oneshot::Sender<Result<T, QueueError>>>,
}

impl<T, F, Fut> Job for Pending<T, F>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ClientResult<T>> + Send + 'static,
{
    fn label(&self) -> &'static str {
        self.label
    }

    fn attempt(&mut self) -> AttemptFuture<'_> {
        let fut = (self.op)();
        Box::pin(async move {
            let value = fut.await?;
            if let Some(reply) = self.reply.take() {
                // Submitter may have given up waiting; the work still happened.
                let _ = reply.send(Ok(value));
            }
            Ok(())
        })
    }

    fn abandon(mut self: Box<Self>, err: QueueError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(err));
        }
    }
}

// ---------------------------------------------------------------------------
// SerialRequestQueue
// ---------------------------------------------------------------------------

/// One account's rate-limiting lane. Cheap to share behind an `Arc`; never
/// construct two for the same account (see `ClientRegistry`).
pub struct SerialRequestQueue {
    tx: mpsc::UnboundedSender<Box<dyn Job>>,
    depth: Arc<AtomicUsize>,
}

impl SerialRequestQueue {
    /// Start the lane. Must be called from within a tokio runtime.
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(drain(rx, depth.clone(), config));
        Self { tx, depth }
    }

    /// Jobs submitted but not yet finished, including the one running.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Run `op` in the lane and wait for its result. `op` is called once per
    /// attempt, so it must build a fresh future each time.
    pub async fn submit<T, F, Fut>(&self, label: &'static str, op: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ClientResult<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Box<dyn Job> = Box::new(Pending {
            label,
            op,
            reply: Some(reply_tx),
        });

        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }

        reply_rx.await.map_err(|_| QueueError::Closed)?
    }
}

async fn drain(
    mut rx: mpsc::UnboundedReceiver<Box<dyn Job>>,
    depth: Arc<AtomicUsize>,
    config: QueueConfig,
) {
    while let Some(mut job) = rx.recv().await {
        let mut failures: u32 = 0;

        loop {
            let err = match job.attempt().await {
                Ok(()) => {
                    depth.fetch_sub(1, Ordering::SeqCst);
                    pace(&config).await;
                    break;
                }
                Err(err) => err,
            };
            failures += 1;

            if !err.is_retryable() {
                warn!(label = job.label(), error = %err, "Request failed, not retryable");
                depth.fetch_sub(1, Ordering::SeqCst);
                job.abandon(QueueError::Client(err));
                pace(&config).await;
                break;
            }

            if config.max_retries.is_some_and(|max| failures > max) {
                warn!(label = job.label(), attempts = failures, error = %err, "Request retries exhausted");
                depth.fetch_sub(1, Ordering::SeqCst);
                job.abandon(QueueError::RetriesExhausted {
                    attempts: failures,
                    last: err,
                });
                pace(&config).await;
                break;
            }

            let delay = backoff_delay(config.backoff_unit, depth.load(Ordering::SeqCst), failures);
            warn!(
                label = job.label(),
                failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, retrying in place"
            );
            tokio::time::sleep(delay).await;
            pace(&config).await;
        }
    }

    debug!("Request queue closed");
}
