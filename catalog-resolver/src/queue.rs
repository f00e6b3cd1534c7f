//! Rate-limited outbound request dispatcher
//!
//! One worker task per external client. Jobs wait on a bounded channel,
//! pass through a token-bucket limiter one at a time and run against the
//! shared `reqwest::Client`. Every job yields exactly one result to its
//! caller, either the job's own or [`QueueError::Shutdown`]. Jobs whose
//! caller has gone away are skipped without spending a limiter token.

use futures::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type Reply = oneshot::Sender<Result<String, QueueError>>;

struct Job {
    reply: Reply,
    work: Box<dyn FnOnce(Client) -> BoxFuture<'static, Result<String, QueueError>> + Send>,
}

/// Outbound request failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Request queue is shut down")]
    Shutdown,

    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 429 or 503
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Connection, timeout or body read failure
    #[error("Request failed: {0}")]
    Transport(String),
}

/// Limiter and channel settings for one queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub rate_per_second: u32,
    pub burst: u32,
    pub capacity: usize,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 5,
            burst: 5,
            capacity: 100,
            timeout: Duration::from_secs(15),
            user_agent: None,
        }
    }
}

/// Map a response status onto the queue's error taxonomy
pub fn check_status(status: StatusCode, url: &str) -> Result<(), QueueError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(QueueError::NotFound(url.to_string()))
    } else if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        Err(QueueError::RateLimited(url.to_string()))
    } else {
        Err(QueueError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// Single-worker rate-limited dispatcher
pub struct RequestQueue {
    name: &'static str,
    sender: mpsc::Sender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RequestQueue {
    /// Build the HTTP client and spawn the worker; requires a Tokio runtime
    pub fn new(name: &'static str, config: &QueueConfig) -> Result<Self, QueueError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| QueueError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(name, client, config))
    }

    pub fn with_client(name: &'static str, client: Client, config: &QueueConfig) -> Self {
        let rate = NonZeroU32::new(config.rate_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)));

        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(name, receiver, client, limiter, cancel.clone()));

        debug!(
            queue = name,
            rate = config.rate_per_second,
            burst = config.burst,
            capacity = config.capacity,
            "Request queue started"
        );

        Self {
            name,
            sender,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Run `job` on the worker and wait for its result
    ///
    /// Waits for channel capacity when the queue is full. Dropping the
    /// returned future abandons the job: it is skipped if not yet started,
    /// and a running request is dropped.
    pub async fn enqueue<F, Fut>(&self, job: F) -> Result<String, QueueError>
    where
        F: FnOnce(Client) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, QueueError>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(QueueError::Shutdown);
        }

        let (reply, result) = oneshot::channel();
        let boxed = Job {
            reply,
            work: Box::new(move |client| Box::pin(job(client))),
        };

        self.sender
            .send(boxed)
            .await
            .map_err(|_| QueueError::Shutdown)?;

        // Sender dropped without a reply: the job was discarded at shutdown
        result.await.unwrap_or(Err(QueueError::Shutdown))
    }

    /// Send the request built by `build` and return the body of a 2xx response
    pub async fn fetch<F>(&self, build: F) -> Result<String, QueueError>
    where
        F: FnOnce(&Client) -> RequestBuilder + Send + 'static,
    {
        self.enqueue(move |client| async move {
            let response = build(&client)
                .send()
                .await
                .map_err(|e| QueueError::Transport(e.to_string()))?;

            let url = response.url().to_string();
            check_status(response.status(), &url)?;

            response
                .text()
                .await
                .map_err(|e| QueueError::Transport(e.to_string()))
        })
        .await
    }

    /// Stop the worker: the running job completes, queued jobs fail with
    /// [`QueueError::Shutdown`]. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(queue = self.name, error = %e, "Request queue worker ended abnormally");
            }
            info!(queue = self.name, "Request queue shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    name: &'static str,
    mut receiver: mpsc::Receiver<Job>,
    client: Client,
    limiter: Arc<Limiter>,
    cancel: CancellationToken,
) {
    let mut abandoned = 0usize;
    loop {
        let Job { mut reply, work } = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if reply.is_closed() {
            abandoned += 1;
            continue;
        }

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = reply.closed() => false,
            _ = limiter.until_ready() => true,
        };
        if !ready {
            abandoned += 1;
            continue;
        }

        let outcome = tokio::select! {
            outcome = work(client.clone()) => Some(outcome),
            _ = reply.closed() => None,
        };
        match outcome {
            Some(outcome) => {
                let _ = reply.send(outcome);
            }
            None => abandoned += 1,
        }
    }

    // Buffered jobs are dropped here, which fails their callers
    receiver.close();
    let mut discarded = 0usize;
    while receiver.try_recv().is_ok() {
        discarded += 1;
    }
    debug!(queue = name, discarded, abandoned, "Request queue worker stopped");
}
