//! Global pacing of outbound API calls.
//!
//! A [`RateLimiter`] bounds calls in flight with a semaphore and spaces call
//! starts at least `spacing` apart. The start gate is a fair async mutex
//! holding the instant of the last start: a caller locks it, sleeps until
//! `last + spacing`, starts its call and only then stamps the actual start
//! time and releases the gate. A caller that wakes late therefore pushes the
//! next slot back instead of eating into the spacing.

use std::future::{Future, poll_fn};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nectar_core::{ApiRequest, ApiResult, ApiTransport, TransportError, TransportResult};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// Rate limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of calls in flight.
    pub max_in_flight: usize,
    /// Minimum time between the starts of two calls.
    pub min_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 30,
            min_interval: Duration::from_millis(50),
        }
    }
}

/// Held for the duration of one call.
///
/// Until [`started`](Self::started) is called (or the permit is dropped) the
/// start gate stays locked; releasing it records the current instant as the
/// call's start.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
    gate: Option<OwnedMutexGuard<Option<Instant>>>,
}

impl RateLimitPermit {
    /// Stamps the call start and lets the next caller begin its wait.
    pub fn started(&mut self) {
        if let Some(mut gate) = self.gate.take() {
            *gate = Some(Instant::now());
        }
    }
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        self.started();
    }
}

/// Permits plus minimum spacing between call starts.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    spacing: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            spacing: config.min_interval,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for a permit and for the next time slot.
    ///
    /// The returned permit holds the start gate; call
    /// [`RateLimitPermit::started`] as soon as the call has begun.
    pub async fn acquire(&self) -> TransportResult<RateLimitPermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::Closed)?;

        let gate = Arc::clone(&self.last_start).lock_owned().await;
        if let Some(last) = *gate {
            let slot = last + self.spacing;
            let now = Instant::now();
            if slot > now {
                trace!(wait_ms = (slot - now).as_millis() as u64, "Waiting for rate limit slot");
                tokio::time::sleep_until(slot).await;
            }
        }

        Ok(RateLimitPermit {
            _permit: permit,
            gate: Some(gate),
        })
    }

    /// Fails every pending and future [`acquire`](Self::acquire).
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Wraps a transport so that every call goes through a [`RateLimiter`].
pub struct RateLimitedTransport<T> {
    inner: T,
    limiter: Arc<RateLimiter>,
}

impl<T: ApiTransport> RateLimitedTransport<T> {
    pub fn new(inner: T, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: ApiTransport> ApiTransport for RateLimitedTransport<T> {
    async fn call(&self, request: ApiRequest) -> ApiResult<Value> {
        let permit = self.limiter.acquire().await?;
        paced(permit, self.inner.call(request)).await
    }

    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        let permit = self.limiter.acquire().await?;
        paced(permit, self.inner.download(file_path)).await
    }
}

/// Drives `call` under `permit`, stamping the start right after the first
/// poll has put the request on its way.
async fn paced<F: Future>(mut permit: RateLimitPermit, call: F) -> F::Output {
    let mut call = pin!(call);
    poll_fn(|cx| {
        let poll = call.as_mut().poll(cx);
        permit.started();
        poll
    })
    .await
}
