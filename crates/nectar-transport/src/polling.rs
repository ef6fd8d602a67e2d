//! Long-poll update source.
//!
//! [`LongPoller`] owns the polling cursor. Every item of a batch is handed to
//! the [`UpdateQueue`] before the cursor moves past it, so a crash between
//! "received" and "queued" leads to redelivery, never to a lost update.

use std::time::Duration;

use nectar_core::{
    ApiError, ApiResult, Backoff, GetUpdates, PushOutcome, RetryConfig, Update, UpdateFetcher,
    UpdateQueue, UpdateType,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Long-poll parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Maximum updates per request (1-100).
    pub limit: u32,
    /// Server-side long-poll timeout.
    pub timeout: Duration,
    /// Kinds to receive; `None` keeps the server's current setting.
    pub allowed_updates: Option<Vec<UpdateType>>,
    pub retry: RetryConfig,
    /// Cursor to start from.
    pub initial_offset: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout: Duration::from_secs(30),
            allowed_updates: None,
            retry: RetryConfig::default(),
            initial_offset: 0,
        }
    }
}

/// What happened to the items of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub queued: usize,
    pub duplicates: usize,
    /// Items dropped for a missing id or an unparseable body.
    pub malformed: usize,
    /// Items below the cursor.
    pub stale: usize,
    /// Items discarded by a full queue.
    pub overflow: usize,
    /// The queue refused an item because it was closed.
    pub queue_closed: bool,
}

/// Repeatedly fetches updates and pushes them onto a queue.
pub struct LongPoller<F> {
    fetcher: F,
    queue: UpdateQueue,
    config: PollingConfig,
    offset: i64,
    backoff: Backoff,
}

impl<F: UpdateFetcher> LongPoller<F> {
    pub fn new(fetcher: F, queue: UpdateQueue, config: PollingConfig) -> Self {
        Self {
            fetcher,
            queue,
            offset: config.initial_offset,
            backoff: Backoff::new(config.retry),
            config,
        }
    }

    /// The id of the next update to request.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    fn request(&self) -> GetUpdates {
        GetUpdates {
            offset: Some(self.offset),
            limit: Some(self.config.limit),
            timeout: Some(self.config.timeout.as_secs()),
            allowed_updates: self.config.allowed_updates.clone(),
        }
    }

    /// Fetches one batch and queues it.
    pub async fn poll_once(&mut self) -> ApiResult<BatchReport> {
        let items = self.fetcher.fetch_updates(&self.request()).await?;
        Ok(self.process_batch(items).await)
    }

    /// Queues a batch in order, advancing the cursor after each push.
    ///
    /// An update the queue sheds under
    /// [`OverflowPolicy::DropNewest`](nectar_core::OverflowPolicy::DropNewest) still
    /// counts as consumed: the cursor moves past it, so that update is lost
    /// rather than fetched again against a full queue. Only a closed queue
    /// leaves the cursor in place.
    pub async fn process_batch(&mut self, items: Vec<Value>) -> BatchReport {
        let mut report = BatchReport {
            received: items.len(),
            ..BatchReport::default()
        };

        for item in items {
            let Some(update_id) = item.get("update_id").and_then(Value::as_i64) else {
                warn!(offset = self.offset, "Dropping update without an update_id");
                report.malformed += 1;
                continue;
            };

            if update_id < self.offset {
                debug!(update_id, offset = self.offset, "Skipping already consumed update");
                report.stale += 1;
                continue;
            }

            let update = match Update::from_value(item) {
                Ok(update) => update,
                Err(e) => {
                    warn!(update_id, error = %e, "Dropping malformed update");
                    report.malformed += 1;
                    self.offset = update_id + 1;
                    continue;
                }
            };

            match self.queue.push(update).await {
                Ok(outcome) => {
                    match outcome {
                        PushOutcome::Queued => report.queued += 1,
                        PushOutcome::Duplicate => report.duplicates += 1,
                        PushOutcome::DroppedNewest => report.overflow += 1,
                        PushOutcome::DroppedOldest(_) => {
                            report.queued += 1;
                            report.overflow += 1;
                        }
                    }
                    self.offset = update_id + 1;
                }
                Err(_) => {
                    warn!(update_id, offset = self.offset, "Queue closed, stopping batch");
                    report.queue_closed = true;
                    break;
                }
            }
        }

        report
    }

    /// Polls until `cancel` fires or a fatal error occurs.
    ///
    /// Transient failures are retried with backoff forever. Returns `Ok(())`
    /// on cancellation or when the queue closes.
    pub async fn run(&mut self, cancel: CancellationToken) -> ApiResult<()> {
        info!(offset = self.offset, limit = self.config.limit, "Long polling started");

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(report) => {
                    self.backoff.reset();
                    if report.received > 0 {
                        debug!(
                            received = report.received,
                            queued = report.queued,
                            offset = self.offset,
                            "Batch processed"
                        );
                    }
                    if report.queue_closed {
                        break;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Long polling stopped by a fatal error");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_delay(&e);
                    error!(
                        error = %e,
                        attempt = self.backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "getUpdates failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(offset = self.offset, "Long polling stopped");
        Ok(())
    }

    /// Backoff delay, stretched to the server's flood-control hint.
    fn retry_delay(&mut self, err: &ApiError) -> Duration {
        let delay = self.backoff.next_delay();
        match err.retry_after() {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nectar_core::{OverflowPolicy, QueueConfig, TransportError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Replays scripted responses; an exhausted script yields empty batches
    /// after a short long-poll wait.
    #[derive(Clone, Default)]
    struct ScriptedFetcher {
        script: Arc<Mutex<VecDeque<ApiResult<Vec<Value>>>>>,
        offsets: Arc<Mutex<Vec<(Instant, Option<i64>)>>>,
    }

    impl ScriptedFetcher {
        fn push(&self, response: ApiResult<Vec<Value>>) -> &Self {
            self.script.lock().push_back(response);
            self
        }

        fn offsets(&self) -> Vec<Option<i64>> {
            self.offsets.lock().iter().map(|(_, o)| *o).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.offsets.lock().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl UpdateFetcher for ScriptedFetcher {
        async fn fetch_updates(&self, request: &GetUpdates) -> ApiResult<Vec<Value>> {
            self.offsets.lock().push((Instant::now(), request.offset));
            let next = self.script.lock().pop_front();
            match next {
                Some(response) => response,
                None => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn message(id: i64, text: &str) -> Value {
        json!({ "update_id": id, "message": { "text": text } })
    }

    fn network_error() -> ApiError {
        ApiError::Transport(TransportError::RequestFailed {
            url: "https://api.example.org/bot<redacted>/getUpdates".into(),
            reason: "connection reset".into(),
        })
    }

    #[tokio::test]
    async fn test_two_batches_queue_three_updates() {
        let fetcher = ScriptedFetcher::default();
        fetcher
            .push(Ok(vec![message(5, "a"), message(6, "b")]))
            .push(Ok(vec![message(7, "c")]));
        let queue = UpdateQueue::unbounded();
        let mut poller = LongPoller::new(fetcher.clone(), queue.clone(), PollingConfig::default());

        let first = poller.poll_once().await.unwrap();
        assert_eq!(first.queued, 2);
        assert_eq!(poller.offset(), 7);

        let second = poller.poll_once().await.unwrap();
        assert_eq!(second.queued, 1);
        assert_eq!(poller.offset(), 8);

        assert_eq!(fetcher.offsets(), vec![Some(0), Some(7)]);
        let ids: Vec<i64> = std::iter::from_fn(|| queue.try_pop())
            .map(|u| u.update_id)
            .collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[tokio::test]
    async fn test_malformed_and_stale_items_are_dropped() {
        let queue = UpdateQueue::unbounded();
        let mut poller = LongPoller::new(
            ScriptedFetcher::default(),
            queue.clone(),
            PollingConfig {
                initial_offset: 10,
                ..PollingConfig::default()
            },
        );

        let report = poller
            .process_batch(vec![
                message(9, "stale"),
                json!({ "message": { "text": "no id" } }),
                message(10, "ok"),
                json!({ "update_id": 11, "message": "not an object" }),
                message(12, "ok"),
            ])
            .await;

        assert_eq!(report.received, 5);
        assert_eq!(report.stale, 1);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.queued, 2);
        assert_eq!(poller.offset(), 13);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_advance_cursor() {
        let queue = UpdateQueue::unbounded();
        let mut poller = LongPoller::new(ScriptedFetcher::default(), queue.clone(), PollingConfig::default());

        let report = poller.process_batch(vec![message(1, "a")]).await;
        assert_eq!(poller.offset(), 2);
        assert!(!report.queue_closed);

        queue.close();
        let report = poller
            .process_batch(vec![message(2, "b"), message(3, "c")])
            .await;
        assert!(report.queue_closed);
        assert_eq!(report.queued, 0);
        assert_eq!(poller.offset(), 2);
    }

    #[tokio::test]
    async fn test_redelivered_update_is_deduplicated() {
        let queue = UpdateQueue::bounded(10, OverflowPolicy::Block);
        let mut poller = LongPoller::new(ScriptedFetcher::default(), queue.clone(), PollingConfig::default());

        poller.process_batch(vec![message(1, "a")]).await;
        // A restarted poller starting from an older cursor sees the id again.
        poller.offset = 0;
        let report = poller.process_batch(vec![message(1, "a")]).await;

        assert_eq!(report.duplicates, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(poller.offset(), 2);
    }

    #[tokio::test]
    async fn test_drop_newest_overflow_consumes_the_update() {
        let queue = UpdateQueue::new(QueueConfig {
            capacity: Some(1),
            overflow: OverflowPolicy::DropNewest,
            dedupe_window: 0,
        });
        let mut poller = LongPoller::new(ScriptedFetcher::default(), queue.clone(), PollingConfig::default());

        let report = poller
            .process_batch(vec![message(1, "kept"), message(2, "shed"), message(3, "shed")])
            .await;

        assert_eq!(report.queued, 1);
        assert_eq!(report.overflow, 2);
        assert!(!report.queue_closed);
        assert_eq!(poller.offset(), 4);
        assert_eq!(queue.try_pop().map(|u| u.update_id), Some(1));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_and_recover() {
        let fetcher = ScriptedFetcher::default();
        fetcher
            .push(Err(network_error()))
            .push(Err(ApiError::Timeout))
            .push(Ok(vec![message(1, "hi")]));
        let queue = UpdateQueue::unbounded();
        let config = PollingConfig {
            retry: RetryConfig {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 2.0,
            },
            ..PollingConfig::default()
        };
        let mut poller = LongPoller::new(fetcher.clone(), queue.clone(), config);

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = poller.run(cancel).await;
                (result, poller.offset())
            })
        };

        let update = queue.pop().await.unwrap();
        assert_eq!(update.update_id, 1);
        cancel.cancel();
        let (result, offset) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(offset, 2);

        let times = fetcher.times();
        assert!(times[1] - times[0] >= Duration::from_millis(100));
        assert!(times[2] - times[1] >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_stretches_delay() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push(Err(ApiError::Api {
            code: 429,
            description: "Too Many Requests".into(),
            retry_after: Some(3),
        }));
        let mut poller = LongPoller::new(fetcher.clone(), UpdateQueue::unbounded(), PollingConfig::default());

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let times = fetcher.times();
        assert!(times.len() >= 2);
        assert!(times[1] - times[0] >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_missing_token_is_fatal() {
        let fetcher = ScriptedFetcher::default();
        fetcher.push(Err(ApiError::MissingToken));
        let mut poller = LongPoller::new(fetcher, UpdateQueue::unbounded(), PollingConfig::default());

        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::MissingToken));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_fetch() {
        struct Hanging;

        #[async_trait]
        impl UpdateFetcher for Hanging {
            async fn fetch_updates(&self, _request: &GetUpdates) -> ApiResult<Vec<Value>> {
                std::future::pending().await
            }
        }

        let mut poller = LongPoller::new(Hanging, UpdateQueue::unbounded(), PollingConfig::default());
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
