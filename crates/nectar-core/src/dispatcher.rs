//! Update dispatcher and worker pool.
//!
//! Each worker pulls one update from the [`UpdateQueue`], tests it against
//! every record of a registry snapshot, runs all matched handlers
//! concurrently and awaits them before pulling the next update. At most
//! `workers` updates are in flight at once.
//!
//! Handler errors and panics are caught and logged; they never reach the
//! worker loop or sibling handlers. Matched handlers are first polled in
//! registration order, and a handler whose first poll happens after a stop
//! was raised is skipped.
//!
//! ```rust,ignore
//! let queue = UpdateQueue::unbounded();
//! let dispatcher = Dispatcher::start(router, bot, queue.clone(), DispatcherConfig::default());
//!
//! // ... ingestion pushes onto `queue` ...
//!
//! dispatcher.shutdown(Duration::from_secs(10)).await;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::bot::Bot;
use crate::context::Context;
use crate::error::HandlerError;
use crate::handler::{HandlerRecord, Propagation};
use crate::queue::UpdateQueue;
use crate::router::Router;
use crate::types::Update;

/// Default number of dispatch workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Worker pool parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker tasks; values below 1 are raised to 1.
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

/// What happened to one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records whose kind and filter matched.
    pub matched: usize,
    /// Matched handlers that were invoked.
    pub started: usize,
    /// Matched handlers skipped because propagation had been stopped.
    pub skipped: usize,
    /// Started handlers that returned an error or panicked.
    pub failed: usize,
}

enum HandlerRun {
    Completed,
    Skipped,
    Failed,
}

// ============================================================================
// Single-update dispatch
// ============================================================================

/// Dispatches one update against the router's current records.
pub async fn dispatch(router: &Router, bot: &Bot, update: Update) -> DispatchReport {
    let span = info_span!(
        "dispatch",
        update_id = update.update_id,
        kind = %update.update_type()
    );
    dispatch_inner(router, bot, update).instrument(span).await
}

async fn dispatch_inner(router: &Router, bot: &Bot, update: Update) -> DispatchReport {
    let records = router.snapshot();
    let update = Arc::new(update);

    let matched: Vec<&HandlerRecord> = records
        .iter()
        .filter(|record| record_matches(record, &update))
        .collect();

    let mut report = DispatchReport {
        matched: matched.len(),
        ..DispatchReport::default()
    };

    if matched.is_empty() {
        debug!("No handler matched");
        return report;
    }

    let ctx = Context::new(bot.clone(), Arc::clone(&update));
    let runs = matched
        .iter()
        .map(|record| run_handler(record, ctx.clone(), &update));

    for run in join_all(runs).await {
        match run {
            HandlerRun::Completed => report.started += 1,
            HandlerRun::Skipped => report.skipped += 1,
            HandlerRun::Failed => {
                report.started += 1;
                report.failed += 1;
            }
        }
    }

    debug!(
        matched = report.matched,
        started = report.started,
        skipped = report.skipped,
        failed = report.failed,
        "Update dispatched"
    );
    report
}

fn record_matches(record: &HandlerRecord, update: &Update) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| record.matches(update))) {
        Ok(matched) => matched,
        Err(panic) => {
            error!(
                handler = record.name(),
                update_id = update.update_id,
                panic = %panic_message(&*panic),
                "Filter panicked, treating as no match"
            );
            false
        }
    }
}

async fn run_handler(record: &HandlerRecord, ctx: Context, update: &Update) -> HandlerRun {
    if !ctx.is_propagating() {
        debug!(handler = record.name(), "Propagation stopped, skipping handler");
        return HandlerRun::Skipped;
    }

    let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
        record.handler().call(ctx.clone(), update)
    }));
    let future = match started {
        Ok(Some(future)) => future,
        Ok(None) => {
            warn!(handler = record.name(), "Payload missing, skipping handler");
            return HandlerRun::Skipped;
        }
        Err(panic) => {
            error!(
                handler = record.name(),
                update_id = update.update_id,
                panic = %panic_message(&*panic),
                "Handler panicked"
            );
            return HandlerRun::Failed;
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(Propagation::Continue)) => HandlerRun::Completed,
        Ok(Ok(Propagation::Stop)) => {
            debug!(handler = record.name(), "Handler stopped propagation");
            ctx.stop_propagation();
            HandlerRun::Completed
        }
        Ok(Err(source)) => {
            let err = HandlerError {
                handler: record.name().to_string(),
                source,
            };
            error!(update_id = update.update_id, error = %err, "Handler failed");
            HandlerRun::Failed
        }
        Err(panic) => {
            error!(
                handler = record.name(),
                update_id = update.update_id,
                panic = %panic_message(&*panic),
                "Handler panicked"
            );
            HandlerRun::Failed
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================================
// Worker pool
// ============================================================================

/// A running pool of dispatch workers draining an [`UpdateQueue`].
pub struct Dispatcher {
    router: Router,
    bot: Bot,
    queue: UpdateQueue,
    workers: JoinSet<()>,
}

impl Dispatcher {
    /// Spawns `config.workers` worker tasks on the current runtime.
    pub fn start(router: Router, bot: Bot, queue: UpdateQueue, config: DispatcherConfig) -> Self {
        let count = config.workers.max(1);
        let mut workers = JoinSet::new();
        for worker in 0..count {
            let router = router.clone();
            let bot = bot.clone();
            let queue = queue.clone();
            workers.spawn(worker_loop(worker, router, bot, queue));
        }
        info!(workers = count, "Dispatcher started");

        Self {
            router,
            bot,
            queue,
            workers,
        }
    }

    /// Dispatches one update directly, bypassing the queue.
    pub async fn dispatch(&self, update: Update) -> DispatchReport {
        dispatch(&self.router, &self.bot, update).await
    }

    pub fn queue(&self) -> &UpdateQueue {
        &self.queue
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Number of worker tasks still running.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue and waits for the workers to drain it.
    ///
    /// Workers finish their in-flight update and every update still queued.
    /// If `grace` elapses first, the remaining workers are aborted and joined.
    pub async fn shutdown(mut self, grace: Duration) {
        self.queue.close();
        info!(pending = self.queue.len(), "Dispatcher draining");

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.workers.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "Dispatch worker terminated abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Dispatcher stopped"),
            Err(_) => {
                warn!(
                    remaining = self.workers.len(),
                    dropped = self.queue.len(),
                    "Shutdown grace period elapsed, aborting workers"
                );
                self.workers.shutdown().await;
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("queue", &self.queue)
            .finish()
    }
}

async fn worker_loop(worker: usize, router: Router, bot: Bot, queue: UpdateQueue) {
    debug!(worker, "Dispatch worker started");
    while let Some(update) = queue.pop().await {
        dispatch(&router, &bot, update).await;
    }
    debug!(worker, "Dispatch worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, filters};
    use crate::test_support::RecordingTransport;
    use crate::types::{Message, UpdateKind};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bot() -> Bot {
        Bot::new(RecordingTransport::new())
    }

    async fn panics(_ctx: Context, _m: Message) {
        panic!("kaboom")
    }

    fn text_update(id: i64, text: &str) -> Update {
        Update::from_value(json!({
            "update_id": id,
            "message": { "message_id": id, "chat": { "id": 1, "type": "private" }, "text": text }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_zero_matches_is_noop() {
        let router = Router::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        router
            .on_message(move |_ctx: Context, _m: Message| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .filter(Filter::none());

        let report = dispatch(&router, &bot(), text_update(1, "hi")).await;
        assert_eq!(report, DispatchReport::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_affect_sibling() {
        let router = Router::new();
        let ran = Arc::new(AtomicUsize::new(0));

        router
            .on_message(|_ctx: Context, _m: Message| async {
                Err::<(), _>(std::io::Error::other("boom"))
            })
            .name("fails");
        router.on_message(panics).name("panics");
        let r = ran.clone();
        router
            .on_message(move |_ctx: Context, _m: Message| {
                let r = r.clone();
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                }
            })
            .name("sibling");

        let report = dispatch(&router, &bot(), text_update(1, "hi")).await;
        assert_eq!(report.matched, 3);
        assert_eq!(report.started, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_handler_failures_are_logged_with_name_and_update_id() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::ERROR)
            .with_ansi(false)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let router = Router::new();
        router
            .on_message(|_ctx: Context, _m: Message| async {
                Err::<(), _>(std::io::Error::other("boom"))
            })
            .name("fails");
        router.on_message(panics).name("panics");

        let report = dispatch(&router, &bot(), text_update(7, "hi")).await;
        assert_eq!(report.failed, 2);

        let output = logs.contents();
        let failed = output
            .lines()
            .find(|l| l.contains("Handler failed"))
            .expect("error log for the failing handler");
        assert!(failed.contains("update_id=7"), "{failed}");
        assert!(failed.contains("handler 'fails' failed: boom"), "{failed}");

        let panicked = output
            .lines()
            .find(|l| l.contains("Handler panicked"))
            .expect("error log for the panicking handler");
        assert!(panicked.contains("update_id=7"), "{panicked}");
        assert!(panicked.contains("panics"), "{panicked}");
        assert!(panicked.contains("kaboom"), "{panicked}");
    }

    #[tokio::test]
    async fn test_filter_panic_is_no_match() {
        let router = Router::new();
        router
            .on_message(|_ctx: Context, _m: Message| async {})
            .filter(Filter::new(|_| panic!("bad filter")));

        let report = dispatch(&router, &bot(), text_update(1, "hi")).await;
        assert_eq!(report.matched, 0);
    }

    #[tokio::test]
    async fn test_stop_skips_only_unstarted_handlers() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Starts first and suspends before finishing; stays running.
        let l = log.clone();
        router.on_message(move |_ctx: Context, _m: Message| {
            let l = l.clone();
            async move {
                tokio::task::yield_now().await;
                l.lock().push("slow");
            }
        });
        // Raises stop synchronously on its first poll.
        let l = log.clone();
        router.on_message(move |ctx: Context, _m: Message| {
            let l = l.clone();
            async move {
                l.lock().push("stopper");
                ctx.stop_propagation();
            }
        });
        // First polled after the stop: skipped.
        let l = log.clone();
        router.on_message(move |_ctx: Context, _m: Message| {
            let l = l.clone();
            async move {
                l.lock().push("late");
            }
        });

        let report = dispatch(&router, &bot(), text_update(1, "hi")).await;
        assert_eq!(report.matched, 3);
        assert_eq!(report.started, 2);
        assert_eq!(report.skipped, 1);

        let mut seen = log.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec!["slow", "stopper"]);
    }

    #[tokio::test]
    async fn test_stop_return_value_skips_later_update_handlers_only() {
        let router = Router::new();
        let later = Arc::new(AtomicUsize::new(0));

        router.on_message(|_ctx: Context, _m: Message| async { Propagation::Stop });
        let l = later.clone();
        router.on_message(move |_ctx: Context, _m: Message| {
            let l = l.clone();
            async move {
                l.fetch_add(1, Ordering::SeqCst);
            }
        });

        let report = dispatch(&router, &bot(), text_update(1, "a")).await;
        assert_eq!(report.skipped, 1);

        // The stop flag is per update.
        let report = dispatch(&router, &bot(), text_update(2, "b")).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_command_routing() {
        let router = Router::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let h = hits.clone();
        router
            .on_message(move |_ctx: Context, m: Message| {
                let h = h.clone();
                async move {
                    h.lock().push(format!("start:{}", m.text().unwrap_or_default()));
                }
            })
            .filter(filters::command(["start"]));
        let h = hits.clone();
        router
            .on_message(move |_ctx: Context, _m: Message| {
                let h = h.clone();
                async move {
                    h.lock().push("help".to_string());
                }
            })
            .filter(filters::command(["help"]));

        let report = dispatch(&router, &bot(), text_update(1, "/start")).await;
        assert_eq!(report.matched, 1);
        assert_eq!(*hits.lock(), vec!["start:/start".to_string()]);
    }

    #[tokio::test]
    async fn test_registration_during_dispatch_affects_later_updates() {
        let router = Router::new();
        let late_calls = Arc::new(AtomicUsize::new(0));

        let registry = router.clone();
        let calls = late_calls.clone();
        router.on_message(move |_ctx: Context, _m: Message| {
            let registry = registry.clone();
            let calls = calls.clone();
            async move {
                if registry.len() == 1 {
                    registry.on_message(move |_ctx: Context, _m: Message| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            }
        });

        let first = dispatch(&router, &bot(), text_update(1, "a")).await;
        assert_eq!(first.matched, 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        let second = dispatch(&router, &bot(), text_update(2, "b")).await;
        assert_eq!(second.matched, 2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workers_drain_queue_on_shutdown() {
        let router = Router::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        router.on_update(move |_ctx: Context, u: Update| {
            let s = s.clone();
            async move {
                s.lock().push(u.update_id);
            }
        });

        let queue = UpdateQueue::unbounded();
        for id in 1..=20 {
            queue
                .push(Update::new(id, UpdateKind::Poll(Default::default())))
                .await
                .unwrap();
        }

        let dispatcher = Dispatcher::start(
            router,
            bot(),
            queue.clone(),
            DispatcherConfig { workers: 3 },
        );
        assert_eq!(dispatcher.worker_count(), 3);
        dispatcher.shutdown(Duration::from_secs(5)).await;

        let mut ids = seen.lock().clone();
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        assert!(queue.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_grace() {
        let router = Router::new();
        router.on_update(|_ctx: Context, _u: Update| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let queue = UpdateQueue::unbounded();
        queue
            .push(Update::new(1, UpdateKind::Poll(Default::default())))
            .await
            .unwrap();
        let dispatcher = Dispatcher::start(router, bot(), queue, DispatcherConfig { workers: 1 });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        dispatcher.shutdown(Duration::from_secs(2)).await;
        assert!(started.elapsed() < Duration::from_secs(3600));
    }
}
