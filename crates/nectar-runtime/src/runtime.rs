//! Runtime orchestration.
//!
//! [`NectarRuntime`] wires configuration into the moving parts: an HTTP
//! transport behind a rate limiter, a [`Bot`] handle, an [`UpdateQueue`], a
//! [`Dispatcher`] pool and one update source (long polling or a webhook
//! listener).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use nectar_runtime::NectarRuntime;
//!
//! let runtime = NectarRuntime::builder()
//!     .config_file("nectar.toml")
//!     .build()?;
//!
//! runtime.router().on_message(echo);
//! runtime.run().await?;
//! ```
//!
//! # Shutdown order
//!
//! 1. The ingestion token is cancelled and the poller or listener is awaited,
//!    so nothing new enters the queue.
//! 2. The dispatcher closes the queue and drains it, waiting at most
//!    `dispatcher.shutdown_grace_ms`; workers still busy after that are
//!    aborted.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nectar_core::{
    ApiResult, ApiTransport, Bot, Dispatcher, DispatcherConfig, InputFile, Router, SetWebhook,
    UpdateQueue,
};
use nectar_transport::{
    HttpTransport, LongPoller, RateLimitedTransport, RateLimiter, WebhookHandle, WebhookServer,
};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigLoader, ConfigResult, NectarConfig, UpdateMode, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The running update source.
enum Ingestion {
    Polling(JoinHandle<ApiResult<()>>),
    Webhook(WebhookHandle),
}

/// Owns the bot handle and the handler router, and runs the update loop.
pub struct NectarRuntime {
    config: NectarConfig,
    bot: Bot,
    router: Router,
    limiter: Arc<RateLimiter>,
    running: AtomicBool,
}

impl NectarRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime talking to the configured Bot API server.
    ///
    /// Initializes logging from `config.logging`.
    pub fn from_config(config: NectarConfig) -> RuntimeResult<Self> {
        let http = HttpTransport::new(config.bot.to_transport_config())?;
        Self::with_transport(config, http)
    }

    /// Creates a runtime over a custom transport, e.g. a proxy-aware client
    /// or a test double. The transport is still rate-limited.
    pub fn with_transport<T: ApiTransport>(config: NectarConfig, transport: T) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.to_rate_limit_config()));
        let bot = Bot::new(RateLimitedTransport::new(transport, Arc::clone(&limiter)));

        info!(
            mode = %config.mode,
            workers = config.dispatcher.workers,
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            bot,
            router: Router::new(),
            limiter,
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NectarConfig {
        &self.config
    }

    /// The bot handle; clones share the transport and rate limiter.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// The handler router. Handlers may be added before or during `run`.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The limiter shared by every call made through [`bot`](Self::bot).
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes.
    ///
    /// Returns early with an error if startup fails or polling hits a fatal
    /// API error (e.g. an invalid token).
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }
        let result = self.run_inner(shutdown).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let me = self.bot.initialize().await?;
        info!(
            bot_id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            mode = %self.config.mode,
            "Starting Nectar runtime"
        );

        let queue = UpdateQueue::new(self.config.dispatcher.to_queue_config());
        let cancel = CancellationToken::new();
        let mut ingestion = self.start_ingestion(queue.clone(), cancel.clone()).await?;

        let dispatcher = Dispatcher::start(
            self.router.clone(),
            self.bot.clone(),
            queue,
            DispatcherConfig {
                workers: self.config.dispatcher.workers,
            },
        );

        info!("Nectar runtime is now running");

        let mut finished = None;
        match &mut ingestion {
            Ingestion::Polling(task) => {
                tokio::select! {
                    _ = shutdown => {}
                    joined = task => finished = Some(joined),
                }
            }
            Ingestion::Webhook(_) => shutdown.await,
        }

        info!("Stopping Nectar runtime");
        cancel.cancel();
        let outcome = match ingestion {
            Ingestion::Polling(task) => {
                let joined = match finished {
                    Some(joined) => joined,
                    None => task.await,
                };
                polling_outcome(joined)
            }
            Ingestion::Webhook(handle) => {
                handle.join().await;
                Ok(())
            }
        };

        dispatcher.shutdown(self.config.dispatcher.shutdown_grace()).await;
        info!("Nectar runtime stopped");
        outcome
    }

    async fn start_ingestion(
        &self,
        queue: UpdateQueue,
        cancel: CancellationToken,
    ) -> RuntimeResult<Ingestion> {
        match self.config.mode {
            UpdateMode::Polling => {
                let polling = &self.config.polling;
                if polling.delete_webhook {
                    self.bot.delete_webhook(polling.drop_pending_updates).await?;
                    debug!("Webhook removed before polling");
                }

                let mut poller =
                    LongPoller::new(self.bot.clone(), queue, polling.to_polling_config());
                Ok(Ingestion::Polling(tokio::spawn(async move {
                    poller.run(cancel).await
                })))
            }
            UpdateMode::Webhook => {
                self.register_webhook().await?;
                let server = WebhookServer::new(self.config.webhook.to_webhook_config());
                let handle = server.bind(queue, cancel).await?;
                info!(addr = %handle.local_addr(), "Receiving updates by webhook");
                Ok(Ingestion::Webhook(handle))
            }
        }
    }

    /// Calls `setWebhook` when a public URL is configured.
    async fn register_webhook(&self) -> RuntimeResult<()> {
        let settings = &self.config.webhook;
        let Some(url) = &settings.public_url else {
            debug!("No public webhook URL configured, skipping setWebhook");
            return Ok(());
        };

        let certificate = match &settings.certificate {
            Some(path) => Some(read_certificate(path).await?),
            None => None,
        };

        let mut params = SetWebhook::new(url.clone());
        params.max_connections = settings.max_connections;
        params.drop_pending_updates = Some(settings.drop_pending_updates);
        params.secret_token.clone_from(&settings.secret_token);
        params.allowed_updates.clone_from(&self.config.polling.allowed_updates);

        self.bot.set_webhook(&params, certificate).await?;
        info!(url = %url, "Webhook registered");
        Ok(())
    }
}

async fn read_certificate(path: &Path) -> RuntimeResult<InputFile> {
    InputFile::from_path(path)
        .await
        .map(|file| file.mime_type("application/x-pem-file"))
        .map_err(RuntimeError::Certificate)
}

fn polling_outcome(joined: Result<ApiResult<()>, tokio::task::JoinError>) -> RuntimeResult<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Polling stopped");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Polling task failed");
            Ok(())
        }
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder that loads configuration before creating a [`NectarRuntime`].
///
/// ```rust,ignore
/// let runtime = NectarRuntime::builder()
///     .config_file("config/production.toml")
///     .token(std::env::var("BOT_TOKEN")?)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Sets the bot token, overriding files and environment.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.set("bot.token", token.into());
        self
    }

    pub fn merge(mut self, config: NectarConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration.
    pub fn load(self) -> ConfigResult<NectarConfig> {
        self.config_loader.load()
    }

    pub fn build(self) -> RuntimeResult<NectarRuntime> {
        NectarRuntime::from_config(self.load()?)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
