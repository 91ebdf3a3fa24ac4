//! Application runtime: configuration, runners, servers and shutdown.
//!
//! [`App::run`] refreshes the configuration, sets up logging, refreshes
//! the container, runs every [`Runner`] in registration order and then
//! starts every [`Server`] concurrently. Startup succeeds once all servers
//! have passed the readiness barrier. Shutdown cancels the shared token,
//! stops the servers, waits for their tasks and closes the container.

mod config;
mod logging;
mod signal;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bean::Component;
use crate::cancellation::CancellationToken;
use crate::container::{Container, RefreshState, SharedProperties, Wiring};
use crate::error::{Error, ErrorContext, Result};
use crate::props::Properties;

pub use config::AppConfig;
pub use logging::{LogBackend, TracingBackend};
pub use signal::ReadySignal;

use signal::ReadyBarrier;

/// A task run once, in order, before the servers start.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: CancellationToken) -> Result<()>;
}

/// A long-running service.
///
/// `run` must call [`ReadySignal::trigger_and_wait`] once it is able to
/// serve, and return `Ok(())` or [`Error::ServerClosed`] after `stop`.
#[async_trait]
pub trait Server: Send + Sync {
    async fn run(&self, ctx: CancellationToken, sig: ReadySignal) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

type RunnerFn = Box<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A [`Runner`] backed by a closure.
///
/// ```rust
/// use std::sync::Arc;
/// use springlet::{App, FuncRunner, Runner};
///
/// let mut app = App::new();
/// app.container()
///     .provide(FuncRunner::new(|_ctx| async { Ok(()) }))
///     .export(|r| r as Arc<dyn Runner>);
/// ```
pub struct FuncRunner {
    f: RunnerFn,
}

impl FuncRunner {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx| f(ctx).boxed()),
        }
    }
}

#[async_trait]
impl Runner for FuncRunner {
    async fn run(&self, ctx: CancellationToken) -> Result<()> {
        (self.f)(ctx).await
    }
}

/// Framework bean giving access to the application's root token.
#[derive(Clone, Debug)]
pub struct ContextAware {
    token: CancellationToken,
}

impl ContextAware {
    pub fn context(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Framework bean re-reading the configuration layers on demand.
pub trait ConfigRefresher: Send + Sync {
    /// Re-merges every layer and publishes the result as the new snapshot.
    fn refresh_properties(&self) -> Result<()>;

    /// The latest published snapshot.
    fn properties(&self) -> Arc<Properties>;
}

struct AppRefresher {
    config: AppConfig,
    props: SharedProperties,
}

impl ConfigRefresher for AppRefresher {
    fn refresh_properties(&self) -> Result<()> {
        let p = self.config.refresh()?;
        *self.props.write() = Arc::new(p);
        info!(target: "springlet::app", "properties refreshed");
        Ok(())
    }

    fn properties(&self) -> Arc<Properties> {
        self.props.read().clone()
    }
}

/// Collects the runners and servers the application drives.
struct AppHooks {
    runners: Vec<Arc<dyn Runner>>,
    servers: Vec<Arc<dyn Server>>,
    enable_servers: bool,
}

impl Component for AppHooks {
    fn build(w: &mut Wiring<'_>) -> Result<Self> {
        Ok(Self {
            runners: w.beans("${spring.app.runners:=*?}")?,
            servers: w.beans("${spring.app.servers:=*?}")?,
            enable_servers: w.inject("${spring.app.enable-servers:=true}")?,
        })
    }
}

/// Triggers shutdown of a running [`App`] from anywhere.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    exiting: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown. Only the first request of an application has an
    /// effect; returns whether this call was it.
    pub fn shutdown(&self) -> bool {
        if self
            .exiting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        info!(target: "springlet::app", "shutting down");
        self.token.cancel();
        true
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }
}

/// The application: a container plus its configuration and lifecycle.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use springlet::{App, FuncRunner, Runner};
///
/// #[tokio::main]
/// async fn main() -> springlet::Result<()> {
///     let mut app = App::new();
///     app.container()
///         .provide(FuncRunner::new(|_| async {
///             println!("started");
///             Ok(())
///         }))
///         .export(|r| r as Arc<dyn Runner>);
///     app.run().await
/// }
/// ```
pub struct App {
    config: AppConfig,
    container: Container,
    log: Box<dyn LogBackend>,
    handle: ShutdownHandle,
    servers: Vec<Arc<dyn Server>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            config: AppConfig::new(),
            container: Container::new(),
            log: Box::new(TracingBackend),
            handle: ShutdownHandle {
                token: CancellationToken::new(),
                exiting: Arc::new(AtomicBool::new(false)),
            },
            servers: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Sets an application-level property.
    pub fn property(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.config.property(key, value)
    }

    /// The container, for registering beans before startup.
    pub fn container(&mut self) -> &mut Container {
        &mut self.container
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    /// Replaces the default [`TracingBackend`].
    pub fn with_log_backend(mut self, backend: impl LogBackend + 'static) -> Self {
        self.log = Box::new(backend);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Requests shutdown; see [`ShutdownHandle::shutdown`].
    pub fn shutdown(&self) -> bool {
        self.handle.shutdown()
    }

    /// Starts the application and returns once every server is ready.
    pub async fn start(&mut self) -> Result<()> {
        if self.container.state() != RefreshState::Default {
            return Err(Error::msg("application already started"));
        }
        let props = Arc::new(self.config.refresh()?);
        logging::init_log(self.log.as_ref(), &props)?;

        let token = self.handle.token.clone();
        self.container.provide(ContextAware { token: token.clone() });
        let shared = self.container.shared_properties();
        self.container
            .provide(AppRefresher {
                config: self.config.clone(),
                props: shared,
            })
            .export(|r| r as Arc<dyn ConfigRefresher>);
        self.container.provide_component::<AppHooks>().root();
        self.container.refresh(props)?;

        let hooks = self.container.get::<AppHooks>("")?;
        for runner in &hooks.runners {
            runner.run(token.clone()).await?;
        }

        if !hooks.enable_servers {
            info!(target: "springlet::app", "servers are disabled");
            return Ok(());
        }
        let barrier = ReadyBarrier::new();
        for server in &hooks.servers {
            let sig = barrier.add();
            self.tasks
                .push(spawn_server(server.clone(), token.clone(), sig, self.handle.clone()));
        }
        self.servers = hooks.servers.clone();

        if barrier.wait().await {
            error!(target: "springlet::app", "server intercepted");
            return Err(Error::ServerIntercepted);
        }
        info!(target: "springlet::app", "ready to serve requests");
        Ok(())
    }

    /// Waits for shutdown to be requested, then stops everything.
    pub async fn wait_for_shutdown(&mut self) {
        self.handle.token.cancelled().await;

        let stops = self.servers.iter().map(|s| {
            let s = s.clone();
            async move {
                if let Err(e) = s.stop().await {
                    error!(target: "springlet::app", "shutdown server failed: {}", e);
                }
            }
        });
        join_all(stops).await;

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(target: "springlet::app", "server task panicked");
                } else {
                    error!(target: "springlet::app", "server task failed: {}", e);
                }
            }
        }
        self.servers.clear();

        self.container.close();
        info!(target: "springlet::app", "shutdown complete");
        self.log.destroy();
    }

    /// Starts the application and blocks until shutdown completes.
    ///
    /// Shutdown is triggered by [`App::shutdown`], a [`ShutdownHandle`],
    /// Ctrl-C or SIGTERM.
    pub async fn run(&mut self) -> Result<()> {
        let watcher = tokio::spawn(watch_signals(self.handle.clone()));
        let started = self.start().await;
        if started.is_err() {
            self.shutdown();
        }
        self.wait_for_shutdown().await;
        watcher.abort();
        started.context("start app failed")
    }
}

fn spawn_server(
    server: Arc<dyn Server>,
    ctx: CancellationToken,
    sig: ReadySignal,
    handle: ShutdownHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = AssertUnwindSafe(server.run(ctx, sig.clone()))
            .catch_unwind()
            .await;
        match result {
            Err(panic) => {
                error!(target: "springlet::app", "server panicked");
                sig.intercept();
                handle.shutdown();
                std::panic::resume_unwind(panic);
            }
            Ok(Err(e)) if !e.is_server_closed() => {
                error!(target: "springlet::app", "server serve error: {}", e);
                sig.intercept();
                handle.shutdown();
            }
            Ok(_) => {
                if !sig.has_arrived() {
                    sig.intercept();
                }
                info!(target: "springlet::app", "server closed");
            }
        }
    })
}

async fn watch_signals(handle: ShutdownHandle) {
    let token = handle.token.clone();
    tokio::select! {
        _ = token.cancelled() => {}
        sig = next_signal() => {
            info!(target: "springlet::app", signal = sig, "Received signal");
            handle.shutdown();
        }
    }
}

#[cfg(unix)]
async fn next_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "interrupt",
            _ = term.recv() => "terminated",
        },
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            "interrupt"
        }
    }
}

#[cfg(not(unix))]
async fn next_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "interrupt"
}
