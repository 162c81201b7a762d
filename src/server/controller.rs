//! The application controller: route registration, the builder, and the
//! running [`Server`] handle.
//!
//! Mirrors the shape the rest of the crate already uses for composing
//! behavior around a request - [`Handler`] is dyn-compatible for the same
//! reason [`Middleware`]/[`Core`] are (instances live behind `Arc<dyn _>`
//! inside the route tree), and [`RouterCore`] is itself just another
//! [`Core`] implementation, wired in as the innermost link of the chain.

use crate::{
    errors::{ConfigError, RouteError, ServerError},
    http::{context::Context, request::Request, response::Response},
    limits::{Config, ConnLimits, MultipartLimits, ReqLimits, RespLimits, ServerLimits},
    middleware::{BoxFuture, Chain, Core, Middleware},
    route::Tree,
    server::{
        acceptor::{Acceptor, ConnectionSpawner},
        connection::{self, ConnectionData},
        io_pool::IoPool,
        pool::{Pool, PooledConnection},
    },
    Handled, Method, StatusCode,
};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};
use tokio::{net::TcpStream, sync::Notify, task::JoinHandle};

/// Processes a matched request into a response.
///
/// # Examples
/// ```
/// use forge_web::{Context, Handled, StatusCode};
///
/// struct Greet;
///
/// impl forge_web::Handler for Greet {
///     fn call<'a>(
///         &'a self,
///         _data: &'a mut (),
///         ctx: Context<'a>,
///         response: &'a mut forge_web::Response,
///     ) -> forge_web::middleware::BoxFuture<'a, Handled> {
///         Box::pin(async move {
///             let name = ctx.params.get("name").unwrap_or("world");
///             response.status(StatusCode::Ok).body(format!("hello, {name}"))
///         })
///     }
/// }
/// ```
pub trait Handler<S = ()>: Send + Sync + 'static
where
    S: ConnectionData,
{
    fn call<'a>(
        &'a self,
        data: &'a mut S,
        ctx: Context<'a>,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled>;
}

/// The routing [`Core`]: resolves a request to a registered handler (or the
/// default handler, or a `404`) and runs it.
struct RouterCore<S: ConnectionData> {
    tree: Tree<Arc<dyn Handler<S>>>,
    default_handler: Option<Arc<dyn Handler<S>>>,
    multipart: MultipartLimits,
    json_errors: bool,
}

impl<S: ConnectionData> Core<S> for RouterCore<S> {
    fn call<'a>(
        &'a self,
        data: &'a mut S,
        request: &'a Request,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Handled> {
        Box::pin(async move {
            let path = String::from_utf8_lossy(request.url().path());

            let (handler, params) = match self.tree.find(request.method(), path.as_ref()) {
                Some((handler, params)) => (Some(handler), params),
                None => (self.default_handler.as_ref(), Default::default()),
            };

            match handler {
                Some(handler) => {
                    let ctx = Context::build(request, params, &self.multipart).await;
                    handler.call(data, ctx, response).await
                }
                None => self.not_found(response),
            }
        })
    }
}

impl<S: ConnectionData> RouterCore<S> {
    fn not_found(&self, response: &mut Response) -> Handled {
        response.status(StatusCode::NotFound);
        if self.json_errors {
            response.header("content-type", "application/json");
            response.body(r#"{"error":"not found","detail":"NOT_FOUND"}"#)
        } else {
            response.body("Not Found")
        }
    }
}

/// Builds a [`Server`]: accumulates configuration, routes, and middleware,
/// then [`ServerBuilder::build`]s a ready-to-[`Server::start`] handle.
///
/// # Examples
/// ```
/// use forge_web::{Handled, Method, Response, Server, StatusCode};
///
/// forge_web::impt_default_handler!{Index}
///
/// # async fn build() {
/// let server = Server::builder()
///     .get("/", Index)
///     .build()
///     .unwrap();
/// # }
/// ```
pub struct ServerBuilder<S: ConnectionData = ()> {
    config: Config,
    tree: Tree<Arc<dyn Handler<S>>>,
    default_handler: Option<Arc<dyn Handler<S>>>,
    route_count: usize,
    middlewares: Vec<Arc<dyn Middleware<S>>>,
}

impl<S: ConnectionData> ServerBuilder<S> {
    pub(crate) fn new() -> Self {
        Self {
            config: Config::default(),
            tree: Tree::new(),
            default_handler: None,
            route_count: 0,
            middlewares: Vec::new(),
        }
    }

    /// Registers `handler` for `method` at `path`.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler<S>,
    ) -> Result<Self, RouteError> {
        self.tree.insert(method, path, Arc::new(handler))?;
        self.route_count += 1;
        Ok(self)
    }

    pub fn get(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Put, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Patch, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Delete, path, handler)
    }

    pub fn options(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Options, path, handler)
    }

    pub fn head(self, path: &str, handler: impl Handler<S>) -> Result<Self, RouteError> {
        self.route(Method::Head, path, handler)
    }

    /// Sets the fallback handler run for any request that matches no
    /// registered route.
    pub fn handler(mut self, handler: impl Handler<S>) -> Self {
        self.default_handler = Some(Arc::new(handler));
        self
    }

    /// Appends a middleware to the chain. Registration order is outermost
    /// first: the first middleware registered runs first on the way in and
    /// last on the way out.
    pub fn middleware(mut self, middleware: impl Middleware<S>) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.config.server = limits;
        self
    }

    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.config.connection = limits;
        self
    }

    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.config.request = limits;
        self
    }

    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.config.response = limits;
        self
    }

    pub fn multipart_limits(mut self, limits: MultipartLimits) -> Self {
        self.config.multipart = limits;
        self
    }

    /// Finalizes the builder into a [`Server`] ready to [`Server::start`].
    ///
    /// Fails with [`ConfigError::NoRoutes`] if neither a route nor a default
    /// handler was ever registered - such a server could never produce
    /// anything but `404`s, which is almost certainly a configuration
    /// mistake rather than an intentional empty server.
    pub fn build(mut self) -> Result<Server<S>, ConfigError> {
        self.config.sanitize();
        self.config.request = self.config.request.clone().precalculate();

        if self.route_count == 0 && self.default_handler.is_none() {
            return Err(ConfigError::NoRoutes);
        }

        let core = Arc::new(RouterCore {
            tree: self.tree,
            default_handler: self.default_handler,
            multipart: self.config.multipart.clone(),
            json_errors: self.config.server.json_errors,
        });
        let chain = Arc::new(Chain::new(self.middlewares, core));

        Ok(Server {
            inner: Arc::new(Inner {
                config: self.config,
                chain,
                state: AtomicU8::new(STOPPED),
                notify: Notify::new(),
                running: Mutex::new(None),
            }),
        })
    }
}

impl<S: ConnectionData> Default for ServerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

struct RunningParts {
    io_pool: Arc<IoPool>,
    acceptor: Acceptor,
    pool: Arc<Pool>,
    signal_task: Option<JoinHandle<()>>,
}

struct Inner<S: ConnectionData> {
    config: Config,
    chain: Arc<Chain<S>>,
    state: AtomicU8,
    notify: Notify,
    running: Mutex<Option<RunningParts>>,
}

/// A running (or not-yet-started) HTTP server, cheaply clonable and shared
/// across tasks via an internal `Arc`.
pub struct Server<S: ConnectionData = ()> {
    inner: Arc<Inner<S>>,
}

impl<S: ConnectionData> Clone for Server<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Spawner<S: ConnectionData> {
    chain: Arc<Chain<S>>,
    config: Arc<Config>,
    pool: Arc<Pool>,
}

impl<S: ConnectionData> ConnectionSpawner for Spawner<S> {
    fn spawn(&self, stream: TcpStream, addr: SocketAddr, conn: PooledConnection) {
        let chain = Arc::clone(&self.chain);
        let config = Arc::clone(&self.config);
        let pool = Arc::clone(&self.pool);
        let data = S::new();

        tokio::spawn(connection::run(stream, addr, conn, data, chain, config, pool));
    }
}

impl<S: ConnectionData> Server<S> {
    /// Starts a new builder. No routes or middleware are registered yet.
    pub fn builder() -> ServerBuilder<S> {
        ServerBuilder::new()
    }

    /// Allocates the connection pool, spins up the I/O worker pool, binds
    /// the listener(s), and begins accepting connections. Returns once the
    /// server has reached the `running` state.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.inner
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ServerError::InvalidState)?;

        if let Err(error) = self.try_start().await {
            self.inner.state.store(STOPPED, Ordering::Release);
            return Err(error);
        }

        self.inner.state.store(RUNNING, Ordering::Release);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn try_start(&self) -> Result<(), ServerError> {
        let config = &self.inner.config;

        tokio::fs::create_dir_all(&config.server.tmp_dir)
            .await
            .map_err(|source| {
                ServerError::Config(ConfigError::TempDir {
                    path: config.server.tmp_dir.display().to_string(),
                    source,
                })
            })?;

        let pool = Arc::new(Pool::new(config).map_err(ServerError::Config)?);
        let io_pool = Arc::new(IoPool::start(config.server.workers));

        let spawner = Arc::new(Spawner {
            chain: Arc::clone(&self.inner.chain),
            config: Arc::new(config.clone()),
            pool: Arc::clone(&pool),
        });

        let acceptor = Acceptor::start(config, &io_pool, Arc::clone(&pool), spawner)
            .await
            .map_err(ServerError::Config)?;

        let signal_task = spawn_signal_watcher(Arc::clone(&self.inner));

        *self.inner.running.lock().unwrap() = Some(RunningParts {
            io_pool,
            acceptor,
            pool,
            signal_task,
        });

        Ok(())
    }

    /// Waits until the server leaves the `running` state, either through
    /// [`Server::stop`] or a caught shutdown signal.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.state.load(Ordering::Acquire) != RUNNING {
                return;
            }
            notified.await;
        }
    }

    /// Starts the server and waits for it to stop. The common entry point
    /// for a `main` function.
    pub async fn launch(&self) -> Result<(), ServerError> {
        self.start().await?;
        self.wait().await;
        Ok(())
    }

    /// Stops accepting new connections, gives in-flight connections up to
    /// `server.deadline_for_destroying_clients` to finish, then tears down
    /// the I/O pool and temp directory.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.inner
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ServerError::InvalidState)?;

        let parts = self.inner.running.lock().unwrap().take();
        if let Some(mut parts) = parts {
            if let Some(task) = parts.signal_task.take() {
                task.abort();
            }
            parts.acceptor.stop();

            let deadline = tokio::time::Instant::now()
                + self.inner.config.server.deadline_for_destroying_clients;
            while parts.pool.len() < parts.pool.capacity() {
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!("forcing shutdown with connections still in flight");
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }

            if let Err(error) = tokio::fs::remove_dir_all(&self.inner.config.server.tmp_dir).await {
                tracing::debug!(%error, "failed to remove temp directory on shutdown");
            }

            drop(parts.acceptor);
            drop(parts.io_pool);
        }

        self.inner.state.store(STOPPED, Ordering::Release);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(unix)]
fn spawn_signal_watcher<S: ConnectionData>(inner: Arc<Inner<S>>) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).ok()?;
    let mut terminate = signal(SignalKind::terminate()).ok()?;
    let mut quit = signal(SignalKind::quit()).ok()?;

    Some(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
        }

        inner.state.store(STOPPING, Ordering::Release);
        let parts = inner.running.lock().unwrap().take();
        if let Some(mut parts) = parts {
            parts.acceptor.stop();
        }
        inner.state.store(STOPPED, Ordering::Release);
        inner.notify.notify_waiters();
    }))
}

#[cfg(not(unix))]
fn spawn_signal_watcher<S: ConnectionData>(_inner: Arc<Inner<S>>) -> Option<JoinHandle<()>> {
    None
}
