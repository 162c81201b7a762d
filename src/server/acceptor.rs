//! Listener setup and the accept loop(s).
//!
//! Builds the listening socket with `socket2` (address/port reuse,
//! non-blocking, best-effort `TCP_FASTOPEN` on Linux), then runs either a
//! single accept loop on the I/O pool's default loop, or - when the
//! platform and configuration allow `SO_REUSEPORT` - a small independent
//! listener-and-loop pair per dedicated worker. Every accepted socket is
//! tuned (`TCP_NODELAY`, keepalive, buffer sizes, best-effort
//! `TCP_QUICKACK`), handed a pooled connection object, and spawned onto the
//! same worker the accept loop that took it is already running on.

use crate::{
    errors::ConfigError,
    limits::Config,
    server::{io_pool::IoPool, pool::Pool},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::net::TcpStream;

/// Called once per accepted, pool-tuned connection. Implementations spawn
/// the connection task onto the current worker (the accept loop is already
/// running there, so a plain `tokio::spawn` keeps it pinned).
pub(crate) trait ConnectionSpawner: Send + Sync + 'static {
    fn spawn(&self, stream: TcpStream, addr: SocketAddr, conn: crate::server::pool::PooledConnection);
}

pub(crate) struct Acceptor {
    tasks: Vec<tokio::task::JoinHandle<()>>,
    accepted: Arc<AtomicU64>,
}

impl Acceptor {
    pub(crate) async fn start(
        cfg: &Config,
        io_pool: &IoPool,
        pool: Arc<Pool>,
        spawner: Arc<dyn ConnectionSpawner>,
    ) -> Result<Self, ConfigError> {
        let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                host: cfg.host.clone(),
                port: cfg.port,
            })?;

        let reuse_port = supports_reuse_port();
        let loop_count = if reuse_port {
            (io_pool.worker_count().div_ceil(4)).clamp(1, io_pool.worker_count())
        } else {
            1
        };

        let accepted = Arc::new(AtomicU64::new(0));
        let mut tasks = Vec::with_capacity(loop_count);

        for i in 0..loop_count {
            let listener = build_listener(addr, cfg.server.max_connections, reuse_port)?;
            let listener = tokio::net::TcpListener::from_std(listener).map_err(ConfigError::Bind)?;

            let handle = if reuse_port {
                io_pool.next_io().clone()
            } else {
                io_pool.default_io().clone()
            };

            let pool = Arc::clone(&pool);
            let spawner = Arc::clone(&spawner);
            let accepted = Arc::clone(&accepted);

            let task = handle.spawn(async move {
                accept_loop(listener, pool, spawner, accepted, i).await;
            });
            tasks.push(task);
        }

        Ok(Self { tasks, accepted })
    }

    pub(crate) fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Cancels every accept loop. Does not wait for in-flight connections -
    /// the application controller polls the connection pool separately for
    /// that.
    pub(crate) fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    pool: Arc<Pool>,
    spawner: Arc<dyn ConnectionSpawner>,
    accepted: Arc<AtomicU64>,
    loop_index: usize,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, loop_index, "accept failed");
                continue;
            }
        };

        let Some(conn) = pool.acquire() else {
            tracing::warn!(%addr, "connection pool exhausted, dropping connection");
            continue;
        };

        tune_socket(&stream);
        accepted.fetch_add(1, Ordering::Relaxed);
        spawner.spawn(stream, addr, conn);
    }
}

fn build_listener(
    addr: SocketAddr,
    backlog: usize,
    reuse_port: bool,
) -> Result<std::net::TcpListener, ConfigError> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket =
        Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(ConfigError::Bind)?;

    socket.set_reuse_address(true).map_err(ConfigError::Bind)?;
    #[cfg(all(unix, not(target_os = "solaris")))]
    if reuse_port {
        let _ = socket.set_reuse_port(true);
    }
    let _ = reuse_port;

    socket.set_nonblocking(true).map_err(ConfigError::Bind)?;
    socket.bind(&addr.into()).map_err(ConfigError::Bind)?;
    socket
        .listen(backlog.max(1) as i32)
        .map_err(ConfigError::Bind)?;

    enable_tcp_fast_open(&socket);

    Ok(socket.into())
}

fn supports_reuse_port() -> bool {
    cfg!(all(unix, not(target_os = "solaris")))
}

#[cfg(target_os = "linux")]
fn enable_tcp_fast_open(socket: &Socket) {
    use std::os::fd::AsRawFd;
    let qlen: libc::c_int = 5;
    unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN,
            &qlen as *const _ as *const libc::c_void,
            std::mem::size_of_val(&qlen) as libc::socklen_t,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_tcp_fast_open(_socket: &Socket) {}

fn tune_socket(stream: &TcpStream) {
    if let Err(error) = stream.set_nodelay(true) {
        tracing::debug!(%error, "failed to set TCP_NODELAY");
    }

    enable_quickack(stream);
}

#[cfg(target_os = "linux")]
fn enable_quickack(stream: &TcpStream) {
    use std::os::fd::AsRawFd;
    let on: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_QUICKACK,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of_val(&on) as libc::socklen_t,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_quickack(_stream: &TcpStream) {}
