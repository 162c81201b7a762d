//! The per-connection task.
//!
//! Drives one accepted [`TcpStream`] end to end: reads a request into the
//! connection's pooled buffers, dispatches it through the middleware chain,
//! writes the response, and loops for the next request while keep-alive and
//! the connection's limits allow it. On exit the [`PooledConnection`] is
//! always returned to the pool, however the loop ended.

use crate::{
    errors::RequestError,
    http::response::{Response, ResponseMode},
    limits::Config,
    middleware::Chain,
    server::pool::{Pool, PooledConnection},
};
use std::{
    borrow::Cow,
    io,
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// Per-connection user state, created once per TCP connection and reset when
/// the connection closes so the same allocation can serve the next one.
///
/// Distinct from [`Context`](crate::http::context::Context), which carries
/// state scoped to a single request rather than the whole keep-alive
/// connection.
///
/// # Examples
/// ```
/// use forge_web::ConnectionData;
///
/// struct Session {
///     request_count: usize,
/// }
///
/// impl ConnectionData for Session {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance, once per pooled connection object at startup.
    fn new() -> Self;

    /// Restores the instance to its initial state for reuse by the next
    /// connection accepted onto this slot.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// Runs the request/response loop for one accepted connection, then returns
/// `conn` to `pool` regardless of how the loop ended.
pub(crate) async fn run<S: ConnectionData>(
    mut stream: TcpStream,
    addr: SocketAddr,
    mut conn: PooledConnection,
    mut data: S,
    chain: Arc<Chain<S>>,
    cfg: Arc<Config>,
    pool: Arc<Pool>,
) {
    data.reset();

    let deadline = Instant::now() + cfg.connection.connection_lifetime;
    let mut request_count = 0usize;

    loop {
        if Instant::now() >= deadline || request_count >= cfg.connection.max_requests_per_connection {
            break;
        }

        conn.parser.reset();
        conn.request.reset();
        conn.response.reset(&cfg.response);

        let read_timeout = if request_count == 0 {
            cfg.connection.socket_read_timeout
        } else {
            cfg.connection.keep_alive_timeout
        };

        let fill = tokio::select! {
            biased;
            result = conn.parser.fill_buffer(&mut stream, read_timeout) => result,
        };

        let n = match fill {
            Ok(n) => n,
            Err(error) => {
                write_error(&mut stream, &mut conn.response, &map_io(error), &cfg).await;
                break;
            }
        };
        if n == 0 {
            break;
        }

        if let Err(error) = conn.request.parse_head(&mut conn.parser, &cfg.request) {
            write_error(&mut stream, &mut conn.response, &error, &cfg).await;
            break;
        }

        let body_timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(cfg.connection.socket_read_timeout);

        if let Err(error) = conn
            .request
            .read_body(
                &mut conn.parser,
                &mut stream,
                &cfg.request,
                &cfg.multipart,
                &cfg.server.tmp_dir,
                body_timeout,
            )
            .await
        {
            write_error(&mut stream, &mut conn.response, &error, &cfg).await;
            break;
        }

        conn.response.version = conn.request.version();
        conn.response.keep_alive = conn.request.keep_alive(conn.parser.keep_alive_default())
            && cfg.connection.keep_alive_enabled;

        chain.dispatch(&mut data, &conn.request, &mut conn.response).await;

        let keep_alive = conn.response.keep_alive;
        if write_response(&mut stream, &mut conn.response, cfg.connection.socket_write_timeout)
            .await
            .is_err()
        {
            break;
        }

        if !keep_alive {
            break;
        }
        request_count += 1;
    }

    tracing::debug!(%addr, requests = request_count, "connection closed");
    pool.release(conn, &cfg.response);
}

fn map_io(error: io::Error) -> RequestError {
    match error.kind() {
        io::ErrorKind::TimedOut => RequestError::Timeout,
        _ => RequestError::Io(error),
    }
}

async fn write_error(stream: &mut TcpStream, response: &mut Response, error: &RequestError, cfg: &Config) {
    let message = detail_text(error);
    let code = error.code();

    response.status(error.status());
    if cfg.server.json_errors {
        response.header("content-type", "application/json");
        response.body_with(|w| {
            w.write(b"{\"error\":\"");
            w.write(message.as_ref());
            w.write(b"\",\"detail\":\"");
            w.write(code);
            w.write(b"\"}");
        });
    } else {
        response.body(message);
    }

    let _ = write_timed(stream, response.buffer(), cfg.connection.socket_write_timeout).await;
}

fn detail_text(error: &RequestError) -> Cow<'static, str> {
    match error {
        RequestError::Io(_) => Cow::Borrowed("I/O error"),
        other => Cow::Owned(other.to_string()),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    response: &mut Response,
    timeout: Duration,
) -> Result<(), RequestError> {
    write_timed(stream, response.buffer(), timeout).await?;

    match response.take_mode() {
        ResponseMode::Buffered => Ok(()),
        ResponseMode::File { path } => write_file_body(stream, &path, response.file_chunk_size(), timeout).await,
        ResponseMode::Chunked { stream: body } => write_chunked_body(stream, body, timeout).await,
    }
}

async fn write_file_body(
    stream: &mut TcpStream,
    path: &Path,
    chunk_size: usize,
    timeout: Duration,
) -> Result<(), RequestError> {
    let mut file = tokio::fs::File::open(path).await.map_err(RequestError::Io)?;
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = file.read(&mut buf).await.map_err(RequestError::Io)?;
        if n == 0 {
            return Ok(());
        }
        write_timed(stream, &buf[..n], timeout).await?;
    }
}

async fn write_chunked_body(
    stream: &mut TcpStream,
    body: crate::http::response::StreamFn,
    timeout: Duration,
) -> Result<(), RequestError> {
    use crate::http::response::ChunkSink;

    let writer = duplicate_stream(stream).map_err(RequestError::Io)?;
    body(ChunkSink::new(Box::new(writer))).await;

    let writer = duplicate_stream(stream).map_err(RequestError::Io)?;
    write_timed_finish(ChunkSink::new(Box::new(writer)), timeout).await
}

async fn write_timed_finish(sink: crate::http::response::ChunkSink, timeout: Duration) -> Result<(), RequestError> {
    tokio::select! {
        biased;
        result = sink.finish() => result.map_err(RequestError::Io),
        _ = sleep(timeout) => Err(RequestError::Timeout),
    }
}

/// Duplicates the underlying socket so a [`ChunkSink`](crate::http::response::ChunkSink) can own
/// a writer independent of the one the connection loop keeps for its own bookkeeping, without
/// splitting (and later having to rejoin) the stream the loop already owns.
#[cfg(unix)]
fn duplicate_stream(stream: &TcpStream) -> io::Result<TcpStream> {
    use std::os::fd::{AsRawFd, FromRawFd};

    let fd = unsafe { libc::dup(stream.as_raw_fd()) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(true)?;
    TcpStream::from_std(std_stream)
}

#[cfg(not(unix))]
fn duplicate_stream(_stream: &TcpStream) -> io::Result<TcpStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "streamed responses require a unix socket duplicate",
    ))
}

async fn write_timed(stream: &mut TcpStream, data: &[u8], timeout: Duration) -> Result<(), RequestError> {
    tokio::select! {
        biased;
        result = stream.write_all(data) => result.map_err(RequestError::Io),
        _ = sleep(timeout) => Err(RequestError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::request::{Parser, Request},
        limits::{ReqLimits, RespLimits},
        middleware::Core,
        Handled, StatusCode,
    };
    use tokio::net::{TcpListener, TcpStream};

    struct EchoCore;

    impl Core<()> for EchoCore {
        fn call<'a>(
            &'a self,
            _data: &'a mut (),
            _request: &'a crate::Request,
            response: &'a mut Response,
        ) -> crate::middleware::BoxFuture<'a, Handled> {
            Box::pin(async move { response.status(StatusCode::Ok).body("pong") })
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn a_single_request_response_round_trip() {
        let cfg = Arc::new(Config::default());
        let pool = Arc::new(Pool::new(&cfg).unwrap());
        let chain = Arc::new(Chain::new(vec![], Arc::new(EchoCore)));

        let (mut client, server) = connected_pair().await;
        let conn = pool.acquire().unwrap();

        let task = tokio::spawn(run(
            server,
            "127.0.0.1:0".parse().unwrap(),
            conn,
            (),
            chain,
            Arc::clone(&cfg),
            Arc::clone(&pool),
        ));

        client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt as _;
        client.read_to_end(&mut buf).await.unwrap();

        task.await.unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 "));
        assert!(text.ends_with("pong"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn map_io_recognizes_our_own_synthetic_timeout() {
        let error = io::Error::new(io::ErrorKind::TimedOut, "read timeout");
        assert!(matches!(map_io(error), RequestError::Timeout));
    }

    #[allow(dead_code)]
    fn unused_imports_anchor(_: &ReqLimits, _: &RespLimits, _: &Parser, _: &Request) {}
}
