//! Server configuration: limits, timeouts, and the top-level [`Config`].
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Examples
//!
//! ```no_run
//! # forge_web::impt_default_handler!{MyHandler}
//! use forge_web::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,
//!             body_size: 16 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .unwrap();
//! }
//! ```

use std::{path::PathBuf, time::Duration};

/// Controls server-level concurrency, queueing, and performance behavior.
///
/// A worker pool is created once during startup (see [`crate::server::IoPool`]) and run in an
/// infinite loop, processing connections handed off by the acceptor. This design eliminates the
/// need to create a task per connection on a shared scheduler, keeping each connection pinned to
/// the worker loop that first accepted it.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrent active connections being processed (default: `100`).
    ///
    /// This also sizes the connection pool and the listen backlog.
    pub max_connections: usize,

    /// Number of dedicated worker I/O loops (default: `4`).
    pub workers: usize,

    /// Grace period given to in-flight connections during shutdown (default: `5s`).
    pub deadline_for_destroying_clients: Duration,

    /// Root directory for streamed request bodies and spilled multipart file parts
    /// (default: `std::env::temp_dir()/forge_web`).
    pub tmp_dir: PathBuf,

    /// Format for error responses (default: `true`, meaning JSON).
    ///
    /// If `true`, implicit error bodies are `{"error": "<reason>", "detail": "<code>"}`. If
    /// `false`, the body is just the status reason phrase.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            workers: 4,
            deadline_for_destroying_clients: Duration::from_secs(5),
            tmp_dir: std::env::temp_dir().join("forge_web"),
            json_errors: true,
            _priv: (),
        }
    }
}

/// Connection-level limits and timeouts.
///
/// Default values balance performance, resource usage, and security. Only change if you
/// understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for reading data from socket (default: `2 seconds`).
    ///
    /// If no data is received within this time, the connection is closed. This is the primary
    /// mechanism for cleaning up stalled connections and prevents slowloris attacks.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`).
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from establishment to closure (default: `2 minutes`).
    ///
    /// A final safety net that guarantees no connection lives longer than this duration,
    /// independent of `socket_read_timeout` or `max_requests_per_connection`.
    pub connection_lifetime: Duration,

    /// Whether HTTP keep-alive is honored at all (default: `true`).
    ///
    /// If `false`, every connection is closed after a single request regardless of the
    /// client's `Connection` header.
    pub keep_alive_enabled: bool,

    /// Idle timeout advertised to the client and used as the keep-alive deadline
    /// (default: `30 seconds`).
    pub keep_alive_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,
            keep_alive_enabled: true,
            keep_alive_timeout: Duration::from_secs(30),
            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// # Memory Allocation Strategy
///
/// Each connection pre-allocates a fixed-size buffer sized from these limits:
///
/// ```text
/// Total Buffer = First Line + (Headers x Header Line) + Body + Overhead
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in URL (default: `8`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128 B`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`).
    pub header_value_size: usize,

    /// Maximum request body size in bytes (default: `4 KiB`).
    ///
    /// Bodies larger than this (whether buffered in memory or streamed to a temp file) are
    /// rejected with `413 Payload Too Large`.
    pub body_size: usize,

    /// Chunk size used when streaming a multipart body to a temp file (default: `64 KiB`).
    pub chunk_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,
            chunk_size: 64 * 1024,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection.
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;

        self
    }

    #[inline(always)]
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
}

/// Configuration for response processing and buffer allocation limits.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    pub max_capacity: usize,
    /// Chunk size used when streaming a `file`-mode response (default: `8 KiB`).
    pub file_chunk_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            file_chunk_size: 8 * 1024,
            _priv: (),
        }
    }
}

/// Configuration for the `multipart/form-data` parser.
///
/// Defaults are taken from the reference implementation this design is based on: a 1 MiB
/// per-file in-memory threshold, a 10 MiB cumulative in-memory threshold across every file in
/// one request, a 64 KiB read-chunk size, and a cap of 1024 parts per request.
#[derive(Debug, Clone)]
pub struct MultipartLimits {
    /// Size of the buffer chunk used when reading from a file stream (default: `64 KiB`).
    pub chunk_size: usize,

    /// Maximum size a single uploaded file can reach before it is spilled to a temp file
    /// (default: `1 MiB`).
    pub max_file_size_in_memory: usize,

    /// Cumulative maximum size of all uploaded files kept in memory at once
    /// (default: `10 MiB`). Exceeding it spills subsequent file parts to disk.
    pub max_files_size_in_memory: usize,

    /// Maximum number of parts (files + fields) allowed in a single request (default: `1024`).
    pub max_parts_count: usize,

    /// Maximum size of one part's header section (default: `8 KiB`). Not configurable per
    /// SPEC_FULL.md's fixed 8 KiB cap, but kept explicit rather than a magic number at call
    /// sites.
    pub max_header_section: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_file_size_in_memory: 1024 * 1024,
            max_files_size_in_memory: 1024 * 1024 * 10,
            max_parts_count: 1024,
            max_header_section: 8 * 1024,
            _priv: (),
        }
    }
}

/// The shape of an implicit/default error response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultResponseClass {
    Plain,
    #[default]
    Json,
}

/// Top-level configuration handed to [`crate::Server::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub server: ServerLimits,
    pub connection: ConnLimits,
    pub request: ReqLimits,
    pub response: RespLimits,
    pub multipart: MultipartLimits,
    pub def_response_class: DefaultResponseClass,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            server: ServerLimits::default(),
            connection: ConnLimits::default(),
            request: ReqLimits::default(),
            response: RespLimits::default(),
            multipart: MultipartLimits::default(),
            def_response_class: DefaultResponseClass::default(),
        }
    }
}

impl Config {
    /// Sanitizes the host/port pair per SPEC_FULL.md §4.11 step 5: `"localhost"` is rewritten to
    /// `"127.0.0.1"`; port `0` is rewritten to `8080`.
    pub(crate) fn sanitize(&mut self) {
        if self.host == "localhost" {
            self.host = "127.0.0.1".to_owned();
        }
        if self.port == 0 {
            self.port = 8080;
        }
    }

    /// Loads a `.env` file (if present at `path`) into the process environment, then reads
    /// `FORGE_WEB_HOST` / `FORGE_WEB_PORT` / `FORGE_WEB_WORKERS` into an otherwise-default
    /// [`Config`].
    ///
    /// This is the only place this crate touches `.env` files or `std::env`; nothing runs unless
    /// the embedder explicitly calls this constructor, matching the design notes' "explicit
    /// init, no hidden globals" stance.
    pub fn from_env() -> Result<Self, crate::errors::ConfigError> {
        Self::from_env_path(".env")
    }

    /// Same as [`Config::from_env`] but with an explicit `.env` path.
    pub fn from_env_path(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::errors::ConfigError> {
        // A missing .env file is not an error: dotenvy simply leaves the environment untouched.
        let _ = dotenvy::from_path(path.as_ref());

        let mut cfg = Self::default();

        if let Ok(host) = std::env::var("FORGE_WEB_HOST") {
            cfg.host = host;
        }
        if let Ok(port) = std::env::var("FORGE_WEB_PORT") {
            if let Ok(port) = port.parse() {
                cfg.port = port;
            }
        }
        if let Ok(workers) = std::env::var("FORGE_WEB_WORKERS") {
            if let Ok(workers) = workers.parse() {
                cfg.server.workers = workers;
            }
        }

        cfg.sanitize();
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_localhost_and_zero_port() {
        let mut cfg = Config {
            host: "localhost".to_owned(),
            port: 0,
            ..Config::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn sanitize_leaves_explicit_values_alone() {
        let mut cfg = Config {
            host: "0.0.0.0".to_owned(),
            port: 9090,
            ..Config::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9090);
    }

    #[test]
    fn req_limits_estimated_buffer_size() {
        let limits = ReqLimits::default();
        let size = limits.estimated_buffer_size();
        assert!(size > limits.body_size);
    }
}
