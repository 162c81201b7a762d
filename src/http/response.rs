//! A highly efficient HTTP response builder for embedded web servers.

use crate::{
    http::{cookie::Cookie, mime, types::{StatusCode, Version}},
    limits::RespLimits,
    BodyWriter, WriteBuffer,
};
use std::{
    borrow::Cow,
    fmt,
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    rc::Rc,
    sync::Arc,
};

/// HTTP response builder for constructing server responses.
///
/// Provides a fluent interface for building HTTP responses with status codes,
/// headers, and body content. Automatically handles content-length calculation
/// and connection management.
///
/// Build responses by chaining methods in strict order:
/// `status()` -> headers / cookies -> exactly one finalizing method
/// ([`body()`](Response::body), [`body_with()`](Response::body_with),
/// [`file()`](Response::file), or [`stream()`](Response::stream)).
///
/// Instances are created automatically by the server and passed to
/// the [`Handler::handle`](crate::Handler::handle).
///
/// # Examples
/// ```
/// use forge_web::{Handled, Request, Response, StatusCode};
///
/// // In your implementation of `Handler`
/// async fn handle(_req: &Request, resp: &mut Response) -> Handled {
///     resp
///         .status(StatusCode::Ok)
///         .header("content-type", "text/html")
///         .body("<h1>Hello World</h1>")
/// }
/// ```
///
/// # Panics
/// All methods perform validity checks in `debug` mode that panic on violations.
/// In `release` mode, these checks are omitted for performance, which may
/// produce invalid HTTP responses. Before creating a release version, conduct tests.
pub struct Response {
    buffer: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    posit_length: usize,
    start_body: usize,
    state: ResponseState,
    content_type_set: bool,
    file_chunk_size: usize,
    mode: ResponseMode,
}

#[doc(hidden)]
pub struct Handled(());

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

/// A boxed, one-shot streaming body callback. See [`Response::stream`].
pub(crate) type StreamFn =
    Box<dyn FnOnce(ChunkSink) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// How a finalized [`Response`] delivers its body.
///
/// Built from the response's headers/status buffer plus one of:
/// - `Buffered`: the body is already appended to the header buffer.
/// - `File`: the body is `Content-Length` bytes streamed straight off disk.
/// - `Chunked`: the body is produced on demand by a user callback and sent with
///   `Transfer-Encoding: chunked`.
pub(crate) enum ResponseMode {
    Buffered,
    File { path: PathBuf },
    Chunked { stream: StreamFn },
}

impl fmt::Debug for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Buffered => f.write_str("Buffered"),
            ResponseMode::File { path } => write!(f, "File({})", path.display()),
            ResponseMode::Chunked { .. } => f.write_str("Chunked(..)"),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("version", &self.version)
            .field("keep_alive", &self.keep_alive)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Response {
    #[inline(always)]
    pub(crate) fn new(limits: &RespLimits) -> Self {
        Self {
            buffer: Vec::with_capacity(limits.default_capacity),
            version: Version::Http11,
            keep_alive: true,
            posit_length: 0,
            start_body: 0,
            state: ResponseState::Clean,
            content_type_set: false,
            file_chunk_size: limits.file_chunk_size,
            mode: ResponseMode::Buffered,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self, limits: &RespLimits) {
        if self.buffer.capacity() > limits.max_capacity {
            self.buffer = Vec::with_capacity(limits.default_capacity);
        } else {
            self.buffer.clear();
        }

        self.version = Version::Http11;
        self.keep_alive = true;
        self.posit_length = 0;
        self.start_body = 0;
        self.state = ResponseState::Clean;
        self.content_type_set = false;
        self.file_chunk_size = limits.file_chunk_size;
        self.mode = ResponseMode::Buffered;
    }

    #[inline(always)]
    pub(crate) fn buffer(&self) -> &Vec<u8> {
        &self.buffer
    }

    /// Whether a finalizing method has been called. Used by the connection loop to detect
    /// a handler that never finished the response and fall back to a 500.
    #[inline(always)]
    pub(crate) fn is_complete(&self) -> bool {
        self.state == ResponseState::Complete
    }

    #[inline(always)]
    pub(crate) fn mode(&self) -> &ResponseMode {
        &self.mode
    }

    #[inline(always)]
    pub(crate) fn take_mode(&mut self) -> ResponseMode {
        std::mem::replace(&mut self.mode, ResponseMode::Buffered)
    }

    #[inline(always)]
    pub(crate) fn file_chunk_size(&self) -> usize {
        self.file_chunk_size
    }
}

/// Methods that work for every response.
impl Response {
    /// Forces the connection to close after this response.
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .close() // connection will close after this response
    ///     .body("Closing connection")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error messages:
    /// - `Must be called before any finalizing method`
    ///
    /// Panics in `debug` mode when called after any finalizing method (a method returning
    /// [`Handled`]).
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        debug_assert!(
            self.state != ResponseState::Complete,
            "Must be called before any finalizing method",
        );

        self.keep_alive = false;
        self
    }
}

impl Response {
    /// Sets the HTTP status code for the response.
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::NotFound)
    ///     .body(r#"{"status": "not found", "code": 404}"#)
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be first and called only once`
    ///
    /// Panics in `debug` mode when called multiple times or after any body method.
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Clean,
            "Must be first and called only once"
        );

        self.buffer
            .extend_from_slice(status.into_first_line(self.version));
        self.state = ResponseState::Headers;
        self
    }

    /// Adds a header to the response.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADERS:
    /// - `content-length` - calculated automatically
    /// - `connection` - use [`close()`](Response::close)
    /// - `set-cookie` - use [`cookie()`](Response::cookie)
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "text/plain")        // &str, &str
    ///     .header("x-custom-id", 128)                  // &str, i32
    ///     .header("x-cache-enabled", true)             // &str, bool
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    ///
    /// Panics in `debug` mode when called before [`status()`](Response::status) or after a
    /// finalizing method.
    #[inline]
    #[track_caller]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        let name_start = self.buffer.len();
        name.write_to(&mut self.buffer);
        if self.buffer[name_start..].eq_ignore_ascii_case(b"content-type") {
            self.content_type_set = true;
        }

        self.buffer.extend_from_slice(b": ");
        value.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Add a multi-value header to the response.
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_multi(b"x-tags", ", ", ["user"])
    ///     .header_multi("accept", "; ", ["text/html", "text/plain"])
    ///     .header_multi("id-users", ", ", vec![123, 234, 345])
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn header_multi<N, S, I, V>(&mut self, name: N, split: S, values: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = V>,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = values.into_iter();
        if let Some(first) = iter.next() {
            first.write_to(&mut self.buffer);

            for value in iter {
                split.write_to(&mut self.buffer);
                value.write_to(&mut self.buffer);
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a header with parameters to the response.
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header_params("content-type", "; ", vec![
    ///         ("text/html", None),
    ///         ("charset", Some("utf-8")),
    ///     ])
    ///     .header_params("cache-control", ", ", [
    ///         ("max-age", Some("3600")),
    ///         ("must-revalidate", None),
    ///     ])
    ///     .body("Done")
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn header_params<N, S, I, K, V>(&mut self, name: N, split: S, params: I) -> &mut Self
    where
        N: WriteBuffer,
        S: WriteBuffer,
        I: IntoIterator<Item = (K, Option<V>)>,
        K: WriteBuffer,
        V: WriteBuffer,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        name.write_to(&mut self.buffer);
        self.buffer.extend_from_slice(b": ");

        let mut iter = params.into_iter();
        if let Some((first_key, first_val)) = iter.next() {
            first_key.write_to(&mut self.buffer);
            if let Some(val) = first_val {
                self.buffer.extend_from_slice(b"=");
                val.write_to(&mut self.buffer);
            }

            for (key, value) in iter {
                split.write_to(&mut self.buffer);
                key.write_to(&mut self.buffer);
                if let Some(val) = value {
                    self.buffer.extend_from_slice(b"=");
                    val.write_to(&mut self.buffer);
                }
            }
        }

        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    /// Adds a `Set-Cookie` header built from a [`Cookie`].
    ///
    /// An invalid cookie (e.g. a `__Host-` name with a non-root path) is logged and silently
    /// dropped rather than aborting the response.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and before any body method`
    #[inline]
    #[track_caller]
    pub fn cookie(&mut self, cookie: &Cookie) -> &mut Self {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and before any body method"
        );

        match cookie.serialize() {
            Ok(value) => {
                self.buffer.extend_from_slice(b"set-cookie: ");
                self.buffer.extend_from_slice(value.as_bytes());
                self.buffer.extend_from_slice(b"\r\n");
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping invalid cookie from response");
            }
        }

        self
    }

    /// Sets the response body and finalizes the response.
    ///
    /// # Side effects
    /// - Adds a `connection` header if necessary.
    /// - Calculates and sets the `content-length` header.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        data.write_to(&mut self.buffer);
        self.end_body()
    }

    /// Writes the response body via closure and finalizes the response.
    ///
    /// # Examples
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .header("content-type", "application/octet-stream")
    ///     .body_with(|writer| {
    ///         writer.write(b"lib: ");
    ///         writer.write("forge_web");
    ///         writer.write(b", just_number: ");
    ///         writer.write(123456);
    ///     })
    /// # });
    /// ```
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        self.start_body();
        f(&mut BodyWriter(&mut self.buffer));
        self.end_body()
    }

    /// Streams `path`'s contents as the response body and finalizes the response.
    ///
    /// Stats the file synchronously to learn its size up front, so the response carries a
    /// real `Content-Length` and a weak `ETag` derived from size and modification time; the
    /// connection loop reads and writes the file in fixed-size chunks afterward. Sets
    /// `Content-Type` from the file extension unless one was already set via [`header()`
    /// ](Response::header).
    ///
    /// If the file cannot be stat'd, logs a warning and falls back to an in-memory
    /// `404 Not Found`-shaped body using whatever status the handler already set.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[inline]
    #[track_caller]
    pub fn file<P: AsRef<Path>>(&mut self, path: P) -> Handled {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(meta) => {
                if !self.content_type_set {
                    self.header("content-type", mime::mime_type_for(path));
                }
                self.header("etag", etag_for(&meta));
                self.start_body_with_length(meta.len() as usize);
                self.mode = ResponseMode::File {
                    path: path.to_path_buf(),
                };
                self.state = ResponseState::Complete;
                Handled(())
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(), error = %err,
                    "file response: could not stat file, falling back to an error body"
                );
                self.start_body();
                b"Not Found".write_to(&mut self.buffer);
                self.end_body()
            }
        }
    }

    /// Streams a body produced on demand by `f` and finalizes the response.
    ///
    /// Sends `Transfer-Encoding: chunked` and `Cache-Control: no-cache`; `f` is invoked by the
    /// connection loop with a [`ChunkSink`] it writes framed chunks to. The connection loop
    /// always appends the closing `0\r\n\r\n` chunk exactly once after `f`'s future resolves.
    ///
    /// # Panics
    /// Error message: `Must be called after status() and any header methods`
    #[track_caller]
    pub fn stream<F, Fut>(&mut self, content_type: &str, f: F) -> Handled
    where
        F: FnOnce(ChunkSink) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug_assert!(
            self.state == ResponseState::Headers,
            "Must be called after status() and any header methods"
        );

        if !self.content_type_set {
            self.header("content-type", content_type);
        }
        self.header("cache-control", "no-cache");

        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }
        self.buffer.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");

        self.mode = ResponseMode::Chunked {
            stream: Box::new(move |sink| Box::pin(f(sink))),
        };
        self.state = ResponseState::Complete;
        Handled(())
    }
}

impl Response {
    #[inline(always)]
    #[track_caller]
    fn start_body(&mut self) -> &mut Self {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        self.posit_length = self.buffer.len();
        self.buffer.extend_from_slice(b"0000000000\r\n\r\n");
        self.start_body = self.buffer.len();
        self
    }

    #[inline(always)]
    fn end_body(&mut self) -> Handled {
        let body_len = self.buffer.len() - self.start_body;
        let (arr, _) = Response::number_to_bytes(body_len as u128);

        let target_range = self.posit_length..self.posit_length + 10;
        self.buffer[target_range].copy_from_slice(&arr[29..39]);
        self.state = ResponseState::Complete;

        Handled(())
    }

    /// Like [`start_body`](Response::start_body), but the length is already known (file mode)
    /// so no placeholder/backfill dance is needed.
    #[inline(always)]
    fn start_body_with_length(&mut self, len: usize) {
        if let Some(value) = self.connection_header() {
            self.header("connection", value);
        }

        self.buffer.extend_from_slice(b"content-length: ");
        let (arr, start) = Response::number_to_bytes(len as u128);
        self.buffer.extend_from_slice(&arr[start..]);
        self.buffer.extend_from_slice(b"\r\n\r\n");
    }

    #[inline(always)]
    const fn connection_header(&self) -> Option<&'static [u8]> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some(b"close"),
            (Version::Http10, true) => Some(b"keep-alive"),
            (Version::Http10, false) => Some(b"close"),
        }
    }

    #[inline]
    const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
        let mut buffer = [b'0'; 39];
        let mut i = 39;

        if n == 0 {
            return (buffer, 38);
        }

        while n > 0 {
            i -= 1;
            buffer[i] = b'0' + (n % 10) as u8;
            n /= 10;
        }

        (buffer, i)
    }
}

fn etag_for(meta: &std::fs::Metadata) -> String {
    use std::time::UNIX_EPOCH;

    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    format!("\"{:x}-{:x}\"", meta.len(), mtime)
}

/// Destination for a [`Response::stream`] callback's chunks.
///
/// Wraps whatever the connection loop is writing to behind a trait object, so streaming
/// handlers do not need to be generic over the concrete socket/writer type.
pub struct ChunkSink {
    io: Box<dyn tokio::io::AsyncWrite + Unpin + Send>,
}

impl ChunkSink {
    pub(crate) fn new(io: Box<dyn tokio::io::AsyncWrite + Unpin + Send>) -> Self {
        Self { io }
    }

    /// Writes one chunked-transfer-encoding frame (`hex-size CRLF payload CRLF`). A call with
    /// an empty slice is a no-op: the terminal zero-length chunk is sent by the connection
    /// loop, never by user code, so it can only ever happen once.
    pub async fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        if data.is_empty() {
            return Ok(());
        }

        self.io.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
        self.io.write_all(data).await?;
        self.io.write_all(b"\r\n").await?;
        Ok(())
    }

    pub(crate) async fn finish(mut self) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.io.write_all(b"0\r\n\r\n").await
    }
}

pub mod write {
    use super::*;

    /// Writer for constructing the HTTP response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// # Examples
    ///
    /// With [WriteBuffer]:
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         w.write("This goes in the response body");
    ///         w.write("<html>...</html>");
    ///         w.write(true);
    ///     })
    /// # });
    /// ```
    /// With [std::io::Write]:
    /// ```
    /// # forge_web::run_test(|_, resp| {
    /// use forge_web::StatusCode;
    /// use std::io::Write;
    ///
    /// resp.status(StatusCode::Ok)
    ///     .body_with(|w| {
    ///         write!(w, "This goes in the response body");
    ///         write!(w, "{} - {} = {}", 6, 2, 4);
    ///     })
    /// # });
    /// ```
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        ///
        /// # Examples
        /// ```
        /// # forge_web::run_test(|_, resp| {
        /// use forge_web::StatusCode;
        ///
        /// resp.status(StatusCode::Ok)
        ///     .body_with(|w| {
        ///         w.write("Hello");
        ///         w.write(123);
        ///         w.write(true);
        ///     })
        /// # });
        /// ```
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to the [`Response`] buffer.
    ///
    /// Implemented for common types like strings, bytes, booleans
    /// and numeric types (excluding floating-point numbers).
    ///
    /// # Note on floating-point
    /// Floating-point numbers are not implemented to avoid locale-dependent
    /// formatting and precision issues in protocol headers.
    ///
    /// For explicit float serialization, consider using the
    /// [`ryu`](https://crates.io/crates/ryu)
    /// crate or formatting to string with controlled precision.
    ///
    /// # Example
    /// ```
    /// use forge_web::WriteBuffer;
    ///
    /// struct MyString(String);
    ///
    /// impl WriteBuffer for MyString {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(self.0.as_bytes())
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        ///
        /// This should avoid intermediate allocations and write the
        /// most efficient representation possible.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
        (non_zero($type:ty), $conn:expr => $($t:ident),*) => {
            $(impl WriteBuffer for std::num::$t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(self.get() as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => &str, String, Box<str>, Cow<'_, str>,
        Arc<str>, Rc<str>, Arc<String>, Rc<String>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => &[u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>,
        Arc<[u8]>, Rc<[u8]>, Arc<Vec<u8>>, Rc<Vec<u8>>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), impl_write_buffer_u128 => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        non_zero(u128), impl_write_buffer_u128 => NonZeroU8,
        NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
    }
    impl_write_buffer! {
        number(i128), impl_write_buffer_i128 => i8, i16, i32, i64, i128, isize
    }
    impl_write_buffer! {
        non_zero(i128), impl_write_buffer_i128 => NonZeroI8,
        NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn impl_write_buffer_u128(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = Response::number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn impl_write_buffer_i128(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }
        let abs = value.unsigned_abs();

        let (arr, start) = Response::number_to_bytes(abs);
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (Version::Http11, false, ""),
            (Version::Http11, true, "connection: close\r\n"),
            (Version::Http10, false, "connection: keep-alive\r\n"),
            (Version::Http10, true, "connection: close\r\n"),
        ];

        for (version, is_close, header) in cases {
            let mut resp = Response::new(&RespLimits::default());
            resp.version = version;

            assert_eq!(resp.keep_alive, true);
            if is_close {
                resp.close();
                assert_eq!(resp.keep_alive, false);
                resp.close();
                assert_eq!(resp.keep_alive, false);
            }

            resp.status(StatusCode::Ok).body("");
            assert_eq!(
                str_op(&resp.buffer),
                format!(
                    "{}{header}content-length: 0000000000\r\n\r\n",
                    str_op(StatusCode::Ok.into_first_line(version))
                )
            );
        }
    }

    #[test]
    #[should_panic(expected = "Must be called before any finalizing method")]
    fn after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.close();
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn basic() {
        let cases = [
            (StatusCode::Ok, "HTTP/1.1 200 OK\r\n"),
            (StatusCode::NotFound, "HTTP/1.1 404 Not Found\r\n"),
            (StatusCode::Found, "HTTP/1.1 302 Found\r\n"),
            (StatusCode::BadRequest, "HTTP/1.1 400 Bad Request\r\n"),
        ];

        for (status, result) in cases {
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);
            assert_eq!(resp.state, ResponseState::Clean);

            resp.status(status);
            assert_eq!(str_op(&resp.buffer), result);
            assert_eq!(resp.state, ResponseState::Headers);
        }
    }

    #[test]
    #[should_panic(expected = "Must be first and called only once")]
    fn double_call() {
        Response::new(&RespLimits::default())
            .status(StatusCode::Ok)
            .status(StatusCode::Found);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;
    use crate::tools::*;

    macro_rules! test_header {
        ($method:ident, $(($name:expr $(, $params:expr)*; $result:expr);)*) => {
           #[test] fn $method() {$(
            let mut resp = Response::new(&RespLimits::default());

            assert_eq!(resp.buffer, []);

            resp.status(StatusCode::Ok);
            assert_eq!(resp.state, ResponseState::Headers);

            resp.$method($name $(, $params)*);
            assert_eq!(str_op(&resp.buffer[17..]), $result);
            assert_eq!(resp.state, ResponseState::Headers);
        )*}};
    }

    test_header! {header,
        ("name", "value"; "name: value\r\n");
        ("", "value"; ": value\r\n");
        ("name", ""; "name: \r\n");

        ("name", 123; "name: 123\r\n");
        ("name", vec![35, 33, 43]; "name: #!+\r\n");
        ("name", false; "name: false\r\n");
        ("name", -123; "name: -123\r\n");
    }

    #[test]
    fn header_tracks_content_type() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        assert_eq!(resp.content_type_set, false);

        resp.header("Content-Type", "text/plain");
        assert_eq!(resp.content_type_set, true);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_before_status() {
        Response::new(&RespLimits::default()).header("Name", "value");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header("Name", "value");
    }

    test_header! {header_multi,
        ("name", ", ", ["q", "w", "e"]; "name: q, w, e\r\n");
        ("name", ",", [true, false]; "name: true,false\r\n");
        ("name", "; ", [-123, 123]; "name: -123; 123\r\n");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_before_status() {
        Response::new(&RespLimits::default()).header_multi("Name", ",", ["value1", "value2"]);
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_multi_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_multi("Name", ",", ["value1", "value2"]);
    }

    test_header! {header_params,
        ("name", ", ", [("name", Some("value"))]; "name: name=value\r\n");
        (
            "name", ", ", [("q", Some("1")), ("w", Some("2")), ("e", Some("3"))];
            "name: q=1, w=2, e=3\r\n"
        );
        (
            "name", ";", [("q", Some("v1")), ("w", Some("v2")), ("e", Some("v3"))];
            "name: q=v1;w=v2;e=v3\r\n"
        );
        (
            "name", ", ", [("min", Some(-128)), ("max", Some(128)), ("mean", Some(0))];
            "name: min=-128, max=128, mean=0\r\n"
        );
        (
            "u128", ", ", [("min", Some(u128::MIN)), ("max", Some(u128::MAX))];
            "u128: min=0, max=340282366920938463463374607431768211455\r\n"
        );
        (
            "i128", ", ", [("min", Some(i128::MIN)), ("max", Some(i128::MAX))];
    "i128: min=-170141183460469231731687303715884105728, max=170141183460469231731687303715884105727\r\n"
        );
        (
            "name", ", ", [("debug", Some(true)), ("doc", Some(false))];
            "name: debug=true, doc=false\r\n"
        );
        (
            "name", "; ", [("debug", None), ("text", Some("asd"))];
            "name: debug; text=asd\r\n"
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_before_status() {
        Response::new(&RespLimits::default()).header_params(
            "Name",
            ",",
            [("name1", Some("value1")), ("name2", None)],
        );
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn header_params_after_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).body("");
        resp.header_params("Name", ",", [("name1", Some("value1")), ("name2", None)]);
    }
}

#[cfg(test)]
mod cookie_tests {
    use super::*;
    use crate::http::cookie::Cookie;
    use crate::tools::*;

    #[test]
    fn cookie_appends_set_cookie_header() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.cookie(&Cookie::new("session", "abc"));

        let out = str_op(&resp.buffer[17..]);
        assert!(out.starts_with("set-cookie: session=abc"));
    }

    #[test]
    fn invalid_cookie_is_dropped_not_panicking() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok);
        resp.cookie(&Cookie::new("__Host-id", "1")); // missing secure=true

        assert_eq!(str_op(&resp.buffer[17..]), "");
    }

    #[test]
    #[should_panic(expected = "Must be called after status() and before any body method")]
    fn cookie_before_status() {
        Response::new(&RespLimits::default()).cookie(&Cookie::new("a", "b"));
    }
}


#[cfg(test)]
mod file_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn file_sets_length_etag_and_mode() {
        let dir = std::env::temp_dir().join("forge_web_response_test_basic.txt");
        std::fs::write(&dir, b"hello world").unwrap();

        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok).file(&dir);

        let head = str_op(&resp.buffer);
        assert!(head.contains("content-type: text/plain; charset=utf-8"));
        assert!(head.contains("etag: \""));
        assert!(head.contains("content-length: 11\r\n\r\n"));
        assert_eq!(resp.state, ResponseState::Complete);
        assert!(matches!(resp.mode, ResponseMode::File { .. }));

        std::fs::remove_file(&dir).ok();
    }

    #[test]
    fn missing_file_falls_back_to_error_body() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::NotFound)
            .file("/nonexistent/path/definitely-missing-forge-web");

        assert!(matches!(resp.mode, ResponseMode::Buffered));
        assert!(str_op(&resp.buffer).ends_with("Not Found"));
    }

    #[test]
    fn file_respects_existing_content_type() {
        let dir = std::env::temp_dir().join("forge_web_response_test_content_type.json");
        std::fs::write(&dir, b"{}").unwrap();

        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok)
            .header("content-type", "application/json")
            .file(&dir);

        let head = str_op(&resp.buffer);
        assert_eq!(head.matches("content-type").count(), 1);

        std::fs::remove_file(&dir).ok();
    }
}

#[cfg(test)]
mod stream_tests {
    use super::*;

    #[test]
    fn stream_sets_chunked_headers_and_mode() {
        let mut resp = Response::new(&RespLimits::default());
        resp.status(StatusCode::Ok)
            .stream("text/event-stream", |_sink| async move {});

        let head = String::from_utf8_lossy(&resp.buffer).into_owned();
        assert!(head.contains("content-type: text/event-stream\r\n"));
        assert!(head.contains("cache-control: no-cache\r\n"));
        assert!(head.contains("transfer-encoding: chunked\r\n"));
        assert_eq!(resp.state, ResponseState::Complete);
        assert!(matches!(resp.mode, ResponseMode::Chunked { .. }));
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::tools::*;

    #[test]
    fn full_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn full_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "HTTP/1.1 302 Found\r\nlocation: /api/update\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.header("location", "/api/update");
        assert_eq!(str_op(&resp.buffer), result[1]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[1].to_owned() + result[2]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence_with_close() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "connection: close\r\ncontent-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        assert_eq!(resp.keep_alive, true);
        resp.close();
        assert_eq!(resp.keep_alive, false);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }

    #[test]
    fn minimal_sequence() {
        let mut resp = Response::new(&RespLimits::default());
        let result = [
            "HTTP/1.1 302 Found\r\n",
            "content-length: 0000000011\r\n\r\nSample body",
        ];

        assert_eq!(resp.buffer, []);
        assert_eq!(resp.state, ResponseState::Clean);

        resp.status(StatusCode::Found);
        assert_eq!(str_op(&resp.buffer), result[0]);
        assert_eq!(resp.state, ResponseState::Headers);

        resp.body("Sample body");
        assert_eq!(str_op(&resp.buffer), result[0].to_owned() + result[1]);
        assert_eq!(resp.state, ResponseState::Complete);
    }
}
