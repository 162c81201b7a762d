//! HTTP request representation and request-line/header/body parsing.

use crate::{
    errors::RequestError,
    http::{
        cookie::CookieJar,
        types::{self, Header, HeaderMap, Method, Url, Version},
    },
    limits::{MultipartLimits, ReqLimits},
};
use bytes::{Bytes, BytesMut};
use memchr::{memchr, memchr_iter};
use std::{cell::RefCell, io, path::PathBuf, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::sleep,
};

/// An HTTP request, owned and independent of the connection buffer that produced it.
///
/// Header values, the URL, and the body are held as [`Bytes`] — cheaply-cloneable,
/// reference-counted byte ranges — rather than borrowed slices, so a `Request` can be handed to
/// a handler (and outlive the read that produced it) without `unsafe` lifetime extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Option<Bytes>,
    body_path: Option<PathBuf>,
    cookies: RefCell<CookieJar>,
}

impl Request {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: None,
            body_path: None,
            cookies: RefCell::new(CookieJar::new()),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = None;
        self.body_path = None;
        self.cookies = RefCell::new(CookieJar::new());
    }
}

// Public API
impl Request {
    #[inline]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Iterates every header in order of arrival.
    #[inline]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter()
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if it was buffered in memory.
    ///
    /// `None` both when there is no body and when the body was streamed to [`Request::body_path`]
    /// instead — exactly one of the two is populated for a request that has a body at all.
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Returns the path of the temp file a `multipart/form-data` body was streamed into, if any.
    #[inline]
    pub fn body_path(&self) -> Option<&std::path::Path> {
        self.body_path.as_deref()
    }

    /// Parses (on first call) and returns the request's `Cookie` header.
    ///
    /// Parsing is memoized: subsequent calls on the same request reuse the result.
    pub fn cookies(&self) -> std::cell::Ref<'_, CookieJar> {
        {
            let mut jar = self.cookies.borrow_mut();
            if let Some(header) = self.headers.get(b"cookie") {
                jar.parse_once(header);
            }
        }
        self.cookies.borrow()
    }
}

// Request-line and header parsing.
impl Request {
    /// Parses the request line and headers out of `parser`'s buffer, starting at its current
    /// position.
    pub(crate) fn parse_head(
        &mut self,
        parser: &mut Parser,
        limits: &ReqLimits,
    ) -> Result<(), RequestError> {
        self.parse_method(parser)?;
        self.parse_url(parser, limits)?;
        self.parse_version(parser)?;
        self.parse_headers(parser, limits)?;

        if self.is_upgrade_request() {
            return Err(RequestError::UpgradeRejected);
        }

        Ok(())
    }

    fn is_upgrade_request(&self) -> bool {
        self.headers.get(b"upgrade").is_some()
    }

    fn parse_method(&mut self, parser: &mut Parser) -> Result<(), RequestError> {
        // "OPTIONS " - the longest possible method with a trailing space (8 bytes).
        let slice = parser
            .get_slice(0, 8)
            .ok_or(RequestError::MalformedRequestLine)?;

        let (method, consumed) = Method::from_bytes(slice)?;
        self.method = method;
        parser.position = consumed;
        Ok(())
    }

    fn parse_url(&mut self, parser: &mut Parser, limits: &ReqLimits) -> Result<(), RequestError> {
        let posit = parser
            .find_char(limits.precalc.first_line, b' ')
            .ok_or(RequestError::MalformedRequestLine)?;

        let start = parser.position;
        let slice_url = parser
            .get_slice(start, posit)
            .ok_or(RequestError::MalformedRequestLine)?;

        if slice_url.is_empty() || slice_url[0] != b'/' {
            return Err(RequestError::MalformedRequestLine);
        }

        let mut last = 0;
        for index in memchr_iter(b'/', slice_url) {
            if self.url.parts.len() == limits.url_parts {
                return Err(RequestError::MalformedRequestLine);
            }

            if index > last {
                let part = parser
                    .copy_bytes(start + last, index - last)
                    .ok_or(RequestError::MalformedRequestLine)?;
                self.url.parts.push(part);
            }
            last = index + 1;
        }

        let (path_end, query_start) = match memchr(b'?', slice_url) {
            Some(q) => (q, Some(q)),
            None => (slice_url.len(), None),
        };

        if last < path_end {
            let part = parser
                .copy_bytes(start + last, path_end - last)
                .ok_or(RequestError::MalformedRequestLine)?;
            self.url.parts.push(part);
        }

        self.url.path = parser
            .copy_bytes(start, path_end)
            .ok_or(RequestError::MalformedRequestLine)?;
        self.url.target = parser
            .copy_bytes(start, posit)
            .ok_or(RequestError::MalformedRequestLine)?;

        if let Some(q) = query_start {
            let query = parser
                .copy_bytes(start + q, posit - q)
                .ok_or(RequestError::MalformedRequestLine)?;
            let limit = limits.url_query_parts;

            let mut pairs = Vec::with_capacity(limit);
            crate::query::Query::parse_into(&mut pairs, &query[1..], limit)
                .map_err(|_| RequestError::MalformedRequestLine)?;

            self.url.query_parts = pairs
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
                .collect();
            self.url.query = Some(query);
        }

        parser.update_position(posit);
        Ok(())
    }

    fn parse_version(&mut self, parser: &mut Parser) -> Result<(), RequestError> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes).
        let slice = parser
            .find_slice(10, b'\n')
            .ok_or(RequestError::MalformedRequestLine)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(RequestError::MalformedRequestLine);
        }

        let (version, keep_alive_default) = Version::from_bytes(&slice[..8])?;
        self.version = version;
        parser.keep_alive_default = keep_alive_default;
        parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }

    fn parse_headers(&mut self, parser: &mut Parser, limits: &ReqLimits) -> Result<(), RequestError> {
        for _ in 0..=limits.header_count {
            let Some(header) = self.parse_header(parser, limits)? else {
                return Ok(());
            };

            if !self.parse_special_header(&header, limits)? {
                self.headers.headers.push(header);
            }
        }

        Err(RequestError::TooManyHeaders)
    }

    fn parse_header(
        &mut self,
        parser: &mut Parser,
        limits: &ReqLimits,
    ) -> Result<Option<Header>, RequestError> {
        // HeaderName: value\r\n
        //                     |
        let end = parser
            .find_char(limits.precalc.h_line, b'\n')
            .ok_or(RequestError::MalformedHeader)?;

        match parser.get_slice(parser.position + end.saturating_sub(1), 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(RequestError::MalformedHeader),
        }

        // HeaderName: value\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(parser, end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(RequestError::MalformedHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > limits.header_name_size || len_value > limits.header_value_size {
            return Err(RequestError::MalformedHeader);
        }

        let name = {
            let mut name = parser
                .copy_bytes_mut(parser.position, split)
                .ok_or(RequestError::MalformedHeader)?;

            if name.is_empty() {
                return Err(RequestError::MalformedHeader);
            }

            types::to_lower_case(&mut name);
            name.freeze()
        };

        let value = parser
            .copy_bytes(parser.position + value_start, len_value)
            .ok_or(RequestError::MalformedHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    fn check_end_of_headers(&mut self, parser: &mut Parser, start: usize) -> Result<(), RequestError> {
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice((parser.position + start).saturating_sub(3), 4)
            .ok_or(RequestError::MalformedHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(RequestError::MalformedHeader);
        }

        parser.position += parser.has_crlf as usize + 1;
        Ok(())
    }

    fn parse_special_header(
        &mut self,
        header: &Header,
        limits: &ReqLimits,
    ) -> Result<bool, RequestError> {
        match header.name.as_ref() {
            b"content-length" => self.parse_content_length(&header.value, limits).map(|_| true),
            _ => Ok(false),
        }
    }

    fn parse_content_length(&mut self, value: &[u8], limits: &ReqLimits) -> Result<(), RequestError> {
        let len = types::slice_to_usize(value).ok_or(RequestError::InvalidContentLength)?;
        if len > limits.body_size {
            return Err(RequestError::BodyTooLarge);
        }
        self.headers.content_length = Some(len);
        Ok(())
    }

    /// Returns the `Connection` header's keep-alive preference, falling back to the
    /// per-version default (`true` for HTTP/1.1, `false` for HTTP/1.0) when absent or
    /// unrecognized.
    pub(crate) fn keep_alive(&self, default: bool) -> bool {
        match self.headers.get(b"connection") {
            Some(value) => {
                let mut normalized = [0u8; 10];
                let len = types::into_lower_case(value, &mut normalized);
                match &normalized[..len] {
                    b"keep-alive" => true,
                    b"close" => false,
                    _ => default,
                }
            }
            None => default,
        }
    }

    fn is_multipart(&self) -> bool {
        self.headers
            .get(b"content-type")
            .map(is_multipart_content_type)
            .unwrap_or(false)
    }
}

fn is_multipart_content_type(content_type: &[u8]) -> bool {
    const PREFIX: &[u8] = b"multipart/form-data";
    content_type.len() >= PREFIX.len() && content_type[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
}

fn has_boundary_param(content_type: &[u8]) -> bool {
    const NEEDLE: &[u8] = b"boundary=";
    content_type
        .windows(NEEDLE.len())
        .any(|w| w.eq_ignore_ascii_case(NEEDLE))
}

// Body reading.
impl Request {
    /// Reads the request body: a `multipart/form-data` body (with a present, valid `boundary`
    /// parameter and a numeric `Content-Length`) is streamed to a temp file under `tmp_dir`;
    /// everything else is read fully into memory, bounded by `limits.body_size`.
    pub(crate) async fn read_body(
        &mut self,
        parser: &mut Parser,
        stream: &mut TcpStream,
        limits: &ReqLimits,
        multipart: &MultipartLimits,
        tmp_dir: &std::path::Path,
        deadline: Duration,
    ) -> Result<(), RequestError> {
        if self.is_multipart() {
            self.read_multipart_body(parser, stream, multipart, tmp_dir, deadline)
                .await
        } else {
            self.read_memory_body(parser, stream, limits, deadline).await
        }
    }

    async fn read_memory_body(
        &mut self,
        parser: &mut Parser,
        stream: &mut TcpStream,
        limits: &ReqLimits,
        deadline: Duration,
    ) -> Result<(), RequestError> {
        let Some(content_length) = self.headers.content_length else {
            return match parser.remaining() == 0 {
                true => Ok(()),
                false => Err(RequestError::MalformedRequestLine),
            };
        };

        if content_length > limits.body_size {
            return Err(RequestError::BodyTooLarge);
        }

        while parser.remaining() < content_length {
            let n = parser
                .fill_buffer(stream, deadline)
                .await
                .map_err(request_io_error)?;
            if n == 0 {
                return Err(RequestError::MalformedRequestLine);
            }
        }

        self.body = parser.copy_bytes(parser.position, content_length);
        Ok(())
    }

    async fn read_multipart_body(
        &mut self,
        parser: &mut Parser,
        stream: &mut TcpStream,
        multipart: &MultipartLimits,
        tmp_dir: &std::path::Path,
        deadline: Duration,
    ) -> Result<(), RequestError> {
        let content_type = self
            .headers
            .get(b"content-type")
            .ok_or(RequestError::MissingBoundary)?;

        if !has_boundary_param(content_type) {
            return Err(RequestError::MissingBoundary);
        }

        let content_length = self.headers.content_length.ok_or(RequestError::MissingBoundary)?;

        let path = tmp_dir.join(temp_file_name());
        let mut file = File::create(&path).await.map_err(RequestError::Io)?;

        let mut remaining = content_length;

        // Drain whatever is already buffered before reading more from the socket.
        let already = parser.remaining().min(remaining);
        if already > 0 {
            let chunk = parser
                .copy_bytes(parser.position, already)
                .ok_or(RequestError::MalformedRequestLine)?;
            file.write_all(&chunk).await.map_err(RequestError::Io)?;
            parser.position += already;
            remaining -= already;
        }

        while remaining > 0 {
            parser.reset();
            let n = parser
                .fill_buffer(stream, deadline)
                .await
                .map_err(request_io_error)?;
            if n == 0 {
                return Err(RequestError::MalformedRequestLine);
            }

            let take = n.min(remaining).min(multipart.chunk_size.max(1));
            let chunk = parser
                .copy_bytes(0, take)
                .ok_or(RequestError::MalformedRequestLine)?;
            file.write_all(&chunk).await.map_err(RequestError::Io)?;
            parser.position = take;
            remaining -= take;
        }

        file.flush().await.map_err(RequestError::Io)?;
        self.body_path = Some(path);
        Ok(())
    }
}

fn request_io_error(err: io::Error) -> RequestError {
    match err.kind() {
        io::ErrorKind::TimedOut => RequestError::Timeout,
        _ => RequestError::Io(err),
    }
}

fn temp_file_name() -> String {
    use rand::Rng;
    let suffix: u64 = rand::thread_rng().gen();
    format!("forge_web-req-{suffix:016x}.tmp")
}

//

/// Growable read buffer plus a cursor into it, with deadline-aware refilling.
///
/// Unlike the zero-copy-via-`unsafe`-transmute approach this replaces, slices extracted from the
/// buffer (headers, URL segments, body) are owned copies ([`Bytes::copy_from_slice`]); the buffer
/// itself is reused across requests via [`Parser::reset`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Parser {
    buf: BytesMut,
    position: usize,
    has_crlf: bool,
    keep_alive_default: bool,
}

impl Parser {
    #[inline]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Parser {
            buf: BytesMut::with_capacity(limits.precalc.buffer),
            position: 0,
            has_crlf: false,
            keep_alive_default: true,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(value: V) -> Self {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(value.as_ref());
        Parser {
            buf,
            position: 0,
            has_crlf: false,
            keep_alive_default: true,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.position = 0;
        self.has_crlf = false;
        self.keep_alive_default = true;
    }

    #[inline]
    pub(crate) fn keep_alive_default(&self) -> bool {
        self.keep_alive_default
    }
}

// Reading from the socket.
impl Parser {
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut TcpStream,
        timeout: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read_buf(&mut self.buf) => {
                read_result
            }
            _ = sleep(timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.position
    }
}

// Searching and slicing.
impl Parser {
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        self.get_slice(last_index, step)
    }

    #[inline]
    fn find_char(&self, limit: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, limit)?;
        memchr(delimiter, slice)
    }

    #[inline]
    fn get_slice(&self, start: usize, len: usize) -> Option<&[u8]> {
        self.buf.get(start..start.checked_add(len)?)
    }

    #[inline]
    fn copy_bytes(&self, start: usize, len: usize) -> Option<Bytes> {
        Some(Bytes::copy_from_slice(self.get_slice(start, len)?))
    }

    #[inline]
    fn copy_bytes_mut(&self, start: usize, len: usize) -> Option<BytesMut> {
        let mut out = BytesMut::with_capacity(len);
        out.extend_from_slice(self.get_slice(start, len)?);
        Some(out)
    }

    #[inline]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;

    fn parse(req: &str) -> (Request, Parser, Result<(), RequestError>) {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(req);
        let mut request = Request::new(&limits);
        let result = request.parse_head(&mut parser, &limits);
        (request, parser, result)
    }

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let (mut request, _, result) = parse("OPTIONS /qwe?q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(result, Ok(()));
        request.reset();
        assert_eq!(Request::new(&limits), request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",   Some(Method::Get)),
            ("PUT / HTTP/1.1\r\n\r\n",   Some(Method::Put)),
            ("POST / HTTP/1.1\r\n\r\n",  Some(Method::Post)),
            ("HEAD / HTTP/1.1\r\n\r\n",  Some(Method::Head)),
            ("PATCH / HTTP/1.1\r\n\r\n", Some(Method::Patch)),
            ("DELETE / HTTP/1.1\r\n\r\n", Some(Method::Delete)),
            ("OPTIONS / HTTP/1.1\r\n\r\n", Some(Method::Options)),

            ("GET", None),
            ("PYU / HTTP/1.1\r\n\r\n", None),
            ("GETGETGET / HTTP/1.1\r\n\r\n", None),
        ];

        for (req, expected) in cases {
            let (request, _, result) = parse(req);

            if let Some(expected) = expected {
                assert_eq!(result, Ok(()));
                assert_eq!(request.method(), expected);
            } else {
                assert_eq!(result, Err(RequestError::MalformedRequestLine));
            }
        }
    }

    #[test]
    fn parse_url_segments_and_query() {
        let (request, _, result) = parse("GET /api/find?user=qwe&id=223 HTTP/1.1\r\n\r\n");

        assert_eq!(result, Ok(()));
        assert_eq!(str_op(request.url().target()), "/api/find?user=qwe&id=223");
        assert_eq!(str_op(request.url().path()), "/api/find");
        assert_eq!(str(request.url().path_segment(0)), Some("api"));
        assert_eq!(str(request.url().path_segment(1)), Some("find"));
        assert_eq!(str(request.url().query(b"user")), Some("qwe"));
        assert_eq!(str(request.url().query(b"id")), Some("223"));
    }

    #[test]
    fn parse_url_collapses_empty_segments() {
        let (request, _, result) = parse("GET ///api//user/// HTTP/1.1\r\n\r\n");

        assert_eq!(result, Ok(()));
        assert_eq!(request.url().path_segment_count(), 2);
        assert_eq!(str(request.url().path_segment(0)), Some("api"));
        assert_eq!(str(request.url().path_segment(1)), Some("user"));
    }

    #[test]
    fn parse_version_variants() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n", Ok(Version::Http11)),
            ("GET / HTTP/1.0\r\n\r\n", Ok(Version::Http10)),
            ("GET / HTTP/1.1\n\n",     Ok(Version::Http11)),
            ("GET / HTTP/2.0\r\n\r\n", Err(RequestError::UnsupportedVersion)),
            ("GET / HTTP/0.9\r\n\r\n", Err(RequestError::UnsupportedVersion)),
        ];

        for (req, expected) in cases {
            let (request, _, result) = parse(req);

            match expected {
                Ok(version) => {
                    assert_eq!(result, Ok(()));
                    assert_eq!(request.version(), version);
                }
                Err(e) => assert_eq!(result, Err(e)),
            }
        }
    }

    #[test]
    fn parse_headers_case_insensitive_and_repeated() {
        let (request, _, result) = parse(
            "GET / HTTP/1.1\r\nHOST: 127.0.0.1\r\nMulti: value1\r\nMulti: value2\r\n\r\n",
        );

        assert_eq!(result, Ok(()));
        assert_eq!(str(request.header(b"host")), Some("127.0.0.1"));
        assert_eq!(str(request.header(b"HOST")), Some("127.0.0.1"));
        assert_eq!(str(request.header(b"multi")), Some("value1"));
    }

    #[test]
    fn parse_invalid_header_section() {
        #[rustfmt::skip]
        let cases = [
            "GET / HTTP/1.1\r\nNo-Colon value\r\n\r\n",
            "GET / HTTP/1.1\r\n: empty-name\r\n\r\n",
            "GET / HTTP/1.1\r\nHeader: value\n\n",
        ];

        for req in cases {
            let (_, _, result) = parse(req);
            assert_eq!(result, Err(RequestError::MalformedHeader));
        }
    }

    #[test]
    fn parse_content_length_header() {
        let limits = ReqLimits::default().precalculate();
        let req = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            limits.body_size
        );
        let (request, _, result) = parse(&req);

        assert_eq!(result, Ok(()));
        assert_eq!(request.content_length(), Some(limits.body_size));
    }

    #[test]
    fn content_length_over_limit_is_rejected() {
        let limits = ReqLimits::default().precalculate();
        let req = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            limits.body_size + 1
        );
        let (_, _, result) = parse(&req);

        assert_eq!(result, Err(RequestError::BodyTooLarge));
    }

    #[test]
    fn non_numeric_content_length_is_bad_request() {
        let (_, _, result) = parse("POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert_eq!(result, Err(RequestError::InvalidContentLength));
    }

    #[test]
    fn upgrade_header_is_rejected() {
        let (_, _, result) = parse("GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        assert_eq!(result, Err(RequestError::UpgradeRejected));
    }

    #[test]
    fn keep_alive_defaults_and_overrides() {
        let (request, parser, result) = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(result, Ok(()));
        assert!(request.keep_alive(parser.keep_alive_default()));

        let (request, parser, result) = parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert_eq!(result, Ok(()));
        assert!(!request.keep_alive(parser.keep_alive_default()));

        let (request, parser, result) = parse("GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(result, Ok(()));
        assert!(request.keep_alive(parser.keep_alive_default()));
    }

    #[test]
    fn is_multipart_detects_content_type_prefix() {
        let (request, _, result) = parse(
            "POST / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=X\r\n\r\n",
        );
        assert_eq!(result, Ok(()));
        assert!(request.is_multipart());
    }

    #[test]
    fn cookies_memoize_after_first_parse() {
        let (request, _, result) = parse("GET / HTTP/1.1\r\nCookie: a=1; b=2\r\n\r\n");
        assert_eq!(result, Ok(()));

        assert_eq!(request.cookies().get("a"), Some("1"));
        assert_eq!(request.cookies().get("b"), Some("2"));
    }
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    #[test]
    fn get_slice_and_copy_bytes() {
        let parser = Parser::from(b"test data here");

        assert_eq!(parser.get_slice(0, 4), Some(b"test".as_ref()));
        assert_eq!(parser.get_slice(5, 4), Some(b"data".as_ref()));
        assert_eq!(parser.get_slice(100, 4), None);
        assert_eq!(parser.copy_bytes(0, 4), Some(Bytes::from_static(b"test")));
    }

    #[test]
    fn update_position_tracks_and_returns_old() {
        let mut parser = Parser::from(b"some data");

        let old = parser.update_position(4);
        assert_eq!(old, 0);
        assert_eq!(parser.position, 5);

        let old = parser.update_position(3);
        assert_eq!(old, 5);
        assert_eq!(parser.position, 9);
    }

    #[test]
    fn find_slice_advances_past_delimiter() {
        let mut parser = Parser::from(b"GET / HTTP/1.1");

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"GET");
        assert_eq!(parser.position, 4);
    }
}
