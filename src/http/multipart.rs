//! `multipart/form-data` parsing.
//!
//! The parser runs the same state machine over two different byte sources: an
//! in-memory slice (a request buffered wholly in RAM) or a file read through a
//! windowed buffer (a request that was streamed to a temp file by
//! [`crate::http::request::Request::read_body`]). [`PartSource`] is the seam
//! between the two; [`parse_core`] never knows which one it is driving.

use crate::{errors::MultipartError, limits::MultipartLimits};
use bytes::{Buf, BytesMut};
use std::{collections::HashMap, future::Future, path::Path, path::PathBuf};
use tokio::io::AsyncReadExt;

/// Result of a successful parse: field name/value pairs and uploaded files, keyed by part name.
#[derive(Debug, Default)]
pub(crate) struct ParsedMultipart {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

/// One uploaded file, either held in memory or spilled to a temp file.
///
/// Move-only storage: dropping a spilled file deletes its temp path.
#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    storage: FileStorage,
}

#[derive(Debug)]
enum FileStorage {
    Memory(Vec<u8>),
    TempFile(PathBuf),
}

impl UploadedFile {
    pub fn is_in_memory(&self) -> bool {
        matches!(self.storage, FileStorage::Memory(_))
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            FileStorage::Memory(bytes) => Some(bytes),
            FileStorage::TempFile(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            FileStorage::TempFile(path) => Some(path),
            FileStorage::Memory(_) => None,
        }
    }
}

impl Drop for UploadedFile {
    fn drop(&mut self) {
        if let FileStorage::TempFile(path) = &self.storage {
            if let Err(error) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), %error, "failed to delete spilled multipart file");
            }
        }
    }
}

/// Extracts the `boundary` parameter from a `Content-Type` header value, if present.
pub(crate) fn extract_boundary(content_type: &[u8]) -> Option<Vec<u8>> {
    const NEEDLE: &[u8] = b"boundary=";
    let pos = content_type
        .windows(NEEDLE.len())
        .position(|w| w.eq_ignore_ascii_case(NEEDLE))?;

    let mut value = &content_type[pos + NEEDLE.len()..];
    if let Some(end) = memchr::memchr(b';', value) {
        value = &value[..end];
    }
    let value = trim_ascii(value);
    let value = value
        .strip_prefix(b"\"")
        .and_then(|v| v.strip_suffix(b"\""))
        .unwrap_or(value);

    (!value.is_empty()).then(|| value.to_vec())
}

/// Parses a multipart body already held in memory.
pub(crate) async fn parse_memory(
    body: &[u8],
    boundary: &[u8],
    limits: &MultipartLimits,
) -> Result<ParsedMultipart, MultipartError> {
    let mut source = MemorySource { data: body, pos: 0 };
    parse_core(&mut source, boundary, limits).await
}

/// Parses a multipart body streamed to a temp file, reading it back through a windowed buffer.
pub(crate) async fn parse_file(
    path: &Path,
    boundary: &[u8],
    limits: &MultipartLimits,
) -> Result<ParsedMultipart, MultipartError> {
    let file = tokio::fs::File::open(path).await?;
    let mut source = FileSource {
        file,
        buf: BytesMut::new(),
        eof: false,
        chunk_size: limits.chunk_size.max(1),
    };
    parse_core(&mut source, boundary, limits).await
}

/// A byte source the core state machine can scan forward through, refilling on demand.
///
/// Contract: after `ensure(want).await` returns `Ok`, `buf().len() >= want`. `ensure` returns
/// [`MultipartError::UnexpectedEof`] when the source is exhausted before `want` bytes are
/// available.
trait PartSource: Send {
    fn ensure(&mut self, want: usize) -> impl Future<Output = Result<(), MultipartError>> + Send;
    fn buf(&self) -> &[u8];
    fn consume(&mut self, n: usize);
}

struct MemorySource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl PartSource for MemorySource<'_> {
    fn ensure(&mut self, want: usize) -> impl Future<Output = Result<(), MultipartError>> + Send {
        let ok = self.data.len() - self.pos >= want;
        async move {
            if ok {
                Ok(())
            } else {
                Err(MultipartError::UnexpectedEof)
            }
        }
    }

    fn buf(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
    }
}

struct FileSource {
    file: tokio::fs::File,
    buf: BytesMut,
    eof: bool,
    chunk_size: usize,
}

impl PartSource for FileSource {
    fn ensure(&mut self, want: usize) -> impl Future<Output = Result<(), MultipartError>> + Send {
        async move {
            while self.buf.len() < want {
                if self.eof {
                    return Err(MultipartError::UnexpectedEof);
                }

                let mut chunk = vec![0u8; self.chunk_size];
                let n = self.file.read(&mut chunk).await?;
                if n == 0 {
                    self.eof = true;
                } else {
                    self.buf.extend_from_slice(&chunk[..n]);
                }
            }
            Ok(())
        }
    }

    fn buf(&self) -> &[u8] {
        &self.buf
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

//

async fn parse_core<S: PartSource>(
    source: &mut S,
    boundary: &[u8],
    limits: &MultipartLimits,
) -> Result<ParsedMultipart, MultipartError> {
    let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
    dash_boundary.extend_from_slice(b"--");
    dash_boundary.extend_from_slice(boundary);

    let mut marker = Vec::with_capacity(dash_boundary.len() + 2);
    marker.extend_from_slice(b"\r\n");
    marker.extend_from_slice(&dash_boundary);
    let margin = marker.len().saturating_sub(1);

    source.ensure(dash_boundary.len()).await?;
    if source.buf().get(..dash_boundary.len()) != Some(dash_boundary.as_slice()) {
        return Err(MultipartError::MissingInitialBoundary);
    }
    source.consume(dash_boundary.len());

    let mut result = ParsedMultipart::default();
    let mut files_in_memory_total = 0usize;

    for _ in 0..limits.max_parts_count {
        source.ensure(2).await?;
        if source.buf().get(..2) == Some(b"--".as_slice()) {
            source.consume(2);
            return Ok(result);
        }
        if source.buf().get(..2) != Some(b"\r\n".as_slice()) {
            return Err(MultipartError::MalformedBoundary);
        }
        source.consume(2);

        let header_block = read_header_block(source, limits).await?;
        let headers = parse_part_headers(&header_block)?;

        if headers.name.is_empty() {
            read_field_body(source, &marker, margin, limits.chunk_size).await?;
            continue;
        }

        match headers.filename {
            None => {
                let content = read_field_body(source, &marker, margin, limits.chunk_size).await?;
                result
                    .fields
                    .insert(headers.name, String::from_utf8_lossy(&content).into_owned());
            }
            Some(filename) => {
                let storage = read_file_body(
                    source,
                    &marker,
                    margin,
                    limits,
                    &filename,
                    &mut files_in_memory_total,
                )
                .await?;

                result.files.insert(
                    headers.name,
                    UploadedFile {
                        filename,
                        content_type: headers.content_type.unwrap_or_default(),
                        storage,
                    },
                );
            }
        }
    }

    Err(MultipartError::TooManyParts)
}

async fn read_header_block<S: PartSource>(
    source: &mut S,
    limits: &MultipartLimits,
) -> Result<Vec<u8>, MultipartError> {
    const SEP: &[u8] = b"\r\n\r\n";
    let mut want = SEP.len();

    loop {
        source.ensure(want).await?;
        let buf = source.buf();

        if buf.len() > limits.max_header_section {
            return Err(MultipartError::HeaderSectionTooLarge);
        }
        if let Some(pos) = memchr::memmem::find(buf, SEP) {
            let header_bytes = buf[..pos].to_vec();
            source.consume(pos + SEP.len());
            return Ok(header_bytes);
        }

        want = buf.len() + 1;
    }
}

async fn read_field_body<S: PartSource>(
    source: &mut S,
    marker: &[u8],
    margin: usize,
    chunk_size: usize,
) -> Result<Vec<u8>, MultipartError> {
    let mut out = Vec::new();
    source.ensure(marker.len()).await?;

    loop {
        let buf = source.buf();
        if let Some(pos) = memchr::memmem::find(buf, marker) {
            out.extend_from_slice(&buf[..pos]);
            source.consume(pos + marker.len());
            return Ok(out);
        }

        let keep = buf.len().saturating_sub(margin);
        if keep > 0 {
            out.extend_from_slice(&buf[..keep]);
            source.consume(keep);
        }

        let want = source.buf().len() + chunk_size.max(1);
        source.ensure(want).await?;
    }
}

async fn read_file_body<S: PartSource>(
    source: &mut S,
    marker: &[u8],
    margin: usize,
    limits: &MultipartLimits,
    filename: &str,
    files_in_memory_total: &mut usize,
) -> Result<FileStorage, MultipartError> {
    let mut acc = FileAccumulator::default();
    source.ensure(marker.len()).await?;

    loop {
        let buf = source.buf();
        if let Some(pos) = memchr::memmem::find(buf, marker) {
            if pos > 0 {
                let chunk = buf[..pos].to_vec();
                acc.push(&chunk, filename, limits, files_in_memory_total).await?;
            }
            source.consume(pos + marker.len());
            break;
        }

        let keep = buf.len().saturating_sub(margin);
        if keep > 0 {
            let chunk = buf[..keep].to_vec();
            acc.push(&chunk, filename, limits, files_in_memory_total).await?;
            source.consume(keep);
        }

        let want = source.buf().len() + limits.chunk_size.max(1);
        source.ensure(want).await?;
    }

    acc.finish().await
}

#[derive(Default)]
struct FileAccumulator {
    memory: Vec<u8>,
    spilled: Option<(tokio::fs::File, PathBuf)>,
}

impl FileAccumulator {
    async fn push(
        &mut self,
        chunk: &[u8],
        filename: &str,
        limits: &MultipartLimits,
        files_in_memory_total: &mut usize,
    ) -> Result<(), MultipartError> {
        use tokio::io::AsyncWriteExt;

        if let Some((file, _)) = self.spilled.as_mut() {
            return Ok(file.write_all(chunk).await?);
        }

        let would_exceed_file = self.memory.len() + chunk.len() > limits.max_file_size_in_memory;
        let would_exceed_total =
            *files_in_memory_total + chunk.len() > limits.max_files_size_in_memory;

        if !would_exceed_file && !would_exceed_total {
            *files_in_memory_total += chunk.len();
            self.memory.extend_from_slice(chunk);
            return Ok(());
        }

        let path = std::env::temp_dir().join(spill_file_name(filename));
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&self.memory).await?;
        file.write_all(chunk).await?;

        *files_in_memory_total -= self.memory.len();
        self.memory.clear();
        self.spilled = Some((file, path));
        Ok(())
    }

    async fn finish(mut self) -> Result<FileStorage, MultipartError> {
        use tokio::io::AsyncWriteExt;

        match self.spilled.take() {
            Some((mut file, path)) => {
                file.flush().await?;
                Ok(FileStorage::TempFile(path))
            }
            None => Ok(FileStorage::Memory(self.memory)),
        }
    }
}

fn spill_file_name(filename: &str) -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen();
    format!(
        "forge_web-upload-{suffix:08x}-{}",
        crate::http::mime::sanitize_filename(filename)
    )
}

//

struct PartHeaders {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(block: &[u8]) -> Result<PartHeaders, MultipartError> {
    let unfolded = unfold(block);

    let mut name = None;
    let mut filename = None;
    let mut filename_star = None;
    let mut content_type = None;

    for line in unfolded.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let colon = memchr::memchr(b':', line).ok_or(MultipartError::MalformedHeader)?;
        let header_name = trim_ascii(&line[..colon]);
        let value = trim_ascii(&line[colon + 1..]);

        if header_name.eq_ignore_ascii_case(b"content-type") {
            content_type = Some(String::from_utf8_lossy(value).into_owned());
        } else if header_name.eq_ignore_ascii_case(b"content-disposition") {
            parse_content_disposition(value, &mut name, &mut filename, &mut filename_star)?;
        }
    }

    Ok(PartHeaders {
        name: name.unwrap_or_default(),
        filename: filename_star.or(filename),
        content_type,
    })
}

/// Unfolds `CRLF SP`/`CRLF TAB` continuations into a single space.
fn unfold(block: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(block.len());
    let mut i = 0;

    while i < block.len() {
        let is_fold = block[i] == b'\r'
            && block.get(i + 1) == Some(&b'\n')
            && matches!(block.get(i + 2), Some(b' ' | b'\t'));

        if is_fold {
            out.push(b' ');
            i += 3;
            while matches!(block.get(i), Some(b' ' | b'\t')) {
                i += 1;
            }
        } else {
            out.push(block[i]);
            i += 1;
        }
    }

    out
}

fn parse_content_disposition(
    value: &[u8],
    name: &mut Option<String>,
    filename: &mut Option<String>,
    filename_star: &mut Option<String>,
) -> Result<(), MultipartError> {
    let Some(pos) = memchr::memchr(b';', value) else {
        return Ok(());
    };
    let mut rest = &value[pos + 1..];

    while !rest.is_empty() {
        rest = trim_ascii(rest);
        if rest.is_empty() {
            break;
        }

        let eq = memchr::memchr(b'=', rest).ok_or(MultipartError::MalformedHeader)?;
        let key = trim_ascii(&rest[..eq]);
        let after_eq = &rest[eq + 1..];

        let (raw_value, remainder) = if after_eq.first() == Some(&b'"') {
            parse_quoted(after_eq)?
        } else {
            match memchr::memchr(b';', after_eq) {
                Some(p) => (trim_ascii(&after_eq[..p]).to_vec(), &after_eq[p + 1..]),
                None => (trim_ascii(after_eq).to_vec(), &after_eq[after_eq.len()..]),
            }
        };

        match key {
            b"name" => *name = Some(String::from_utf8_lossy(&raw_value).into_owned()),
            b"filename*" => *filename_star = decode_filename_star(&raw_value),
            b"filename" => *filename = Some(String::from_utf8_lossy(&raw_value).into_owned()),
            _ => {}
        }

        rest = remainder;
    }

    Ok(())
}

fn parse_quoted(input: &[u8]) -> Result<(Vec<u8>, &[u8]), MultipartError> {
    debug_assert_eq!(input.first(), Some(&b'"'));

    let mut out = Vec::new();
    let mut i = 1;

    loop {
        match input.get(i) {
            None => return Err(MultipartError::MalformedHeader),
            Some(b'\\') => {
                out.push(*input.get(i + 1).ok_or(MultipartError::MalformedHeader)?);
                i += 2;
            }
            Some(b'"') => {
                i += 1;
                break;
            }
            Some(&b) => {
                out.push(b);
                i += 1;
            }
        }
    }

    let remainder = trim_ascii(&input[i..]);
    let remainder = remainder.strip_prefix(b";").unwrap_or(remainder);
    Ok((out, remainder))
}

fn decode_filename_star(raw: &[u8]) -> Option<String> {
    let s = std::str::from_utf8(raw).ok()?;
    let mut parts = s.splitn(3, '\'');
    let _charset = parts.next()?;
    let _lang = parts.next()?;
    let encoded = parts.next()?;
    Some(url_decode(encoded.as_bytes()))
}

/// RFC 3986 `%xx`/`+` decoding, scoped to this module: [`crate::http::query`] deliberately does
/// not decode (zero-copy design), and `filename*` is the one place this crate needs to.
fn url_decode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        match input[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < input.len() => match (hex_val(input[i + 1]), hex_val(input[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(input[i]);
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn trim_ascii(mut s: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = s {
        s = rest;
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MultipartLimits;

    fn body(parts: &[&str], boundary: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(part.as_bytes());
        }
        out.extend_from_slice(format!("--{boundary}--").as_bytes());
        out
    }

    #[test]
    fn extract_boundary_from_content_type() {
        #[rustfmt::skip]
        let cases = [
            (&b"multipart/form-data; boundary=abc123"[..], Some("abc123")),
            (&b"multipart/form-data; boundary=\"abc 123\""[..], Some("abc 123")),
            (&b"multipart/form-data"[..], None),
        ];

        for (header, expected) in cases {
            assert_eq!(
                extract_boundary(header).as_deref().map(|v| std::str::from_utf8(v).unwrap()),
                expected
            );
        }
    }

    #[test]
    fn url_decode_handles_percent_and_plus() {
        #[rustfmt::skip]
        let cases = [
            ("hello+world", "hello world"),
            ("na%C3%AFve.txt", "naïve.txt"),
            ("100%25", "100%"),
            ("bad%zzescape", "bad%zzescape"),
        ];

        for (input, expected) in cases {
            assert_eq!(url_decode(input.as_bytes()), expected);
        }
    }

    #[tokio::test]
    async fn parses_a_field_and_a_file_from_memory() {
        let boundary = "BOUNDARY";
        let raw = body(
            &[
                "Content-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n",
                "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nfile bytes\r\n",
            ],
            boundary,
        );

        let limits = MultipartLimits::default();
        let parsed = parse_memory(&raw, boundary.as_bytes(), &limits).await.unwrap();

        assert_eq!(parsed.fields.get("title"), Some(&"hello".to_string()));
        let file = parsed.files.get("upload").unwrap();
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type, "text/plain");
        assert!(file.is_in_memory());
        assert_eq!(file.bytes(), Some(b"file bytes".as_ref()));
    }

    #[tokio::test]
    async fn empty_name_part_is_silently_skipped() {
        let boundary = "BOUNDARY";
        let raw = body(
            &[
                "Content-Disposition: form-data\r\n\r\nignored\r\n",
                "Content-Disposition: form-data; name=\"kept\"\r\n\r\nvalue\r\n",
            ],
            boundary,
        );

        let limits = MultipartLimits::default();
        let parsed = parse_memory(&raw, boundary.as_bytes(), &limits).await.unwrap();

        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.fields.get("kept"), Some(&"value".to_string()));
    }

    #[tokio::test]
    async fn missing_initial_boundary_is_an_error() {
        let limits = MultipartLimits::default();
        let err = parse_memory(b"not a multipart body", b"BOUNDARY", &limits)
            .await
            .unwrap_err();
        assert!(matches!(err, MultipartError::MissingInitialBoundary));
    }

    #[tokio::test]
    async fn rfc5987_filename_star_takes_precedence_and_is_url_decoded() {
        let boundary = "BOUNDARY";
        let raw = body(
            &[concat!(
                "Content-Disposition: form-data; name=\"upload\"; filename=\"plain.txt\";",
                " filename*=UTF-8''na%C3%AFve.txt\r\n\r\ndata\r\n",
            )],
            boundary,
        );

        let limits = MultipartLimits::default();
        let parsed = parse_memory(&raw, boundary.as_bytes(), &limits).await.unwrap();

        assert_eq!(parsed.files.get("upload").unwrap().filename, "naïve.txt");
    }

    #[tokio::test]
    async fn memory_and_file_backed_parsers_agree() {
        let boundary = "BOUNDARY";
        let raw = body(
            &[
                "Content-Disposition: form-data; name=\"a\"\r\n\r\nvalue-a\r\n",
                "Content-Disposition: form-data; name=\"upload\"; filename=\"b.bin\"\r\n\r\nbinary-content\r\n",
            ],
            boundary,
        );

        let limits = MultipartLimits::default();
        let from_memory = parse_memory(&raw, boundary.as_bytes(), &limits).await.unwrap();

        let path = std::env::temp_dir().join(format!(
            "forge_web-multipart-test-{:08x}",
            std::process::id()
        ));
        tokio::fs::write(&path, &raw).await.unwrap();
        let from_file = parse_file(&path, boundary.as_bytes(), &limits).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(from_memory.fields, from_file.fields);
        assert_eq!(
            from_memory.files.get("upload").unwrap().bytes(),
            from_file.files.get("upload").unwrap().bytes()
        );
    }

    #[tokio::test]
    async fn file_part_spills_to_disk_past_the_in_memory_threshold() {
        let boundary = "BOUNDARY";
        let big = "x".repeat(64);
        let raw = body(
            &[&format!(
                "Content-Disposition: form-data; name=\"upload\"; filename=\"big.bin\"\r\n\r\n{big}\r\n"
            )],
            boundary,
        );

        let limits = MultipartLimits {
            max_file_size_in_memory: 16,
            ..MultipartLimits::default()
        };
        let parsed = parse_memory(&raw, boundary.as_bytes(), &limits).await.unwrap();

        let file = parsed.files.get("upload").unwrap();
        assert!(!file.is_in_memory());
        let path = file.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), big);
    }
}
