//! Extension-to-MIME-type lookup and filename sanitization for `file`-mode responses.

/// Returns the MIME type associated with `path`'s extension, or
/// `application/octet-stream` if the extension is unknown or missing.
pub fn mime_type_for(path: &std::path::Path) -> &'static str {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext,
        None => return "application/octet-stream",
    };

    lookup(ext).unwrap_or("application/octet-stream")
}

fn lookup(ext: &str) -> Option<&'static str> {
    // Case-insensitive compare without allocating a lowercased copy.
    TABLE
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
}

#[rustfmt::skip]
const TABLE: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm",  "text/html; charset=utf-8"),
    ("css",  "text/css; charset=utf-8"),
    ("js",   "text/javascript; charset=utf-8"),
    ("mjs",  "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("xml",  "application/xml"),
    ("txt",  "text/plain; charset=utf-8"),
    ("csv",  "text/csv; charset=utf-8"),
    ("md",   "text/markdown; charset=utf-8"),

    ("png",  "image/png"),
    ("jpg",  "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif",  "image/gif"),
    ("webp", "image/webp"),
    ("svg",  "image/svg+xml"),
    ("ico",  "image/x-icon"),
    ("bmp",  "image/bmp"),
    ("avif", "image/avif"),

    ("mp4",  "video/mp4"),
    ("webm", "video/webm"),
    ("mov",  "video/quicktime"),

    ("mp3",  "audio/mpeg"),
    ("wav",  "audio/wav"),
    ("ogg",  "audio/ogg"),

    ("woff",  "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf",   "font/ttf"),
    ("otf",   "font/otf"),

    ("pdf",  "application/pdf"),
    ("zip",  "application/zip"),
    ("gz",   "application/gzip"),
    ("tar",  "application/x-tar"),
    ("wasm", "application/wasm"),
];

/// Sanitizes a user-supplied filename (e.g. from a `Content-Disposition` header or a multipart
/// part) so it is safe to use as a path component: keeps ASCII alphanumerics, `_`, `-`, and `.`;
/// drops everything else; falls back to `"untitled"` for empty, `"."`, or `".."` results.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "untitled".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn known_extensions() {
        assert_eq!(mime_type_for(Path::new("a.html")), "text/html; charset=utf-8");
        assert_eq!(mime_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("archive.tar")), "application/x-tar");
    }

    #[test]
    fn unknown_or_missing_extension() {
        assert_eq!(mime_type_for(Path::new("a.unknownext")), "application/octet-stream");
        assert_eq!(mime_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn sanitize_strips_unsafe_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_filename("my photo (1).png"), "myphoto1.png");
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("."), "untitled");
        assert_eq!(sanitize_filename(".."), "untitled");
    }
}
