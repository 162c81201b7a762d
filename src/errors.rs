//! Per-subsystem error types.
//!
//! Each boundary in the pipeline gets its own small `thiserror` enum rather than one
//! stringly-typed sum type. Every variant that is ever sent to a client also knows which
//! [`StatusCode`] it maps to, via [`RequestError::status`] and [`MultipartError::status`].

use crate::http::types::StatusCode;
use std::io;

/// Errors that abort [`crate::Server::start`] before the controller reaches `running`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {host}:{port}")]
    InvalidAddress { host: String, port: u16 },

    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to create temp directory {path}: {source}")]
    TempDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not allocate a single connection object for the pool")]
    PoolInit,

    #[error("no route handler registered and no default handler configured")]
    NoRoutes,
}

/// Protocol- and client-level errors encountered while reading a request.
///
/// Every variant here is something a remote peer can trigger by sending bytes; none of them
/// indicate a bug in this crate.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("malformed header")]
    MalformedHeader,

    #[error("too many headers")]
    TooManyHeaders,

    #[error("header section too large")]
    HeadersTooLarge,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("request body exceeds configured maximum size")]
    BodyTooLarge,

    #[error("malformed multipart boundary parameter")]
    MissingBoundary,

    #[error("timed out waiting for the client")]
    Timeout,

    #[error("client requested a protocol upgrade, which is not supported")]
    UpgradeRejected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RequestError {
    /// The status code this error is reported to the client with.
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::Timeout => StatusCode::RequestTimeout,
            RequestError::BodyTooLarge => StatusCode::PayloadTooLarge,
            RequestError::TooManyHeaders | RequestError::HeadersTooLarge => {
                StatusCode::RequestHeaderFieldsTooLarge
            }
            RequestError::Io(_) => StatusCode::ServiceUnavailable,
            _ => StatusCode::BadRequest,
        }
    }

    /// A short machine-friendly code, used as the `detail` field of JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::MalformedRequestLine => "MALFORMED_REQUEST_LINE",
            RequestError::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RequestError::MalformedHeader => "MALFORMED_HEADER",
            RequestError::TooManyHeaders => "TOO_MANY_HEADERS",
            RequestError::HeadersTooLarge => "HEADERS_TOO_LARGE",
            RequestError::InvalidContentLength => "INVALID_CONTENT_LENGTH",
            RequestError::BodyTooLarge => "BODY_TOO_LARGE",
            RequestError::MissingBoundary => "MISSING_BOUNDARY",
            RequestError::Timeout => "TIMEOUT",
            RequestError::UpgradeRejected => "UPGRADE_REJECTED",
            RequestError::Io(_) => "IO_ERROR",
        }
    }
}

/// Errors raised while registering routes in the radix tree.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed dynamic segment in path")]
    MalformedSegment,

    #[error("dynamic segment without a name in path")]
    EmptyParamName,

    #[error("ambiguous dynamic route: node already binds parameter `{existing}`, got `{new}`")]
    AmbiguousParam { existing: String, new: String },

    #[error("handler for this method at this path is already registered")]
    DuplicateRoute,
}

/// Errors raised while parsing a `multipart/form-data` body.
#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("multipart body does not start with the expected boundary")]
    MissingInitialBoundary,

    #[error("malformed boundary line")]
    MalformedBoundary,

    #[error("part header section exceeds 8 KiB")]
    HeaderSectionTooLarge,

    #[error("malformed part header")]
    MalformedHeader,

    #[error("too many parts without a closing boundary")]
    TooManyParts,

    #[error("unexpected end of input while scanning for boundary")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error returned by [`crate::Server::start`] and the blocking parts of `stop`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server is not in a state that allows this operation")]
    InvalidState,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
