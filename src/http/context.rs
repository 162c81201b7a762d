//! Request context: the matched route parameters and parsed multipart data
//! handed to the matched handler alongside the request itself.

use crate::{
    http::{multipart, request::Request},
    limits::MultipartLimits,
    route::Params,
};
use std::collections::HashMap;

pub use crate::http::multipart::UploadedFile;

/// Everything a handler needs beyond the raw request: the path parameters
/// bound by the route it matched, and (for `multipart/form-data` requests)
/// the parsed fields and uploaded files.
///
/// Borrows `request` rather than owning it - the connection task keeps the
/// request buffer alive across the whole dispatch and resets it in place for
/// the connection's next request, so a context can't take ownership of it.
pub struct Context<'a> {
    pub request: &'a Request,
    pub params: Params,
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

impl<'a> Context<'a> {
    /// Builds a context for `request`, having already matched `params`.
    ///
    /// If `request` carries a `multipart/form-data` body, it is parsed here -
    /// from the spilled temp file if the connection streamed it to one, from
    /// the in-memory body otherwise. A parse failure is logged and leaves
    /// `fields`/`files` empty rather than failing the request: the handler
    /// still runs and can decide how to respond to a malformed upload.
    pub(crate) async fn build(
        request: &'a Request,
        params: Params,
        multipart_limits: &MultipartLimits,
    ) -> Self {
        let (fields, files) = parse_multipart_if_present(request, multipart_limits).await;

        Self {
            request,
            params,
            fields,
            files,
        }
    }
}

async fn parse_multipart_if_present(
    request: &Request,
    limits: &MultipartLimits,
) -> (HashMap<String, String>, HashMap<String, UploadedFile>) {
    let Some(content_type) = request.header(b"content-type") else {
        return Default::default();
    };
    if !is_multipart_content_type(content_type) {
        return Default::default();
    }
    let Some(boundary) = multipart::extract_boundary(content_type) else {
        tracing::warn!("multipart request had no usable boundary parameter, skipping parse");
        return Default::default();
    };

    let parsed = if let Some(path) = request.body_path() {
        let path = path.to_path_buf();
        let result = multipart::parse_file(&path, &boundary, limits).await;
        if let Err(error) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), %error, "failed to delete multipart temp file");
        }
        result
    } else if let Some(body) = request.body() {
        multipart::parse_memory(body, &boundary, limits).await
    } else {
        return Default::default();
    };

    match parsed {
        Ok(parsed) => (parsed.fields, parsed.files),
        Err(error) => {
            tracing::warn!(%error, "failed to parse multipart body");
            Default::default()
        }
    }
}

fn is_multipart_content_type(content_type: &[u8]) -> bool {
    const PREFIX: &[u8] = b"multipart/form-data";
    content_type.len() >= PREFIX.len() && content_type[..PREFIX.len()].eq_ignore_ascii_case(PREFIX)
}
