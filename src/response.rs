//! The abstract `Response` of the data model (spec §3), and the
//! [`ResponseSink`] write-side buffer unary handlers assemble it through
//! (spec §4.8).

use bytes::{Bytes, BytesMut};

use crate::header::{truncate_application_error_details, Headers};

/// Application-error name/code/details, mirrored in the three
/// `Rpc-Application-Error-*` headers.
#[derive(Debug, Clone, Default)]
pub struct ApplicationErrorMeta {
    pub name: Option<String>,
    pub code: Option<String>,
    pub details: Option<String>,
}

/// The wire-agnostic representation of an RPC response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub headers: Headers,
    pub body: Bytes,
    pub application_error: bool,
    pub application_error_meta: Option<ApplicationErrorMeta>,
}

/// A per-request write buffer: handlers write a body and application
/// headers into it; the dispatcher calls [`ResponseSink::close`] once the
/// handler returns, flushing the accumulated state into a [`Response`].
///
/// Grounded on the buffered-then-flush shape of `rama_grpc`'s streaming
/// response encoder, simplified to unary (no framing, no trailers).
#[derive(Debug, Default)]
pub struct ResponseSink {
    body: BytesMut,
    headers: Headers,
    application_error: bool,
    application_error_meta: Option<ApplicationErrorMeta>,
}

impl ResponseSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, chunk: impl AsRef<[u8]>) {
        self.body.extend_from_slice(chunk.as_ref());
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key, value);
    }

    /// Mark the response as an application-level error (`Rpc-Status: error`
    /// with no transport-level failure).
    pub fn set_application_error(&mut self) {
        self.application_error = true;
    }

    /// Record the application error's name/code/details, truncating
    /// `details` to the 256-byte limit (spec §4.1 / §4.8).
    pub fn set_application_error_meta(&mut self, mut meta: ApplicationErrorMeta) {
        if let Some(details) = meta.details.take() {
            meta.details = Some(truncate_application_error_details(&details));
        }
        self.application_error_meta = Some(meta);
        self.application_error = true;
    }

    /// Discard any buffered body, keeping headers and error state. Used by
    /// the dispatcher to drop a partial body before writing a plain-text
    /// error (spec §4.8).
    pub fn reset_buffer(&mut self) {
        self.body.clear();
    }

    /// Flush into a [`Response`]. The `http_status_code` argument models the
    /// teacher's `Close(httpStatusCode)` signature but the status itself is
    /// computed by the dispatcher from the handler's `Result`, not stored
    /// here — this just finalizes the buffered body/headers.
    #[must_use]
    pub fn close(self) -> Response {
        Response {
            headers: self.headers,
            body: self.body.freeze(),
            application_error: self.application_error,
            application_error_meta: self.application_error_meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_accumulates_body() {
        let mut sink = ResponseSink::new();
        sink.write("hello, ");
        sink.write("world");
        let resp = sink.close();
        assert_eq!(&resp.body[..], b"hello, world");
    }

    #[test]
    fn application_error_meta_truncates_details() {
        let mut sink = ResponseSink::new();
        sink.set_application_error_meta(ApplicationErrorMeta {
            name: Some("foo".into()),
            code: Some("not-found".into()),
            details: Some("x".repeat(400)),
        });
        let resp = sink.close();
        assert!(resp.application_error);
        let details = resp.application_error_meta.unwrap().details.unwrap();
        assert_eq!(details.len(), 256);
    }

    #[test]
    fn reset_buffer_discards_body_but_keeps_error_state() {
        let mut sink = ResponseSink::new();
        sink.write("partial");
        sink.set_application_error();
        sink.reset_buffer();
        let resp = sink.close();
        assert!(resp.body.is_empty());
        assert!(resp.application_error);
    }
}
