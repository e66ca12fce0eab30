//! `HeaderCodec`: the bidirectional mapping between structured request/response
//! metadata and HTTP headers (spec §4.1).
//!
//! Grounded on `rama_grpc::metadata::MetadataMap`, which wraps an
//! [`http::HeaderMap`] rather than reinventing one; application headers here
//! are a distinct ordered multimap of arbitrary string keys (not necessarily
//! valid header-name syntax on their own — they get the `Rpc-Header-` prefix
//! before they ever reach the wire), so we keep our own small [`Headers`]
//! rather than wrapping `HeaderMap` directly.

use http::{HeaderMap, HeaderName, HeaderValue};

pub const RPC_CALLER: &str = "rpc-caller";
pub const RPC_SERVICE: &str = "rpc-service";
pub const RPC_PROCEDURE: &str = "rpc-procedure";
pub const RPC_ENCODING: &str = "rpc-encoding";
pub const RPC_CALLER_PROCEDURE: &str = "rpc-caller-procedure";
pub const RPC_SHARD_KEY: &str = "rpc-shard-key";
pub const RPC_ROUTING_KEY: &str = "rpc-routing-key";
pub const RPC_ROUTING_DELEGATE: &str = "rpc-routing-delegate";
pub const CONTEXT_TTL_MS: &str = "context-ttl-ms";
pub const RPC_STATUS: &str = "rpc-status";
pub const RPC_ERROR_CODE: &str = "rpc-error-code";
pub const RPC_ERROR_NAME: &str = "rpc-error-name";
pub const RPC_ERROR_MESSAGE: &str = "rpc-error-message";
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";
pub const RPC_APPLICATION_ERROR_NAME: &str = "rpc-application-error-name";
pub const RPC_APPLICATION_ERROR_CODE: &str = "rpc-application-error-code";
pub const RPC_APPLICATION_ERROR_DETAILS: &str = "rpc-application-error-details";
pub const RPC_ACCEPTS_BOTH_RESPONSE_ERROR: &str = "rpc-accepts-both-response-error";
pub const RPC_BOTH_RESPONSE_ERROR: &str = "rpc-both-response-error";
pub const RPC_HEADER_PREFIX: &str = "rpc-header-";

/// Maximum length, in bytes, of `Rpc-Application-Error-Details` before it is
/// truncated (spec §4.1).
pub const APPLICATION_ERROR_DETAILS_MAX_LEN: usize = 256;
const TRUNCATION_MARKER: &str = " (truncated)";

/// An ordered multimap of application-level header keys to values, with
/// case-insensitive key lookups. Duplicate keys are preserved in insertion
/// order; single-value getters report the last write.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// The value of the last-inserted entry for `key`, if any (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Whether an application header key uses a reserved prefix (`rpc-` or
/// `$rpc$-`, case-insensitive) that must not be sent as a plain application
/// header.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    key.len() >= 4 && key.as_bytes()[..4].eq_ignore_ascii_case(b"rpc-")
        || key.len() >= 6 && key.as_bytes()[..6].eq_ignore_ascii_case(b"$rpc$-")
}

/// HTTP/2 pseudo-header names that must never surface as application headers.
fn is_pseudo_header(key: &str) -> bool {
    matches!(key, ":authority" | ":method" | ":path" | ":scheme")
}

/// How a strict-mode violation (reserved-prefix application header) should
/// be handled. Spec §4.1 / §9: strict-on-send, lenient-on-receive by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedKeyPolicy {
    /// Reject with an internal error (used on send, optionally).
    Reject,
    /// Silently pass the header through unprefixed handling.
    Allow,
}

/// Error returned when [`ReservedKeyPolicy::Reject`] rejects an application
/// header using a reserved prefix.
#[derive(Debug)]
pub struct ReservedKeyError(pub String);

impl std::fmt::Display for ReservedKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "application header {:?} uses a reserved prefix (rpc- or $rpc$-)",
            self.0
        )
    }
}

impl std::error::Error for ReservedKeyError {}

/// Encode `headers` into `dst` as `Rpc-Header-<K>` entries, validating
/// reserved-prefix keys per `policy`.
pub fn encode_application_headers(
    headers: &Headers,
    policy: ReservedKeyPolicy,
    dst: &mut HeaderMap,
) -> Result<(), ReservedKeyError> {
    for (key, value) in headers.iter() {
        if is_reserved_key(key) {
            match policy {
                ReservedKeyPolicy::Reject => return Err(ReservedKeyError(key.to_owned())),
                ReservedKeyPolicy::Allow => {}
            }
        }
        let name = format!("{RPC_HEADER_PREFIX}{key}");
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            dst.append(name, value);
        }
    }
    Ok(())
}

/// Decode `Rpc-Header-*` entries from `src` into application [`Headers`],
/// stripping the prefix and dropping HTTP/2 pseudo-headers silently.
#[must_use]
pub fn decode_application_headers(src: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in src.iter() {
        let name = name.as_str();
        if is_pseudo_header(name) {
            continue;
        }
        if let Some(stripped) = strip_ci_prefix(name, RPC_HEADER_PREFIX)
            && let Ok(value) = value.to_str()
        {
            headers.insert(stripped.to_owned(), value.to_owned());
        }
    }
    headers
}

fn strip_ci_prefix<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Truncate `details` to [`APPLICATION_ERROR_DETAILS_MAX_LEN`] bytes,
/// appending the `" (truncated)"` marker when shortened (spec §4.1 / §8).
#[must_use]
pub fn truncate_application_error_details(details: &str) -> String {
    if details.len() <= APPLICATION_ERROR_DETAILS_MAX_LEN {
        return details.to_owned();
    }
    let budget = APPLICATION_ERROR_DETAILS_MAX_LEN.saturating_sub(TRUNCATION_MARKER.len());
    let mut cut = budget.min(details.len());
    while cut > 0 && !details.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(APPLICATION_ERROR_DETAILS_MAX_LEN);
    out.push_str(&details[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_application_headers() {
        let mut headers = Headers::new();
        headers.insert("Foo", "bar");
        headers.insert("baz", "qux");

        let mut http_headers = HeaderMap::new();
        encode_application_headers(&headers, ReservedKeyPolicy::Reject, &mut http_headers)
            .unwrap();

        let decoded = decode_application_headers(&http_headers);
        assert_eq!(decoded.get("foo"), Some("bar"));
        assert_eq!(decoded.get("baz"), Some("qux"));
    }

    #[test]
    fn strict_mode_rejects_reserved_prefix() {
        let mut headers = Headers::new();
        headers.insert("Rpc-Foo", "bar");
        let mut dst = HeaderMap::new();
        let err = encode_application_headers(&headers, ReservedKeyPolicy::Reject, &mut dst);
        assert!(err.is_err());
    }

    #[test]
    fn lenient_mode_allows_reserved_prefix() {
        let mut headers = Headers::new();
        headers.insert("$rpc$-Foo", "bar");
        let mut dst = HeaderMap::new();
        encode_application_headers(&headers, ReservedKeyPolicy::Allow, &mut dst).unwrap();
        assert_eq!(dst.len(), 1);
    }

    #[test]
    fn pseudo_headers_are_dropped_on_decode() {
        let mut http_headers = HeaderMap::new();
        http_headers.insert(
            HeaderName::from_bytes(b"rpc-header-normal").unwrap(),
            HeaderValue::from_static("value"),
        );
        let decoded = decode_application_headers(&http_headers);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("normal"), Some("value"));
    }

    #[test]
    fn details_truncated_at_256_bytes() {
        let long = "a".repeat(400);
        let truncated = truncate_application_error_details(&long);
        assert_eq!(truncated.len(), APPLICATION_ERROR_DETAILS_MAX_LEN);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn short_details_are_untouched() {
        let short = "a".repeat(10);
        assert_eq!(truncate_application_error_details(&short), short);
    }

    #[test]
    fn reserved_prefix_is_case_insensitive() {
        assert!(is_reserved_key("RPC-Foo"));
        assert!(is_reserved_key("$RPC$-bar"));
        assert!(!is_reserved_key("normal-header"));
    }
}
