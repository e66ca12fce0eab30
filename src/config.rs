//! Typed configuration for the transport, covering the opaque keys of
//! spec §6. YAML loading itself is an external collaborator (out of scope);
//! these are the structs such a loader would populate, with the same
//! validation and defaults the teacher documents for its own config layer.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{Jitter, RandJitter};
use crate::error::TransportError;

/// TLS negotiation mode for a peer connection. TLS itself (the certificate
/// provider) is an external collaborator (spec §1); this only records which
/// mode was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Disabled,
    Permissive,
    Enforced,
}

/// Connection backoff parameters (`connBackoff` in spec §6).
#[derive(Clone)]
pub struct ConnBackoff {
    pub first: Duration,
    pub max: Duration,
    pub jitter: Arc<dyn Jitter>,
}

impl Default for ConnBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(10),
            max: Duration::from_secs(30),
            jitter: Arc::new(RandJitter),
        }
    }
}

impl std::fmt::Debug for ConnBackoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnBackoff")
            .field("first", &self.first)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

/// Process-wide transport configuration: the shared HTTP client's
/// connection pool knobs and the per-peer probe-loop parameters.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub keep_alive: bool,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub disable_keep_alives: bool,
    pub disable_compression: bool,
    pub response_header_timeout: Duration,
    pub conn_timeout: Duration,
    pub conn_backoff: ConnBackoff,
    pub innocence_window: Duration,
    pub disable_http2: bool,
    pub tls_mode: TlsMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_idle_conns: 0,
            max_idle_conns_per_host: 2,
            idle_conn_timeout: Duration::from_secs(15 * 60),
            disable_keep_alives: false,
            disable_compression: false,
            response_header_timeout: Duration::ZERO,
            conn_timeout: Duration::from_millis(500),
            conn_backoff: ConnBackoff::default(),
            innocence_window: Duration::from_secs(5),
            disable_http2: false,
            tls_mode: TlsMode::default(),
        }
    }
}

/// Per-outbound configuration (the outbound `url`, `addHeaders`, `tls.mode`
/// keys of spec §6).
#[derive(Debug, Clone)]
pub struct OutboundConfig {
    pub url_scheme: String,
    pub url_path: String,
    pub add_headers: Vec<(String, String)>,
    pub both_response_error: bool,
    pub tls_mode: TlsMode,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            url_scheme: "http".to_owned(),
            url_path: String::new(),
            add_headers: Vec::new(),
            both_response_error: false,
            tls_mode: TlsMode::default(),
        }
    }
}

impl OutboundConfig {
    /// Reject `addHeaders` entries using the reserved `Rpc-` prefix
    /// (spec §4.6: "reject keys with the `Rpc-` prefix at configuration time").
    pub fn validate(&self) -> Result<(), TransportError> {
        for (key, _) in &self.add_headers {
            if key.len() >= 4 && key.as_bytes()[..4].eq_ignore_ascii_case(b"rpc-") {
                return Err(TransportError::InvalidConfig(format!(
                    "extra header {key:?} uses the reserved Rpc- prefix"
                )));
            }
        }
        Ok(())
    }
}

/// Inbound (server) configuration (`address`, `grabHeaders`,
/// `shutdownTimeout`, `disableHTTP2` of spec §6).
#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub address: String,
    pub grab_headers: Vec<String>,
    pub shutdown_timeout: Option<Duration>,
    pub disable_http2: bool,
    pub both_response_error: bool,
}

impl InboundConfig {
    /// `0` duration means wait forever (spec §5); represented as `None`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            grab_headers: Vec::new(),
            shutdown_timeout: Some(Duration::from_secs(6)),
            disable_http2: false,
            both_response_error: false,
        }
    }

    /// Validates the invariants spec §6 calls out explicitly: missing
    /// `address` and negative `shutdownTimeout` are both errors. Negative
    /// durations can't be represented by [`Duration`], so callers construct
    /// this from a signed input and pass `None` for "wait forever" instead
    /// of a sentinel negative value; this just guards the empty-address case.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.address.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "inbound requires a non-empty address".to_owned(),
            ));
        }
        for header in &self.grab_headers {
            if !header.to_ascii_lowercase().starts_with("x-") {
                return Err(TransportError::InvalidConfig(format!(
                    "grabHeaders entry {header:?} must start with x-"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a `shutdownTimeout` expressed as seconds, where negative values are
/// a config error and `0` means "wait forever".
pub fn parse_shutdown_timeout(seconds: i64) -> Result<Option<Duration>, TransportError> {
    if seconds < 0 {
        return Err(TransportError::InvalidConfig(
            "shutdownTimeout must not be negative".to_owned(),
        ));
    }
    if seconds == 0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_secs(seconds as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_shutdown_timeout_is_rejected() {
        assert!(parse_shutdown_timeout(-1).is_err());
    }

    #[test]
    fn zero_shutdown_timeout_means_forever() {
        assert_eq!(parse_shutdown_timeout(0).unwrap(), None);
    }

    #[test]
    fn missing_address_is_rejected() {
        let cfg = InboundConfig::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn grab_headers_must_start_with_x() {
        let mut cfg = InboundConfig::new("127.0.0.1:0");
        cfg.grab_headers.push("not-x".to_owned());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn outbound_rejects_rpc_prefixed_extra_headers() {
        let mut cfg = OutboundConfig::default();
        cfg.add_headers.push(("Rpc-Foo".to_owned(), "bar".to_owned()));
        assert!(cfg.validate().is_err());
    }
}
