//! The RPC error taxonomy and its mapping to HTTP status codes.
//!
//! [`Code`] is a closed enum of RPC-level outcomes; [`ErrorStatus`] pairs a
//! `Code` with a message, an optional name tag and optional opaque details.
//! [`Code::to_status`] / [`Code::from_status`] implement the bidirectional
//! mapping of §4.2.

use std::{error::Error as StdError, fmt, sync::Arc};

use http::StatusCode;

/// A type-erased error, used at seams where the concrete error type of a
/// pluggable collaborator (sender, chooser) isn't knowable at this layer.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// An opaque wrapper around a boxed error, so callers can't match on its
/// concrete type but can still downcast, display, and chain it.
#[repr(transparent)]
pub struct OpaqueError(BoxError);

impl OpaqueError {
    pub fn from_std(err: impl StdError + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }

    pub fn from_display(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::from_std(MessageError(msg))
    }

    pub fn from_boxed(inner: BoxError) -> Self {
        Self(inner)
    }

    pub fn into_boxed(self) -> BoxError {
        self.0
    }
}

impl fmt::Debug for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for OpaqueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for OpaqueError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

#[repr(transparent)]
struct MessageError<M>(M);

impl<M: fmt::Display + fmt::Debug> fmt::Debug for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<M: fmt::Display + fmt::Debug> fmt::Display for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<M: fmt::Display + fmt::Debug> StdError for MessageError<M> {}

/// The closed set of RPC error codes (spec §7 / §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// The canonical lower-kebab-case text used in `Rpc-Error-Code`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid-argument",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NotFound => "not-found",
            Self::AlreadyExists => "already-exists",
            Self::PermissionDenied => "permission-denied",
            Self::ResourceExhausted => "resource-exhausted",
            Self::FailedPrecondition => "failed-precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out-of-range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data-loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// Parse the canonical text representation, falling back to `Unknown`
    /// for anything unrecognised (mirrors the teacher's lenient `Code::from_bytes`).
    #[must_use]
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "cancelled" => Self::Cancelled,
            "invalid-argument" => Self::InvalidArgument,
            "deadline-exceeded" => Self::DeadlineExceeded,
            "not-found" => Self::NotFound,
            "already-exists" => Self::AlreadyExists,
            "permission-denied" => Self::PermissionDenied,
            "resource-exhausted" => Self::ResourceExhausted,
            "failed-precondition" => Self::FailedPrecondition,
            "aborted" => Self::Aborted,
            "out-of-range" => Self::OutOfRange,
            "unimplemented" => Self::Unimplemented,
            "internal" => Self::Internal,
            "unavailable" => Self::Unavailable,
            "data-loss" => Self::DataLoss,
            "unauthenticated" => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// The exact code→status table of spec §4.2.
    ///
    /// Several codes share a status; this is the forward direction only,
    /// it is not meant to be inverted entry-by-entry (see [`Code::from_status`]).
    #[must_use]
    pub fn to_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Aborted | Self::AlreadyExists => StatusCode::CONFLICT,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::Cancelled => StatusCode::from_u16(499).expect("499 is a valid status code"),
            Self::Unknown | Self::Internal | Self::DataLoss => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// `status → best code`: first code in the table sharing that status;
    /// any unmapped 4xx becomes `InvalidArgument`; anything else `Unknown`.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => Self::Ok,
            StatusCode::BAD_REQUEST => Self::InvalidArgument,
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::FORBIDDEN => Self::PermissionDenied,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::Aborted,
            StatusCode::TOO_MANY_REQUESTS => Self::ResourceExhausted,
            s if s.as_u16() == 499 => Self::Cancelled,
            StatusCode::INTERNAL_SERVER_ERROR => Self::Unknown,
            StatusCode::NOT_IMPLEMENTED => Self::Unimplemented,
            StatusCode::SERVICE_UNAVAILABLE => Self::Unavailable,
            StatusCode::GATEWAY_TIMEOUT => Self::DeadlineExceeded,
            s if s.is_client_error() => Self::InvalidArgument,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional user-supplied tag and details carried alongside a [`Code`].
#[derive(Debug, Clone, Default)]
pub struct ErrorMeta {
    pub name: Option<String>,
    pub details: Option<Vec<u8>>,
}

/// An RPC-level error: code, message, optional name tag and opaque details.
#[derive(Clone)]
pub struct ErrorStatus(Box<ErrorStatusInner>);

#[derive(Clone)]
struct ErrorStatusInner {
    code: Code,
    message: Arc<str>,
    name: Option<Arc<str>>,
    details: Option<Arc<[u8]>>,
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl ErrorStatus {
    #[must_use]
    pub fn new(code: Code, message: impl Into<Arc<str>>) -> Self {
        Self(Box::new(ErrorStatusInner {
            code,
            message: message.into(),
            name: None,
            details: None,
            source: None,
        }))
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.0.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<Arc<[u8]>>) -> Self {
        self.0.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.0.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.0.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    #[must_use]
    pub fn details(&self) -> Option<&[u8]> {
        self.0.details.as_deref()
    }

    pub fn invalid_argument(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unknown(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn internal(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn not_found(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn failed_precondition(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn cancelled(message: impl Into<Arc<str>>) -> Self {
        Self::new(Code::Cancelled, message)
    }
}

impl fmt::Debug for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorStatus")
            .field("code", &self.0.code)
            .field("message", &self.0.message)
            .field("name", &self.0.name)
            .finish()
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.code, self.0.message)
    }
}

impl StdError for ErrorStatus {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|err| (&**err) as &(dyn StdError + 'static))
    }
}

/// Sentinel errors that don't fit the RPC [`Code`] taxonomy because they
/// describe a programming or bookkeeping mistake against this transport's
/// own APIs rather than an outcome of a call.
#[derive(Debug)]
pub enum TransportError {
    /// `ReleasePeer` was called for an address the pool has no entry for.
    NoReferenceToPeer,
    /// `ReleasePeer` was called with a subscriber the peer has no record of.
    NoReferenceToSubscriber,
    /// A chooser returned a peer handle this transport didn't create.
    InvalidPeerConversion,
    /// Configuration failed validation (e.g. negative `shutdownTimeout`).
    InvalidConfig(String),
    /// The RPC-level outcome of a call.
    Status(ErrorStatus),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReferenceToPeer => {
                f.write_str("transport has no reference to peer")
            }
            Self::NoReferenceToSubscriber => {
                f.write_str("peer has no reference to subscriber")
            }
            Self::InvalidPeerConversion => {
                f.write_str("chooser returned a peer not owned by this transport")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Status(status) => fmt::Display::fmt(status, f),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Status(status) => Some(status),
            _ => None,
        }
    }
}

impl From<ErrorStatus> for TransportError {
    fn from(status: ErrorStatus) -> Self {
        Self::Status(status)
    }
}
