//! The abstract `Request` of the data model (spec §3): everything an
//! outbound call needs before it is serialized into an HTTP POST, and
//! everything an inbound dispatch recovers from one.

use bytes::Bytes;

use crate::header::Headers;

/// The wire-agnostic representation of an RPC call.
#[derive(Debug, Clone)]
pub struct Request {
    pub caller: String,
    pub service: String,
    pub procedure: String,
    pub caller_procedure: Option<String>,
    pub encoding: String,
    pub shard_key: Option<String>,
    pub routing_key: Option<String>,
    pub routing_delegate: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
    pub body_size: Option<usize>,
}

impl Request {
    #[must_use]
    pub fn new(
        caller: impl Into<String>,
        service: impl Into<String>,
        procedure: impl Into<String>,
        encoding: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        let body = body.into();
        let body_size = Some(body.len());
        Self {
            caller: caller.into(),
            service: service.into(),
            procedure: procedure.into(),
            caller_procedure: None,
            encoding: encoding.into(),
            shard_key: None,
            routing_key: None,
            routing_delegate: None,
            headers: Headers::new(),
            body,
            body_size,
        }
    }

    #[must_use]
    pub fn with_caller_procedure(mut self, value: impl Into<String>) -> Self {
        self.caller_procedure = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_shard_key(mut self, value: impl Into<String>) -> Self {
        self.shard_key = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_routing_key(mut self, value: impl Into<String>) -> Self {
        self.routing_key = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_routing_delegate(mut self, value: impl Into<String>) -> Self {
        self.routing_delegate = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Which of caller/service/procedure/encoding are missing, in the order
    /// spec §4.7 validates them. Empty if the request is well-formed.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.caller.is_empty() {
            missing.push("caller");
        }
        if self.service.is_empty() {
            missing.push("service");
        }
        if self.procedure.is_empty() {
            missing.push("procedure");
        }
        if self.encoding.is_empty() {
            missing.push("encoding");
        }
        missing
    }
}
