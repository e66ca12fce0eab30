//! Peer identity. A peer is identified purely by its `host:port` address
//! (spec §3 / glossary), grounded on `rama_net::address::Authority`'s role
//! as the identity type for a network destination — kept as a plain string
//! newtype here since this layer never needs to parse host vs. port apart,
//! only to use the address as a map key and to dial it.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(Arc<str>);

impl PeerAddress {
    #[must_use]
    pub fn new(addr: impl Into<Arc<str>>) -> Self {
        Self(addr.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s.to_owned())
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
