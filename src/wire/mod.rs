//! Wire schema: request/response tagged unions exchanged over the control
//! socket, plus the small opaque identifiers that correlate them.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Error kinds surfaced on the wire.
pub mod error;
/// Non-persistent request/response tagged unions.
pub mod request;
/// Persistent-connection request/response tagged unions.
pub mod persistent;

pub use error::WireError;
pub use persistent::{PeerCallRequest, PeerCallResponse, PersistentRequest, PersistentResponse};
pub use request::{DhtRequest, PubsubRequest, Request, Response};

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// An opaque protocol identifier, compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proto(Arc<str>);

impl Proto {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Proto {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Proto {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The outcome of a unary call, as reported by the handler that answered it
/// and relayed back to the caller without reinterpretation. Distinct from a
/// [`WireError`]/`DaemonError`: an `Err` here means the handler ran and
/// declined the call, not that the daemon itself failed to deliver it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Ok { payload: Vec<u8> },
    Err { message: Vec<u8> },
}

/// A dialable local sink for an inbound peer stream (a multi-address string).
/// Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(pub Arc<str>);

impl Endpoint {
    pub fn new(addr: impl Into<Arc<str>>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 128-bit opaque identifier correlating a request and its response on a
/// persistent connection. Unique per outstanding operation by construction
/// (randomly generated, never reused while in flight).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub [u8; 16]);

impl CallId {
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::Rng::fill(&mut rand::rng(), &mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Serde helper for an optional per-call timeout represented as a number of
/// seconds, the wire equivalent of `cfg::config`'s `serde_secs`.
pub(crate) mod serde_opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(d)?;
        Ok(secs.map(Duration::from_secs))
    }
}
