//! Request payloads and the framed stream envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;

/// Errors produced while decoding a method's argument payload.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed argument payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("expected exactly one argument, got {0}")]
    WrongArity(usize),
}

/// A two-part RPC method name, e.g. `tunnel.connect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Method(Vec<String>);

impl Method {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// The method a room dispatches to its tunnel handler, and the method it
    /// forwards to the target peer.
    pub fn tunnel_connect() -> Self {
        Self::new(["tunnel", "connect"])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// The tunnel-connect request as sent by the caller.
///
/// Decoded from an argument sequence that must contain exactly one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// The room this request is addressed to.
    pub portal: Identity,
    /// The peer the caller wants a tunnel to.
    pub target: Identity,
}

impl ConnectRequest {
    /// Decodes the raw argument bytes of an inbound call.
    ///
    /// The payload is a JSON sequence; anything other than exactly one
    /// `ConnectRequest` element is a wire error.
    pub fn from_raw_args(raw: &[u8]) -> Result<Self, WireError> {
        let args: Vec<ConnectRequest> = serde_json::from_slice(raw)?;
        if args.len() != 1 {
            return Err(WireError::WrongArity(args.len()));
        }
        Ok(args[0])
    }

    /// Encodes this request as an argument sequence for an outbound call.
    pub fn to_raw_args(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(&[self])?)
    }

    /// Attaches the room-derived caller identity for forwarding to the target.
    pub fn with_origin(self, origin: Identity) -> ConnectRequestWithOrigin {
        ConnectRequestWithOrigin {
            portal: self.portal,
            target: self.target,
            origin,
        }
    }
}

/// The request the room forwards to the target peer.
///
/// `origin` is derived from the caller's authenticated connection, never from
/// the request payload, so the target only ever sees a room-attested caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequestWithOrigin {
    pub portal: Identity,
    pub target: Identity,
    pub origin: Identity,
}

impl ConnectRequestWithOrigin {
    pub fn from_raw_args(raw: &[u8]) -> Result<Self, WireError> {
        let args: Vec<ConnectRequestWithOrigin> = serde_json::from_slice(raw)?;
        if args.len() != 1 {
            return Err(WireError::WrongArity(args.len()));
        }
        Ok(args[0])
    }

    pub fn to_raw_args(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(&[self])?)
    }
}

/// One frame on a call stream.
///
/// Every bidirectional stream starts with a `Request` from the opener and a
/// verdict (`Accept` or `Reject`) from the acceptor. After an accept the
/// stream carries relay payload: `Data` chunks, ended by `Close` (clean EOF)
/// or `Error` (abortive close with a reason).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamFrame {
    Request { method: Method, args: Vec<u8> },
    Accept,
    Reject { reason: String },
    Data(Vec<u8>),
    Close,
    Error { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;

    fn identity() -> Identity {
        Keypair::generate().identity()
    }

    #[test]
    fn method_displays_dotted() {
        assert_eq!(Method::tunnel_connect().to_string(), "tunnel.connect");
    }

    #[test]
    fn connect_request_roundtrip() {
        let req = ConnectRequest {
            portal: identity(),
            target: identity(),
        };
        let raw = req.to_raw_args().unwrap();
        assert_eq!(ConnectRequest::from_raw_args(&raw).unwrap(), req);
    }

    #[test]
    fn rejects_empty_argument_sequence() {
        let err = ConnectRequest::from_raw_args(b"[]").unwrap_err();
        assert!(matches!(err, WireError::WrongArity(0)));
    }

    #[test]
    fn rejects_multiple_arguments() {
        let req = ConnectRequest {
            portal: identity(),
            target: identity(),
        };
        let raw = serde_json::to_vec(&[req, req]).unwrap();
        let err = ConnectRequest::from_raw_args(&raw).unwrap_err();
        assert!(matches!(err, WireError::WrongArity(2)));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(matches!(
            ConnectRequest::from_raw_args(b"not json").unwrap_err(),
            WireError::Malformed(_)
        ));
        assert!(matches!(
            ConnectRequest::from_raw_args(b"[{\"portal\": 42}]").unwrap_err(),
            WireError::Malformed(_)
        ));
    }

    #[test]
    fn identities_travel_as_canonical_strings() {
        let req = ConnectRequest {
            portal: identity(),
            target: identity(),
        };
        let raw = req.to_raw_args().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains(&req.portal.to_hex()));
        assert!(text.contains(&req.target.to_hex()));
    }

    #[test]
    fn with_origin_keeps_request_fields() {
        let req = ConnectRequest {
            portal: identity(),
            target: identity(),
        };
        let origin = identity();
        let forwarded = req.with_origin(origin);
        assert_eq!(forwarded.portal, req.portal);
        assert_eq!(forwarded.target, req.target);
        assert_eq!(forwarded.origin, origin);

        let raw = forwarded.to_raw_args().unwrap();
        assert_eq!(ConnectRequestWithOrigin::from_raw_args(&raw).unwrap(), forwarded);
    }
}
