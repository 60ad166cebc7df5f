use room_proto::WireError;
use room_transport::TransportError;
use thiserror::Error;

/// Why a tunnel-connect call was refused.
///
/// Every variant is produced before any relay starts, and the Display string
/// is what the caller receives as the call's rejection reason. Failures after
/// the relay has started never travel back through the original call; they
/// only show up as stream closures.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Payload did not decode to exactly one connect request.
    #[error("invalid connect arguments: {0}")]
    InvalidArguments(#[from] WireError),

    /// The request named a different room as its portal.
    #[error("talking to the wrong room")]
    WrongRoom,

    /// The transport could not attest the caller's identity.
    #[error("caller is not authenticated")]
    UnauthenticatedCaller,

    /// The target is not connected to this room right now.
    #[error("no such endpoint")]
    NoSuchEndpoint,

    /// Lookup succeeded but the nested connect call to the target failed.
    #[error("failed to init connect call with target: {0}")]
    TargetUnreachable(#[from] TransportError),
}
