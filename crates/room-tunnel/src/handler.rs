//! The tunnel.connect request handler.

use std::sync::Arc;

use room_proto::{ConnectRequest, Identity, Method};
use room_registry::EndpointDirectory;
use room_transport::{DuplexStream, Endpoint, IncomingCall, TransportError};
use tracing::{debug, info, warn};

use crate::error::ConnectError;
use crate::relay::RelaySession;

/// Answers inbound `tunnel.connect` calls for one room.
///
/// Holds the room's own identity and a lookup-only view of the endpoint
/// registry. Cheap to clone; one handler serves all connections.
#[derive(Clone)]
pub struct ConnectHandler {
    self_id: Identity,
    directory: Arc<dyn EndpointDirectory>,
}

impl ConnectHandler {
    pub fn new(self_id: Identity, directory: Arc<dyn EndpointDirectory>) -> Self {
        Self { self_id, directory }
    }

    /// The room identity this handler answers for.
    pub fn self_identity(&self) -> Identity {
        self.self_id
    }

    /// Handles one inbound tunnel.connect call.
    ///
    /// `caller` is the transport-attested identity of the calling peer; the
    /// request payload never names the caller. On success the call has been
    /// accepted and two relay tasks are left running, decoupled from this
    /// call's lifetime. On error the call has been rejected with the error's
    /// display string and no relay was started.
    pub async fn handle_connect(
        &self,
        caller: Option<Identity>,
        call: IncomingCall,
    ) -> Result<(), ConnectError> {
        match self.prepare(caller, &call.args).await {
            Ok((caller_id, target_id, target_stream)) => {
                let caller_stream = match call.accept().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        // Caller went away before the verdict. Dropping the
                        // target stream tears the nested call down.
                        warn!(
                            caller = %caller_id.short(),
                            target = %target_id.short(),
                            error = %err,
                            "caller gone before tunnel start"
                        );
                        return Ok(());
                    }
                };
                info!(
                    caller = %caller_id.short(),
                    target = %target_id.short(),
                    "tunnel connected"
                );
                RelaySession::new(caller_id, target_id).spawn(caller_stream, target_stream);
                Ok(())
            }
            Err(err) => {
                debug!(error = %err, "tunnel connect refused");
                if let Err(reject_err) = call.reject(&err.to_string()).await {
                    debug!(error = %reject_err, "rejection not delivered");
                }
                Err(err)
            }
        }
    }

    /// Decode, portal check, caller identity, registry lookup, nested call.
    /// No side effects besides the nested call itself.
    async fn prepare(
        &self,
        caller: Option<Identity>,
        raw_args: &[u8],
    ) -> Result<(Identity, Identity, DuplexStream), ConnectError> {
        let request = ConnectRequest::from_raw_args(raw_args)?;

        if request.portal != self.self_id {
            return Err(ConnectError::WrongRoom);
        }

        let caller_id = caller.ok_or(ConnectError::UnauthenticatedCaller)?;

        let endpoint = self
            .directory
            .lookup(&request.target)
            .ok_or(ConnectError::NoSuchEndpoint)?;

        // The target only ever sees the origin the room attests, never a
        // caller-claimed identity.
        let forwarded = request.with_origin(caller_id);
        let args = forwarded
            .to_raw_args()
            .map_err(|err| ConnectError::TargetUnreachable(TransportError::Wire(err)))?;
        let target_stream = endpoint
            .open_duplex(Method::tunnel_connect(), args)
            .await?;

        Ok((caller_id, request.target, target_stream))
    }
}
