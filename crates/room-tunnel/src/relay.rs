//! The byte relay between an accepted caller stream and the nested call
//! opened to the target.
//!
//! Each tunnel runs as two independent copy tasks, one per direction. They
//! share nothing mutable except a cancellation token: when one direction
//! fails, it cancels the token and the sibling exits on its next suspension
//! point, so a half-open tunnel is never left running. A clean EOF does not
//! cancel the sibling; half-closed tunnels keep relaying the other way.

use room_proto::Identity;
use room_transport::{ByteSink, ByteSource, DuplexStream, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// One tunnel's pair of relay directions.
///
/// Carries only the identities used for logging and a fresh session id. The
/// spawned tasks own their streams outright; nothing joins them and no state
/// about the tunnel is kept anywhere else. Teardown is driven entirely by
/// stream closure and the shared cancellation token.
pub struct RelaySession {
    id: Uuid,
    caller: Identity,
    target: Identity,
}

impl RelaySession {
    pub fn new(caller: Identity, target: Identity) -> Self {
        Self {
            id: Uuid::new_v4(),
            caller,
            target,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Starts both relay directions and returns immediately.
    pub fn spawn(self, caller_stream: DuplexStream, target_stream: DuplexStream) {
        let cancel = CancellationToken::new();
        let (caller_source, caller_sink) = caller_stream.split();
        let (target_source, target_sink) = target_stream.split();

        debug!(
            session = %self.id,
            caller = %self.caller.short(),
            target = %self.target.short(),
            "tunnel relay starting"
        );

        tokio::spawn(relay_direction(RelayDirection {
            session: self.id,
            from: self.caller,
            to: self.target,
            source: caller_source,
            sink: target_sink,
            cancel: cancel.clone(),
        }));
        tokio::spawn(relay_direction(RelayDirection {
            session: self.id,
            from: self.target,
            to: self.caller,
            source: target_source,
            sink: caller_sink,
            cancel,
        }));
    }
}

/// Everything one copy direction owns.
pub(crate) struct RelayDirection {
    pub(crate) session: Uuid,
    pub(crate) from: Identity,
    pub(crate) to: Identity,
    pub(crate) source: Box<dyn ByteSource>,
    pub(crate) sink: Box<dyn ByteSink>,
    pub(crate) cancel: CancellationToken,
}

enum StepOutcome {
    Copied(usize),
    Eof,
    Failed(TransportError),
}

/// Copies chunks from source to sink until EOF, failure or cancellation.
///
/// At most one chunk is in flight: the next read does not start until the
/// previous chunk has been fully written, so the destination's own
/// backpressure bounds memory use for the whole tunnel.
pub(crate) async fn relay_direction(mut dir: RelayDirection) {
    let mut moved: u64 = 0;
    loop {
        tokio::select! {
            _ = dir.cancel.cancelled() => {
                // The sibling direction failed and already reported it.
                debug!(
                    session = %dir.session,
                    from = %dir.from.short(),
                    to = %dir.to.short(),
                    bytes = moved,
                    "relay direction cancelled"
                );
                let _ = dir.sink.close().await;
                return;
            }
            outcome = relay_step(&mut dir.source, &mut dir.sink) => match outcome {
                StepOutcome::Copied(n) => {
                    moved += n as u64;
                }
                StepOutcome::Eof => {
                    debug!(
                        session = %dir.session,
                        from = %dir.from.short(),
                        to = %dir.to.short(),
                        bytes = moved,
                        "relay direction finished"
                    );
                    let _ = dir.sink.close().await;
                    return;
                }
                StepOutcome::Failed(err) => {
                    warn!(
                        session = %dir.session,
                        from = %dir.from.short(),
                        to = %dir.to.short(),
                        bytes = moved,
                        error = %err,
                        "relay direction failed"
                    );
                    let _ = dir.sink.close_with_error(&err.to_string()).await;
                    dir.cancel.cancel();
                    return;
                }
            }
        }
    }
}

async fn relay_step(
    source: &mut Box<dyn ByteSource>,
    sink: &mut Box<dyn ByteSink>,
) -> StepOutcome {
    match source.next_chunk().await {
        Ok(Some(chunk)) => {
            let len = chunk.len();
            match sink.write_chunk(chunk).await {
                Ok(()) => StepOutcome::Copied(len),
                Err(err) => StepOutcome::Failed(err),
            }
        }
        Ok(None) => StepOutcome::Eof,
        Err(err) => StepOutcome::Failed(err),
    }
}
