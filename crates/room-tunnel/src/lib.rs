//! Tunnel brokering between room peers.
//!
//! A room cannot deliver peers to each other directly; it brokers a tunnel
//! instead. The caller issues `tunnel.connect` naming the room (`portal`) and
//! the desired peer (`target`); the room opens a nested `tunnel.connect` to
//! the target carrying the caller's attested identity as `origin`, then
//! splices the two byte streams together and gets out of the way.
//!
//! [`ConnectHandler`] runs the request path and [`RelaySession`] the splice.
//! Targets are resolved through `room_registry::EndpointDirectory`, so the
//! code here never owns or mutates connection state.

pub mod error;
pub mod handler;
pub mod relay;

pub use error::ConnectError;
pub use handler::ConnectHandler;
pub use relay::RelaySession;
