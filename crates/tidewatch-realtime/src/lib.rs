//! # tidewatch-realtime
//!
//! Realtime hazard feed client.
//!
//! - [`EventClient`] owns a local [`ListenerRegistry`] and at most one live
//!   transport connection. Listeners survive reconnects.
//! - Transport lifecycle is translated into the client's own vocabulary
//!   (`connection_status`, `connection_error`); server events are re-emitted
//!   verbatim under their own names.
//! - [`SocketIoConnector`] speaks Socket.IO v4 over WebSocket with a
//!   long-polling fallback and handles reconnection with jittered backoff.
//! - The [`Connector`] trait is the seam used to swap the transport in tests.

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod events;
pub mod protocol;
pub mod registry;
pub mod socketio;
pub mod transport;

pub use client::EventClient;
pub use error::RealtimeError;
pub use events::{AreaBounds, ConnectionStatus, DEFAULT_ROOM_RADIUS, LeaveLocationRoom, LocationRoom};
pub use protocol::{EnginePacket, OpenInfo, ProtocolError, SocketPacket};
pub use registry::{Listener, ListenerRegistry};
pub use socketio::SocketIoConnector;
pub use transport::{
    Connector, OutboundMessage, TransportEvent, TransportHandle, TransportOptions, TransportPeer,
};
