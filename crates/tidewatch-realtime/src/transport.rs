//! Transport seam between [`crate::EventClient`] and the wire.
//!
//! A [`Connector`] starts a background session and hands back a
//! [`TransportHandle`]: a pair of channels plus a cancellation token. The
//! session owns the other ends ([`TransportPeer`]).

use std::time::Duration;

use serde_json::Value;
use tidewatch_settings::{RealtimeSettings, TransportKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of both channels between client and session.
pub const CHANNEL_CAPACITY: usize = 256;

/// A message for the server.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    /// Event name.
    pub event: String,
    /// Optional single argument.
    pub data: Option<Value>,
}

/// Lifecycle and data reported by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Namespace connect acknowledged.
    Connected,
    /// A live connection ended.
    Disconnected {
        /// Short cause, e.g. `ping timeout` or `io server disconnect`.
        reason: String,
    },
    /// A connection attempt failed.
    ConnectError {
        /// Human-readable cause.
        message: String,
    },
    /// Server-pushed event.
    Event {
        /// Event name.
        name: String,
        /// Event payload, `Null` when the server sent none.
        data: Value,
    },
}

/// Knobs for negotiation and reconnection.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportOptions {
    /// Transports to try, in order.
    pub transports: Vec<TransportKind>,
    /// Reconnect after a lost connection or failed attempt.
    pub reconnection: bool,
    /// Give up after this many consecutive attempts. `None` never gives up.
    pub reconnection_attempts: Option<u32>,
    /// First reconnection delay.
    pub reconnection_delay: Duration,
    /// Cap for the reconnection delay.
    pub reconnection_delay_max: Duration,
    /// Jitter factor in `0.0..=1.0`.
    pub randomization_factor: f64,
    /// Timeout for opening the transport and for the namespace handshake.
    pub connect_timeout: Duration,
}

impl From<&RealtimeSettings> for TransportOptions {
    fn from(settings: &RealtimeSettings) -> Self {
        Self {
            transports: settings.transport_order(),
            reconnection: settings.reconnection,
            reconnection_attempts: settings.reconnection_attempts,
            reconnection_delay: Duration::from_millis(settings.reconnection_delay_ms),
            reconnection_delay_max: Duration::from_millis(
                settings
                    .reconnection_delay_max_ms
                    .max(settings.reconnection_delay_ms),
            ),
            randomization_factor: settings.randomization_factor.clamp(0.0, 1.0),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&RealtimeSettings::default())
    }
}

/// Client side of a session.
#[derive(Debug)]
pub struct TransportHandle {
    /// Messages to write to the server.
    pub outbound: mpsc::Sender<OutboundMessage>,
    /// Lifecycle and server events.
    pub inbound: mpsc::Receiver<TransportEvent>,
    /// Cancel to tear the session down.
    pub cancel: CancellationToken,
}

/// Session side of a [`TransportHandle`].
#[derive(Debug)]
pub struct TransportPeer {
    /// Messages queued by the client.
    pub outbound: mpsc::Receiver<OutboundMessage>,
    /// Where to report lifecycle and server events.
    pub inbound: mpsc::Sender<TransportEvent>,
    /// Fires when the client disconnects.
    pub cancel: CancellationToken,
}

impl TransportHandle {
    /// Create a connected handle/peer pair.
    pub fn pair() -> (Self, TransportPeer) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                cancel: cancel.clone(),
            },
            TransportPeer {
                outbound: out_rx,
                inbound: in_tx,
                cancel,
            },
        )
    }
}

/// Starts transport sessions.
///
/// `connect` must return immediately; the session runs in the background
/// and reports through the handle. Requires a Tokio runtime.
pub trait Connector: Send + Sync + 'static {
    /// Begin connecting to `endpoint`.
    fn connect(&self, endpoint: &str, options: &TransportOptions) -> TransportHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_default_settings() {
        let opts = TransportOptions::default();
        assert_eq!(
            opts.transports,
            vec![TransportKind::Websocket, TransportKind::Polling]
        );
        assert!(opts.reconnection);
        assert_eq!(opts.reconnection_attempts, None);
        assert_eq!(opts.reconnection_delay, Duration::from_secs(1));
        assert_eq!(opts.reconnection_delay_max, Duration::from_secs(5));
        assert_eq!(opts.connect_timeout, Duration::from_secs(20));
    }

    #[test]
    fn options_clamp_bad_values() {
        let settings = RealtimeSettings {
            reconnection_delay_ms: 8_000,
            reconnection_delay_max_ms: 2_000,
            randomization_factor: 3.0,
            ..RealtimeSettings::default()
        };
        let opts = TransportOptions::from(&settings);
        assert_eq!(opts.reconnection_delay_max, Duration::from_secs(8));
        assert!((opts.randomization_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn polling_only() {
        let settings = RealtimeSettings {
            transports: vec!["polling".into()],
            ..RealtimeSettings::default()
        };
        let opts = TransportOptions::from(&settings);
        assert_eq!(opts.transports, vec![TransportKind::Polling]);
    }

    #[tokio::test]
    async fn pair_is_wired() {
        let (mut handle, mut peer) = TransportHandle::pair();

        handle
            .outbound
            .send(OutboundMessage {
                event: "leave_location_room".into(),
                data: None,
            })
            .await
            .unwrap();
        assert_eq!(
            peer.outbound.recv().await.unwrap().event,
            "leave_location_room"
        );

        peer.inbound.send(TransportEvent::Connected).await.unwrap();
        assert_eq!(handle.inbound.recv().await, Some(TransportEvent::Connected));

        handle.cancel.cancel();
        assert!(peer.cancel.is_cancelled());
    }
}
