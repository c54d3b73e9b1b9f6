//! Socket.IO v4 client transport.
//!
//! One background task per [`SocketIoConnector::connect`] call. The task
//! negotiates a transport (WebSocket first by default, long-polling as the
//! fallback), joins the default namespace, answers heartbeats, and
//! reconnects with jittered exponential backoff until cancelled.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use rand::Rng;
use reqwest::Url;
use serde_json::Value;
use tidewatch_settings::TransportKind;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::RealtimeError;
use crate::protocol::{
    EnginePacket, OpenInfo, ProtocolError, SocketPacket, decode_payload, encode_payload,
};
use crate::transport::{
    Connector, OutboundMessage, TransportEvent, TransportHandle, TransportOptions, TransportPeer,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ENGINE_VERSION: &str = "4";
const SERVER_DISCONNECT: &str = "io server disconnect";

/// Socket.IO [`Connector`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketIoConnector;

impl Connector for SocketIoConnector {
    fn connect(&self, endpoint: &str, options: &TransportOptions) -> TransportHandle {
        let (handle, peer) = TransportHandle::pair();
        let _ = tokio::spawn(run(endpoint.to_owned(), options.clone(), peer));
        handle
    }
}

/// Engine.IO URL for `endpoint` on the given transport.
///
/// `http` maps to `ws` and `https` to `wss` for WebSocket; `ws(s)` endpoints
/// map back for polling. Any path on the endpoint is replaced.
pub fn engine_url(endpoint: &str, transport: TransportKind) -> Result<Url, RealtimeError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| RealtimeError::Transport(format!("invalid endpoint {endpoint:?}: {e}")))?;
    let scheme = match (url.scheme(), transport) {
        ("http" | "ws", TransportKind::Websocket) => "ws",
        ("https" | "wss", TransportKind::Websocket) => "wss",
        ("http" | "ws", TransportKind::Polling) => "http",
        ("https" | "wss", TransportKind::Polling) => "https",
        (other, _) => {
            return Err(RealtimeError::Transport(format!(
                "unsupported endpoint scheme {other:?}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| RealtimeError::Transport(format!("cannot switch endpoint to {scheme}")))?;
    url.set_path("/socket.io/");
    url.set_query(Some(&format!("EIO={ENGINE_VERSION}&transport={transport}")));
    url.set_fragment(None);
    Ok(url)
}

/// Delay before reconnection attempt number `attempt` (1-based).
///
/// `delay * 2^(attempt-1)`, shifted by up to `randomization_factor` of itself
/// in either direction, capped at `reconnection_delay_max`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
pub fn reconnect_delay(options: &TransportOptions, attempt: u32) -> Duration {
    let base = options.reconnection_delay.as_millis() as f64;
    let max = options.reconnection_delay_max.as_millis() as f64;
    let exponent = attempt.saturating_sub(1).min(31) as i32;
    let exp = base * 2f64.powi(exponent);
    let jitter = if options.randomization_factor > 0.0 {
        exp * options.randomization_factor * rand::rng().random_range(-1.0..=1.0)
    } else {
        0.0
    };
    Duration::from_millis((exp + jitter).clamp(0.0, max) as u64)
}

/// How a single session ended.
#[derive(Debug)]
enum SessionEnd {
    /// The client cancelled or went away.
    Cancelled,
    /// Never reached the connected state.
    Failed(RealtimeError),
    /// The server refused the namespace connect.
    Rejected(String),
    /// A connected session died.
    Lost(String),
    /// The server disconnected us on purpose.
    ServerDisconnect,
}

async fn run(endpoint: String, options: TransportOptions, mut peer: TransportPeer) {
    let mut attempt: u32 = 0;
    loop {
        drop_stale_outbound(&mut peer);

        let (event, retry) = match connect_once(&endpoint, &options, &mut peer).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Failed(err) => {
                warn!(%endpoint, error = %err, "realtime connect failed");
                (
                    TransportEvent::ConnectError {
                        message: err.to_string(),
                    },
                    true,
                )
            }
            SessionEnd::Rejected(message) => {
                warn!(%endpoint, %message, "realtime server refused connection");
                (TransportEvent::ConnectError { message }, false)
            }
            SessionEnd::Lost(reason) => {
                info!(%endpoint, %reason, "realtime connection lost");
                attempt = 0;
                (TransportEvent::Disconnected { reason }, true)
            }
            SessionEnd::ServerDisconnect => {
                info!(%endpoint, "realtime server closed the session");
                (
                    TransportEvent::Disconnected {
                        reason: SERVER_DISCONNECT.to_owned(),
                    },
                    false,
                )
            }
        };

        if peer.inbound.send(event).await.is_err() || !retry || !options.reconnection {
            break;
        }

        attempt = attempt.saturating_add(1);
        if options
            .reconnection_attempts
            .is_some_and(|max| attempt > max)
        {
            warn!(%endpoint, attempts = attempt - 1, "giving up on realtime reconnection");
            break;
        }

        let delay = reconnect_delay(&options, attempt);
        debug!(
            %endpoint,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        tokio::select! {
            () = peer.cancel.cancelled() => break,
            () = sleep(delay) => {}
        }
    }
    debug!(%endpoint, "realtime session task finished");
}

/// Messages queued while no session was live are dropped, never replayed.
fn drop_stale_outbound(peer: &mut TransportPeer) {
    while let Ok(msg) = peer.outbound.try_recv() {
        warn!(event = %msg.event, "dropping message queued while disconnected");
    }
}

/// Try each configured transport in order until one gets past the open.
async fn connect_once(
    endpoint: &str,
    options: &TransportOptions,
    peer: &mut TransportPeer,
) -> SessionEnd {
    let mut last_error = None;
    for &kind in &options.transports {
        let end = match kind {
            TransportKind::Websocket => {
                open_and_drive(kind, WebSocketLink::open(endpoint), options, peer).await
            }
            TransportKind::Polling => {
                open_and_drive(kind, PollingLink::open(endpoint, options), options, peer).await
            }
        };
        match end {
            SessionEnd::Failed(err) => {
                debug!(transport = %kind, error = %err, "transport failed, trying next");
                last_error = Some(err);
            }
            other => return other,
        }
    }
    SessionEnd::Failed(
        last_error.unwrap_or_else(|| RealtimeError::Transport("no transports configured".into())),
    )
}

/// An open Engine.IO session, transport-agnostic.
#[async_trait]
trait EngineLink: Send {
    /// Next batch of packets. Must be cancel-safe.
    async fn recv(&mut self) -> Result<Vec<EnginePacket>, RealtimeError>;
    /// Write packets in order.
    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), RealtimeError>;
    /// Best-effort namespace and transport close.
    async fn close(&mut self);
}

struct Opened<L> {
    link: L,
    info: OpenInfo,
    /// Packets that arrived together with the open packet.
    pending: VecDeque<EnginePacket>,
}

fn unexpected_handshake(packet: Option<&EnginePacket>) -> RealtimeError {
    RealtimeError::Protocol(ProtocolError::Malformed {
        what: "handshake",
        detail: format!("expected open packet, got {packet:?}"),
    })
}

async fn open_and_drive<L, F>(
    kind: TransportKind,
    open: F,
    options: &TransportOptions,
    peer: &mut TransportPeer,
) -> SessionEnd
where
    L: EngineLink,
    F: Future<Output = Result<Opened<L>, RealtimeError>>,
{
    let opened = tokio::select! {
        biased;
        () = peer.cancel.cancelled() => return SessionEnd::Cancelled,
        opened = timeout(options.connect_timeout, open) => opened,
    };
    match opened {
        Ok(Ok(opened)) => drive(opened, kind, options, peer).await,
        Ok(Err(err)) => SessionEnd::Failed(err),
        Err(_elapsed) => SessionEnd::Failed(RealtimeError::Transport(format!(
            "{kind} open timed out"
        ))),
    }
}

enum Wake {
    Cancelled,
    Deadline,
    Outbound(Option<OutboundMessage>),
    Received(Result<Vec<EnginePacket>, RealtimeError>),
}

struct DriveState {
    connected: bool,
    /// Latest instant by which the next ping must arrive.
    deadline: Instant,
    liveness: Duration,
}

impl DriveState {
    async fn handle<L: EngineLink>(
        &mut self,
        packet: EnginePacket,
        link: &mut L,
        peer: &TransportPeer,
    ) -> Option<SessionEnd> {
        match packet {
            EnginePacket::Ping(data) => {
                self.deadline = Instant::now() + self.liveness;
                if let Err(err) = link.send(vec![EnginePacket::Pong(data)]).await {
                    return Some(self.end(err));
                }
            }
            EnginePacket::Close => {
                return Some(self.end(RealtimeError::Closed("engine.io close packet".into())));
            }
            EnginePacket::Message(text) => match SocketPacket::decode(&text) {
                Ok(SocketPacket::Connect(_)) if !self.connected => {
                    self.connected = true;
                    self.deadline = Instant::now() + self.liveness;
                    return report(peer, TransportEvent::Connected).await;
                }
                Ok(SocketPacket::Event { name, data }) if self.connected => {
                    let event = TransportEvent::Event {
                        name,
                        data: data.unwrap_or(Value::Null),
                    };
                    return report(peer, event).await;
                }
                Ok(SocketPacket::ConnectError(err)) => {
                    return Some(SessionEnd::Rejected(connect_error_message(&err)));
                }
                Ok(SocketPacket::Disconnect) => {
                    return Some(if self.connected {
                        SessionEnd::ServerDisconnect
                    } else {
                        SessionEnd::Rejected("namespace disconnected during handshake".into())
                    });
                }
                Ok(other) => debug!(packet = ?other, "ignoring socket.io packet"),
                Err(err) => warn!(error = %err, "dropping undecodable socket.io packet"),
            },
            EnginePacket::Open(_)
            | EnginePacket::Pong(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => {}
        }
        None
    }

    fn end(&self, err: RealtimeError) -> SessionEnd {
        if self.connected {
            SessionEnd::Lost(err.to_string())
        } else {
            SessionEnd::Failed(err)
        }
    }
}

async fn report(peer: &TransportPeer, event: TransportEvent) -> Option<SessionEnd> {
    match peer.inbound.send(event).await {
        Ok(()) => None,
        Err(_) => Some(SessionEnd::Cancelled),
    }
}

fn connect_error_message(err: &Value) -> String {
    err.get("message")
        .and_then(Value::as_str)
        .map_or_else(|| err.to_string(), str::to_owned)
}

/// Namespace handshake, then pump packets both ways until the session ends.
async fn drive<L: EngineLink>(
    opened: Opened<L>,
    kind: TransportKind,
    options: &TransportOptions,
    peer: &mut TransportPeer,
) -> SessionEnd {
    let Opened {
        mut link,
        info,
        mut pending,
    } = opened;
    debug!(transport = %kind, sid = %info.sid, "engine.io session open");

    if let Err(err) = link.send(vec![SocketPacket::Connect(None).into_engine()]).await {
        return SessionEnd::Failed(err);
    }

    let liveness = Duration::from_millis(info.ping_interval.saturating_add(info.ping_timeout));
    let handshake_deadline = Instant::now() + options.connect_timeout;
    let mut state = DriveState {
        connected: false,
        deadline: Instant::now() + liveness,
        liveness,
    };

    loop {
        while let Some(packet) = pending.pop_front() {
            let was_connected = state.connected;
            if let Some(end) = state.handle(packet, &mut link, peer).await {
                if matches!(end, SessionEnd::Cancelled) {
                    link.close().await;
                }
                return end;
            }
            if state.connected && !was_connected {
                info!(transport = %kind, "realtime connected");
            }
        }

        let wake_at = if state.connected {
            state.deadline
        } else {
            state.deadline.min(handshake_deadline)
        };
        let wake = tokio::select! {
            biased;
            () = peer.cancel.cancelled() => Wake::Cancelled,
            () = sleep_until(wake_at) => Wake::Deadline,
            msg = peer.outbound.recv(), if state.connected => Wake::Outbound(msg),
            received = link.recv() => Wake::Received(received),
        };

        match wake {
            Wake::Cancelled | Wake::Outbound(None) => {
                link.close().await;
                return SessionEnd::Cancelled;
            }
            Wake::Deadline if state.connected => return SessionEnd::Lost("ping timeout".into()),
            Wake::Deadline => {
                return SessionEnd::Failed(RealtimeError::Transport(
                    "timed out waiting for namespace connect".into(),
                ));
            }
            Wake::Outbound(Some(msg)) => {
                debug!(event = %msg.event, "sending realtime message");
                let packet = SocketPacket::Event {
                    name: msg.event,
                    data: msg.data,
                }
                .into_engine();
                if let Err(err) = link.send(vec![packet]).await {
                    return state.end(err);
                }
            }
            Wake::Received(Ok(packets)) => pending.extend(packets),
            Wake::Received(Err(err)) => return state.end(err),
        }
    }
}

// ─── WebSocket ─────────────────────────────────────────────────────────────

struct WebSocketLink {
    ws: WsStream,
}

impl WebSocketLink {
    async fn open(endpoint: &str) -> Result<Opened<Self>, RealtimeError> {
        let url = engine_url(endpoint, TransportKind::Websocket)?;
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(RealtimeError::transport)?;
        let mut link = Self { ws };
        let mut first = link.recv().await?;
        match first.pop() {
            Some(EnginePacket::Open(info)) => Ok(Opened {
                link,
                info,
                pending: VecDeque::new(),
            }),
            other => Err(unexpected_handshake(other.as_ref())),
        }
    }
}

#[async_trait]
impl EngineLink for WebSocketLink {
    async fn recv(&mut self) -> Result<Vec<EnginePacket>, RealtimeError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match EnginePacket::decode(text.as_str()) {
                    Ok(packet) => return Ok(vec![packet]),
                    Err(err) => warn!(error = %err, "dropping undecodable engine.io frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(RealtimeError::Closed("websocket closed".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(RealtimeError::transport(err)),
            }
        }
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), RealtimeError> {
        for packet in packets {
            self.ws
                .send(Message::Text(packet.encode().into()))
                .await
                .map_err(RealtimeError::transport)?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self
            .send(vec![SocketPacket::Disconnect.into_engine(), EnginePacket::Close])
            .await;
        let _ = self.ws.close(None).await;
    }
}

// ─── Long-polling ──────────────────────────────────────────────────────────

struct PollingLink {
    client: reqwest::Client,
    /// Engine.IO URL including `sid`.
    url: Url,
    /// Outstanding GET, kept across cancelled `recv` calls.
    inflight: Option<BoxFuture<'static, Result<String, RealtimeError>>>,
}

async fn http_get(client: reqwest::Client, url: Url) -> Result<String, RealtimeError> {
    client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(RealtimeError::transport)?
        .text()
        .await
        .map_err(RealtimeError::transport)
}

impl PollingLink {
    async fn open(endpoint: &str, options: &TransportOptions) -> Result<Opened<Self>, RealtimeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(RealtimeError::transport)?;
        let mut url = engine_url(endpoint, TransportKind::Polling)?;

        let body = http_get(client.clone(), url.clone()).await?;
        let mut pending: VecDeque<EnginePacket> = decode_payload(&body)?.into();
        let info = match pending.pop_front() {
            Some(EnginePacket::Open(info)) => info,
            other => return Err(unexpected_handshake(other.as_ref())),
        };
        let _ = url.query_pairs_mut().append_pair("sid", &info.sid);

        Ok(Opened {
            link: Self {
                client,
                url,
                inflight: None,
            },
            info,
            pending,
        })
    }
}

#[async_trait]
impl EngineLink for PollingLink {
    async fn recv(&mut self) -> Result<Vec<EnginePacket>, RealtimeError> {
        let client = &self.client;
        let url = &self.url;
        let poll = self
            .inflight
            .get_or_insert_with(|| http_get(client.clone(), url.clone()).boxed());
        let body = poll.await;
        self.inflight = None;
        match decode_payload(&body?) {
            Ok(packets) => Ok(packets),
            Err(err) => {
                warn!(error = %err, "dropping undecodable polling payload");
                Ok(Vec::new())
            }
        }
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> Result<(), RealtimeError> {
        let _ = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(encode_payload(&packets))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(RealtimeError::transport)?;
        Ok(())
    }

    async fn close(&mut self) {
        self.inflight = None;
        let _ = self
            .send(vec![SocketPacket::Disconnect.into_engine(), EnginePacket::Close])
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TransportOptions {
        TransportOptions {
            reconnection_delay: Duration::from_millis(1_000),
            reconnection_delay_max: Duration::from_millis(5_000),
            randomization_factor: 0.0,
            ..TransportOptions::default()
        }
    }

    #[test]
    fn https_endpoint_maps_to_wss() {
        let url = engine_url("https://sih-web-server.onrender.com", TransportKind::Websocket)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://sih-web-server.onrender.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn http_endpoint_maps_to_ws() {
        let url = engine_url("http://localhost:8000/", TransportKind::Websocket).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn polling_keeps_http_scheme() {
        let url = engine_url("wss://example.org", TransportKind::Polling).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.org/socket.io/?EIO=4&transport=polling"
        );
    }

    #[test]
    fn bad_endpoints_rejected() {
        assert!(engine_url("not a url", TransportKind::Websocket).is_err());
        assert!(engine_url("ftp://example.org", TransportKind::Polling).is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let opts = options();
        assert_eq!(reconnect_delay(&opts, 1), Duration::from_millis(1_000));
        assert_eq!(reconnect_delay(&opts, 2), Duration::from_millis(2_000));
        assert_eq!(reconnect_delay(&opts, 3), Duration::from_millis(4_000));
        assert_eq!(reconnect_delay(&opts, 4), Duration::from_millis(5_000));
        assert_eq!(reconnect_delay(&opts, 400), Duration::from_millis(5_000));
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let opts = TransportOptions {
            randomization_factor: 0.5,
            ..options()
        };
        for _ in 0..100 {
            let delay = reconnect_delay(&opts, 1);
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_500), "{delay:?}");
        }
    }

    #[test]
    fn connect_error_prefers_message_field() {
        assert_eq!(
            connect_error_message(&serde_json::json!({"message": "Not authorized"})),
            "Not authorized"
        );
        assert_eq!(connect_error_message(&serde_json::json!("nope")), "\"nope\"");
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_connect_error_and_stops() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let opts = TransportOptions {
            reconnection: false,
            connect_timeout: Duration::from_secs(2),
            ..TransportOptions::default()
        };
        let mut handle = SocketIoConnector.connect(&format!("http://127.0.0.1:{port}"), &opts);

        let event = timeout(Duration::from_secs(5), handle.inbound.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(TransportEvent::ConnectError { .. })));
        let closed = timeout(Duration::from_secs(5), handle.inbound.recv())
            .await
            .unwrap();
        assert_eq!(closed, None);
    }

    #[tokio::test]
    async fn attempts_limit_is_honoured() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let opts = TransportOptions {
            transports: vec![TransportKind::Websocket],
            reconnection_attempts: Some(2),
            reconnection_delay: Duration::from_millis(5),
            reconnection_delay_max: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(2),
            ..TransportOptions::default()
        };
        let mut handle = SocketIoConnector.connect(&format!("http://127.0.0.1:{port}"), &opts);

        let mut errors = 0;
        while let Some(event) = timeout(Duration::from_secs(5), handle.inbound.recv())
            .await
            .unwrap()
        {
            assert!(matches!(event, TransportEvent::ConnectError { .. }));
            errors += 1;
        }
        // Initial attempt plus two reconnects.
        assert_eq!(errors, 3);
    }
}
