//! `EventClient`: the application's single entry point to realtime messaging.
//!
//! The client owns the listener registry and at most one transport handle.
//! Every transport event flows through one pump task that translates it into
//! a local dispatch, so listeners are registered in exactly one place and
//! survive reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{
    CONNECTION_ERROR, CONNECTION_STATUS, DEFAULT_ROOM_RADIUS, JOIN_LOCATION_ROOM,
    LEAVE_LOCATION_ROOM, LeaveLocationRoom, LocationRoom, SUBSCRIBE_AREA_UPDATES,
    UNSUBSCRIBE_AREA_UPDATES,
};
use crate::registry::{Listener, ListenerRegistry};
use crate::transport::{Connector, OutboundMessage, TransportEvent, TransportHandle, TransportOptions};

/// The live connection, if any.
struct ActiveConnection {
    endpoint: String,
    outbound: mpsc::Sender<OutboundMessage>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    /// Bumped on every connect/disconnect; a pump only acts while it matches.
    generation: u64,
    active: Option<ActiveConnection>,
}

#[derive(Default)]
struct Shared {
    registry: ListenerRegistry,
    connected: AtomicBool,
    slot: Mutex<Slot>,
    /// Held across a generation check and the dispatch it guards, so a
    /// teardown can never interleave with a pump delivery. Reentrant so
    /// listeners may call back into the client.
    delivery: ReentrantMutex<()>,
}

/// Realtime event client.
///
/// Construct one in the composition root and share it by reference or `Arc`.
pub struct EventClient<C: Connector> {
    connector: C,
    options: TransportOptions,
    shared: Arc<Shared>,
}

impl<C: Connector> EventClient<C> {
    /// Client with no connection and an empty registry.
    pub fn new(connector: C, options: TransportOptions) -> Self {
        Self {
            connector,
            options,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Connect to `endpoint`, tearing down any existing connection first.
    ///
    /// Returns immediately. Progress is reported through `connection_status`
    /// and `connection_error` listeners.
    pub fn connect(&self, endpoint: &str) {
        self.disconnect();

        let TransportHandle {
            outbound,
            inbound,
            cancel,
        } = self.connector.connect(endpoint, &self.options);

        let mut slot = self.shared.slot.lock();
        slot.generation += 1;
        let generation = slot.generation;
        let pump = tokio::spawn(pump(Arc::clone(&self.shared), generation, inbound));
        slot.active = Some(ActiveConnection {
            endpoint: endpoint.to_owned(),
            outbound,
            cancel,
            pump,
        });
        drop(slot);

        info!(endpoint, "realtime client connecting");
    }

    /// Tear down the active connection. No-op without one.
    pub fn disconnect(&self) {
        let _delivery = self.shared.delivery.lock();
        let (active, was_connected) = {
            let mut slot = self.shared.slot.lock();
            slot.generation += 1;
            let active = slot.active.take();
            (active, self.shared.connected.swap(false, Ordering::SeqCst))
        };
        let Some(active) = active else {
            return;
        };

        active.cancel.cancel();
        active.pump.abort();
        info!(endpoint = %active.endpoint, "realtime client disconnected");

        if was_connected {
            let _ = self
                .shared
                .registry
                .dispatch(CONNECTION_STATUS, &json!({ "connected": false }));
        }
    }

    /// Register `listener` for `event`. Returns `false` if already registered.
    pub fn on(&self, event: &str, listener: Listener) -> bool {
        self.shared.registry.add(event, listener)
    }

    /// Unregister `listener` from `event`. Returns `false` if it was not registered.
    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        self.shared.registry.remove(event, listener)
    }

    /// Deliver `data` to local listeners of `event`. Nothing goes on the wire.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        self.shared.registry.dispatch(event, data)
    }

    /// Send `event` to the server if connected.
    ///
    /// Returns `false` (with a warning) when disconnected or when the
    /// outbound queue is full or closed. Nothing is queued for later.
    pub fn send(&self, event: &str, data: Option<Value>) -> bool {
        if !self.connection_status() {
            warn!(event, "realtime client not connected, dropping message");
            return false;
        }
        let slot = self.shared.slot.lock();
        let Some(active) = slot.active.as_ref() else {
            warn!(event, "realtime client not connected, dropping message");
            return false;
        };
        match active.outbound.try_send(OutboundMessage {
            event: event.to_owned(),
            data,
        }) {
            Ok(()) => true,
            Err(err) => {
                warn!(event, error = %err, "realtime outbound queue rejected message");
                false
            }
        }
    }

    fn send_json<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(value) => self.send(event, Some(value)),
            Err(err) => {
                warn!(event, error = %err, "could not serialize realtime payload");
                false
            }
        }
    }

    /// Join the location room around a point. `radius` defaults to 10.
    pub fn join_location_room(&self, latitude: f64, longitude: f64, radius: Option<f64>) -> bool {
        self.send_json(
            JOIN_LOCATION_ROOM,
            &LocationRoom {
                latitude,
                longitude,
                radius: radius.unwrap_or(DEFAULT_ROOM_RADIUS),
            },
        )
    }

    /// Leave the location room around a point.
    pub fn leave_location_room(&self, latitude: f64, longitude: f64) -> bool {
        self.send_json(
            LEAVE_LOCATION_ROOM,
            &LeaveLocationRoom {
                latitude,
                longitude,
            },
        )
    }

    /// Subscribe to updates within `bounds`, forwarded as-is.
    pub fn subscribe_to_area_updates<B: Serialize + ?Sized>(&self, bounds: &B) -> bool {
        self.send_json(SUBSCRIBE_AREA_UPDATES, bounds)
    }

    /// Stop area updates.
    pub fn unsubscribe_from_area_updates(&self) -> bool {
        self.send(UNSUBSCRIBE_AREA_UPDATES, None)
    }

    /// Whether the transport is currently connected.
    pub fn connection_status(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Endpoint of the active connection, if any.
    pub fn endpoint(&self) -> Option<String> {
        self.shared
            .slot
            .lock()
            .active
            .as_ref()
            .map(|a| a.endpoint.clone())
    }
}

impl<C: Connector> Drop for EventClient<C> {
    fn drop(&mut self) {
        let active = self.shared.slot.lock().active.take();
        if let Some(active) = active {
            active.cancel.cancel();
            active.pump.abort();
        }
    }
}

/// Translate transport events into local dispatches.
async fn pump(shared: Arc<Shared>, generation: u64, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        if !deliver(&shared, generation, event) {
            break;
        }
    }
}

/// Apply one transport event. Returns `false` once the pump is superseded.
fn deliver(shared: &Shared, generation: u64, event: TransportEvent) -> bool {
    let _delivery = shared.delivery.lock();
    if shared.slot.lock().generation != generation {
        return false;
    }
    let (name, data) = match event {
        TransportEvent::Connected => {
            shared.connected.store(true, Ordering::SeqCst);
            info!("realtime connected");
            (CONNECTION_STATUS.to_owned(), json!({ "connected": true }))
        }
        TransportEvent::Disconnected { reason } => {
            shared.connected.store(false, Ordering::SeqCst);
            info!(%reason, "realtime disconnected");
            (CONNECTION_STATUS.to_owned(), json!({ "connected": false }))
        }
        TransportEvent::ConnectError { message } => {
            warn!(%message, "realtime connection error");
            (CONNECTION_ERROR.to_owned(), json!({ "message": message }))
        }
        TransportEvent::Event { name, data } => (name, data),
    };
    let delivered = shared.registry.dispatch(&name, &data);
    debug!(event = %name, delivered, "realtime event dispatched");
    true
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
    use tokio::time::timeout;

    use super::*;
    use crate::events::{AreaBounds, NEW_HAZARD_REPORT};
    use crate::transport::TransportPeer;

    const WAIT: Duration = Duration::from_secs(2);

    /// Hands the session ends of every connection to the test.
    #[derive(Clone, Default)]
    struct MockConnector {
        peers: Arc<Mutex<Vec<(String, TransportPeer)>>>,
    }

    impl MockConnector {
        fn take_peer(&self) -> TransportPeer {
            self.peers.lock().pop().unwrap().1
        }
    }

    impl Connector for MockConnector {
        fn connect(&self, endpoint: &str, _options: &TransportOptions) -> TransportHandle {
            let (handle, peer) = TransportHandle::pair();
            self.peers.lock().push((endpoint.to_owned(), peer));
            handle
        }
    }

    fn client() -> (EventClient<MockConnector>, MockConnector) {
        let connector = MockConnector::default();
        (
            EventClient::new(connector.clone(), TransportOptions::default()),
            connector,
        )
    }

    fn capture() -> (Listener, UnboundedReceiver<Value>) {
        let (tx, rx) = unbounded_channel();
        let listener = Listener::new(move |v| {
            let _ = tx.send(v.clone());
        });
        (listener, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Value>) -> Value {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn connected_client() -> (EventClient<MockConnector>, TransportPeer, UnboundedReceiver<Value>) {
        let (client, connector) = client();
        let (status, mut status_rx) = capture();
        assert!(client.on(CONNECTION_STATUS, status));
        client.connect("http://localhost:8000");
        let peer = connector.take_peer();
        peer.inbound.send(TransportEvent::Connected).await.unwrap();
        assert_eq!(next(&mut status_rx).await, json!({"connected": true}));
        (client, peer, status_rx)
    }

    #[tokio::test]
    async fn initial_state() {
        let (client, _) = client();
        assert!(!client.connection_status());
        assert_eq!(client.endpoint(), None);
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped() {
        let (client, connector) = client();
        assert!(!client.send("report", Some(json!({"id": 1}))));

        client.connect("http://localhost:8000");
        let mut peer = connector.take_peer();
        assert!(!client.join_location_room(19.076, 72.8777, Some(5.0)));
        assert!(!client.unsubscribe_from_area_updates());
        assert!(peer.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_emits_status_and_sends_flow() {
        let (client, mut peer, _status) = connected_client().await;
        assert!(client.connection_status());
        assert_eq!(client.endpoint().as_deref(), Some("http://localhost:8000"));

        assert!(client.join_location_room(19.076, 72.8777, Some(5.0)));
        let msg = peer.outbound.recv().await.unwrap();
        assert_eq!(msg.event, JOIN_LOCATION_ROOM);
        assert_eq!(
            msg.data,
            Some(json!({"latitude": 19.076, "longitude": 72.8777, "radius": 5.0}))
        );
    }

    #[tokio::test]
    async fn join_defaults_radius() {
        let (client, mut peer, _status) = connected_client().await;
        assert!(client.join_location_room(13.08, 80.27, None));
        let msg = peer.outbound.recv().await.unwrap();
        assert_eq!(msg.data.unwrap()["radius"], json!(10.0));
    }

    #[tokio::test]
    async fn leave_and_area_commands() {
        let (client, mut peer, _status) = connected_client().await;

        assert!(client.leave_location_room(13.08, 80.27));
        let msg = peer.outbound.recv().await.unwrap();
        assert_eq!(msg.event, LEAVE_LOCATION_ROOM);
        assert_eq!(msg.data, Some(json!({"latitude": 13.08, "longitude": 80.27})));

        let bounds = AreaBounds {
            north: 20.0,
            south: 18.0,
            east: 73.5,
            west: 72.5,
        };
        assert!(client.subscribe_to_area_updates(&bounds));
        let msg = peer.outbound.recv().await.unwrap();
        assert_eq!(msg.event, SUBSCRIBE_AREA_UPDATES);
        assert_eq!(msg.data.unwrap()["north"], json!(20.0));

        // Arbitrary shapes are forwarded untouched.
        assert!(client.subscribe_to_area_updates(&json!({"zone": "konkan"})));
        assert_eq!(
            peer.outbound.recv().await.unwrap().data,
            Some(json!({"zone": "konkan"}))
        );

        assert!(client.unsubscribe_from_area_updates());
        let msg = peer.outbound.recv().await.unwrap();
        assert_eq!(msg.event, UNSUBSCRIBE_AREA_UPDATES);
        assert_eq!(msg.data, None);
    }

    #[tokio::test]
    async fn server_event_delivered_once() {
        let (client, peer, _status) = connected_client().await;
        let (listener, mut rx) = capture();
        assert!(client.on(NEW_HAZARD_REPORT, listener.clone()));
        assert!(!client.on(NEW_HAZARD_REPORT, listener));

        let payload = json!({"id": 1, "type": "Storm"});
        peer.inbound
            .send(TransportEvent::Event {
                name: NEW_HAZARD_REPORT.into(),
                data: payload.clone(),
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, payload);

        // Flush the pump with a second event to prove no duplicate arrived.
        peer.inbound
            .send(TransportEvent::Event {
                name: NEW_HAZARD_REPORT.into(),
                data: json!({"id": 2}),
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, json!({"id": 2}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_server_events_forwarded_generically() {
        let (client, peer, _status) = connected_client().await;
        let (listener, mut rx) = capture();
        assert!(client.on("tide_gauge_reading", listener));
        peer.inbound
            .send(TransportEvent::Event {
                name: "tide_gauge_reading".into(),
                data: json!(4.2),
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, json!(4.2));
    }

    #[tokio::test]
    async fn off_stops_delivery_and_unknown_off_is_noop() {
        let (client, _) = client();
        let (listener, mut rx) = capture();
        assert!(!client.off("emergency_alert", &listener));
        assert!(client.on("emergency_alert", listener.clone()));
        assert!(client.off("emergency_alert", &listener));
        assert_eq!(client.emit("emergency_alert", &json!({})), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_is_local_only() {
        let (client, mut peer, _status) = connected_client().await;
        let (listener, mut rx) = capture();
        assert!(client.on("hotspot_update", listener));
        assert_eq!(client.emit("hotspot_update", &json!({"count": 3})), 1);
        assert_eq!(rx.try_recv().unwrap(), json!({"count": 3}));
        assert!(peer.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_disconnect_and_error_translated() {
        let (client, peer, mut status_rx) = connected_client().await;
        let (err_listener, mut err_rx) = capture();
        assert!(client.on(CONNECTION_ERROR, err_listener));

        peer.inbound
            .send(TransportEvent::Disconnected {
                reason: "ping timeout".into(),
            })
            .await
            .unwrap();
        assert_eq!(next(&mut status_rx).await, json!({"connected": false}));
        assert!(!client.connection_status());
        assert!(!client.send("x", None));

        peer.inbound
            .send(TransportEvent::ConnectError {
                message: "connection refused".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            next(&mut err_rx).await,
            json!({"message": "connection refused"})
        );

        peer.inbound.send(TransportEvent::Connected).await.unwrap();
        assert_eq!(next(&mut status_rx).await, json!({"connected": true}));
        assert!(client.connection_status());
    }

    #[tokio::test]
    async fn disconnect_emits_once_and_cancels() {
        let (client, peer, mut status_rx) = connected_client().await;

        client.disconnect();
        assert!(peer.cancel.is_cancelled());
        assert!(!client.connection_status());
        assert_eq!(client.endpoint(), None);
        assert_eq!(status_rx.try_recv().unwrap(), json!({"connected": false}));

        client.disconnect();
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_before_connected_emits_nothing() {
        let (client, connector) = client();
        let (status, mut status_rx) = capture();
        assert!(client.on(CONNECTION_STATUS, status));
        client.connect("http://localhost:8000");
        let peer = connector.take_peer();

        client.disconnect();
        assert!(peer.cancel.is_cancelled());
        assert!(status_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn teardown_status_is_always_delivered_last() {
        let (client, connector) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        assert!(client.on(
            CONNECTION_STATUS,
            Listener::new(move |v| sink.lock().push(v.clone()))
        ));

        for _ in 0..500 {
            seen.lock().clear();
            client.connect("http://localhost:8000");
            let peer = connector.take_peer();
            peer.inbound.send(TransportEvent::Connected).await.unwrap();
            timeout(WAIT, async {
                while !client.connection_status() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();

            client.disconnect();
            tokio::task::yield_now().await;
            assert!(!client.connection_status());
            assert_eq!(
                *seen.lock(),
                vec![json!({"connected": true}), json!({"connected": false})]
            );
        }
    }

    #[tokio::test]
    async fn reconnect_replaces_handle_and_keeps_listeners() {
        let (client, old_peer, mut status_rx) = connected_client().await;
        let (listener, mut rx) = capture();
        assert!(client.on(NEW_HAZARD_REPORT, listener));

        client.connect("http://localhost:9000");
        assert!(old_peer.cancel.is_cancelled());
        // Teardown of the old connection is reported.
        assert_eq!(status_rx.try_recv().unwrap(), json!({"connected": false}));
        assert_eq!(client.endpoint().as_deref(), Some("http://localhost:9000"));

        // The superseded session can no longer reach listeners.
        let _ = old_peer
            .inbound
            .send(TransportEvent::Event {
                name: NEW_HAZARD_REPORT.into(),
                data: json!({"id": "stale"}),
            })
            .await;

        assert_eq!(client.connector.peers.lock().len(), 1);
        let new_peer = client.connector.take_peer();
        new_peer.inbound.send(TransportEvent::Connected).await.unwrap();
        assert_eq!(next(&mut status_rx).await, json!({"connected": true}));

        new_peer
            .inbound
            .send(TransportEvent::Event {
                name: NEW_HAZARD_REPORT.into(),
                data: json!({"id": 3}),
            })
            .await
            .unwrap();
        assert_eq!(next(&mut rx).await, json!({"id": 3}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listener_panic_does_not_kill_pump() {
        let (client, peer, _status) = connected_client().await;
        let (after, mut rx) = capture();
        assert!(client.on(NEW_HAZARD_REPORT, Listener::new(|_| panic!("bad listener"))));
        assert!(client.on(NEW_HAZARD_REPORT, after));

        for id in 0..2 {
            peer.inbound
                .send(TransportEvent::Event {
                    name: NEW_HAZARD_REPORT.into(),
                    data: json!({"id": id}),
                })
                .await
                .unwrap();
            assert_eq!(next(&mut rx).await, json!({"id": id}));
        }
    }

    #[tokio::test]
    async fn full_outbound_queue_returns_false() {
        let (client, _peer, _status) = connected_client().await;
        let mut accepted = 0;
        for _ in 0..crate::transport::CHANNEL_CAPACITY + 5 {
            if client.send("report", None) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, crate::transport::CHANNEL_CAPACITY);
    }
}
