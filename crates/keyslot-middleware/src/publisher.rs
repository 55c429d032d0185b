//! [`BrokerPublisher`] – fixed-topic, best-effort publisher with a supervised
//! connection.
//!
//! # State machine
//!
//! ```text
//!            connect ok          transport drop / ping, send or keepalive failure
//! Connecting ─────────▶ Connected ───────────────────────────────▶ Disconnected
//!     ▲                                                                 │
//!     │        immediate retry once, then fixed `reconnect_delay`       │
//!     └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The supervisor ([`BrokerPublisher::run`]) is a plain loop on its own Tokio
//! task.  Connection attempts are bounded by `connect_timeout` and retried
//! forever; publishes are never retried.
//!
//! With keepalive enabled, a ping that sees no inbound traffic before the next
//! tick ends the link with "keepalive timed out".
//!
//! # Publishing
//!
//! [`BrokerPublisher::publish`] checks the state and performs the single send
//! while holding the same lock the supervisor takes for every transition, so
//! it can never write to a link the supervisor has already torn down.  The
//! caller only learns whether the payload was handed to the transport.

use std::sync::Arc;
use std::time::Duration;

use keyslot_types::{ConnectionState, KeyslotError};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use crate::adapter::{BrokerConnector, Heartbeat, LinkEvents, LinkSink};

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// What can be published: a bare code, or a structured object sent as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerPayload {
    Text(String),
    Json(Value),
}

impl BrokerPayload {
    /// Wire bytes for the payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KeyslotError> {
        match self {
            BrokerPayload::Text(s) => Ok(s.as_bytes().to_vec()),
            BrokerPayload::Json(v) => {
                serde_json::to_vec(v).map_err(|e| KeyslotError::Internal(e.to_string()))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for [`BrokerPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    /// Topic every payload is published to.
    pub topic: String,
    /// Fixed delay between failed connection attempts.
    pub reconnect_delay: Duration,
    /// Upper bound on one connection attempt, handshake included.
    pub connect_timeout: Duration,
    /// Upper bound on one publish or ping write.
    pub send_timeout: Duration,
    /// Keepalive ping period; `None` disables pings.
    pub keepalive_interval: Option<Duration>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            topic: "/cc/escape/key_slot/key_colour".to_string(),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(2),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BrokerPublisher
// ─────────────────────────────────────────────────────────────────────────────

struct LinkSlot {
    state: ConnectionState,
    sink: Option<Box<dyn LinkSink>>,
}

/// Publishes payloads to one topic over a self-healing broker connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use keyslot_middleware::{BrokerPayload, BrokerPublisher, MqttConnector, PublisherSettings};
///
/// #[tokio::main]
/// async fn main() {
///     let connector = Arc::new(MqttConnector::new("broker.hivemq.com", 1883, "keyslot", 60));
///     let publisher = Arc::new(BrokerPublisher::new(connector, PublisherSettings::default()));
///     let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
///     publisher.spawn(stop_rx);
///
///     let delivered = publisher.publish(&BrokerPayload::Text("gateA".into())).await;
///     println!("handed to transport: {delivered}");
/// }
/// ```
pub struct BrokerPublisher {
    connector: Arc<dyn BrokerConnector>,
    settings: PublisherSettings,
    slot: Mutex<LinkSlot>,
    state_tx: watch::Sender<ConnectionState>,
    link_lost: Notify,
}

impl BrokerPublisher {
    /// Create a publisher in the `Disconnected` state.  Nothing connects
    /// until [`run`](Self::run) or [`spawn`](Self::spawn) is called.
    pub fn new(connector: Arc<dyn BrokerConnector>, settings: PublisherSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            settings,
            slot: Mutex::new(LinkSlot {
                state: ConnectionState::Disconnected,
                sink: None,
            }),
            state_tx,
            link_lost: Notify::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.settings.topic
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Most recently published connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Publish `payload` to the configured topic.
    ///
    /// Returns `true` when the payload was handed to the transport.  Returns
    /// `false` when not connected, or when the single send attempt failed or
    /// timed out.  Only transport failures and timeouts declare the link lost
    /// and wake the supervisor; a rejected message leaves the link up.
    pub async fn publish(&self, payload: &BrokerPayload) -> bool {
        let bytes = match payload.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "payload could not be encoded; dropping");
                return false;
            }
        };

        let mut slot = self.slot.lock().await;
        if slot.state != ConnectionState::Connected {
            warn!(state = %slot.state, topic = %self.settings.topic, "broker not connected; dropping publish");
            return false;
        }
        let Some(sink) = slot.sink.as_mut() else {
            warn!(topic = %self.settings.topic, "no broker link; dropping publish");
            return false;
        };

        let sent = timeout(self.settings.send_timeout, sink.publish(&self.settings.topic, &bytes)).await;
        match sent {
            Ok(Ok(())) => {
                info!(topic = %self.settings.topic, bytes = bytes.len(), "published to broker");
                true
            }
            Ok(Err(e @ KeyslotError::Transport(_))) => {
                warn!(error = %e, topic = %self.settings.topic, "publish failed; dropping");
                self.mark_lost(&mut slot);
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, topic = %self.settings.topic, "publish rejected; dropping");
                false
            }
            Err(_) => {
                warn!(topic = %self.settings.topic, "publish timed out; dropping");
                self.mark_lost(&mut slot);
                false
            }
        }
    }

    /// Run the supervisor on a new Tokio task until `shutdown` turns `true`
    /// (or its sender is dropped).
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move { publisher.run(shutdown).await })
    }

    /// Connect, keep the link alive, and reconnect after every drop.
    ///
    /// Returns only once shutdown is requested, after sending a best-effort
    /// disconnect.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.attempt_connect().await {
                Some((events, heartbeat)) => {
                    match self.supervise(events, heartbeat, &mut shutdown).await {
                        // Reconnect immediately; a failure falls into the backoff arm.
                        Some(reason) => self.on_disconnect(&reason).await,
                        None => break,
                    }
                }
                None => {
                    tokio::select! {
                        _ = sleep(self.settings.reconnect_delay) => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
            }
        }

        self.close().await;
    }

    // -----------------------------------------------------------------------
    // Supervisor internals
    // -----------------------------------------------------------------------

    async fn attempt_connect(&self) -> Option<(Box<dyn LinkEvents>, Heartbeat)> {
        {
            let mut slot = self.slot.lock().await;
            self.set_state(&mut slot, ConnectionState::Connecting);
        }
        let endpoint = self.connector.endpoint();
        info!(endpoint = %endpoint, "connecting to broker");

        let outcome = match timeout(self.settings.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(KeyslotError::Transport(format!(
                "connection attempt timed out after {:?}",
                self.settings.connect_timeout
            ))),
        };

        let mut slot = self.slot.lock().await;
        match outcome {
            Ok(link) => {
                slot.sink = Some(link.sink);
                self.set_state(&mut slot, ConnectionState::Connected);
                info!(endpoint = %endpoint, topic = %self.settings.topic, "connected to broker");
                Some((link.events, link.heartbeat))
            }
            Err(e) => {
                self.set_state(&mut slot, ConnectionState::Disconnected);
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    retry_in = ?self.settings.reconnect_delay,
                    "broker connection failed"
                );
                None
            }
        }
    }

    /// Drive one live link.  Returns the reason it ended, or `None` on
    /// shutdown.
    async fn supervise(
        &self,
        mut events: Box<dyn LinkEvents>,
        heartbeat: Heartbeat,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<KeyslotError> {
        let mut ping_sent_at: Option<Instant> = None;
        let mut keepalive = self.settings.keepalive_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let closed = events.closed();
        tokio::pin!(closed);

        loop {
            tokio::select! {
                reason = &mut closed => return Some(reason),
                _ = self.link_lost.notified() => {
                    // Permits can be stale from an earlier link; only an empty
                    // slot means this link is gone.
                    if self.slot.lock().await.sink.is_none() {
                        return Some(KeyslotError::Transport("link lost during publish".to_string()));
                    }
                }
                _ = tick(&mut keepalive) => {
                    if let Some(sent) = ping_sent_at {
                        if heartbeat.last() < sent {
                            return Some(KeyslotError::Transport("keepalive timed out".to_string()));
                        }
                    }
                    let sent = Instant::now();
                    if let Err(e) = self.ping().await {
                        return Some(e);
                    }
                    ping_sent_at = Some(sent);
                }
                _ = wait_for_shutdown(shutdown) => return None,
            }
        }
    }

    async fn ping(&self) -> Result<(), KeyslotError> {
        let mut slot = self.slot.lock().await;
        let Some(sink) = slot.sink.as_mut() else {
            return Err(KeyslotError::Transport("no link to ping".to_string()));
        };
        match timeout(self.settings.send_timeout, sink.ping()).await {
            Ok(Ok(())) => {
                debug!("keepalive ping sent");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(KeyslotError::Transport("keepalive ping timed out".to_string())),
        }
    }

    async fn on_disconnect(&self, reason: &KeyslotError) {
        let mut slot = self.slot.lock().await;
        slot.sink = None;
        self.set_state(&mut slot, ConnectionState::Disconnected);
        warn!(error = %reason, "disconnected from broker; attempting to reconnect");
    }

    async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut sink) = slot.sink.take() {
            match timeout(self.settings.send_timeout, sink.disconnect()).await {
                Ok(Ok(())) => debug!("broker session closed"),
                Ok(Err(e)) => debug!(error = %e, "broker disconnect failed"),
                Err(_) => debug!("broker disconnect timed out"),
            }
        }
        self.set_state(&mut slot, ConnectionState::Disconnected);
        info!("broker publisher stopped");
    }

    fn mark_lost(&self, slot: &mut LinkSlot) {
        slot.sink = None;
        self.set_state(slot, ConnectionState::Disconnected);
        self.link_lost.notify_one();
    }

    fn set_state(&self, slot: &mut LinkSlot, state: ConnectionState) {
        slot.state = state;
        self.state_tx.send_replace(state);
    }
}

async fn tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a shutdown request.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BrokerLink;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Shared record of what the fake transport saw.
    #[derive(Default)]
    struct Wire {
        published: StdMutex<Vec<(String, Vec<u8>)>>,
        pings: AtomicUsize,
        disconnects: AtomicUsize,
        fail_sends: AtomicBool,
        reject_sends: AtomicBool,
        silent: AtomicBool,
        hangups: StdMutex<Vec<oneshot::Sender<()>>>,
    }

    struct FakeConnector {
        attempts: AtomicUsize,
        fail_first: usize,
        wire: Arc<Wire>,
    }

    impl FakeConnector {
        fn new(fail_first: usize) -> (Arc<Self>, Arc<Wire>) {
            let wire = Arc::new(Wire::default());
            let connector = Arc::new(Self {
                attempts: AtomicUsize::new(0),
                fail_first,
                wire: Arc::clone(&wire),
            });
            (connector, wire)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrokerConnector for FakeConnector {
        async fn connect(&self) -> Result<BrokerLink, KeyslotError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(KeyslotError::Transport("connection refused".into()));
            }
            let (hangup_tx, hangup_rx) = oneshot::channel();
            self.wire.hangups.lock().unwrap().push(hangup_tx);
            let heartbeat = Heartbeat::new();
            Ok(BrokerLink {
                sink: Box::new(FakeSink {
                    wire: Arc::clone(&self.wire),
                    heartbeat: heartbeat.clone(),
                }),
                events: Box::new(FakeEvents { hangup: Some(hangup_rx) }),
                heartbeat,
            })
        }

        fn endpoint(&self) -> String {
            "fake://broker".to_string()
        }
    }

    struct FakeSink {
        wire: Arc<Wire>,
        heartbeat: Heartbeat,
    }

    #[async_trait]
    impl LinkSink for FakeSink {
        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), KeyslotError> {
            if self.wire.fail_sends.load(Ordering::SeqCst) {
                return Err(KeyslotError::Transport("broken pipe".into()));
            }
            if self.wire.reject_sends.load(Ordering::SeqCst) {
                return Err(KeyslotError::Protocol(format!("invalid publish topic '{topic}'")));
            }
            self.wire
                .published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn ping(&mut self) -> Result<(), KeyslotError> {
            self.wire.pings.fetch_add(1, Ordering::SeqCst);
            // A responsive broker answers every ping.
            if !self.wire.silent.load(Ordering::SeqCst) {
                self.heartbeat.beat();
            }
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), KeyslotError> {
            self.wire.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeEvents {
        hangup: Option<oneshot::Receiver<()>>,
    }

    #[async_trait]
    impl LinkEvents for FakeEvents {
        async fn closed(&mut self) -> KeyslotError {
            if let Some(rx) = self.hangup.take() {
                let _ = rx.await;
            }
            KeyslotError::Transport("connection closed by broker".into())
        }
    }

    fn fast_settings() -> PublisherSettings {
        PublisherSettings {
            topic: "test/topic".to_string(),
            reconnect_delay: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
            keepalive_interval: None,
        }
    }

    async fn wait_until(state: ConnectionState, publisher: &BrokerPublisher) {
        let mut rx = publisher.subscribe_state();
        timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    async fn wait_for_attempts(connector: &FakeConnector, n: usize) {
        timeout(Duration::from_secs(2), async {
            while connector.attempts() < n {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection attempts not reached in time");
    }

    #[tokio::test]
    async fn publish_while_disconnected_returns_false() {
        let (connector, wire) = FakeConnector::new(0);
        let publisher = BrokerPublisher::new(connector, fast_settings());

        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert!(!publisher.publish(&BrokerPayload::Text("red".into())).await);
        assert!(wire.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retries_with_backoff_until_connected() {
        let (connector, _wire) = FakeConnector::new(2);
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), fast_settings()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);

        wait_until(ConnectionState::Connected, &publisher).await;
        assert_eq!(connector.attempts(), 3);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn publish_when_connected_reaches_transport() {
        let (connector, wire) = FakeConnector::new(0);
        let publisher = Arc::new(BrokerPublisher::new(connector, fast_settings()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        assert!(publisher.publish(&BrokerPayload::Text("gateA".into())).await);
        assert!(
            publisher
                .publish(&BrokerPayload::Json(serde_json::json!({"team": "alpha"})))
                .await
        );

        let published = wire.published.lock().unwrap().clone();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], ("test/topic".to_string(), b"gateA".to_vec()));
        assert_eq!(published[1].1, br#"{"team":"alpha"}"#.to_vec());

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn reconnects_after_transport_drop() {
        let (connector, wire) = FakeConnector::new(0);
        let settings = PublisherSettings {
            reconnect_delay: Duration::from_secs(5),
            ..fast_settings()
        };
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), settings));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        // Broker hangs up on the first session.
        let dropped_at = Instant::now();
        let hangup = wire.hangups.lock().unwrap().remove(0);
        drop(hangup);

        wait_for_attempts(&connector, 2).await;
        wait_until(ConnectionState::Connected, &publisher).await;
        // The first reconnect does not wait out the backoff.
        assert!(dropped_at.elapsed() < Duration::from_secs(1));
        assert!(publisher.publish(&BrokerPayload::Text("blue".into())).await);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn failed_send_is_dropped_and_triggers_reconnect() {
        let (connector, wire) = FakeConnector::new(0);
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), fast_settings()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        wire.fail_sends.store(true, Ordering::SeqCst);
        assert!(!publisher.publish(&BrokerPayload::Text("red".into())).await);
        wire.fail_sends.store(false, Ordering::SeqCst);

        wait_for_attempts(&connector, 2).await;
        wait_until(ConnectionState::Connected, &publisher).await;
        // The failed payload was not retried.
        assert!(wire.published.lock().unwrap().is_empty());

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn keepalive_pings_while_connected() {
        let (connector, wire) = FakeConnector::new(0);
        let settings = PublisherSettings {
            keepalive_interval: Some(Duration::from_millis(10)),
            ..fast_settings()
        };
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), settings));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        timeout(Duration::from_secs(2), async {
            while wire.pings.load(Ordering::SeqCst) < 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("keepalive pings not sent");
        // Answered pings keep the first session alive.
        assert_eq!(connector.attempts(), 1);
        assert_eq!(publisher.state(), ConnectionState::Connected);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_publish_keeps_the_link() {
        let (connector, wire) = FakeConnector::new(0);
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), fast_settings()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        wire.reject_sends.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            assert!(!publisher.publish(&BrokerPayload::Text("red".into())).await);
        }
        sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(publisher.state(), ConnectionState::Connected);

        wire.reject_sends.store(false, Ordering::SeqCst);
        assert!(publisher.publish(&BrokerPayload::Text("red".into())).await);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_keepalive_reconnects() {
        let (connector, wire) = FakeConnector::new(0);
        wire.silent.store(true, Ordering::SeqCst);
        let settings = PublisherSettings {
            keepalive_interval: Some(Duration::from_millis(10)),
            ..fast_settings()
        };
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), settings));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);

        wait_for_attempts(&connector, 2).await;
        assert!(wire.pings.load(Ordering::SeqCst) >= 1);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn mqtt_broker_that_stops_answering_is_dropped() {
        use crate::mqtt::{CONNACK, MqttConnector, read_packet};
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        // Accepts sessions, then reads and ignores everything, PINGREQ included.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::clone(&sessions);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    if read_packet(&mut sock).await.is_err() {
                        return;
                    }
                    if sock.write_all(&[CONNACK, 0x02, 0x00, 0x00]).await.is_err() {
                        return;
                    }
                    while read_packet(&mut sock).await.is_ok() {}
                });
            }
        });

        let connector = Arc::new(MqttConnector::new("127.0.0.1", port, "keyslot-test", 1));
        let settings = PublisherSettings {
            keepalive_interval: Some(Duration::from_millis(20)),
            ..fast_settings()
        };
        let publisher = Arc::new(BrokerPublisher::new(connector, settings));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);

        timeout(Duration::from_secs(2), async {
            while sessions.load(Ordering::SeqCst) < 2 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("silent broker session was never replaced");

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_disconnects_and_stops() {
        let (connector, wire) = FakeConnector::new(0);
        let publisher = Arc::new(BrokerPublisher::new(connector, fast_settings()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);
        wait_until(ConnectionState::Connected, &publisher).await;

        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();

        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(wire.disconnects.load(Ordering::SeqCst), 1);
        assert!(!publisher.publish(&BrokerPayload::Text("late".into())).await);
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let (connector, _wire) = FakeConnector::new(usize::MAX);
        let settings = PublisherSettings {
            reconnect_delay: Duration::from_secs(60),
            ..fast_settings()
        };
        let publisher = Arc::new(BrokerPublisher::new(connector.clone(), settings));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = publisher.spawn(stop_rx);

        wait_for_attempts(&connector, 1).await;
        stop_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("backoff was not interrupted")
            .unwrap();
    }
}
