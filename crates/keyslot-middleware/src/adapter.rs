//! The broker transport seam.
//!
//! The relay never talks MQTT directly.  [`BrokerPublisher`] drives an
//! implementation of [`BrokerConnector`], which hands back a [`BrokerLink`]
//! split into an outbound [`LinkSink`] and an inbound [`LinkEvents`] half.
//!
//! # Overview
//!
//! - [`MqttConnector`][crate::mqtt::MqttConnector] – MQTT 3.1.1 over TCP.
//! - test fakes – scripted connectors that fail, drop, or record publishes.
//!
//! [`BrokerPublisher`]: crate::publisher::BrokerPublisher

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use keyslot_types::KeyslotError;
use tokio::time::{Duration, Instant};

/// Opens new broker sessions.
///
/// # Contract
///
/// * `connect` – performs the full handshake and only returns `Ok` once the
///   broker has accepted the session.  It does not retry; retry policy lives
///   in the publisher.
///
/// * `endpoint` – human-readable target used in log lines.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<BrokerLink, KeyslotError>;

    fn endpoint(&self) -> String;
}

/// An established broker session.
///
/// `heartbeat` is shared with the [`LinkEvents`] half, which must call
/// [`Heartbeat::beat`] for every inbound packet.  The publisher uses it to
/// tell a live broker from one that stopped answering keepalives.
pub struct BrokerLink {
    pub sink: Box<dyn LinkSink>,
    pub events: Box<dyn LinkEvents>,
    pub heartbeat: Heartbeat,
}

/// Time of the most recent inbound traffic on a session.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    origin: Instant,
    nanos: Arc<AtomicU64>,
}

impl Heartbeat {
    /// A heartbeat that last beat now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record inbound traffic.
    pub fn beat(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_max(elapsed, Ordering::Release);
    }

    /// When inbound traffic was last seen.
    pub fn last(&self) -> Instant {
        self.origin + Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound half of a session.
#[async_trait]
pub trait LinkSink: Send {
    /// Hand one message for `topic` to the transport.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), KeyslotError>;

    /// Send a keepalive ping.
    async fn ping(&mut self) -> Result<(), KeyslotError>;

    /// Politely end the session.
    async fn disconnect(&mut self) -> Result<(), KeyslotError>;
}

/// Inbound half of a session.
#[async_trait]
pub trait LinkEvents: Send {
    /// Consume inbound traffic until the session ends and return why it
    /// ended.  Must be polled to completion on a single future; dropping it
    /// mid-read may lose framing.
    async fn closed(&mut self) -> KeyslotError;
}
