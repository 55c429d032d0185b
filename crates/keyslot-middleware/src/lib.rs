//! `keyslot-middleware` – The Field-Device Link
//!
//! Carries relay events to the robot controller over a publish/subscribe
//! broker without caring about what the events mean.
//!
//! # Modules
//!
//! - [`adapter`] – the [`BrokerConnector`] / [`LinkSink`] / [`LinkEvents`]
//!   seam every broker transport implements.
//! - [`mqtt`] – minimal MQTT 3.1.1 (QoS 0) client codec and the production
//!   [`MqttConnector`].
//! - [`publisher`] – [`BrokerPublisher`]: fixed-topic publisher with an
//!   explicit connect / keepalive / reconnect supervisor.

pub mod adapter;
pub mod mqtt;
pub mod publisher;

pub use adapter::{BrokerConnector, BrokerLink, Heartbeat, LinkEvents, LinkSink};
pub use mqtt::{MqttConnector, validate_topic};
pub use publisher::{BrokerPayload, BrokerPublisher, PublisherSettings};
