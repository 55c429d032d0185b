//! `keyslot-runtime` – the relay engine.
//!
//! # Modules
//!
//! - [`service`] – [`RelayService`][service::RelayService]: owns the
//!   [`EventQueue`][keyslot_memory::EventQueue] and
//!   [`RewardStore`][keyslot_memory::RewardStore], forwards accepted events
//!   through the [`BrokerPublisher`][keyslot_middleware::BrokerPublisher] and
//!   an optional serial [`ColorSender`][keyslot_hal::ColorSender], and
//!   implements every request operation as `(payload, authenticated)`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod service;
pub mod telemetry;

pub use service::{
    ClearOutcome, ConfigAccepted, LastReward, RelayOptions, RelayService, StatusReport,
    SubmitOutcome,
};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
