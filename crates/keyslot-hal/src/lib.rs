//! `keyslot-hal` – device-side output channels.
//!
//! # Modules
//!
//! - [`sender`] – the [`ColorSender`][sender::ColorSender] capability plus an
//!   in-memory [`RecordingSender`][sender::RecordingSender].
//! - [`serial`] – [`SerialSender`][serial::SerialSender]: writes color codes
//!   to a serial port opened with the configured
//!   [`SerialSettings`][serial::SerialSettings], one per line.

pub mod sender;
pub mod serial;

pub use sender::{ColorSender, RecordingSender};
pub use serial::{SerialSender, SerialSettings};
