//! `keyslot-memory` – in-process state stores for the relay.
//!
//! # Modules
//!
//! - [`queue`] – [`EventQueue`][queue::EventQueue]: the ordered FIFO of
//!   [`EventRecord`][keyslot_types::EventRecord]s with team-scoped pop
//!   (oldest first) and peek (newest first) plus freshness tracking.
//! - [`rewards`] – [`RewardStore`][rewards::RewardStore]: single-slot cache of
//!   the latest reward configuration.
//!
//! Neither store is internally synchronised; the owner wraps each one in its
//! own lock.

pub mod queue;
pub mod rewards;

pub use queue::EventQueue;
pub use rewards::RewardStore;
