//! `keyslot-api` – the HTTP surface of the relay.
//!
//! A thin `axum` layer: each handler checks the bearer token, parses the
//! body or query, and calls one [`RelayService`][keyslot_runtime::RelayService]
//! operation.  All semantics live in the service.
//!
//! # Modules
//!
//! - [`auth`] – [`ApiToken`][auth::ApiToken]: constant-time bearer check.
//! - [`error`] – [`ApiError`][error::ApiError]: maps
//!   [`KeyslotError`][keyslot_types::KeyslotError] onto HTTP statuses.
//! - [`router`] – [`router`][router::router] and [`serve`][router::serve].

pub mod auth;
pub mod error;
pub mod router;

pub use auth::ApiToken;
pub use error::ApiError;
pub use router::{AppState, router, serve};
