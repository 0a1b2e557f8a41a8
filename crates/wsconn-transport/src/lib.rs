//! # wsconn-transport
//!
//! The [`TransportDriver`] contract and its implementations.
//!
//! - [`driver`] defines the trait the engine is written against: `open`
//!   (TCP/TLS dial), `upgrade` (HTTP → WebSocket handshake), `send`,
//!   `set_owner` (reconnect-time ownership transfer), `close`.
//! - [`tungstenite`] is the real driver, built on `tokio-tungstenite`.
//! - [`mock`] is an in-process driver for engine tests, built without a
//!   socket. Enabled by the `test-util` feature.

pub mod driver;

#[cfg(feature = "tungstenite")]
pub mod tungstenite;

#[cfg(feature = "test-util")]
pub mod mock;

pub use driver::{TransportDriver, TransportError, TransportEvent, TransportOpts, TransportResult};

#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteDriver;

#[cfg(feature = "test-util")]
pub use mock::MockTransportDriver;
