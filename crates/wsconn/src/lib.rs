//! # wsconn
//!
//! A reusable WebSocket client connection engine: dial, upgrade, heartbeat,
//! reconnect, and session-state survival, with a pluggable handler ABI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌──────────────────┐     ┌───────────────────┐
//! │ ClientAPI  │────▶│ ConnectionEngine │────▶│  TransportDriver   │──▶ wire
//! │ (this crate│     │ (wsconn-runtime) │     │ (wsconn-transport) │
//! │  + adapter)│◀────│                  │◀────│                    │
//! └────────────┘     └──────────────────┘     └───────────────────┘
//! ```
//!
//! `wsconn-core` owns the transport-independent vocabulary (frame codec,
//! `ConnectionState`, `StateMachine`, handler contracts, rate limiter,
//! request correlator). `wsconn-transport` drives the wire.
//! `wsconn-runtime` runs the `ConnectionEngine` actor and keeps `ClientConn`
//! in sync with it across reconnects. This crate is the public surface: the
//! `ClientAPI` functions in [`client_api`], the default handler
//! implementations in [`defaults`], and the [`Adapter`] trait that ties a
//! specific WebSocket venue's configuration and handlers together.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wsconn::{Adapter, client_api, defaults::HandlerBindingsBuilder};
//! use wsconn_core::{ConfigOptions, HandlerBindings};
//! use wsconn_transport::TungsteniteDriver;
//!
//! struct Echo;
//!
//! impl Adapter for Echo {
//!     fn default_config(&self) -> ConfigOptions {
//!         ConfigOptions::new(serde_json::json!({ "host": "echo.example.com", "port": 443 }))
//!     }
//!
//!     fn handlers(&self) -> HandlerBindings {
//!         HandlerBindingsBuilder::new().build()
//!     }
//! }
//!
//! # async fn run() -> wsconn_runtime::EngineResult<()> {
//! let driver = Arc::new(TungsteniteDriver::new());
//! let conn = client_api::connect(&Echo, client_api::ConnectOptions::new(driver)).await?;
//! client_api::send_text(&conn, "hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod client_api;
pub mod defaults;

pub use client_api::ConnectOptions;
pub use wsconn_core as core;
pub use wsconn_runtime as runtime;
pub use wsconn_transport as transport;

use wsconn_core::{ConfigOptions, HandlerBindings};

/// Ties a specific WebSocket venue's configuration defaults and handler set
/// together, so [`client_api::connect`] can build a connection from just
/// this trait object plus per-call overrides.
///
/// Implementations are expected to hold their handler `Arc`s as fields and
/// hand back clones of the same instances from every `handlers()` call —
/// not fresh ones — since `subscribe`/`authenticate`/reconnect replay all
/// rely on the same handler instance's in-memory bookkeeping persisting
/// across calls.
pub trait Adapter: Send + Sync {
    /// Adapter-level configuration defaults — the lowest-precedence layer
    /// in [`ConfigOptions::merge`].
    fn default_config(&self) -> ConfigOptions;

    /// The handler set this adapter installs on every connection it opens.
    fn handlers(&self) -> HandlerBindings;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::HandlerBindingsBuilder;

    struct EmptyAdapter;
    impl Adapter for EmptyAdapter {
        fn default_config(&self) -> ConfigOptions {
            ConfigOptions::empty()
        }

        fn handlers(&self) -> HandlerBindings {
            HandlerBindingsBuilder::new().build()
        }
    }

    #[test]
    fn adapter_trait_object_is_usable_behind_a_reference() {
        let adapter: &dyn Adapter = &EmptyAdapter;
        assert_eq!(adapter.default_config().host(), None);
    }
}
