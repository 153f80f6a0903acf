//! The core protocol engine of swill.
//!
//! `swill_core` implements the wire codec, the per-request state machine, the handler registry and
//! dispatcher, the lifecycle hook chain, and the connection manager that ties them to a
//! `tokio-tungstenite` WebSocket. It uses a set of feature flags to keep client-only builds free of
//! server-side dependencies.
//!
//! # Feature flags
//!
//! | Feature | Description | Default? |
//! | --- | --- | :---: |
//! | `server` | Built-in `Server` and connection-accept support | ✔️ |
#![doc(html_favicon_url = "https://salvo.rs/favicon-32x32.png")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Re-export `async_trait`, used throughout the handler and hook traits.
pub use async_trait::async_trait;
pub use swill_macros as macros;
pub use swill_macros::rpc_method;

// https://github.com/bkchr/proc-macro-crate/issues/10
extern crate self as swill_core;

pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
mod depot;
pub mod dispatcher;
pub mod error;
pub mod envelope;
pub mod handler;
pub mod hooks;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod state;
pub mod stream;

pub use self::depot::Depot;
pub use self::error::{BoxedError, Error};
#[cfg(feature = "server")]
pub use self::server::Server;

/// Result type which has [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A list of things that automatically import into an application using `swill_core`.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use swill_macros::rpc_method;

    pub use crate::codec::{decode_payload, encode_payload};
    pub use crate::config::{ClientConfig, ReconnectPolicy, ServerConfig};
    pub use crate::connection::{Connection, SUBPROTOCOL};
    pub use crate::context::Context;
    pub use crate::depot::Depot;
    pub use crate::envelope::{ErrorCode, ErrorPayload};
    pub use crate::error::{Error, Result};
    pub use crate::handler::{
        BidiHandler, CallShape, ClientStreamUnaryHandler, HandlerRegistry, OutboundSink,
        UnaryServerStreamHandler, UnaryUnaryHandler,
    };
    pub use crate::hooks::{Hook, HookChain, HookFlow, HookPoint};
    pub use crate::stream::{StreamIterator, StreamItem};
    #[cfg(feature = "server")]
    pub use crate::server::Server;
}

#[doc(hidden)]
pub mod __private {
    pub use tracing;
}
