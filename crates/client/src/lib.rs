//! The swill RPC client: connect, call surface, and reconnect scheduler (§4.9, §6).
//!
//! Read more: <https://salvo.rs>
#![doc(html_favicon_url = "https://salvo.rs/favicon-32x32.png")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod connection;
mod reconnect;
mod request;

pub use client::Client;
pub use request::{CallOptions, RemoteError, RpcRequest};

pub use swill_core::config::ClientConfig;
pub use swill_core::envelope::{Metadata, ResponseEnvelope, ResponseFrameType};
pub use swill_core::error::{Error, Result};
