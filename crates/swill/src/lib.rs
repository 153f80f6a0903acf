//! Swill is a bidirectional RPC protocol engine over WebSocket. Read more: <https://salvo.rs>
#![doc(html_favicon_url = "https://salvo.rs/favicon-32x32.png")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use swill_core as core;
#[doc(no_inline)]
pub use swill_core::*;

#[cfg(feature = "client")]
#[doc(no_inline)]
pub use swill_client as client;
