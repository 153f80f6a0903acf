//! Proc macros for swill.
//!
//! Read more: <https://salvo.rs>
#![doc(html_favicon_url = "https://salvo.rs/favicon-32x32.png")]
#![cfg_attr(docsrs, feature(doc_cfg))]

use proc_macro::TokenStream;
use syn::{parse_macro_input, Item};

mod rpc_method;

/// Classify a free function into one of the four RPC call shapes and generate the unit struct plus
/// trait impl the handler registry expects (§4.5, §10.5).
///
/// The function's first parameter must be `ctx: &mut Context`; the remaining parameters determine
/// the shape:
///
/// | Remaining parameters | Shape |
/// | --- | --- |
/// | `Value` | `UnaryUnary` |
/// | `StreamIterator` | `ClientStreamUnary` |
/// | `Value, Arc<dyn OutboundSink>` | `UnaryServerStream` |
/// | `StreamIterator, Arc<dyn OutboundSink>` | `Bidi` |
#[proc_macro_attribute]
pub fn rpc_method(_args: TokenStream, input: TokenStream) -> TokenStream {
    let item = parse_macro_input!(input as Item);
    match rpc_method::generate(item) {
        Ok(stream) => stream.into(),
        Err(e) => e.to_compile_error().into(),
    }
}
