//! Handler registry & classifier (§4.5).
//!
//! A method is registered once with one of four shapes, matching the four RPC call shapes the
//! wire protocol supports. Classification happens at registration time — the dispatcher never
//! inspects a handler to decide how to drive it, it looks up the [`CallShape`] recorded for the
//! method name and drives accordingly (no runtime reflection, mirroring how `#[handler]` fixes a
//! salvo `Handler` impl's signature at macro-expansion time rather than at dispatch time).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmpv::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::stream::StreamIterator;

/// The four RPC call shapes a registered method can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request value in, one response value out.
    UnaryUnary,
    /// A stream of request values in, one response value out.
    ClientStreamUnary,
    /// One request value in, a stream of response values out.
    UnaryServerStream,
    /// A stream of request values in, a stream of response values out, interleaved freely.
    Bidi,
}

/// A way to push one outbound value for the current request without waiting for the handler to
/// return, used by the two server-streaming shapes.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Emit one response value.
    async fn send(&self, value: Value) -> Result<()>;
}

/// `UnaryUnary` handler.
#[async_trait]
pub trait UnaryUnaryHandler: Send + Sync + 'static {
    /// Handle one request, returning the single response value.
    async fn call(&self, ctx: &mut Context, request: Value) -> Result<Value>;
}

/// `ClientStreamUnary` handler.
#[async_trait]
pub trait ClientStreamUnaryHandler: Send + Sync + 'static {
    /// Consume the inbound stream to completion, returning the single response value.
    async fn call(&self, ctx: &mut Context, requests: StreamIterator) -> Result<Value>;
}

/// `UnaryServerStream` handler.
#[async_trait]
pub trait UnaryServerStreamHandler: Send + Sync + 'static {
    /// Handle one request, pushing zero or more response values through `out` before returning.
    async fn call(&self, ctx: &mut Context, request: Value, out: Arc<dyn OutboundSink>) -> Result<()>;
}

/// `Bidi` handler.
#[async_trait]
pub trait BidiHandler: Send + Sync + 'static {
    /// Freely interleave reads from `requests` and writes to `out`.
    async fn call(
        &self,
        ctx: &mut Context,
        requests: StreamIterator,
        out: Arc<dyn OutboundSink>,
    ) -> Result<()>;
}

/// A type-erased, registered handler plus the shape it was classified with.
#[derive(Clone)]
pub enum RegisteredHandler {
    /// See [`UnaryUnaryHandler`].
    UnaryUnary(Arc<dyn UnaryUnaryHandler>),
    /// See [`ClientStreamUnaryHandler`].
    ClientStreamUnary(Arc<dyn ClientStreamUnaryHandler>),
    /// See [`UnaryServerStreamHandler`].
    UnaryServerStream(Arc<dyn UnaryServerStreamHandler>),
    /// See [`BidiHandler`].
    Bidi(Arc<dyn BidiHandler>),
}

impl RegisteredHandler {
    /// The call shape this handler was classified with.
    pub fn shape(&self) -> CallShape {
        match self {
            Self::UnaryUnary(_) => CallShape::UnaryUnary,
            Self::ClientStreamUnary(_) => CallShape::ClientStreamUnary,
            Self::UnaryServerStream(_) => CallShape::UnaryServerStream,
            Self::Bidi(_) => CallShape::Bidi,
        }
    }
}

/// Maps method names to their registered handler, built once at server-configuration time.
///
/// Registration is the classification point (§4.5): there is no way to register two handlers
/// under the same method name, and looking a name up after construction is infallible cost-wise —
/// a miss is a routing concern for the dispatcher (`MethodNotFound`), not a registry error.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    methods: HashMap<String, RegisteredHandler>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `method`. Fails if the name is already taken (§4.5 collision
    /// rule) — registration errors are configuration errors, surfaced before the server ever
    /// accepts a connection, not at request time.
    pub fn register(&mut self, method: impl Into<String>, handler: RegisteredHandler) -> Result<()> {
        let method = method.into();
        if self.methods.contains_key(&method) {
            return Err(Error::Config(format!("method `{method}` is already registered")));
        }
        self.methods.insert(method, handler);
        Ok(())
    }

    /// Look up the handler registered for `method`, if any.
    pub fn get(&self, method: &str) -> Option<&RegisteredHandler> {
        self.methods.get(method)
    }

    /// The call shape registered for `method`, if any — what the dispatcher consults to drive the
    /// per-request state machine (§4.3) before a handler task is even spawned.
    pub fn shape_of(&self, method: &str) -> Option<CallShape> {
        self.methods.get(method).map(RegisteredHandler::shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl UnaryUnaryHandler for Echo {
        async fn call(&self, _ctx: &mut Context, request: Value) -> Result<Value> {
            Ok(request)
        }
    }

    #[test]
    fn duplicate_registration_is_a_config_error() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", RegisteredHandler::UnaryUnary(Arc::new(Echo))).unwrap();
        let err = registry.register("echo", RegisteredHandler::UnaryUnary(Arc::new(Echo))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn shape_of_reflects_registration_time_classification() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", RegisteredHandler::UnaryUnary(Arc::new(Echo))).unwrap();
        assert_eq!(registry.shape_of("echo"), Some(CallShape::UnaryUnary));
        assert_eq!(registry.shape_of("missing"), None);
    }
}
