//! Server builder (§6 external interfaces, server side).
//!
//! `Server` accumulates handler registrations and hooks, then accepts TCP connections and drives
//! each to completion with [`Connection::serve`] — a thin wrapper the way [`crate::Server`]'s
//! salvo counterpart wraps a `Listener` and hands connections to a `Service`, minus the HTTP
//! surface this crate has no business owning (§1 Out of scope).

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::connection::{self, Connection};
use crate::error::Result;
use crate::handler::{
    BidiHandler, ClientStreamUnaryHandler, HandlerRegistry, RegisteredHandler,
    UnaryServerStreamHandler, UnaryUnaryHandler,
};
use crate::hooks::{Hook, HookChain, HookPoint};

/// Accumulates method registrations and lifecycle hooks, then serves connections.
pub struct Server {
    config: ServerConfig,
    registry: HandlerRegistry,
    hooks: HookChain,
}

impl Server {
    /// Start building a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self { config, registry: HandlerRegistry::new(), hooks: HookChain::new() }
    }

    /// Register a `UnaryUnary` method.
    pub fn unary_unary(mut self, method: impl Into<String>, handler: impl UnaryUnaryHandler) -> Result<Self> {
        self.registry.register(method, RegisteredHandler::UnaryUnary(Arc::new(handler)))?;
        Ok(self)
    }

    /// Register a `ClientStreamUnary` method.
    pub fn client_stream_unary(
        mut self,
        method: impl Into<String>,
        handler: impl ClientStreamUnaryHandler,
    ) -> Result<Self> {
        self.registry.register(method, RegisteredHandler::ClientStreamUnary(Arc::new(handler)))?;
        Ok(self)
    }

    /// Register a `UnaryServerStream` method.
    pub fn unary_server_stream(
        mut self,
        method: impl Into<String>,
        handler: impl UnaryServerStreamHandler,
    ) -> Result<Self> {
        self.registry.register(method, RegisteredHandler::UnaryServerStream(Arc::new(handler)))?;
        Ok(self)
    }

    /// Register a `Bidi` method.
    pub fn bidi(mut self, method: impl Into<String>, handler: impl BidiHandler) -> Result<Self> {
        self.registry.register(method, RegisteredHandler::Bidi(Arc::new(handler)))?;
        Ok(self)
    }

    /// Append a hook at the given lifecycle point (§4.7).
    #[must_use]
    pub fn hook(mut self, point: HookPoint, hook: impl Hook) -> Self {
        self.hooks.push(point, Arc::new(hook));
        self
    }

    /// Bind and accept connections until the process is killed. Each accepted TCP stream is
    /// upgraded to a `swill/1` WebSocket and handed to its own [`Connection`] task.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await.map_err(|e| {
            crate::error::Error::Transport(tokio_tungstenite::tungstenite::Error::Io(e))
        })?;
        info!(address = %self.config.bind_address, "swill server listening");

        let registry = Arc::new(self.registry);
        let hooks = Arc::new(self.hooks);
        let inbound_queue_capacity = self.config.inbound_queue_capacity;
        let outbound_channel_capacity = self.config.outbound_channel_capacity;
        let accept_timeout = self.config.accept_timeout;

        loop {
            let (stream, peer) = listener.accept().await.map_err(|e| {
                crate::error::Error::Transport(tokio_tungstenite::tungstenite::Error::Io(e))
            })?;
            let registry = registry.clone();
            let hooks = hooks.clone();

            tokio::spawn(async move {
                let socket = match tokio::time::timeout(accept_timeout, connection::accept(stream)).await {
                    Ok(Ok(socket)) => socket,
                    Ok(Err(err)) => {
                        warn!(%peer, error = %err, "websocket handshake failed");
                        return;
                    }
                    Err(_) => {
                        warn!(%peer, "websocket handshake timed out");
                        return;
                    }
                };
                let connection = Connection::new(
                    socket,
                    registry,
                    hooks,
                    inbound_queue_capacity,
                    outbound_channel_capacity,
                );
                if let Err(err) = connection.serve().await {
                    warn!(%peer, error = %err, "connection ended with an error");
                }
            });
        }
    }
}

