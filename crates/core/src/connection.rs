//! Connection manager (§4.8).
//!
//! Owns one [`WebSocketStream`], runs the `before_connection`/`before_accept` hooks, starts the
//! [`Dispatcher`], and pumps frames in both directions until the transport closes. The manager is
//! the sole writer to the transport (§5): the dispatcher and every handler it spawns only ever
//! touch a channel, never the socket directly, the same separation `extra::ws::WebSocket` draws
//! between the `Sink`/`Stream` halves and application code.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::context::Context;
use crate::depot::Depot;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::hooks::{HookChain, HookPoint};

/// The `Sec-WebSocket-Protocol` value swill speaks.
pub const SUBPROTOCOL: &str = "swill/1";

/// Drives one WebSocket connection end-to-end.
pub struct Connection<S> {
    socket: WebSocketStream<S>,
    registry: Arc<HandlerRegistry>,
    hooks: Arc<HookChain>,
    inbound_queue_capacity: usize,
    outbound_channel_capacity: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-established WebSocket stream (accepted server-side or connected
    /// client-side — the protocol is symmetric once the socket is open).
    pub fn new(
        socket: WebSocketStream<S>,
        registry: Arc<HandlerRegistry>,
        hooks: Arc<HookChain>,
        inbound_queue_capacity: usize,
        outbound_channel_capacity: usize,
    ) -> Self {
        Self { socket, registry, hooks, inbound_queue_capacity, outbound_channel_capacity }
    }

    /// Run the connection to completion: hooks, handshake bookkeeping, dispatch loop, teardown.
    pub async fn serve(self) -> Result<()> {
        let connection_depot = Arc::new(Mutex::new(Depot::new()));
        let mut connection_ctx = Context::new(0, "", None, connection_depot.clone());

        if let Err(err) = self.hooks.run(HookPoint::BeforeConnection, &mut connection_ctx).await {
            warn!(error = %err, "before_connection hook rejected the transport");
            return Err(err);
        }
        if let Err(err) = self.hooks.run(HookPoint::BeforeAccept, &mut connection_ctx).await {
            warn!(error = %err, "before_accept hook rejected the transport");
            return Err(err);
        }

        let (mut write, mut read) = self.socket.split();
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(self.outbound_channel_capacity);

        let dispatcher = Arc::new(Dispatcher::new(
            self.registry,
            self.hooks.clone(),
            connection_depot,
            outbound_tx,
            self.inbound_queue_capacity,
        ));

        let writer = tokio::spawn(async move {
            while let Some(bytes) = outbound_rx.recv().await {
                if write.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        while let Some(frame) = read.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, "transport read failed, tearing down connection");
                    break;
                }
            };
            match message {
                Message::Binary(bytes) => {
                    if let Err(err) = dispatcher.handle_frame(&bytes).await {
                        debug!(error = %err, "failed to handle inbound frame");
                    }
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_) => {}
            }
        }

        dispatcher.cancel_all();
        drop(dispatcher);
        writer.abort();

        if let Err(err) = self.hooks.run(HookPoint::AfterConnection, &mut connection_ctx).await {
            warn!(error = %err, "after_connection hook reported an error during teardown");
        }

        Ok(())
    }
}

/// Accept a server-side connection from an already-negotiated `swill/1` WebSocket stream. The
/// caller is responsible for the HTTP upgrade itself (out of scope per §1 — reuse the framework's
/// existing upgrade handling, e.g. `hyper::upgrade::OnUpgrade`).
pub async fn accept<S>(socket: S) -> Result<WebSocketStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio_tungstenite::accept_async(socket).await.map_err(Error::from)
}
