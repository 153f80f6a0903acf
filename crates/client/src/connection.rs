//! One client-side WebSocket connection (§4.8, symmetric with [`swill_core::connection`]).
//!
//! [`dial`] performs the transport connect and subprotocol negotiation; [`run`] then pumps frames
//! in both directions until the transport closes, demultiplexing inbound responses onto the shared
//! [`crate::client::SharedState`]'s per-sequence table exactly the way the server's
//! [`swill_core::dispatcher::Dispatcher`] demultiplexes inbound requests.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use swill_core::codec::decode_response;
use swill_core::config::ClientConfig;
use swill_core::connection::SUBPROTOCOL;
use swill_core::error::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::client::SharedState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the per-connection outbound channel. The client has no equivalent of
/// [`swill_core::config::ServerConfig::outbound_channel_capacity`] since one client connection
/// only ever serves the calls its own process makes.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Why a connection's read/write loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectReason {
    /// A clean, normal closure (`1000`) — the scheduler should not reconnect.
    Terminal,
    /// Abnormal closure, a non-1000 close code, or a transport error — eligible for reconnect
    /// (§4.9: includes `1006`, `1015`, and "any non-clean close").
    Reconnect,
}

/// Open one WebSocket connection, advertising the `swill/1` subprotocol, bounded by
/// `config.connect_timeout`.
pub(crate) async fn dial(config: &ClientConfig) -> Result<Socket> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(Error::from)?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

    let connect = tokio_tungstenite::connect_async(request);
    match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(err)) => Err(Error::from(err)),
        Err(_) => Err(Error::other("connect timed out")),
    }
}

/// Run one connection to completion: install the outbound channel on `state`, pump frames in both
/// directions, demultiplex inbound responses by sequence, and report why it stopped.
pub(crate) async fn run(socket: Socket, state: Arc<SharedState>) -> DisconnectReason {
    let (mut write, mut read) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CHANNEL_CAPACITY);
    state.install_outbound(outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if write.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut reason = DisconnectReason::Reconnect;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Binary(bytes)) => match decode_response(&bytes) {
                Ok(envelope) => state.route_response(envelope).await,
                Err(err) => debug!(error = %err, "failed to decode inbound response frame"),
            },
            Ok(Message::Close(frame)) => {
                reason = match &frame {
                    Some(close) if close.code == CloseCode::Normal => DisconnectReason::Terminal,
                    _ => DisconnectReason::Reconnect,
                };
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(err) => {
                debug!(error = %err, "transport read failed, tearing down connection");
                reason = DisconnectReason::Reconnect;
                break;
            }
        }
    }

    state.clear_outbound();
    writer.abort();
    state.fail_all_pending();
    reason
}
