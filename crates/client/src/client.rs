//! The client entry point (§4.9, §6): [`Client::connect`], [`Client::call`], [`Client::rpc`], and
//! the reconnect supervisor that keeps them working across transport drops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rmpv::Value;
use swill_core::codec::encode_request;
use swill_core::config::ClientConfig;
use swill_core::envelope::{RequestEnvelope, RequestFrameType, ResponseEnvelope, ResponseFrameType};
use swill_core::error::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::connection::{self, DisconnectReason};
use crate::reconnect::ReconnectScheduler;
use crate::request::{remote_error, CallOptions, RpcRequest};

/// Capacity of one [`RpcRequest`]'s inbound response channel.
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// State shared between [`Client`]'s public methods and the reconnect supervisor task.
pub(crate) struct SharedState {
    config: ClientConfig,
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    sequence: Mutex<u64>,
    responses: Mutex<HashMap<u64, mpsc::Sender<ResponseEnvelope>>>,
    connected: AtomicBool,
}

impl SharedState {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            outbound: Mutex::new(None),
            sequence: Mutex::new(0),
            responses: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Reinitialize per-connection state on a fresh connect (§4.9: sequence counter and request
    /// table are reinitialized on reconnect).
    fn reset_for_new_connection(&self) {
        *self.sequence.lock() = 0;
        self.responses.lock().clear();
        self.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn install_outbound(&self, sender: mpsc::Sender<Vec<u8>>) {
        *self.outbound.lock() = Some(sender);
    }

    pub(crate) fn clear_outbound(&self) {
        *self.outbound.lock() = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn outbound_sender(&self) -> Result<mpsc::Sender<Vec<u8>>> {
        self.outbound
            .lock()
            .clone()
            .ok_or_else(|| Error::Protocol("client is not connected".into()))
    }

    fn next_sequence(&self) -> u64 {
        let mut sequence = self.sequence.lock();
        *sequence += 1;
        *sequence
    }

    /// Deliver one inbound response to the request it belongs to. Frames for an unknown or
    /// already-closed sequence are silently dropped (the caller stopped listening).
    pub(crate) async fn route_response(&self, envelope: ResponseEnvelope) {
        let terminal = envelope.frame_type == ResponseFrameType::EndOfStream
            || envelope.frame_type == ResponseFrameType::Error;
        let sender = if terminal {
            self.responses.lock().remove(&envelope.sequence)
        } else {
            self.responses.lock().get(&envelope.sequence).cloned()
        };
        if let Some(sender) = sender {
            let _ = sender.send(envelope).await;
        }
    }

    /// Drop every pending request's sender, unblocking anyone awaiting `receive()` on a connection
    /// that just went down (§4.8: transport close cancels all requests on that connection).
    pub(crate) fn fail_all_pending(&self) {
        self.responses.lock().clear();
    }
}

/// A connected (or reconnecting) swill client.
///
/// Cloning shares the same underlying connection and reconnect supervisor.
#[derive(Clone)]
pub struct Client {
    state: std::sync::Arc<SharedState>,
}

impl Client {
    /// Connect to `config.url`, advertising the `swill/1` subprotocol. Fails if the first attempt
    /// does not succeed within `config.connect_timeout`; once connected, subsequent drops are
    /// handled by the reconnect scheduler rather than surfaced as an error here.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let state = std::sync::Arc::new(SharedState::new(config));
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_supervisor(state.clone(), Some(ready_tx)));
        ready_rx.await.map_err(|_| Error::other("client supervisor stopped before connecting"))??;
        Ok(Self { state })
    }

    /// Whether the client currently has a live connection.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Open a new call (§6 `rpc(method, args?, options)`). Works for any of the four shapes: send
    /// additional messages with [`RpcRequest::send`] for client-streaming/bidi calls, and consume
    /// responses with [`RpcRequest::receive`].
    pub async fn rpc(&self, method: impl Into<String>, args: Option<Value>, options: CallOptions) -> Result<RpcRequest> {
        let method = method.into();
        let sequence = self.state.next_sequence();
        let outbound = self.state.outbound_sender()?;
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        self.state.responses.lock().insert(sequence, response_tx);

        let first_frame = match (&args, options.send_metadata_first) {
            (None, true) => RequestEnvelope {
                sequence,
                data: Value::Nil,
                method: method.clone(),
                frame_type: RequestFrameType::Metadata,
                metadata: options.metadata,
            },
            _ => RequestEnvelope {
                sequence,
                data: args.unwrap_or(Value::Nil),
                method: method.clone(),
                frame_type: RequestFrameType::Message,
                metadata: options.metadata,
            },
        };

        let bytes = encode_request(&first_frame);
        outbound
            .send(bytes)
            .await
            .map_err(|_| Error::Protocol("connection is not writable".into()))?;

        Ok(RpcRequest::new(sequence, method, outbound, response_rx, RESPONSE_CHANNEL_CAPACITY))
    }

    /// A unary-unary convenience call (§6 `call(method, args, options)`): sends one message, then
    /// waits for the first `MESSAGE`/`ERROR`/`END_OF_STREAM` frame (§7).
    pub async fn call(&self, method: impl Into<String>, args: Value, options: CallOptions) -> Result<Value> {
        let mut request = self.rpc(method, Some(args), options).await?;
        loop {
            match request.receive().await {
                Some(envelope) => match envelope.frame_type {
                    ResponseFrameType::Message => return Ok(envelope.data),
                    ResponseFrameType::Error => return Err(Error::handler(remote_error(&envelope.data))),
                    ResponseFrameType::EndOfStream => return Ok(Value::Nil),
                    ResponseFrameType::Metadata => continue,
                },
                None => return Ok(Value::Nil),
            }
        }
    }
}

/// Drive connect → run → backoff → reconnect for the lifetime of the client. `ready` is fulfilled
/// exactly once, with the outcome of the very first connect attempt.
async fn run_supervisor(state: std::sync::Arc<SharedState>, mut ready: Option<oneshot::Sender<Result<()>>>) {
    let mut scheduler = ReconnectScheduler::new(state.config.reconnect);

    loop {
        match connection::dial(&state.config).await {
            Ok(socket) => {
                scheduler.reset();
                state.reset_for_new_connection();
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                info!(url = %state.config.url, "connected");
                let reason = connection::run(socket, state.clone()).await;
                if reason == DisconnectReason::Terminal {
                    warn!("connection closed cleanly, giving up");
                    return;
                }
                warn!("connection dropped, scheduling reconnect");
            }
            Err(err) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(err));
                    return;
                }
                warn!(error = %err, "reconnect attempt failed");
            }
        }

        let Some(delay) = scheduler.next_delay() else {
            warn!("reconnect retries exhausted, giving up");
            return;
        };
        tokio::time::sleep(delay).await;
    }
}
