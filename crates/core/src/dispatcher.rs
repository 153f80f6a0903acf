//! Dispatcher (§4.6).
//!
//! One [`Dispatcher`] is created per connection. It demultiplexes inbound frames onto per-sequence
//! state ([`RequestTable`]), spawns a `tokio` task to run the classified handler, and multiplexes
//! every handler's outbound frames onto a single bounded channel — the connection manager owns the
//! other end and is the sole writer to the transport (§5 "single-writer-to-transport").

use std::sync::Arc;

use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::{mpsc, watch};

use crate::codec::encode_response;
use crate::context::Context;
use crate::depot::Depot;
use crate::envelope::{ErrorCode, ErrorPayload, RequestEnvelope, RequestFrameType, ResponseEnvelope};
use crate::error::{Error, Result};
use crate::handler::{CallShape, HandlerRegistry, OutboundSink, RegisteredHandler};
use crate::hooks::{HookChain, HookPoint};
use crate::request::{RequestEntry, RequestTable};
use crate::state::{self, RequestState, Transition};
use crate::stream::StreamIterator;

/// Pushes one handler's outbound values onto the connection's shared outbound channel, tagging
/// each with its sequence number and serializing it to wire bytes before sending.
struct ChannelOutboundSink {
    sequence: u64,
    outbound: mpsc::Sender<Vec<u8>>,
    cancelled: watch::Receiver<bool>,
}

#[async_trait::async_trait]
impl OutboundSink for ChannelOutboundSink {
    async fn send(&self, value: Value) -> Result<()> {
        if *self.cancelled.borrow() {
            // P3: once CANCEL has landed, a handler still pushing values gets told to stop
            // rather than having its frames silently swallowed further down the pipe.
            return Err(Error::Protocol("request was cancelled".into()));
        }
        let bytes = encode_response(&ResponseEnvelope::message(self.sequence, value));
        self.outbound.send(bytes).await.map_err(|_| Error::Protocol("outbound channel closed".into()))
    }
}

/// Per-connection dispatcher state.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    hooks: Arc<HookChain>,
    requests: Arc<Mutex<RequestTable>>,
    connection_depot: Arc<Mutex<Depot>>,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound_queue_capacity: usize,
}

impl Dispatcher {
    /// Construct a dispatcher wired to `outbound`, the channel the connection manager drains to
    /// write frames to the transport.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        hooks: Arc<HookChain>,
        connection_depot: Arc<Mutex<Depot>>,
        outbound: mpsc::Sender<Vec<u8>>,
        inbound_queue_capacity: usize,
    ) -> Self {
        Self {
            registry,
            hooks,
            requests: Arc::new(Mutex::new(RequestTable::new())),
            connection_depot,
            outbound,
            inbound_queue_capacity,
        }
    }

    /// Cancel every in-flight request, e.g. on transport close (§4.8 teardown).
    pub fn cancel_all(&self) {
        self.requests.lock().cancel_all();
    }

    /// The number of in-flight requests, for introspection.
    pub fn in_flight(&self) -> usize {
        self.requests.lock().len()
    }

    /// Decode and route one inbound binary message.
    pub async fn handle_frame(&self, bytes: &[u8]) -> Result<()> {
        let envelope = crate::codec::decode_request(bytes)?;
        self.handle_envelope(envelope).await
    }

    async fn handle_envelope(&self, envelope: RequestEnvelope) -> Result<()> {
        let sequence = envelope.sequence;
        let current_state = self.requests.lock().get(sequence).map(|e| e.state);

        let shape = match current_state {
            Some(_) => self.requests.lock().get(sequence).map(|e| e.shape),
            None => self.registry.shape_of(&envelope.method),
        };

        let Some(shape) = shape else {
            // Unknown method on a NEW frame: reject without ever entering the table.
            self.emit_error(sequence, ErrorCode::MethodNotFound, "no handler registered for method")
                .await;
            return Ok(());
        };

        let state = current_state.unwrap_or(RequestState::New);
        match state::advance(state, shape, envelope.frame_type) {
            Transition::Reject(next_state, code) => {
                if let Some(entry) = self.requests.lock().get_mut(sequence) {
                    entry.state = next_state;
                }
                self.emit_error(sequence, code, "request violated the protocol state machine").await;
                self.requests.lock().remove(sequence);
            }
            Transition::Accept(next_state) => {
                self.apply_accepted_frame(envelope, shape, state, next_state).await?;
            }
        }
        Ok(())
    }

    async fn apply_accepted_frame(
        &self,
        envelope: RequestEnvelope,
        shape: CallShape,
        prior_state: RequestState,
        next_state: RequestState,
    ) -> Result<()> {
        let sequence = envelope.sequence;

        if envelope.frame_type == RequestFrameType::Cancel {
            // §9 resolved open question: CANCEL does not itself produce an ERROR response.
            if let Some(entry) = self.requests.lock().remove(sequence) {
                let _ = entry.cancel.send(true);
            }
            return Ok(());
        }

        if prior_state == RequestState::New {
            self.spawn_handler(sequence, shape, envelope, next_state).await;
            return Ok(());
        }

        let mut table = self.requests.lock();
        let Some(entry) = table.get_mut(sequence) else {
            return Ok(());
        };
        entry.state = next_state;
        let producer = entry.inbound.clone();
        match envelope.frame_type {
            RequestFrameType::Message | RequestFrameType::Metadata => {
                if let Some(producer) = producer {
                    drop(table);
                    let _ = producer.push(envelope.data).await;
                }
            }
            RequestFrameType::EndOfStream => {
                entry.inbound = None; // dropping the producer closes the StreamIterator
            }
            RequestFrameType::Cancel => unreachable!("handled above"),
        }
        Ok(())
    }

    async fn spawn_handler(
        &self,
        sequence: u64,
        shape: CallShape,
        first_frame: RequestEnvelope,
        initial_state: RequestState,
    ) {
        let Some(handler) = self.registry.get(&first_frame.method).cloned() else {
            self.emit_error(sequence, ErrorCode::MethodNotFound, "no handler registered for method")
                .await;
            return;
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let needs_stream = matches!(shape, CallShape::ClientStreamUnary | CallShape::Bidi);
        let (producer, iterator) = if needs_stream {
            let (producer, iterator) =
                StreamIterator::channel(self.inbound_queue_capacity, cancel_rx.clone());
            // The NEW frame already carries the first payload value for streaming shapes; push it
            // before the producer goes into the table so the handler sees it through `next()` like
            // every subsequent item, rather than threading it through a separate parameter.
            let _ = producer.push(first_frame.data.clone()).await;
            (Some(producer), Some(iterator))
        } else {
            (None, None)
        };

        self.requests.lock().insert(
            sequence,
            RequestEntry { state: initial_state, shape, inbound: producer, cancel: cancel_tx },
        );

        let ctx = Context::new(
            sequence,
            first_frame.method.clone(),
            first_frame.metadata.clone(),
            self.connection_depot.clone(),
        );
        let hooks = self.hooks.clone();
        let outbound = self.outbound.clone();
        let requests = self.requests.clone();
        let first_value = first_frame.data.clone();

        tokio::spawn(async move {
            let mut ctx = ctx;
            if let Err(err) = hooks.run(HookPoint::BeforeRequest, &mut ctx).await {
                emit_error_standalone(&outbound, sequence, ErrorCode::InternalError, &err.to_string()).await;
                requests.lock().remove(sequence);
                return;
            }

            let result =
                run_handler(handler, &mut ctx, shape, first_value, iterator, outbound.clone(), cancel_rx.clone())
                    .await;

            if *cancel_rx.borrow() {
                // P3: CANCEL already tore the request out of the table; whatever the handler
                // returned, no further frame for this sequence reaches the transport.
            } else {
                match result {
                    Ok(Some(value)) => {
                        let bytes = encode_response(&ResponseEnvelope::message(sequence, value));
                        let _ = outbound.send(bytes).await;
                        let bytes = encode_response(&ResponseEnvelope::end_of_stream(sequence, None));
                        let _ = outbound.send(bytes).await;
                    }
                    Ok(None) => {
                        let bytes = encode_response(&ResponseEnvelope::end_of_stream(sequence, None));
                        let _ = outbound.send(bytes).await;
                    }
                    Err(err) => {
                        emit_error_standalone(&outbound, sequence, ErrorCode::InternalError, &err.to_string())
                            .await;
                    }
                }
            }
            let _ = hooks.run(HookPoint::AfterRequest, &mut ctx).await;
            requests.lock().remove(sequence);
        });
    }

    async fn emit_error(&self, sequence: u64, code: ErrorCode, message: &str) {
        emit_error_standalone(&self.outbound, sequence, code, message).await;
    }
}

async fn emit_error_standalone(
    outbound: &mpsc::Sender<Vec<u8>>,
    sequence: u64,
    code: ErrorCode,
    message: &str,
) {
    let payload = ErrorPayload::new(code, message.to_owned());
    let bytes = encode_response(&ResponseEnvelope::error(sequence, &payload));
    let _ = outbound.send(bytes).await;
}

/// Drive one handler to completion, returning the unary response value if the shape produces one.
async fn run_handler(
    handler: RegisteredHandler,
    ctx: &mut Context,
    shape: CallShape,
    first_value: Value,
    iterator: Option<StreamIterator>,
    outbound: mpsc::Sender<Vec<u8>>,
    cancelled: watch::Receiver<bool>,
) -> Result<Option<Value>> {
    match (handler, shape) {
        (RegisteredHandler::UnaryUnary(h), CallShape::UnaryUnary) => {
            h.call(ctx, first_value).await.map(Some)
        }
        (RegisteredHandler::ClientStreamUnary(h), CallShape::ClientStreamUnary) => {
            let iterator = iterator.expect("client-streaming shapes always build an iterator");
            h.call(ctx, iterator).await.map(Some)
        }
        (RegisteredHandler::UnaryServerStream(h), CallShape::UnaryServerStream) => {
            let sink = Arc::new(ChannelOutboundSink { sequence: ctx.sequence(), outbound, cancelled });
            h.call(ctx, first_value, sink).await.map(|()| None)
        }
        (RegisteredHandler::Bidi(h), CallShape::Bidi) => {
            let iterator = iterator.expect("bidi shapes always build an iterator");
            let sink = Arc::new(ChannelOutboundSink { sequence: ctx.sequence(), outbound, cancelled });
            h.call(ctx, iterator, sink).await.map(|()| None)
        }
        _ => Err(Error::Protocol("handler shape does not match its registered call shape".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_response;
    use crate::envelope::{RequestEnvelope, ResponseFrameType};
    use crate::handler::UnaryUnaryHandler;

    struct Echo;

    #[async_trait::async_trait]
    impl UnaryUnaryHandler for Echo {
        async fn call(&self, _ctx: &mut Context, request: Value) -> Result<Value> {
            Ok(request)
        }
    }

    fn dispatcher() -> (Dispatcher, mpsc::Receiver<Vec<u8>>) {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", RegisteredHandler::UnaryUnary(Arc::new(Echo))).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(HookChain::new()),
            Arc::new(Mutex::new(Depot::new())),
            tx,
            16,
        );
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn unary_unary_round_trip_sends_message_then_end_of_stream() {
        let (dispatcher, mut rx) = dispatcher();
        let envelope = RequestEnvelope {
            sequence: 1,
            data: Value::from(42),
            method: "echo".into(),
            frame_type: RequestFrameType::Message,
            metadata: None,
        };
        dispatcher.handle_envelope(envelope).await.unwrap();

        let first = decode_response(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.frame_type, ResponseFrameType::Message);
        assert_eq!(first.data.as_i64(), Some(42));

        let second = decode_response(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(second.frame_type, ResponseFrameType::EndOfStream);
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let (dispatcher, mut rx) = dispatcher();
        let envelope = RequestEnvelope {
            sequence: 1,
            data: Value::Nil,
            method: "missing".into(),
            frame_type: RequestFrameType::Message,
            metadata: None,
        };
        dispatcher.handle_envelope(envelope).await.unwrap();

        let response = decode_response(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(response.frame_type, ResponseFrameType::Error);
        assert_eq!(response.data.as_map().unwrap()[0].1.as_i64(), Some(ErrorCode::MethodNotFound.as_i64()));
    }
}
