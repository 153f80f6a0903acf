//! Per-connection request table (§5 "Shared resources").
//!
//! One [`RequestEntry`] exists per in-flight sequence. It is created when a NEW frame arrives,
//! consulted by the dispatcher on every subsequent frame for that sequence, and removed once the
//! state machine reaches a terminal state. The table itself lives behind a `parking_lot::Mutex` on
//! [`crate::connection::Connection`] since connection-manager introspection may read it from
//! outside the dispatcher task.

use std::collections::HashMap;

use tokio::sync::watch;

use crate::handler::CallShape;
use crate::state::RequestState;
use crate::stream::StreamProducer;

/// Bookkeeping for one in-flight sequence.
pub struct RequestEntry {
    /// Current position in the state machine (§4.3).
    pub state: RequestState,
    /// The call shape this sequence was classified with at registration time.
    pub shape: CallShape,
    /// The producer half feeding this request's [`crate::stream::StreamIterator`], present only
    /// for the two client-streaming shapes — unary input requests are delivered directly.
    pub inbound: Option<StreamProducer>,
    /// Signals cancellation to anything awaiting on this request's stream iterator.
    pub cancel: watch::Sender<bool>,
}

/// The live set of in-flight requests for one connection.
#[derive(Default)]
pub struct RequestTable {
    entries: HashMap<u64, RequestEntry>,
}

impl RequestTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry for `sequence`, replacing any prior entry (callers must only do this for
    /// a NEW frame).
    pub fn insert(&mut self, sequence: u64, entry: RequestEntry) {
        self.entries.insert(sequence, entry);
    }

    /// Borrow the entry for `sequence`, if one exists.
    pub fn get(&self, sequence: u64) -> Option<&RequestEntry> {
        self.entries.get(&sequence)
    }

    /// Mutably borrow the entry for `sequence`, if one exists.
    pub fn get_mut(&mut self, sequence: u64) -> Option<&mut RequestEntry> {
        self.entries.get_mut(&sequence)
    }

    /// Remove the entry for `sequence` once it reaches a terminal state.
    pub fn remove(&mut self, sequence: u64) -> Option<RequestEntry> {
        self.entries.remove(&sequence)
    }

    /// The number of in-flight requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no in-flight requests.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Signal cancellation to every in-flight request and drop them from the table — used on
    /// transport close (§4.8 teardown).
    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.cancel.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(shape: CallShape) -> RequestEntry {
        let (cancel, _) = watch::channel(false);
        RequestEntry { state: RequestState::New, shape, inbound: None, cancel }
    }

    #[test]
    fn cancel_all_clears_the_table_and_signals() {
        let mut table = RequestTable::new();
        table.insert(1, entry(CallShape::UnaryUnary));
        table.insert(2, entry(CallShape::Bidi));
        assert_eq!(table.len(), 2);

        table.cancel_all();
        assert!(table.is_empty());
    }
}
