//! Per-request context (§3 data model).
//!
//! `Context` is handed to every handler and hook invocation. It carries the request's identity,
//! any metadata the client attached, and a view onto the connection's user-scoped [`Depot`] so
//! hooks can stash data (e.g. an authenticated identity) for downstream hooks and the handler to
//! read back.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::depot::Depot;
use crate::envelope::Metadata;

/// Request-scoped state plus a handle onto the connection-scoped [`Depot`].
pub struct Context {
    sequence: u64,
    method: String,
    metadata: Option<Metadata>,
    connection_depot: Arc<Mutex<Depot>>,
    request_depot: Depot,
}

impl Context {
    /// Construct a context for one inbound request, sharing the connection's depot.
    pub fn new(
        sequence: u64,
        method: impl Into<String>,
        metadata: Option<Metadata>,
        connection_depot: Arc<Mutex<Depot>>,
    ) -> Self {
        Self {
            sequence,
            method: method.into(),
            metadata,
            connection_depot,
            request_depot: Depot::new(),
        }
    }

    /// The per-connection sequence number identifying this request.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The target procedure name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Leading metadata the client attached to this request, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Run a closure with exclusive access to the connection-scoped depot.
    pub fn with_connection_depot<R>(&self, f: impl FnOnce(&mut Depot) -> R) -> R {
        let mut depot = self.connection_depot.lock();
        f(&mut depot)
    }

    /// The request-scoped depot, valid only for this single invocation.
    pub fn request_depot(&self) -> &Depot {
        &self.request_depot
    }

    /// Mutable access to the request-scoped depot.
    pub fn request_depot_mut(&mut self) -> &mut Depot {
        &mut self.request_depot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_depot_is_shared_across_contexts() {
        let depot = Arc::new(Mutex::new(Depot::new()));
        let ctx_a = Context::new(1, "greet", None, depot.clone());
        ctx_a.with_connection_depot(|d| {
            d.insert("user", "ferris".to_owned());
        });

        let ctx_b = Context::new(2, "greet", None, depot);
        let seen = ctx_b.with_connection_depot(|d| d.get::<String>("user").cloned());
        assert_eq!(seen.as_deref(), Some("ferris"));
    }
}
