//! Lifecycle hook chain (§4.7).
//!
//! Hooks are registered per named point and run in registration order. Any hook can abort the
//! chain for its point, which — depending on the point — either rejects the connection/request or
//! skips straight to teardown. The control object handed to a hook (`HookFlow`) mirrors
//! [`crate::routing::FlowCtrl`]'s cursor/cease split: `cease()` stops remaining hooks at this
//! point without touching points that run later.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

/// The eleven named points in a connection/request's lifecycle, in the order they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// A transport connection has arrived, before any handshake.
    BeforeConnection,
    /// The `swill/1` subprotocol handshake is about to be accepted.
    BeforeAccept,
    /// A request frame has been classified and is about to be dispatched.
    BeforeRequest,
    /// Leading metadata for a request is about to be handed to the handler.
    BeforeRequestMetadata,
    /// An inbound data frame is about to be queued for the handler.
    BeforeRequestData,
    /// An inbound frame of any kind is about to be processed.
    BeforeRequestMessage,
    /// The handler's response leading metadata is about to be sent.
    BeforeLeadingMetadata,
    /// An outbound response message is about to be sent.
    BeforeResponseMessage,
    /// The handler's trailing metadata is about to be sent.
    BeforeTrailingMetadata,
    /// A request has reached a terminal state.
    AfterRequest,
    /// The connection is tearing down.
    AfterConnection,
}

impl HookPoint {
    /// All points, in firing order.
    pub const ALL: [HookPoint; 11] = [
        HookPoint::BeforeConnection,
        HookPoint::BeforeAccept,
        HookPoint::BeforeRequest,
        HookPoint::BeforeRequestMetadata,
        HookPoint::BeforeRequestData,
        HookPoint::BeforeRequestMessage,
        HookPoint::BeforeLeadingMetadata,
        HookPoint::BeforeResponseMessage,
        HookPoint::BeforeTrailingMetadata,
        HookPoint::AfterRequest,
        HookPoint::AfterConnection,
    ];
}

/// One hook's decision about whether the chain continues.
#[derive(Debug, Default)]
pub struct HookFlow {
    ceased: bool,
}

impl HookFlow {
    /// Stop running remaining hooks registered at this point.
    pub fn cease(&mut self) {
        self.ceased = true;
    }

    /// Whether a prior hook called [`Self::cease`].
    pub fn is_ceased(&self) -> bool {
        self.ceased
    }
}

/// A single lifecycle hook.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    /// Run at this hook's point. Returning `Err` aborts the chain as if [`HookFlow::cease`] had
    /// been called, and the error propagates to the caller (connection manager or dispatcher) to
    /// decide how to fail the connection or request.
    async fn call(&self, ctx: &mut Context, flow: &mut HookFlow) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Hook for F
where
    F: Send + Sync + 'static + Fn(&mut Context, &mut HookFlow) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: &mut Context, flow: &mut HookFlow) -> Result<()> {
        (self)(ctx, flow).await
    }
}

/// Holds the hooks registered at each point and runs them in order.
#[derive(Default, Clone)]
pub struct HookChain {
    hooks: HashMap<HookPoint, Vec<Arc<dyn Hook>>>,
}

impl HookChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook at `point`. Hooks at the same point run in the order they were added.
    pub fn push(&mut self, point: HookPoint, hook: Arc<dyn Hook>) -> &mut Self {
        self.hooks.entry(point).or_default().push(hook);
        self
    }

    /// Run every hook registered at `point` in order, stopping early if one ceases the chain or
    /// errors.
    pub async fn run(&self, point: HookPoint, ctx: &mut Context) -> Result<()> {
        let Some(hooks) = self.hooks.get(&point) else {
            return Ok(());
        };
        let mut flow = HookFlow::default();
        for hook in hooks {
            hook.call(ctx, &mut flow).await?;
            if flow.is_ceased() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::Depot;
    use parking_lot::Mutex;

    fn context() -> Context {
        Context::new(1, "greet", None, Arc::new(Mutex::new(Depot::new())))
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();

        let o1 = order.clone();
        chain.push(
            HookPoint::BeforeRequest,
            Arc::new(move |_ctx: &mut Context, _flow: &mut HookFlow| {
                let o1 = o1.clone();
                async move {
                    o1.lock().push(1);
                    Ok(())
                }
            }),
        );
        let o2 = order.clone();
        chain.push(
            HookPoint::BeforeRequest,
            Arc::new(move |_ctx: &mut Context, _flow: &mut HookFlow| {
                let o2 = o2.clone();
                async move {
                    o2.lock().push(2);
                    Ok(())
                }
            }),
        );

        chain.run(HookPoint::BeforeRequest, &mut context()).await.unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cease_stops_remaining_hooks_at_this_point() {
        let ran_second = Arc::new(Mutex::new(false));
        let mut chain = HookChain::new();

        chain.push(
            HookPoint::BeforeAccept,
            Arc::new(|_ctx: &mut Context, flow: &mut HookFlow| {
                flow.cease();
                async move { Ok(()) }
            }),
        );
        let flag = ran_second.clone();
        chain.push(
            HookPoint::BeforeAccept,
            Arc::new(move |_ctx: &mut Context, _flow: &mut HookFlow| {
                let flag = flag.clone();
                async move {
                    *flag.lock() = true;
                    Ok(())
                }
            }),
        );

        chain.run(HookPoint::BeforeAccept, &mut context()).await.unwrap();
        assert!(!*ran_second.lock());
    }
}
