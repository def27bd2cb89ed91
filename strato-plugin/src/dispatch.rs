//! Per-request chain composition and invocation.

use crate::chain::{ChainEntry, MiddlewareChain};
use crate::context::{Handler, RequestContext, Response};
use std::sync::Arc;
use strato_core::{Phase, StratoError};
use tracing::debug;

/// Composes applicable chain entries around a terminal handler and runs
/// the result. Works off a chain snapshot, so concurrent reconfiguration
/// never splits a request mid-dispatch.
#[derive(Clone)]
pub struct Dispatcher {
    chain: Arc<MiddlewareChain>,
}

impl Dispatcher {
    pub fn new(chain: Arc<MiddlewareChain>) -> Self {
        Self { chain }
    }

    /// Dispatch with no phase anchor: every applicable entry runs in one
    /// bucket, priority order.
    pub async fn dispatch(
        &self,
        ctx: RequestContext,
        terminal: Handler,
    ) -> Result<Response, StratoError> {
        self.run(None, ctx, terminal).await
    }

    /// Dispatch for one phase anchor: only entries in that phase run.
    pub async fn dispatch_phase(
        &self,
        phase: Phase,
        ctx: RequestContext,
        terminal: Handler,
    ) -> Result<Response, StratoError> {
        self.run(Some(phase), ctx, terminal).await
    }

    async fn run(
        &self,
        phase: Option<Phase>,
        ctx: RequestContext,
        terminal: Handler,
    ) -> Result<Response, StratoError> {
        let snapshot = self.chain.snapshot();
        let applicable: Vec<&Arc<ChainEntry>> = snapshot
            .iter()
            .filter(|e| phase.is_none_or(|p| e.phase == p))
            .filter(|e| e.applies_to(&ctx.path))
            .collect();

        debug!(
            path = %ctx.path,
            phase = phase.map(|p| p.as_str()).unwrap_or("any"),
            entries = applicable.len(),
            "Dispatching through chain"
        );

        // Wrap right-to-left so the lowest-priority entry ends up
        // outermost and therefore runs first.
        let mut handler = terminal;
        for entry in applicable.into_iter().rev() {
            handler = entry.middleware.wrap(handler);
        }
        handler(ctx).await
    }
}
