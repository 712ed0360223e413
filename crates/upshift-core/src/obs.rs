//! Structured observability hooks for promotion lifecycle events.
//!
//! This module provides:
//! - Flow-scoped tracing spans via the `FlowSpan` RAII guard
//! - Emission functions for the key lifecycle events: flow start, step
//!   completion, flow completion, flow failure
//!
//! Events are emitted at `info!` level and carry a stable `event` field so
//! log pipelines can index them without parsing the message text.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Environment, FlowStep};

/// RAII guard that enters a flow-scoped tracing span.
///
/// While the guard is alive, every tracing call is associated with the
/// request id, so interleaved flows stay distinguishable in the logs.
pub struct FlowSpan {
    _span: tracing::span::EnteredSpan,
}

impl FlowSpan {
    /// Create and enter a span tagged with the request id.
    pub fn enter(request_id: Uuid) -> Self {
        Self {
            _span: flow_span(request_id).entered(),
        }
    }
}

/// Build the flow-scoped span without entering it.
///
/// Async flows attach it with `tracing::Instrument`, which keeps the
/// association across awaits without making the future `!Send`.
pub fn flow_span(request_id: Uuid) -> tracing::Span {
    tracing::info_span!("upshift.flow", request_id = %request_id)
}

/// Emit event: a promotion flow started.
pub fn emit_flow_started(request_id: Uuid, source: Environment, target: Environment, mode: &str) {
    info!(
        event = "promotion.started",
        request_id = %request_id,
        source = %source,
        target = %target,
        mode = %mode,
    );
}

/// Emit event: a flow checkpoint completed.
pub fn emit_step_completed(request_id: Uuid, step: FlowStep, detail: &str) {
    info!(
        event = "step.completed",
        request_id = %request_id,
        step = %step,
        detail = %detail,
    );
}

/// Emit event: a promotion flow finished, with its disposition.
pub fn emit_flow_completed(request_id: Uuid, disposition: &str, tag: &str) {
    info!(
        event = "promotion.completed",
        request_id = %request_id,
        disposition = %disposition,
        tag = %tag,
    );
}

/// Emit event: a promotion flow failed at a step.
pub fn emit_flow_failed(request_id: Uuid, step: FlowStep, error: &dyn std::fmt::Display) {
    warn!(
        event = "promotion.failed",
        request_id = %request_id,
        step = %step,
        error = %error,
    );
}

/// Emit event: an older promotion review request was closed as superseded.
pub fn emit_superseded_closed(request_id: Uuid, closed: &str) {
    info!(
        event = "promotion.superseded_closed",
        request_id = %request_id,
        review_request = %closed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_span_create() {
        // Just ensure FlowSpan::enter doesn't panic
        let _span = FlowSpan::enter(Uuid::new_v4());
    }
}
