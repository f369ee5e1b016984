// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Explicit telemetry context threading.
//!
//! The current operation is never looked up through ambient global state.
//! Callers thread a [`TelemetryContext`] through their own call parameters;
//! `start_operation` returns the context that carries the new operation,
//! and span-closing discipline stays visible at the call site.
//!
//! Only the streaming backend propagates an active operation through the
//! context. The flat backend has no span tree, so its contexts never carry
//! one — nested starts produce siblings there, by design.

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

/// Context value threaded through instrumented code.
#[derive(Clone, Default)]
pub struct TelemetryContext {
    otel: Context,
}

impl TelemetryContext {
    /// An empty context with no active operation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation is currently live on this context.
    pub fn has_active_operation(&self) -> bool {
        self.otel.has_active_span()
    }

    pub(crate) fn from_otel(otel: Context) -> Self {
        Self { otel }
    }

    pub(crate) fn otel(&self) -> &Context {
        &self.otel
    }
}

impl std::fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("has_active_operation", &self.has_active_operation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context_has_no_operation() {
        let ctx = TelemetryContext::new();
        assert!(!ctx.has_active_operation());
    }

    #[test]
    fn test_debug_does_not_panic() {
        let ctx = TelemetryContext::default();
        let repr = format!("{:?}", ctx);
        assert!(repr.contains("has_active_operation"));
    }
}
