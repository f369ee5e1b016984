// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The in-flight operation handle.
//!
//! Every `start_operation` call returns an [`Operation`]. What the handle
//! holds depends on the active backend: a live OpenTelemetry span for the
//! streaming backend, a name plus start timestamp for the flat backend
//! (translated into a single completed event at close time), or nothing at
//! all when tracing is disabled.
//!
//! Handles are closed exactly once; a second close (or closing a no-op
//! handle) is always a safe no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use opentelemetry::Context;

/// Handle for one timed unit of work.
#[derive(Debug)]
pub struct Operation {
    pub(crate) state: OpState,
}

#[derive(Debug)]
pub(crate) enum OpState {
    /// Tracing disabled; all calls on the handle are no-ops.
    Noop,
    /// Streaming backend: the context carries the live span.
    Streaming {
        cx: Context,
        closed: AtomicBool,
    },
    /// Flat backend: synthetic record, no parent/child relationship.
    Flat {
        name: String,
        started: Instant,
        closed: AtomicBool,
    },
    /// Recording test double.
    Recording {
        name: String,
        closed: AtomicBool,
    },
}

impl Operation {
    pub(crate) fn noop() -> Self {
        Self { state: OpState::Noop }
    }

    pub(crate) fn streaming(cx: Context) -> Self {
        Self {
            state: OpState::Streaming {
                cx,
                closed: AtomicBool::new(false),
            },
        }
    }

    pub(crate) fn flat(name: impl Into<String>) -> Self {
        Self {
            state: OpState::Flat {
                name: name.into(),
                started: Instant::now(),
                closed: AtomicBool::new(false),
            },
        }
    }

    pub(crate) fn recording(name: impl Into<String>) -> Self {
        Self {
            state: OpState::Recording {
                name: name.into(),
                closed: AtomicBool::new(false),
            },
        }
    }

    /// Whether this handle performs no work (tracing disabled at start).
    pub fn is_noop(&self) -> bool {
        matches!(self.state, OpState::Noop)
    }

    /// Whether the handle has already been closed. No-op handles report
    /// closed.
    pub fn is_closed(&self) -> bool {
        match &self.state {
            OpState::Noop => true,
            OpState::Streaming { closed, .. }
            | OpState::Flat { closed, .. }
            | OpState::Recording { closed, .. } => closed.load(Ordering::Acquire),
        }
    }

    /// Mark the handle closed. Returns `true` only for the call that
    /// performed the transition, making double-close idempotent.
    pub(crate) fn close_once(&self) -> bool {
        match &self.state {
            OpState::Noop => false,
            OpState::Streaming { closed, .. }
            | OpState::Flat { closed, .. }
            | OpState::Recording { closed, .. } => !closed.swap(true, Ordering::AcqRel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_handle_never_closes() {
        let op = Operation::noop();
        assert!(op.is_noop());
        assert!(op.is_closed());
        assert!(!op.close_once());
        assert!(!op.close_once());
    }

    #[test]
    fn test_close_once_is_idempotent() {
        let op = Operation::flat("work");
        assert!(!op.is_closed());
        assert!(op.close_once());
        assert!(op.is_closed());
        assert!(!op.close_once());
    }

    #[test]
    fn test_recording_handle_close() {
        let op = Operation::recording("step");
        assert!(!op.is_noop());
        assert!(op.close_once());
        assert!(!op.close_once());
    }
}
