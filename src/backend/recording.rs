// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process recording backend. Captures every facade call as a value
//! instead of exporting anything, so tests can assert on exactly what the
//! facade dispatched without a collector or a fake transport.

use std::sync::Mutex;
use std::time::Duration;

use crate::attrs::Attr;
use crate::context::TelemetryContext;
use crate::operation::{OpState, Operation};

/// One facade call as observed by the recording backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    StartOperation {
        name: String,
    },
    EndOperation {
        name: String,
    },
    AddEvent {
        operation: String,
        name: String,
        attrs: Vec<Attr>,
    },
    Metric {
        name: String,
        value: f64,
        attrs: Vec<Attr>,
    },
    Gauge {
        name: String,
        value: f64,
        attrs: Vec<Attr>,
    },
    Log {
        level: String,
        message: String,
        attrs: Vec<Attr>,
    },
    Error {
        message: String,
        error: String,
        attrs: Vec<Attr>,
    },
    Request {
        method: String,
        url: String,
        duration: Duration,
        status: u16,
    },
    Dependency {
        dependency_type: String,
        target: String,
        duration: Duration,
        success: bool,
    },
    Availability {
        name: String,
        duration: Duration,
        success: bool,
    },
    SetUser {
        id: String,
    },
    SetSession {
        id: String,
    },
    Shutdown,
}

/// Shared log of recorded calls, handed to the test alongside the facade.
#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<RecordedCall>>,
}

impl Recorder {
    pub(crate) fn record(&self, call: RecordedCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Snapshot of everything recorded so far, in call order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// Backend client that forwards everything to a [`Recorder`].
#[derive(Debug)]
pub struct RecordingBackend {
    recorder: std::sync::Arc<Recorder>,
}

impl RecordingBackend {
    pub(crate) fn new(recorder: std::sync::Arc<Recorder>) -> Self {
        Self { recorder }
    }

    pub(crate) fn start_operation(
        &self,
        ctx: &TelemetryContext,
        name: &str,
    ) -> (TelemetryContext, Operation) {
        self.recorder.record(RecordedCall::StartOperation {
            name: name.to_string(),
        });
        (ctx.clone(), Operation::recording(name))
    }

    pub(crate) fn end_operation(&self, op: &Operation) {
        let OpState::Recording { name, .. } = &op.state else {
            return;
        };
        if !op.close_once() {
            return;
        }
        self.recorder
            .record(RecordedCall::EndOperation { name: name.clone() });
    }

    pub(crate) fn add_event(&self, op: &Operation, name: &str, attrs: &[Attr]) {
        let OpState::Recording {
            name: operation, ..
        } = &op.state
        else {
            return;
        };
        if op.is_closed() {
            return;
        }
        self.recorder.record(RecordedCall::AddEvent {
            operation: operation.clone(),
            name: name.to_string(),
            attrs: attrs.to_vec(),
        });
    }

    pub(crate) fn record_metric(&self, name: &str, value: f64, attrs: &[Attr]) {
        self.recorder.record(RecordedCall::Metric {
            name: name.to_string(),
            value,
            attrs: attrs.to_vec(),
        });
    }

    pub(crate) fn record_gauge(&self, name: &str, value: f64, attrs: &[Attr]) {
        self.recorder.record(RecordedCall::Gauge {
            name: name.to_string(),
            value,
            attrs: attrs.to_vec(),
        });
    }

    pub(crate) fn record_log(&self, level: &str, message: &str, attrs: &[Attr]) {
        self.recorder.record(RecordedCall::Log {
            level: level.to_string(),
            message: message.to_string(),
            attrs: attrs.to_vec(),
        });
    }

    pub(crate) fn record_error(&self, message: &str, error: &str, attrs: &[Attr]) {
        self.recorder.record(RecordedCall::Error {
            message: message.to_string(),
            error: error.to_string(),
            attrs: attrs.to_vec(),
        });
    }

    pub(crate) fn track_request(&self, method: &str, url: &str, duration: Duration, status: u16) {
        self.recorder.record(RecordedCall::Request {
            method: method.to_string(),
            url: url.to_string(),
            duration,
            status,
        });
    }

    pub(crate) fn track_dependency(
        &self,
        dependency_type: &str,
        target: &str,
        duration: Duration,
        success: bool,
    ) {
        self.recorder.record(RecordedCall::Dependency {
            dependency_type: dependency_type.to_string(),
            target: target.to_string(),
            duration,
            success,
        });
    }

    pub(crate) fn track_availability(&self, name: &str, duration: Duration, success: bool) {
        self.recorder.record(RecordedCall::Availability {
            name: name.to_string(),
            duration,
            success,
        });
    }

    pub(crate) fn set_user(&self, id: &str) {
        self.recorder
            .record(RecordedCall::SetUser { id: id.to_string() });
    }

    pub(crate) fn set_session(&self, id: &str) {
        self.recorder
            .record(RecordedCall::SetSession { id: id.to_string() });
    }

    pub(crate) fn shutdown(&self) {
        self.recorder.record(RecordedCall::Shutdown);
    }
}
