// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flat event backend client.
//!
//! This backend has no span tree and no typed instruments: everything it
//! emits is an independent telemetry item — an event, a named metric, or a
//! free-text trace message. Operations are emulated by remembering a name
//! and a start timestamp in the handle and submitting one completed event
//! at close time. Nested `start_operation` calls therefore produce
//! siblings, never parents; this mirrors what the backend can physically
//! represent and is deliberately not papered over.
//!
//! All attribute values are stringified before submission. Items are
//! handed to the transport through a bounded queue drained by a small
//! worker pool, so a slow transport never blocks the caller and submission
//! bursts cannot grow memory without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::attrs::{to_properties, Attr};
use crate::config::TelemetryConfig;
use crate::operation::{OpState, Operation};

/// Number of submission workers draining the queue.
const WORKER_COUNT: usize = 4;

/// Queue capacity per worker. Items beyond this are dropped with a
/// diagnostic rather than blocking the caller.
const QUEUE_CAPACITY: usize = 256;

/// Severity of a flat trace item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verbose => write!(f, "Verbose"),
            Self::Information => write!(f, "Information"),
            Self::Warning => write!(f, "Warning"),
            Self::Error => write!(f, "Error"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// One telemetry item bound for the flat transport.
///
/// Properties are always string-valued; numeric and boolean attributes are
/// stringified before an envelope is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A named event with properties (completed operations, sub-events).
    Event {
        name: String,
        properties: HashMap<String, String>,
    },
    /// A generic named metric. Counters and gauges both reduce to this.
    Metric {
        name: String,
        value: f64,
        properties: HashMap<String, String>,
    },
    /// A free-text trace message.
    Trace {
        message: String,
        severity: Severity,
        properties: HashMap<String, String>,
    },
}

/// Narrow transport contract for the flat backend.
///
/// Implementations wrap whatever wire client delivers items to the
/// monitoring SaaS. `submit` is fire-and-forget: the backend never looks at
/// the outcome. `close` flushes and tears down the channel, reporting
/// whether it finished within the timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Deliver one item. Called from submission workers, never from the
    /// instrumented caller's task.
    async fn submit(&self, item: Envelope);

    /// Flush pending items and close. Returns `false` on timeout.
    async fn close(&self, timeout: Duration) -> bool;
}

/// Backend client for flat event/metric telemetry.
pub struct FlatBackend {
    service_name: String,
    host_name: String,
    trace_enabled: bool,
    metrics_enabled: bool,
    channel: Arc<dyn EventChannel>,
    /// One bounded queue per worker; `None` once shutdown has begun.
    senders: RwLock<Option<Vec<mpsc::Sender<Envelope>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl std::fmt::Debug for FlatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatBackend")
            .field("service_name", &self.service_name)
            .field("trace_enabled", &self.trace_enabled)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl FlatBackend {
    /// Create the backend and spawn its submission workers.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn new(config: &TelemetryConfig, channel: Arc<dyn EventChannel>) -> Self {
        let mut senders = Vec::with_capacity(WORKER_COUNT);
        let mut workers = Vec::with_capacity(WORKER_COUNT);
        for _ in 0..WORKER_COUNT {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(rx, Arc::clone(&channel))));
        }

        Self {
            service_name: config.service_name.clone(),
            host_name: config.host_name.clone(),
            trace_enabled: config.trace_enabled,
            metrics_enabled: config.metrics_enabled,
            channel,
            senders: RwLock::new(Some(senders)),
            workers: Mutex::new(workers),
            next: AtomicUsize::new(0),
        }
    }

    /// Queue an envelope for asynchronous submission. Never blocks; a
    /// saturated queue drops the item with a diagnostic.
    fn dispatch(&self, item: Envelope) {
        let senders = self.senders.read().unwrap();
        let Some(senders) = senders.as_ref() else {
            tracing::debug!("Telemetry item dropped: flat backend is shut down");
            return;
        };
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % senders.len();
        match senders[idx].try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Telemetry item dropped: submission queue is full");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Telemetry item dropped: submission queue is closed");
            }
        }
    }

    pub(crate) fn start_operation(&self, name: &str) -> Operation {
        if !self.trace_enabled {
            return Operation::noop();
        }
        Operation::flat(name)
    }

    /// Close the handle and submit one completed event carrying the
    /// elapsed time.
    pub(crate) fn end_operation(&self, op: &Operation) {
        let OpState::Flat { name, started, .. } = &op.state else {
            return;
        };
        if !op.close_once() {
            return;
        }
        let duration_ms = started.elapsed().as_millis() as i64;
        let mut properties = HashMap::new();
        properties.insert("duration_ms".to_string(), duration_ms.to_string());
        self.dispatch(Envelope::Event {
            name: name.clone(),
            properties,
        });
    }

    pub(crate) fn add_event(&self, op: &Operation, name: &str, attrs: &[Attr]) {
        let OpState::Flat { .. } = &op.state else {
            return;
        };
        if op.is_closed() {
            return;
        }
        self.dispatch(Envelope::Event {
            name: name.to_string(),
            properties: to_properties(attrs),
        });
    }

    pub(crate) fn record_metric(&self, name: &str, value: f64, attrs: &[Attr]) {
        if !self.metrics_enabled {
            return;
        }
        self.dispatch(Envelope::Metric {
            name: name.to_string(),
            value,
            properties: to_properties(attrs),
        });
    }

    /// Gauges reduce to generic named metrics here; the backend has no
    /// last-value-wins instrument to map onto.
    pub(crate) fn record_gauge(&self, name: &str, value: f64, attrs: &[Attr]) {
        self.record_metric(name, value, attrs);
    }

    /// Post a free-text trace item for a structured log call. The message
    /// is prefixed `service_host_` so the flat backend's flat item list
    /// remains attributable.
    pub(crate) fn post_log(
        &self,
        severity: Severity,
        message: &str,
        attrs: &[Attr],
        error: Option<&str>,
    ) {
        if !self.trace_enabled {
            return;
        }
        let mut properties = to_properties(attrs);
        if let Some(error) = error {
            properties.insert("error".to_string(), error.to_string());
        }
        self.dispatch(Envelope::Trace {
            message: format!("{}_{}_{}", self.service_name, self.host_name, message),
            severity,
            properties,
        });
    }

    pub(crate) fn track_request(&self, method: &str, url: &str, duration: Duration, status: u16) {
        if !self.metrics_enabled {
            return;
        }
        let mut properties = HashMap::new();
        properties.insert("method".to_string(), method.to_string());
        properties.insert("url".to_string(), url.to_string());
        properties.insert(
            "duration_ms".to_string(),
            (duration.as_millis() as i64).to_string(),
        );
        properties.insert("status".to_string(), status.to_string());
        self.dispatch(Envelope::Metric {
            name: "http.requests".to_string(),
            value: 1.0,
            properties,
        });
    }

    pub(crate) fn track_dependency(
        &self,
        dependency_type: &str,
        target: &str,
        duration: Duration,
        success: bool,
    ) {
        if !self.metrics_enabled {
            return;
        }
        let mut properties = HashMap::new();
        properties.insert("type".to_string(), dependency_type.to_string());
        properties.insert("target".to_string(), target.to_string());
        properties.insert(
            "duration_ms".to_string(),
            (duration.as_millis() as i64).to_string(),
        );
        properties.insert("success".to_string(), success.to_string());
        self.dispatch(Envelope::Metric {
            name: "dependency.calls".to_string(),
            value: 1.0,
            properties,
        });
    }

    pub(crate) fn track_availability(&self, name: &str, duration: Duration, success: bool) {
        if !self.metrics_enabled {
            return;
        }
        let mut properties = HashMap::new();
        properties.insert("test".to_string(), name.to_string());
        properties.insert(
            "duration_ms".to_string(),
            (duration.as_millis() as i64).to_string(),
        );
        properties.insert("success".to_string(), success.to_string());
        self.dispatch(Envelope::Metric {
            name: "availability.tests".to_string(),
            value: 1.0,
            properties,
        });
    }

    /// Stop accepting items, drain the workers, and close the channel.
    ///
    /// Returns the failures encountered; an empty vector means a clean
    /// shutdown. Workers still running when the deadline passes are
    /// aborted so nothing leaks. A second call returns immediately.
    pub(crate) async fn shutdown(&self, deadline: Duration) -> Vec<String> {
        let mut failures = Vec::new();

        // Dropping the senders lets each worker drain its queue and exit.
        let taken = self.senders.write().unwrap().take();
        if taken.is_none() {
            return failures;
        }
        drop(taken);

        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let started = Instant::now();
        for mut handle in handles {
            let remaining = deadline.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(format!("submission worker failed: {e}")),
                Err(_) => {
                    handle.abort();
                    failures.push("submission worker did not drain before deadline".to_string());
                }
            }
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        if !self.channel.close(remaining).await {
            failures.push("event channel did not close before deadline".to_string());
        }
        failures
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Envelope>, channel: Arc<dyn EventChannel>) {
    while let Some(item) = rx.recv().await {
        channel.submit(item).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    /// Test channel that captures every submitted envelope.
    #[derive(Default)]
    struct CapturingChannel {
        items: Mutex<Vec<Envelope>>,
    }

    impl CapturingChannel {
        fn items(&self) -> Vec<Envelope> {
            self.items.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventChannel for CapturingChannel {
        async fn submit(&self, item: Envelope) {
            self.items.lock().unwrap().push(item);
        }

        async fn close(&self, _timeout: Duration) -> bool {
            true
        }
    }

    fn config(trace: bool, metrics: bool) -> TelemetryConfig {
        TelemetryConfig::default()
            .with_backend(BackendKind::Flat)
            .with_service_name("svc")
            .with_trace_enabled(trace)
            .with_metrics_enabled(metrics)
    }

    fn backend(
        trace: bool,
        metrics: bool,
    ) -> (FlatBackend, Arc<CapturingChannel>) {
        let channel = Arc::new(CapturingChannel::default());
        let backend = FlatBackend::new(&config(trace, metrics), channel.clone());
        (backend, channel)
    }

    #[tokio::test]
    async fn test_end_operation_submits_one_event() {
        let (backend, channel) = backend(true, true);
        let op = backend.start_operation("load-user");
        backend.end_operation(&op);
        backend.end_operation(&op); // double close is a no-op

        assert!(backend.shutdown(Duration::from_secs(1)).await.is_empty());
        let items = channel.items();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Envelope::Event { name, properties } => {
                assert_eq!(name, "load-user");
                assert!(properties.contains_key("duration_ms"));
            }
            other => panic!("Expected event envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_trace_disabled_returns_noop_handle() {
        let (backend, channel) = backend(false, true);
        let op = backend.start_operation("ignored");
        assert!(op.is_noop());
        backend.end_operation(&op);
        backend.add_event(&op, "sub", &[]);

        backend.shutdown(Duration::from_secs(1)).await;
        assert!(channel.items().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_disabled_submits_nothing() {
        let (backend, channel) = backend(true, false);
        backend.record_metric("orders", 1.0, &[]);
        backend.record_gauge("queue.depth", 7.0, &[]);
        backend.track_request("GET", "/x", Duration::from_millis(10), 200);

        backend.shutdown(Duration::from_secs(1)).await;
        assert!(channel.items().is_empty());
    }

    #[tokio::test]
    async fn test_track_request_yields_exactly_one_tagged_item() {
        let (backend, channel) = backend(true, true);
        backend.track_request("GET", "/x", Duration::from_millis(150), 200);

        backend.shutdown(Duration::from_secs(1)).await;
        let items = channel.items();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Envelope::Metric { name, value, properties } => {
                assert_eq!(name, "http.requests");
                assert_eq!(*value, 1.0);
                assert_eq!(properties.get("method").map(String::as_str), Some("GET"));
                assert_eq!(properties.get("url").map(String::as_str), Some("/x"));
                assert_eq!(properties.get("duration_ms").map(String::as_str), Some("150"));
                assert_eq!(properties.get("status").map(String::as_str), Some("200"));
            }
            other => panic!("Expected metric envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_metric_attributes_are_stringified() {
        let (backend, channel) = backend(true, true);
        backend.record_metric("retries", 2.0, &[Attr::int("attempt", 3), Attr::bool("final", true)]);

        backend.shutdown(Duration::from_secs(1)).await;
        let items = channel.items();
        match &items[0] {
            Envelope::Metric { properties, .. } => {
                assert_eq!(properties.get("attempt").map(String::as_str), Some("3"));
                assert_eq!(properties.get("final").map(String::as_str), Some("true"));
            }
            other => panic!("Expected metric envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_log_prefixes_service_and_host() {
        let channel = Arc::new(CapturingChannel::default());
        let mut cfg = config(true, true);
        cfg.host_name = "host1".to_string();
        let backend = FlatBackend::new(&cfg, channel.clone());

        backend.post_log(Severity::Error, "failed", &[], Some("boom"));

        backend.shutdown(Duration::from_secs(1)).await;
        let items = channel.items();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Envelope::Trace { message, severity, properties } => {
                assert_eq!(message, "svc_host1_failed");
                assert_eq!(*severity, Severity::Error);
                assert_eq!(properties.get("error").map(String::as_str), Some("boom"));
            }
            other => panic!("Expected trace envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_safe() {
        let (backend, _channel) = backend(true, true);
        assert!(backend.shutdown(Duration::from_secs(1)).await.is_empty());
        assert!(backend.shutdown(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_drops_silently() {
        let (backend, channel) = backend(true, true);
        backend.shutdown(Duration::from_secs(1)).await;
        backend.record_metric("late", 1.0, &[]);
        assert!(channel.items().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_reports_channel_close_timeout() {
        let mut mock = MockEventChannel::new();
        mock.expect_close().return_const(false);
        let backend = FlatBackend::new(&config(true, true), Arc::new(mock));

        let failures = backend.shutdown(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("did not close"));
    }

    /// Transport whose `submit` never resolves, wedging every worker.
    struct StalledChannel;

    #[async_trait]
    impl EventChannel for StalledChannel {
        async fn submit(&self, _item: Envelope) {
            std::future::pending::<()>().await;
        }

        async fn close(&self, _timeout: Duration) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_saturated_queue_drops_instead_of_blocking() {
        let backend = FlatBackend::new(&config(true, true), Arc::new(StalledChannel));

        // Far more items than the queues can hold. Every call must return
        // immediately; overflow is dropped, not queued or awaited.
        for i in 0..(WORKER_COUNT * QUEUE_CAPACITY * 3) {
            backend.record_metric(&format!("m{i}"), 1.0, &[]);
        }

        let failures = backend.shutdown(Duration::from_millis(200)).await;
        assert_eq!(
            failures
                .iter()
                .filter(|f| f.contains("did not drain before deadline"))
                .count(),
            WORKER_COUNT
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_items() {
        let (backend, channel) = backend(true, true);
        for i in 0..50 {
            backend.record_metric(&format!("m{i}"), 1.0, &[]);
        }
        assert!(backend.shutdown(Duration::from_secs(5)).await.is_empty());
        assert_eq!(channel.items().len(), 50);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Information.to_string(), "Information");
        assert_eq!(Severity::Critical.to_string(), "Critical");
    }
}
