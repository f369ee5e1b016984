// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The unified telemetry facade.
//!
//! One `Telemetry` value per process, constructed once from a
//! [`TelemetryConfig`] snapshot, owning exactly one backend client for its
//! lifetime. Every operation takes `&self` and is safe under unlimited
//! concurrent callers. Emission paths never return errors to business
//! logic; only construction and shutdown surface `Result`s.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::attrs::Attr;
use crate::backend::flat::{EventChannel, FlatBackend, Severity};
use crate::backend::recording::{Recorder, RecordingBackend};
use crate::backend::streaming::StreamingBackend;
use crate::backend::BackendImpl;
use crate::config::{BackendKind, TelemetryConfig};
use crate::context::TelemetryContext;
use crate::error::{Result, TelemetryError};
use crate::operation::Operation;

/// Ceiling applied to `shutdown()` when no explicit timeout is given.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Unified telemetry client. See the crate docs for the full contract.
#[derive(Debug)]
pub struct Telemetry {
    config: TelemetryConfig,
    backend: BackendImpl,
}

/// Builder for [`Telemetry`]. The flat backend needs an [`EventChannel`]
/// injected here; everything else comes from the config snapshot.
#[derive(Default)]
pub struct TelemetryBuilder {
    config: Option<TelemetryConfig>,
    channel: Option<Arc<dyn EventChannel>>,
}

impl TelemetryBuilder {
    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Transport for the flat backend. Ignored by the streaming backend.
    pub fn event_channel(mut self, channel: Arc<dyn EventChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> Result<Telemetry> {
        let config = self.config.unwrap_or_else(TelemetryConfig::from_env);
        let backend = match config.backend {
            BackendKind::Streaming => {
                if config.trace_enabled || config.metrics_enabled {
                    ensure_runtime("streaming exporters")?;
                }
                BackendImpl::Streaming(StreamingBackend::from_config(&config)?)
            }
            BackendKind::Flat => {
                let channel = self.channel.ok_or_else(|| {
                    TelemetryError::NotConfigured(
                        "flat backend selected but no event channel was provided".to_string(),
                    )
                })?;
                ensure_runtime("flat submission workers")?;
                BackendImpl::Flat(FlatBackend::new(&config, channel))
            }
        };
        tracing::info!(
            backend = %config.backend,
            service_name = %config.service_name,
            "Telemetry initialized"
        );
        Ok(Telemetry { config, backend })
    }
}

/// Backends that spawn tasks (flat workers, batching exporters) need the
/// ambient Tokio runtime at construction; building without one is a
/// configuration error, not a panic.
fn ensure_runtime(what: &str) -> Result<()> {
    match tokio::runtime::Handle::try_current() {
        Ok(_) => Ok(()),
        Err(_) => Err(TelemetryError::NotConfigured(format!(
            "{what} need a running Tokio runtime"
        ))),
    }
}

impl Telemetry {
    pub fn builder() -> TelemetryBuilder {
        TelemetryBuilder::default()
    }

    /// Construct from process environment variables alone. Selecting the
    /// flat backend this way fails: its transport must be injected via
    /// [`Telemetry::builder`].
    pub fn from_env() -> Result<Self> {
        Self::builder().config(TelemetryConfig::from_env()).build()
    }

    /// Fully-enabled facade backed by an in-process [`Recorder`], for
    /// asserting on dispatched calls in tests.
    pub fn recording() -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let config = TelemetryConfig::default()
            .with_service_name("recording")
            .with_trace_enabled(true)
            .with_metrics_enabled(true);
        let telemetry = Telemetry {
            config,
            backend: BackendImpl::Recording(RecordingBackend::new(recorder.clone())),
        };
        (telemetry, recorder)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Begin a logical operation. When tracing is disabled the returned
    /// handle is a no-op and the context comes back unchanged; callers
    /// use the pair identically either way.
    pub fn start_operation(
        &self,
        ctx: &TelemetryContext,
        name: &str,
    ) -> (TelemetryContext, Operation) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.start_operation(ctx, name),
            BackendImpl::Flat(b) => (ctx.clone(), b.start_operation(name)),
            BackendImpl::Recording(b) => b.start_operation(ctx, name),
        }
    }

    /// Finalize an operation. Safe to call more than once; only the first
    /// close emits.
    pub fn end_operation(&self, op: &Operation) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.end_operation(op),
            BackendImpl::Flat(b) => b.end_operation(op),
            BackendImpl::Recording(b) => b.end_operation(op),
        }
    }

    /// Attach a named event to an open operation. Dropped silently on
    /// no-op or closed handles.
    pub fn add_event(&self, op: &Operation, name: &str, attrs: &[Attr]) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.add_event(op, name, attrs),
            BackendImpl::Flat(b) => b.add_event(op, name, attrs),
            BackendImpl::Recording(b) => b.add_event(op, name, attrs),
        }
    }

    /// Add `value` to the named cumulative metric. No-op when metrics are
    /// disabled.
    pub fn record_metric(&self, _ctx: &TelemetryContext, name: &str, value: f64, attrs: &[Attr]) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.record_metric(name, value, attrs),
            BackendImpl::Flat(b) => b.record_metric(name, value, attrs),
            BackendImpl::Recording(b) => b.record_metric(name, value, attrs),
        }
    }

    pub fn increment_counter(&self, ctx: &TelemetryContext, name: &str, attrs: &[Attr]) {
        self.record_metric(ctx, name, 1.0, attrs);
    }

    /// Record the current value of the named gauge (last value wins on
    /// the streaming backend; the flat backend reduces it to a metric
    /// item).
    pub fn record_gauge(&self, _ctx: &TelemetryContext, name: &str, value: f64, attrs: &[Attr]) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.record_gauge(name, value, attrs),
            BackendImpl::Flat(b) => b.record_gauge(name, value, attrs),
            BackendImpl::Recording(b) => b.record_gauge(name, value, attrs),
        }
    }

    /// Structured log, always delivered to the `tracing` collaborator
    /// regardless of backend flags.
    pub fn log_info(&self, _ctx: &TelemetryContext, message: &str, attrs: &[Attr]) {
        tracing::info!(attributes = ?attrs, "{message}");
        match &self.backend {
            BackendImpl::Streaming(_) => {}
            BackendImpl::Flat(b) => b.post_log(Severity::Information, message, attrs, None),
            BackendImpl::Recording(b) => b.record_log("info", message, attrs),
        }
    }

    pub fn log_warning(&self, _ctx: &TelemetryContext, message: &str, attrs: &[Attr]) {
        tracing::warn!(attributes = ?attrs, "{message}");
        match &self.backend {
            BackendImpl::Streaming(_) => {}
            BackendImpl::Flat(b) => b.post_log(Severity::Warning, message, attrs, None),
            BackendImpl::Recording(b) => b.record_log("warning", message, attrs),
        }
    }

    /// Error log. Also marks the operation live on `ctx` failed and
    /// attaches the error as an event, when tracing is enabled and such
    /// an operation exists.
    pub fn log_error(
        &self,
        ctx: &TelemetryContext,
        message: &str,
        error: &dyn Display,
        attrs: &[Attr],
    ) {
        tracing::error!(error = %error, attributes = ?attrs, "{message}");
        match &self.backend {
            BackendImpl::Streaming(b) => {
                b.record_error(ctx, &format!("{message}: {error}"), attrs)
            }
            BackendImpl::Flat(b) => {
                b.post_log(Severity::Error, message, attrs, Some(&error.to_string()))
            }
            BackendImpl::Recording(b) => b.record_error(message, &error.to_string(), attrs),
        }
    }

    /// Report one completed HTTP request as a single observable item.
    pub fn track_request(
        &self,
        ctx: &TelemetryContext,
        method: &str,
        url: &str,
        duration: Duration,
        status: u16,
    ) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.track_request(ctx, method, url, duration, status),
            BackendImpl::Flat(b) => b.track_request(method, url, duration, status),
            BackendImpl::Recording(b) => b.track_request(method, url, duration, status),
        }
    }

    /// Report one call to an external dependency.
    pub fn track_dependency(
        &self,
        ctx: &TelemetryContext,
        dependency_type: &str,
        target: &str,
        duration: Duration,
        success: bool,
    ) {
        match &self.backend {
            BackendImpl::Streaming(b) => {
                b.track_dependency(ctx, dependency_type, target, duration, success)
            }
            BackendImpl::Flat(b) => b.track_dependency(dependency_type, target, duration, success),
            BackendImpl::Recording(b) => {
                b.track_dependency(dependency_type, target, duration, success)
            }
        }
    }

    /// Report one availability probe result.
    pub fn track_availability(
        &self,
        ctx: &TelemetryContext,
        name: &str,
        duration: Duration,
        success: bool,
    ) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.track_availability(ctx, name, duration, success),
            BackendImpl::Flat(b) => b.track_availability(name, duration, success),
            BackendImpl::Recording(b) => b.track_availability(name, duration, success),
        }
    }

    /// Tag the operation live on `ctx` with the authenticated user id.
    /// Never creates an operation; no-op on the flat backend, which has no
    /// context propagation.
    pub fn set_user(&self, ctx: &TelemetryContext, id: &str) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.set_operation_attr(ctx, "user.id", id),
            BackendImpl::Flat(_) => {}
            BackendImpl::Recording(b) => b.set_user(id),
        }
    }

    pub fn set_session(&self, ctx: &TelemetryContext, id: &str) {
        match &self.backend {
            BackendImpl::Streaming(b) => b.set_operation_attr(ctx, "session.id", id),
            BackendImpl::Flat(_) => {}
            BackendImpl::Recording(b) => b.set_session(id),
        }
    }

    /// Flush and release the backend under the default 10 s ceiling.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Flush and release the backend. Every owned resource gets a shutdown
    /// attempt even after earlier failures; failures aggregate into one
    /// [`TelemetryError::Shutdown`]. Idempotent.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        let failures = match &self.backend {
            BackendImpl::Streaming(b) => b.shutdown(timeout).await,
            BackendImpl::Flat(b) => b.shutdown(timeout).await,
            BackendImpl::Recording(b) => {
                b.shutdown();
                Vec::new()
            }
        };
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(failures))
        }
    }
}

impl std::fmt::Debug for TelemetryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBuilder")
            .field("config", &self.config)
            .field("has_channel", &self.channel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordedCall;

    #[test]
    fn test_flat_backend_requires_event_channel() {
        let config = TelemetryConfig::default().with_backend(BackendKind::Flat);
        let err = Telemetry::builder().config(config).build().unwrap_err();
        assert!(matches!(err, TelemetryError::NotConfigured(_)));
    }

    #[test]
    fn test_construction_outside_runtime_is_an_error() {
        // No #[tokio::test]: these paths must refuse to build rather than
        // panic when no runtime exists.
        let config = TelemetryConfig::default()
            .with_backend(BackendKind::Flat)
            .with_trace_enabled(true);
        let channel = Arc::new(crate::backend::flat::MockEventChannel::new());
        let err = Telemetry::builder()
            .config(config)
            .event_channel(channel)
            .build()
            .unwrap_err();
        assert!(matches!(err, TelemetryError::NotConfigured(_)));
        assert!(err.to_string().contains("Tokio runtime"));

        let config = TelemetryConfig::default()
            .with_backend(BackendKind::Streaming)
            .with_metrics_enabled(true);
        let err = Telemetry::builder().config(config).build().unwrap_err();
        assert!(matches!(err, TelemetryError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_streaming_disabled_builds_and_shuts_down() {
        let config = TelemetryConfig::default()
            .with_backend(BackendKind::Streaming)
            .with_trace_enabled(false)
            .with_metrics_enabled(false);
        let telemetry = Telemetry::builder().config(config).build().unwrap();

        let ctx = TelemetryContext::new();
        let (_ctx, op) = telemetry.start_operation(&ctx, "noop");
        assert!(op.is_noop());
        telemetry.shutdown().await.unwrap();
        telemetry.shutdown().await.unwrap();
    }

    #[test]
    fn test_recording_facade_dispatches_everything() {
        let (telemetry, recorder) = Telemetry::recording();
        let ctx = TelemetryContext::new();

        let (op_ctx, op) = telemetry.start_operation(&ctx, "job");
        telemetry.add_event(&op, "step", &[Attr::int("n", 1)]);
        telemetry.record_metric(&op_ctx, "jobs", 1.0, &[]);
        telemetry.increment_counter(&op_ctx, "ticks", &[]);
        telemetry.record_gauge(&op_ctx, "depth", 3.0, &[]);
        telemetry.set_user(&op_ctx, "u1");
        telemetry.set_session(&op_ctx, "s1");
        telemetry.end_operation(&op);

        let calls = recorder.calls();
        assert!(calls.contains(&RecordedCall::StartOperation {
            name: "job".to_string()
        }));
        assert!(calls.contains(&RecordedCall::Metric {
            name: "ticks".to_string(),
            value: 1.0,
            attrs: vec![],
        }));
        assert!(calls.contains(&RecordedCall::Gauge {
            name: "depth".to_string(),
            value: 3.0,
            attrs: vec![],
        }));
        assert!(calls.contains(&RecordedCall::SetUser {
            id: "u1".to_string()
        }));
        assert!(calls.contains(&RecordedCall::EndOperation {
            name: "job".to_string()
        }));
    }

    #[test]
    fn test_log_error_reaches_backend_with_error_text() {
        let (telemetry, recorder) = Telemetry::recording();
        let ctx = TelemetryContext::new();

        telemetry.log_error(&ctx, "save failed", &"disk full", &[]);

        assert_eq!(
            recorder.calls(),
            vec![RecordedCall::Error {
                message: "save failed".to_string(),
                error: "disk full".to_string(),
                attrs: vec![],
            }]
        );
    }
}
