// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming tracing/metrics backend client.
//!
//! Maps facade operations 1:1 onto an OpenTelemetry tracer and meter:
//! operations are real spans nested under whatever span is active in the
//! caller's context, and metrics go through typed instruments (counters
//! accumulate, gauges hold the last observed value). Tag values keep their
//! native types on the wire.
//!
//! Instruments are created lazily and cached by name; concurrent first use
//! of the same name resolves to a single instrument. The OTLP exporters
//! batch and buffer internally, so no facade call waits on network I/O.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use opentelemetry::metrics::{Counter, Gauge, Meter, MeterProvider as _};
use opentelemetry::trace::{Span as _, Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{InstrumentationScope, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};

use crate::attrs::{to_key_values, Attr};
use crate::config::TelemetryConfig;
use crate::context::TelemetryContext;
use crate::error::{Result, TelemetryError};
use crate::operation::{OpState, Operation};

// Span attribute keys, matching the wire names the exporters expect.
const HTTP_METHOD: &str = "http.method";
const HTTP_URL: &str = "http.url";
const HTTP_STATUS_CODE: &str = "http.status_code";
const HTTP_DURATION_MS: &str = "http.duration_ms";
const DEPENDENCY_TYPE: &str = "dependency.type";
const DEPENDENCY_TARGET: &str = "dependency.target";
const DEPENDENCY_DURATION_MS: &str = "dependency.duration_ms";
const DEPENDENCY_SUCCESS: &str = "dependency.success";
const AVAILABILITY_TEST: &str = "availability.test";
const AVAILABILITY_DURATION_MS: &str = "availability.duration_ms";
const AVAILABILITY_SUCCESS: &str = "availability.success";

/// Backend client for hierarchical tracing and typed metrics.
pub struct StreamingBackend {
    trace_enabled: bool,
    metrics_enabled: bool,
    tracer: Option<Tracer>,
    meter: Option<Meter>,
    tracer_provider: Mutex<Option<TracerProvider>>,
    meter_provider: Mutex<Option<SdkMeterProvider>>,
    counters: RwLock<HashMap<String, Counter<f64>>>,
    gauges: RwLock<HashMap<String, Gauge<f64>>>,
}

impl std::fmt::Debug for StreamingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBackend")
            .field("trace_enabled", &self.trace_enabled)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl StreamingBackend {
    /// Build the backend from a configuration snapshot, constructing OTLP
    /// exporters for whichever of tracing/metrics is enabled.
    ///
    /// This is the one place a hard failure can surface: if a transport
    /// cannot be built, facade construction fails. Must be called within a
    /// Tokio runtime when either feature is enabled (the batch exporters
    /// run on it).
    pub(crate) fn from_config(config: &TelemetryConfig) -> Result<Self> {
        tracing::info!(
            service_name = %config.service_name,
            trace_endpoint = %config.trace_endpoint,
            metric_endpoint = %config.metric_endpoint,
            trace_enabled = config.trace_enabled,
            metrics_enabled = config.metrics_enabled,
            "Streaming backend configuration"
        );

        let resource = Resource::new(vec![KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        )]);

        let tracer_provider = if config.trace_enabled {
            let mut builder = opentelemetry_otlp::SpanExporter::builder().with_tonic();
            if !config.trace_endpoint.is_empty() {
                builder = builder.with_endpoint(&config.trace_endpoint);
            }
            let exporter = builder.build()?;

            Some(
                TracerProvider::builder()
                    .with_batch_exporter(exporter, runtime::Tokio)
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(resource.clone())
                    .build(),
            )
        } else {
            None
        };

        let meter_provider = if config.metrics_enabled {
            let mut builder = opentelemetry_otlp::MetricExporter::builder().with_tonic();
            if !config.metric_endpoint.is_empty() {
                builder = builder.with_endpoint(&config.metric_endpoint);
            }
            let exporter = builder
                .build()
                .map_err(|e| TelemetryError::MetricInit(e.to_string()))?;

            Some(
                SdkMeterProvider::builder()
                    .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
                    .with_resource(resource)
                    .build(),
            )
        } else {
            None
        };

        Ok(Self::with_providers(config, tracer_provider, meter_provider))
    }

    /// Assemble the backend around already-built providers. Tests use this
    /// to wire in-memory exporters.
    pub(crate) fn with_providers(
        config: &TelemetryConfig,
        tracer_provider: Option<TracerProvider>,
        meter_provider: Option<SdkMeterProvider>,
    ) -> Self {
        let tracer = tracer_provider
            .as_ref()
            .map(|p| p.tracer(config.service_name.clone()));
        // meter() wants a 'static name; a scope carries the owned one.
        let meter = meter_provider.as_ref().map(|p| {
            p.meter_with_scope(
                InstrumentationScope::builder(config.service_name.clone()).build(),
            )
        });

        Self {
            trace_enabled: config.trace_enabled && tracer.is_some(),
            metrics_enabled: config.metrics_enabled && meter.is_some(),
            tracer,
            meter,
            tracer_provider: Mutex::new(tracer_provider),
            meter_provider: Mutex::new(meter_provider),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    /// Start a real span as a child of whatever operation is active on the
    /// context. The returned context carries the new span, so nested
    /// operations form a call tree.
    pub(crate) fn start_operation(
        &self,
        ctx: &TelemetryContext,
        name: &str,
    ) -> (TelemetryContext, Operation) {
        let Some(tracer) = self.enabled_tracer() else {
            return (ctx.clone(), Operation::noop());
        };
        let span = tracer.start_with_context(name.to_string(), ctx.otel());
        let cx = ctx.otel().with_span(span);
        (
            TelemetryContext::from_otel(cx.clone()),
            Operation::streaming(cx),
        )
    }

    /// Finalize the span; the batch exporter queues it for export.
    pub(crate) fn end_operation(&self, op: &Operation) {
        let OpState::Streaming { cx, .. } = &op.state else {
            return;
        };
        if !op.close_once() {
            return;
        }
        cx.span().end();
    }

    pub(crate) fn add_event(&self, op: &Operation, name: &str, attrs: &[Attr]) {
        let OpState::Streaming { cx, .. } = &op.state else {
            return;
        };
        if op.is_closed() {
            return;
        }
        cx.span().add_event(name.to_string(), to_key_values(attrs));
    }

    pub(crate) fn record_metric(&self, name: &str, value: f64, attrs: &[Attr]) {
        let Some(counter) = self.counter(name) else {
            return;
        };
        counter.add(value, &to_key_values(attrs));
    }

    pub(crate) fn record_gauge(&self, name: &str, value: f64, attrs: &[Attr]) {
        let Some(gauge) = self.gauge(name) else {
            return;
        };
        gauge.record(value, &to_key_values(attrs));
    }

    /// Mark the operation live on `ctx` as failed and attach the error as
    /// an event. The single point where log and trace semantics intersect.
    pub(crate) fn record_error(&self, ctx: &TelemetryContext, message: &str, attrs: &[Attr]) {
        if !self.trace_enabled {
            return;
        }
        let cx = ctx.otel();
        let span = cx.span();
        if !span.is_recording() {
            return;
        }
        let mut kvs = to_key_values(attrs);
        kvs.push(KeyValue::new("exception.message", message.to_string()));
        span.add_event("exception", kvs);
        span.set_status(Status::error(message.to_string()));
    }

    /// Tag the operation live on `ctx`. Never creates an operation.
    pub(crate) fn set_operation_attr(&self, ctx: &TelemetryContext, key: &'static str, id: &str) {
        if !self.trace_enabled {
            return;
        }
        let cx = ctx.otel();
        let span = cx.span();
        if span.is_recording() {
            span.set_attribute(KeyValue::new(key, id.to_string()));
        }
    }

    /// Emit one already-completed span for an HTTP request. Status codes
    /// >= 400 map to an explicit failure status.
    pub(crate) fn track_request(
        &self,
        ctx: &TelemetryContext,
        method: &str,
        url: &str,
        duration: Duration,
        status: u16,
    ) {
        let Some(tracer) = self.enabled_tracer() else {
            return;
        };
        let mut span = tracer.start_with_context(format!("HTTP {method}"), ctx.otel());
        span.set_attribute(KeyValue::new(HTTP_METHOD, method.to_string()));
        span.set_attribute(KeyValue::new(HTTP_URL, url.to_string()));
        span.set_attribute(KeyValue::new(HTTP_STATUS_CODE, status as i64));
        span.set_attribute(KeyValue::new(HTTP_DURATION_MS, duration.as_millis() as i64));
        if status >= 400 {
            span.set_status(Status::error(format!("HTTP {status}")));
        } else {
            span.set_status(Status::Ok);
        }
        span.end();
    }

    pub(crate) fn track_dependency(
        &self,
        ctx: &TelemetryContext,
        dependency_type: &str,
        target: &str,
        duration: Duration,
        success: bool,
    ) {
        let Some(tracer) = self.enabled_tracer() else {
            return;
        };
        let mut span = tracer.start_with_context("Dependency Call".to_string(), ctx.otel());
        span.set_attribute(KeyValue::new(DEPENDENCY_TYPE, dependency_type.to_string()));
        span.set_attribute(KeyValue::new(DEPENDENCY_TARGET, target.to_string()));
        span.set_attribute(KeyValue::new(
            DEPENDENCY_DURATION_MS,
            duration.as_millis() as i64,
        ));
        span.set_attribute(KeyValue::new(DEPENDENCY_SUCCESS, success));
        if !success {
            span.set_status(Status::error("Dependency call failed"));
        }
        span.end();
    }

    pub(crate) fn track_availability(
        &self,
        ctx: &TelemetryContext,
        name: &str,
        duration: Duration,
        success: bool,
    ) {
        let Some(tracer) = self.enabled_tracer() else {
            return;
        };
        let mut span = tracer.start_with_context("Availability Test".to_string(), ctx.otel());
        span.set_attribute(KeyValue::new(AVAILABILITY_TEST, name.to_string()));
        span.set_attribute(KeyValue::new(
            AVAILABILITY_DURATION_MS,
            duration.as_millis() as i64,
        ));
        span.set_attribute(KeyValue::new(AVAILABILITY_SUCCESS, success));
        if !success {
            span.set_status(Status::error("Availability test failed"));
        }
        span.end();
    }

    /// Shut down both providers, each under whatever remains of the
    /// deadline. Both get an attempt regardless of earlier failures, and
    /// the owned handles are released either way.
    pub(crate) async fn shutdown(&self, deadline: Duration) -> Vec<String> {
        let mut failures = Vec::new();
        let started = Instant::now();

        let tracer_provider = self.tracer_provider.lock().unwrap().take();
        if let Some(provider) = tracer_provider {
            let remaining = deadline.saturating_sub(started.elapsed());
            if let Some(e) =
                shutdown_blocking(remaining, move || provider.shutdown().err().map(|e| e.to_string()))
                    .await
            {
                failures.push(format!("trace provider: {e}"));
            }
        }

        let meter_provider = self.meter_provider.lock().unwrap().take();
        if let Some(provider) = meter_provider {
            let remaining = deadline.saturating_sub(started.elapsed());
            if let Some(e) =
                shutdown_blocking(remaining, move || provider.shutdown().err().map(|e| e.to_string()))
                    .await
            {
                failures.push(format!("meter provider: {e}"));
            }
        }

        failures
    }

    fn enabled_tracer(&self) -> Option<&Tracer> {
        if !self.trace_enabled {
            return None;
        }
        self.tracer.as_ref()
    }

    /// Look up or lazily create the named counter. Double-checked so
    /// concurrent first use of a name yields exactly one instrument.
    fn counter(&self, name: &str) -> Option<Counter<f64>> {
        if !self.metrics_enabled {
            return None;
        }
        let meter = self.meter.as_ref()?;
        if let Some(counter) = self.counters.read().unwrap().get(name) {
            return Some(counter.clone());
        }
        let mut counters = self.counters.write().unwrap();
        Some(
            counters
                .entry(name.to_string())
                .or_insert_with(|| meter.f64_counter(name.to_string()).build())
                .clone(),
        )
    }

    fn gauge(&self, name: &str) -> Option<Gauge<f64>> {
        if !self.metrics_enabled {
            return None;
        }
        let meter = self.meter.as_ref()?;
        if let Some(gauge) = self.gauges.read().unwrap().get(name) {
            return Some(gauge.clone());
        }
        let mut gauges = self.gauges.write().unwrap();
        Some(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| meter.f64_gauge(name.to_string()).build())
                .clone(),
        )
    }

    #[cfg(test)]
    fn counter_cache_len(&self) -> usize {
        self.counters.read().unwrap().len()
    }
}

/// Run a blocking provider shutdown under a deadline. Returns a failure
/// message, or `None` on clean shutdown.
async fn shutdown_blocking<F>(deadline: Duration, f: F) -> Option<String>
where
    F: FnOnce() -> Option<String> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Some(format!("shutdown task failed: {e}")),
        Err(_) => Some("shutdown timed out".to_string()),
    }
}
