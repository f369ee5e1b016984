// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration resolution for the telemetry facade.
//!
//! Configuration is resolved exactly once, when a facade is constructed,
//! into an immutable [`TelemetryConfig`] snapshot. There is no hot reload
//! and no ambient global state: a new configuration requires a new facade,
//! and independently configured facades can coexist (tests rely on this).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Built-in fallback instrumentation key for the flat backend, used with a
/// warning when `APPINSIGHTS_INSTRUMENTATIONKEY` is unset.
pub const DEFAULT_INSTRUMENTATION_KEY: &str = "6b57af63-7a39-4834-9d3d-405ddb07a51a";

/// Service name used when `SERVICE_NAME` is unset.
pub const DEFAULT_SERVICE_NAME: &str = "unknown-service";

/// Which telemetry backend the facade drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Hierarchical spans and typed instruments over a batching OTLP
    /// exporter.
    Streaming,
    /// Independent flat telemetry items (events, metrics, traces) submitted
    /// one by one.
    Flat,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Streaming
    }
}

/// Error type for parsing a backend kind from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseBackendKindError;

impl std::fmt::Display for ParseBackendKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid backend kind")
    }
}

impl std::error::Error for ParseBackendKindError {}

impl FromStr for BackendKind {
    type Err = ParseBackendKindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streaming" | "opentelemetry" | "otel" => Ok(Self::Streaming),
            "flat" | "appinsights" | "applicationinsights" => Ok(Self::Flat),
            _ => Err(ParseBackendKindError),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming => write!(f, "streaming"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// Immutable configuration snapshot for one facade instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Selected backend.
    pub backend: BackendKind,

    /// Logical service name attached to every telemetry item.
    pub service_name: String,

    /// Host identity, used by the flat backend's trace-message prefix.
    pub host_name: String,

    /// Whether span/operation telemetry is emitted.
    pub trace_enabled: bool,

    /// Whether metric telemetry is emitted.
    pub metrics_enabled: bool,

    /// OTLP trace endpoint for the streaming backend. Empty means the
    /// exporter default.
    pub trace_endpoint: String,

    /// OTLP metric endpoint for the streaming backend. Empty means the
    /// exporter default.
    pub metric_endpoint: String,

    /// Credential for the flat backend's transport. Resolved here so the
    /// embedding application can hand it to whatever event channel it
    /// wires in.
    pub instrumentation_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Streaming,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            host_name: resolve_host_name(),
            trace_enabled: false,
            metrics_enabled: false,
            trace_endpoint: String::new(),
            metric_endpoint: String::new(),
            instrumentation_key: DEFAULT_INSTRUMENTATION_KEY.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Resolve a configuration snapshot from the process environment.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TELEMETRY_BACKEND` | `streaming`; unrecognized values fall back with a warning |
    /// | `SERVICE_NAME` | `unknown-service` |
    /// | `TELEMETRY_TRACE_ENABLED` | `false` |
    /// | `TELEMETRY_METRICS_ENABLED` | `false` |
    /// | `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` | exporter default |
    /// | `OTEL_EXPORTER_OTLP_METRICS_ENDPOINT` | exporter default |
    /// | `APPINSIGHTS_INSTRUMENTATIONKEY` | built-in key, with a warning |
    ///
    /// Missing or malformed values never fail resolution; they degrade to
    /// the documented defaults.
    pub fn from_env() -> Self {
        let backend = resolve_backend(std::env::var("TELEMETRY_BACKEND").ok().as_deref());

        let service_name = match std::env::var("SERVICE_NAME") {
            Ok(name) if !name.is_empty() => name,
            _ => {
                tracing::info!(
                    "SERVICE_NAME is not set, using {} as default",
                    DEFAULT_SERVICE_NAME
                );
                DEFAULT_SERVICE_NAME.to_string()
            }
        };

        let instrumentation_key = match std::env::var("APPINSIGHTS_INSTRUMENTATIONKEY") {
            Ok(key) if !key.is_empty() => key,
            _ => {
                if backend == BackendKind::Flat {
                    tracing::warn!(
                        "APPINSIGHTS_INSTRUMENTATIONKEY is not set, using default instrumentation key"
                    );
                }
                DEFAULT_INSTRUMENTATION_KEY.to_string()
            }
        };

        Self {
            backend,
            service_name,
            host_name: resolve_host_name(),
            trace_enabled: env_flag("TELEMETRY_TRACE_ENABLED"),
            metrics_enabled: env_flag("TELEMETRY_METRICS_ENABLED"),
            trace_endpoint: std::env::var("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
                .unwrap_or_default(),
            metric_endpoint: std::env::var("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT")
                .unwrap_or_default(),
            instrumentation_key,
        }
    }

    /// Set the backend kind.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Enable or disable span telemetry.
    pub fn with_trace_enabled(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Enable or disable metric telemetry.
    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }
}

/// Map the backend selector to a [`BackendKind`], falling back to the
/// streaming backend on empty or unrecognized values. Falling back is
/// deliberate: a bad selector must never prevent the process from starting.
fn resolve_backend(selector: Option<&str>) -> BackendKind {
    match selector {
        None => BackendKind::Streaming,
        Some(s) if s.is_empty() => BackendKind::Streaming,
        Some(s) => s.parse().unwrap_or_else(|_| {
            tracing::warn!(selector = %s, "Unrecognized TELEMETRY_BACKEND, falling back to streaming");
            BackendKind::Streaming
        }),
    }
}

/// Parse a boolean environment flag. Accepts `1`, `t`, `true` in any case;
/// everything else (including unset) is `false`.
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "t" | "true"),
        Err(_) => false,
    }
}

fn resolve_host_name() -> String {
    match hostname::get() {
        Ok(h) => h.to_string_lossy().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Error retrieving hostname");
            "unkw".to_string()
        }
    }
}
