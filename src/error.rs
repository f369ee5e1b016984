// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the telemetry facade.
//!
//! Only two paths surface errors to the caller: facade construction and
//! shutdown. Everything else — disabled features, instrument resolution,
//! saturated submission queues — degrades to a no-op with a local
//! diagnostic, because telemetry must never fault business logic.

use thiserror::Error;

/// Errors that can occur while constructing or shutting down the facade.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The OTLP span exporter or tracer provider could not be built.
    #[error("Failed to initialize streaming tracer: {0}")]
    TracerInit(#[from] opentelemetry::trace::TraceError),

    /// The OTLP metric exporter or meter provider could not be built.
    #[error("Failed to initialize streaming meter: {0}")]
    MetricInit(String),

    /// The selected backend cannot be constructed from the given
    /// configuration (e.g. the flat backend without an event channel).
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    /// One or more owned resources failed to shut down cleanly. Every
    /// resource still received a shutdown attempt.
    #[error("Telemetry shutdown failed: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

impl TelemetryError {
    /// Whether this error was produced by the shutdown path.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

/// Result type for facade construction and shutdown.
pub type Result<T> = std::result::Result<T, TelemetryError>;
