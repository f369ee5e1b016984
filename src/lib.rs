// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unitel - One telemetry facade, two wire shapes.
//!
//! A unified telemetry client for services that must report into either a
//! streaming tracing pipeline (OpenTelemetry: real spans, typed metric
//! instruments, context propagation) or a flat event store (independent
//! telemetry items with string properties), selected once at startup and
//! invisible to the instrumented code.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`attrs`] - The attribute model shared by every operation
//! - [`config`] - Environment-driven configuration snapshot
//! - [`context`] - Operation context propagated through call trees
//! - [`operation`] - The in-flight operation handle
//! - [`error`] - Error types and result alias
//! - [`backend`] - The backend clients (streaming, flat, recording)
//! - [`facade`] - The [`Telemetry`] facade itself
//! - [`logging`] - Optional `tracing` subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use unitel::{Telemetry, TelemetryContext};
//!
//! #[tokio::main]
//! async fn main() -> unitel::Result<()> {
//!     let telemetry = Telemetry::from_env()?;
//!     let ctx = TelemetryContext::new();
//!
//!     let (ctx, op) = telemetry.start_operation(&ctx, "handle-request");
//!     telemetry.add_event(&op, "validated", &[]);
//!     telemetry.increment_counter(&ctx, "requests.handled", &[]);
//!     telemetry.end_operation(&op);
//!
//!     telemetry.shutdown().await
//! }
//! ```

pub mod attrs;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod logging;
pub mod operation;

// Re-export commonly used types at crate root
pub use attrs::{Attr, AttrValue};
pub use backend::{Envelope, EventChannel, RecordedCall, Recorder, Severity};
pub use config::{BackendKind, TelemetryConfig};
pub use context::TelemetryContext;
pub use error::{Result, TelemetryError};
pub use facade::{Telemetry, TelemetryBuilder, DEFAULT_SHUTDOWN_TIMEOUT};
pub use logging::{init_logging, LogGuard, LoggingConfig};
pub use operation::Operation;

/// Unitel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
