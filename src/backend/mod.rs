// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend clients behind the telemetry facade.
//!
//! Exactly one backend is selected at construction time and never changes
//! for the lifetime of the facade. Dispatch is a closed enum rather than a
//! trait object: the set of backends is fixed, and the clients want
//! different call shapes (the streaming client needs the caller's context
//! for parenting, the flat one does not).

pub mod flat;
pub mod recording;
pub mod streaming;

pub use flat::{Envelope, EventChannel, Severity};
pub use recording::{RecordedCall, Recorder};

use flat::FlatBackend;
use recording::RecordingBackend;
use streaming::StreamingBackend;

/// The selected backend client.
#[derive(Debug)]
pub(crate) enum BackendImpl {
    Streaming(StreamingBackend),
    Flat(FlatBackend),
    Recording(RecordingBackend),
}
