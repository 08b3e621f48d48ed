//! Progress reporting for the build pipeline.
//!
//! The pipeline reports one unit of work per stage. Rendering is left to
//! the caller: the CLI plugs in `indicatif` bars, tests use
//! [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a running build.
///
/// Implementations must be `Send + Sync` so a renderer can live on its own
/// thread behind an `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total number of work units.
    fn set_total(&self, total: u64);

    /// Sets the absolute position.
    fn set_position(&self, pos: u64);

    /// Advances by `delta` units.
    fn inc(&self, delta: u64);

    /// Replaces the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Marks the work complete and leaves a final message.
    fn finish(&self, msg: String);

    /// Marks the work complete and removes the indicator.
    fn finish_and_clear(&self);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
