//! Progress reporting for a pipeline run.
//!
//! The pipeline advances progress by bytes consumed from the input, so a
//! run over a file of known size can show a percentage. Row counts go in
//! the message.

/// Receives progress from a pipeline run.
pub trait ProgressCallback: Send + Sync {
    /// Sets the input size in bytes, once it is known.
    fn set_total(&self, total: u64);

    /// Advances by `delta` bytes of input.
    fn inc(&self, delta: u64);

    /// Replaces the status message.
    fn set_message(&self, msg: String);

    /// Marks the run complete.
    fn finish(&self, msg: String);
}

/// Discards all progress.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}
