//! Progress-callback trait for stage events.
//!
//! Inject an [`Arc<dyn StageProgressCallback>`] via
//! [`crate::config::RefineConfigBuilder::progress_callback`] to receive an
//! event when each external call starts, completes, or fails.
//!
//! # Example
//!
//! ```rust
//! use docrefine::{Operation, RefineConfig, StageProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl StageProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Operation, summary: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done: {summary}");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = RefineConfig::builder()
//!     .progress_callback(counter as Arc<dyn StageProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::session::Operation;
use std::sync::Arc;

/// Called by [`crate::refine::Refinery`] around each external call.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`.
pub trait StageProgressCallback: Send + Sync {
    /// Called right after the in-flight slot was claimed.
    ///
    /// # Arguments
    /// * `stage`: the operation about to run
    /// * `detail`: what it runs on (file name, character count…)
    fn on_stage_start(&self, stage: Operation, detail: &str) {
        let _ = (stage, detail);
    }

    /// Called when the document text was cut to the input budget.
    fn on_input_truncated(&self, original_chars: usize, kept_chars: usize) {
        let _ = (original_chars, kept_chars);
    }

    /// Called when a stage succeeded.
    ///
    /// # Arguments
    /// * `stage`: the operation that finished
    /// * `summary`: one-line human-readable outcome
    fn on_stage_complete(&self, stage: Operation, summary: &str) {
        let _ = (stage, summary);
    }

    /// Called when a stage failed. The session stays on its current step.
    fn on_stage_error(&self, stage: Operation, error: &str) {
        let _ = (stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl StageProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RefineConfig`].
pub type ProgressCallback = Arc<dyn StageProgressCallback>;
