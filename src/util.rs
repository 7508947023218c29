//! Cancellation and progress primitives shared by long-running stages.
//!
//! Long computational stages (reducer optimization, density clustering,
//! streamed generation) poll a [`CancelToken`] at fixed interior checkpoints
//! and report completion fractions through a [`ProgressSink`]. Both are cheap
//! enough to poll per optimization epoch or per generated token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{CartographError, Result, StageKind};

/// Cooperative cancellation token.
///
/// Cloning shares the underlying flag; cancelling any clone cancels all of
/// them. Cancellation is observed at the next checkpoint, never mid-update.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return a [`CartographError::Cancelled`] if cancellation was requested.
    pub fn check(&self, context: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(CartographError::cancelled(context))
        } else {
            Ok(())
        }
    }
}

/// Receiver for stage progress fractions in `[0.0, 1.0]`.
pub trait ProgressSink: Send + Sync {
    /// Report that `stage` is `fraction` complete.
    fn report(&self, stage: StageKind, fraction: f32);
}

/// Progress sink that discards all reports.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _stage: StageKind, _fraction: f32) {}
}

/// Progress sink that retains every report. Test support.
#[derive(Debug, Default)]
pub struct CollectingProgress {
    reports: Mutex<Vec<(StageKind, f32)>>,
}

impl CollectingProgress {
    /// Create an empty collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports received so far.
    pub fn reports(&self) -> Vec<(StageKind, f32)> {
        self.reports.lock().clone()
    }
}

impl ProgressSink for CollectingProgress {
    fn report(&self, stage: StageKind, fraction: f32) {
        self.reports.lock().push((stage, fraction));
    }
}

/// A [`ProgressSink`] pre-bound to one stage, for passing into stage
/// internals that should not know which pipeline stage they run under.
#[derive(Clone, Copy)]
pub struct StageProgress<'a> {
    sink: &'a dyn ProgressSink,
    stage: StageKind,
}

impl<'a> StageProgress<'a> {
    /// Bind `sink` to `stage`.
    pub fn new(sink: &'a dyn ProgressSink, stage: StageKind) -> Self {
        Self { sink, stage }
    }

    /// Report a completion fraction for the bound stage.
    pub fn report(&self, fraction: f32) {
        self.sink.report(self.stage, fraction.clamp(0.0, 1.0));
    }

    /// The stage this progress handle is bound to.
    pub fn stage(&self) -> StageKind {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check("stage").is_err());
    }

    #[test]
    fn test_check_reports_cancelled_variant() {
        let token = CancelToken::new();
        token.cancel();
        let err = token.check("layout epoch").unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_stage_progress_clamps_fraction() {
        let sink = CollectingProgress::new();
        let progress = StageProgress::new(&sink, StageKind::Clustering);
        progress.report(1.7);
        progress.report(-0.3);

        let reports = sink.reports();
        assert_eq!(reports, vec![
            (StageKind::Clustering, 1.0),
            (StageKind::Clustering, 0.0),
        ]);
    }
}
