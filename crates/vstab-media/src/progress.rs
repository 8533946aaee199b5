//! Progress reporting and cancellation for pipeline stages.
//!
//! This module provides a callback-based progress reporting system that allows
//! the stabilization stages to emit stage and per-frame events without being
//! coupled to how they are displayed (terminal, logging, a GUI thread, ...).
//!
//! Cancellation is cooperative: stages call [`ProgressReporter::check_cancelled`]
//! between frames and the pipeline calls it between stages. A long-running LP
//! solve is never interrupted mid-call.

use crate::error::{StabError, StabResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use vstab_models::Stage;

/// Progress event emitted while the pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A stage began its pass over the video
    StageStarted { stage: Stage },

    /// Unit of work `current` out of `total` finished
    Progress {
        stage: Stage,
        current: usize,
        total: usize,
    },

    /// A stage completed its pass
    StageFinished { stage: Stage },
}

/// Progress callback type.
///
/// This is a function that receives progress events and can forward them
/// to the appropriate destination (terminal, logging, channel, etc.).
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next frame or stage boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress reporter handed to every stage.
///
/// Cloning is cheap; clones share the callback, the cancellation flag and
/// the per-stage high-water marks.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    cancel: CancellationToken,
    high_water: Arc<Mutex<HashMap<Stage, usize>>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ProgressReporter {
    /// Create a reporter forwarding events to `callback`.
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::default()
        }
    }

    /// A reporter that drops every event.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Create a reporter plus a receiver that collects its events.
    pub fn channel() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: ProgressCallback = Arc::new(move |event: ProgressEvent| {
            if let Ok(tx) = tx.lock() {
                // Receiver may be gone; progress is best-effort
                let _ = tx.send(event);
            }
        });
        (Self::new(callback), rx)
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The token controlling this reporter's cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// Send stage started event and reset the stage's progress counter.
    pub fn stage_started(&self, stage: Stage) {
        if let Ok(mut marks) = self.high_water.lock() {
            marks.remove(&stage);
        }
        self.emit(ProgressEvent::StageStarted { stage });
    }

    /// Send a progress event. Values that do not advance the stage are dropped.
    pub fn progress(&self, stage: Stage, current: usize, total: usize) {
        let advanced = match self.high_water.lock() {
            Ok(mut marks) => match marks.get(&stage) {
                Some(&last) if current <= last => false,
                _ => {
                    marks.insert(stage, current);
                    true
                }
            },
            Err(_) => true,
        };
        if advanced {
            self.emit(ProgressEvent::Progress {
                stage,
                current,
                total,
            });
        }
    }

    /// Send stage finished event.
    pub fn stage_finished(&self, stage: Stage) {
        self.emit(ProgressEvent::StageFinished { stage });
    }

    /// Fail with [`StabError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self, stage: Stage) -> StabResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StabError::Cancelled { stage });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_strictly_increasing() {
        let (reporter, rx) = ProgressReporter::channel();
        reporter.stage_started(Stage::FeatureTracking);
        reporter.progress(Stage::FeatureTracking, 1, 3);
        reporter.progress(Stage::FeatureTracking, 1, 3);
        reporter.progress(Stage::FeatureTracking, 0, 3);
        reporter.progress(Stage::FeatureTracking, 2, 3);
        reporter.stage_finished(Stage::FeatureTracking);

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ProgressEvent::StageStarted {
                    stage: Stage::FeatureTracking
                },
                ProgressEvent::Progress {
                    stage: Stage::FeatureTracking,
                    current: 1,
                    total: 3
                },
                ProgressEvent::Progress {
                    stage: Stage::FeatureTracking,
                    current: 2,
                    total: 3
                },
                ProgressEvent::StageFinished {
                    stage: Stage::FeatureTracking
                },
            ]
        );
    }

    #[test]
    fn test_restarting_stage_resets_counter() {
        let (reporter, rx) = ProgressReporter::channel();
        reporter.stage_started(Stage::Loading);
        reporter.progress(Stage::Loading, 5, 5);
        reporter.stage_started(Stage::Loading);
        reporter.progress(Stage::Loading, 0, 5);
        let progress_events = rx
            .try_iter()
            .filter(|e| matches!(e, ProgressEvent::Progress { .. }))
            .count();
        assert_eq!(progress_events, 2);
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let reporter = ProgressReporter::silent().with_cancellation(token.clone());
        assert!(reporter.check_cancelled(Stage::OutlierRejection).is_ok());
        token.cancel();
        match reporter.check_cancelled(Stage::OutlierRejection) {
            Err(StabError::Cancelled { stage }) => assert_eq!(stage, Stage::OutlierRejection),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
