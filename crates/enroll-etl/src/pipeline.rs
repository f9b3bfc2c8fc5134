//! Run orchestration
//!
//! One run moves through `Idle → Extracting → Transforming → Loading →
//! Auditing → Done`, or to `Failed` from any non-terminal state. Stages run
//! strictly one after another.
//!
//! Row rejections are data: they are counted, logged and written back to
//! the source as `error: ...` markers. Extraction, load and feedback
//! failures are fatal and end the run in `Failed`. When a load fails no
//! feedback is written, so every selected row stays `pending` for the next
//! run.

use chrono::{DateTime, Utc};
use enroll_common::EtlError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::db::DbError;
use crate::extract::{ExtractError, RowSource, StatusMarker, StatusUpdate};
use crate::load::{LoadError, LoadOutcome, RecordSink};
use crate::quality::{AuditStore, QualityAuditor, QualityConfig, QualityReport};
use crate::transform::{transform, RowRejection, TransformOutput};
use crate::validation::RuleSet;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Status feedback failed: {0}")]
    Feedback(#[source] ExtractError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Etl(#[from] EtlError),

    #[error("Illegal run state transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Extract(e) | PipelineError::Feedback(e) => e.is_transient(),
            PipelineError::Load(e) => e.is_transient(),
            PipelineError::Db(e) => e.is_transient(),
            PipelineError::Etl(_) | PipelineError::InvalidTransition { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Auditing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Transforming)
                | (Transforming, Loading)
                // nothing accepted
                | (Transforming, Done)
                | (Loading, Auditing)
                // no audit configured
                | (Loading, Done)
                | (Auditing, Done)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dataset: String,
    pub state: RunState,
    /// Rows the source returned
    pub rows_seen: usize,
    /// Rows not selected because their status was not `pending`
    pub rows_skipped: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub rows_inserted: usize,
    pub rejections: Vec<RowRejection>,
    pub load: LoadOutcome,
    pub quality: Option<QualityReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

impl RunSummary {
    fn new(run_id: Uuid, dataset: &str) -> Self {
        Self {
            run_id,
            dataset: dataset.to_string(),
            state: RunState::Idle,
            rows_seen: 0,
            rows_skipped: 0,
            rows_accepted: 0,
            rows_rejected: 0,
            rows_inserted: 0,
            rejections: Vec::new(),
            load: LoadOutcome::skipped(),
            quality: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_secs: 0.0,
        }
    }

    /// Overall audit result; a run without an audit counts as passed
    pub fn quality_passed(&self) -> bool {
        self.quality.as_ref().is_none_or(|q| q.passed)
    }

    fn finish(&mut self, state: RunState) {
        let now = Utc::now();
        self.state = state;
        self.completed_at = Some(now);
        self.duration_secs = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
    }
}

/// Terminal markers for every processed row, in source order
pub fn feedback_updates(output: &TransformOutput) -> Vec<StatusUpdate> {
    let mut updates: Vec<StatusUpdate> = output
        .records
        .iter()
        .map(|r| StatusUpdate::new(r.source_index, StatusMarker::Synced))
        .chain(
            output
                .rejections
                .iter()
                .map(|r| StatusUpdate::new(r.index, StatusMarker::Error(r.message()))),
        )
        .collect();
    updates.sort_by_key(|u| u.index);
    updates
}

pub struct Pipeline<'a> {
    dataset: String,
    source: &'a dyn RowSource,
    rules: &'a RuleSet,
    sink: &'a dyn RecordSink,
    audit: Option<(&'a dyn AuditStore, &'a QualityConfig)>,
    state: RunState,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        dataset: impl Into<String>,
        source: &'a dyn RowSource,
        rules: &'a RuleSet,
        sink: &'a dyn RecordSink,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            source,
            rules,
            sink,
            audit: None,
            state: RunState::Idle,
        }
    }

    /// Audit the target table after a successful load
    pub fn with_audit(mut self, store: &'a dyn AuditStore, config: &'a QualityConfig) -> Self {
        self.audit = Some((store, config));
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
        Ok(())
    }

    /// Execute one full run
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id, dataset = %self.dataset);

        async {
            let mut summary = RunSummary::new(run_id, &self.dataset);
            match self.execute(&mut summary).await {
                Ok(()) => {
                    summary.finish(self.state);
                    info!(
                        rows_seen = summary.rows_seen,
                        rows_skipped = summary.rows_skipped,
                        rows_accepted = summary.rows_accepted,
                        rows_rejected = summary.rows_rejected,
                        rows_inserted = summary.rows_inserted,
                        quality_passed = summary.quality_passed(),
                        duration_secs = summary.duration_secs,
                        "Run completed"
                    );
                    Ok(summary)
                },
                Err(e) => {
                    if !self.state.is_terminal() {
                        self.state = RunState::Failed;
                    }
                    error!(error = %e, "Run failed");
                    Err(e)
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self, summary: &mut RunSummary) -> Result<(), PipelineError> {
        self.transition(RunState::Extracting)?;
        let rows = self.source.extract().await?;
        summary.rows_seen = rows.len();
        info!(source = self.source.name(), rows = rows.len(), "Extraction complete");

        self.transition(RunState::Transforming)?;
        let output = transform(&rows, self.rules, self.source.supports_status());
        summary.rows_skipped = output.skipped;
        summary.rows_accepted = output.records.len();
        summary.rows_rejected = output.rejections.len();
        summary.rejections = output.rejections.clone();
        info!(
            accepted = output.records.len(),
            rejected = output.rejections.len(),
            skipped = output.skipped,
            "Transformation complete"
        );

        if output.records.is_empty() {
            self.write_feedback(&output).await?;
            info!("No accepted rows, skipping load and audit");
            return self.transition(RunState::Done);
        }

        self.transition(RunState::Loading)?;
        let outcome = self.sink.load(&output.records).await?;
        summary.rows_inserted = outcome.rows_inserted;
        summary.load = outcome;

        if let Some((store, config)) = self.audit {
            self.transition(RunState::Auditing)?;
            summary.quality = Some(QualityAuditor::new(store).audit(config).await);
        }

        self.write_feedback(&output).await?;
        self.transition(RunState::Done)
    }

    async fn write_feedback(&self, output: &TransformOutput) -> Result<(), PipelineError> {
        if !self.source.supports_status() {
            return Ok(());
        }
        let updates = feedback_updates(output);
        if updates.is_empty() {
            return Ok(());
        }

        self.source
            .write_statuses(&updates)
            .await
            .map_err(PipelineError::Feedback)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::validation::{FieldError, NormalizedRecord};
    use std::collections::BTreeMap;

    #[test]
    fn test_state_transitions() {
        use RunState::*;

        assert!(Idle.can_transition_to(Extracting));
        assert!(Transforming.can_transition_to(Done));
        assert!(Loading.can_transition_to(Done));
        assert!(Auditing.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Loading));
        assert!(!Extracting.can_transition_to(Loading));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Extracting));
    }

    #[test]
    fn test_feedback_updates_are_ordered_by_row() {
        let output = TransformOutput {
            records: vec![
                NormalizedRecord {
                    source_index: 4,
                    values: BTreeMap::new(),
                },
                NormalizedRecord {
                    source_index: 2,
                    values: BTreeMap::new(),
                },
            ],
            rejections: vec![RowRejection {
                index: 3,
                errors: vec![FieldError::new("age", "is required")],
            }],
            skipped: 0,
        };

        let updates = feedback_updates(&output);
        assert_eq!(
            updates,
            vec![
                StatusUpdate::new(2, StatusMarker::Synced),
                StatusUpdate::new(3, StatusMarker::Error("age: is required".into())),
                StatusUpdate::new(4, StatusMarker::Synced),
            ]
        );
    }

    #[test]
    fn test_quality_passed_without_audit() {
        let summary = RunSummary::new(Uuid::new_v4(), "students");
        assert!(summary.quality_passed());
        assert_eq!(summary.state, RunState::Idle);
    }
}
