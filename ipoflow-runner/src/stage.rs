//! Stage identities, run states and per-stage outcome records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// How a stage reacts to a failing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failures are collected; the stage is fatal only when nothing succeeds.
    Tolerant,
    /// The first failure is fatal.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Load,
    Transform,
    Mart,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extract,
        Stage::Load,
        Stage::Transform,
        Stage::Mart,
        Stage::Export,
    ];

    /// Section header used in the run log.
    pub fn title(self) -> &'static str {
        match self {
            Stage::Extract => "DATA EXTRACTION",
            Stage::Load => "LOADING RAW DATA",
            Stage::Transform => "RUNNING STAGING TRANSFORMATIONS",
            Stage::Mart => "BUILDING MART TABLE",
            Stage::Export => "EXPORTING MART TABLE",
        }
    }

    pub fn policy(self) -> FailurePolicy {
        match self {
            Stage::Extract | Stage::Load | Stage::Transform => FailurePolicy::Tolerant,
            Stage::Mart | Stage::Export => FailurePolicy::FailFast,
        }
    }

    /// Run state while this stage executes.
    pub fn state(self) -> RunState {
        match self {
            Stage::Extract => RunState::Extracting,
            Stage::Load => RunState::Loading,
            Stage::Transform => RunState::Transforming,
            Stage::Mart => RunState::MartBuilding,
            Stage::Export => RunState::Exporting,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extract => "extract",
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Mart => "mart",
            Stage::Export => "export",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one pipeline run.
///
/// ```text
/// Init → Extracting → Loading → Transforming → MartBuilding → Exporting → Done
/// ```
///
/// `Failed` is absorbing. It is reachable from `Init` (store cannot be opened)
/// and from every stage state; `Extracting` only fails under the `abort`
/// extraction policy, which the orchestrator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Extracting,
    Loading,
    Transforming,
    MartBuilding,
    Exporting,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Init, Extracting)
            | (Extracting, Loading)
            | (Loading, Transforming)
            | (Transforming, MartBuilding)
            | (MartBuilding, Exporting)
            | (Exporting, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Init => "init",
            RunState::Extracting => "extracting",
            RunState::Loading => "loading",
            RunState::Transforming => "transforming",
            RunState::MartBuilding => "mart_building",
            RunState::Exporting => "exporting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One item a stage finished: a source, raw table, staging table, mart or export file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedItem {
    pub item: String,
    pub rows: usize,
    /// Extra detail such as a file fingerprint or export path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

/// Result record for one stage, appended once the stage ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub completed: Vec<CompletedItem>,
    /// Items passed over without being attempted (missing input files, disabled stage).
    pub skipped: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// Whether this stage ended the run.
    pub fatal: bool,
    pub duration_ms: u64,
}

impl StageOutcome {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            completed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            fatal: false,
            duration_ms: 0,
        }
    }

    pub fn complete(&mut self, item: impl Into<String>, rows: usize, detail: Option<String>) {
        self.completed.push(CompletedItem {
            item: item.into(),
            rows,
            detail,
        });
    }

    pub fn skip(&mut self, item: impl Into<String>) {
        self.skipped.push(item.into());
    }

    pub fn fail(&mut self, item: impl Into<String>, error: impl fmt::Display) {
        self.failed.push(ItemFailure {
            item: item.into(),
            error: error.to_string(),
        });
    }

    pub fn succeeded_count(&self) -> usize {
        self.completed.len()
    }

    pub fn rows_for(&self, item: &str) -> Option<usize> {
        self.completed.iter().find(|c| c.item == item).map(|c| c.rows)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        let path = [
            RunState::Init,
            RunState::Extracting,
            RunState::Loading,
            RunState::Transforming,
            RunState::MartBuilding,
            RunState::Exporting,
            RunState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        assert!(!RunState::Init.can_transition_to(RunState::Loading));
        assert!(!RunState::Loading.can_transition_to(RunState::MartBuilding));
        assert!(!RunState::Transforming.can_transition_to(RunState::Done));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for next in [RunState::Init, RunState::Loading, RunState::Failed, RunState::Done] {
            assert!(!RunState::Done.can_transition_to(next));
            assert!(!RunState::Failed.can_transition_to(next));
        }
        assert!(RunState::Init.can_transition_to(RunState::Failed));
        assert!(RunState::Exporting.can_transition_to(RunState::Failed));
    }

    #[test]
    fn policies_match_stage_roles() {
        assert_eq!(Stage::Load.policy(), FailurePolicy::Tolerant);
        assert_eq!(Stage::Mart.policy(), FailurePolicy::FailFast);
        assert_eq!(Stage::Export.policy(), FailurePolicy::FailFast);
    }

    #[test]
    fn outcome_records_items() {
        let mut outcome = StageOutcome::new(Stage::Load);
        outcome.complete("raw_a", 10, Some("abc".into()));
        outcome.skip("raw_b");
        outcome.fail("raw_c", "bad csv");
        assert_eq!(outcome.succeeded_count(), 1);
        assert_eq!(outcome.rows_for("raw_a"), Some(10));
        assert_eq!(outcome.failed[0].error, "bad csv");
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
