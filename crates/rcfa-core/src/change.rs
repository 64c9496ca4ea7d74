use serde::{Deserialize, Serialize};

use crate::context::ContextField;
use crate::ledger::{ActionId, ActionStatus};

/// What a successful edit did to an analysis.
///
/// Returned by every mutating operation; callers forward it as the
/// "analysis changed" notification.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisChange {
    ContextFieldSet { field: ContextField },
    StepAdded { step: usize },
    /// `from` and every later step were dropped. When `from == 0` the chain
    /// was reset to its single initial step.
    StepsRemoved { from: usize, removed: usize },
    QuestionUpdated { step: usize },
    HypothesisAdded { step: usize, hypothesis: usize },
    HypothesisRemoved { step: usize, hypothesis: usize, was_correct: bool },
    HypothesisTextUpdated { step: usize, hypothesis: usize, propagated: bool },
    CorrectHypothesisSet { step: usize, hypothesis: usize, propagated: bool },
    RootCauseLocked { step: usize, hypothesis: usize, truncated: usize },
    RootCauseTextUpdated,
    CountermeasureUpdated,
    ActionRecorded { action_id: ActionId, status: ActionStatus },
}

impl AnalysisChange {
    /// Whether a correct answer was copied into the following step's question.
    #[must_use]
    pub fn propagated(&self) -> bool {
        matches!(
            self,
            Self::HypothesisTextUpdated { propagated: true, .. }
                | Self::CorrectHypothesisSet { propagated: true, .. }
        )
    }
}
