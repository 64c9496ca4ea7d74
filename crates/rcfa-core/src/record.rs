use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::ledger::{Action, ActionStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProblemId(pub Ulid);

impl ProblemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ProblemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProblemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow position of a problem record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProblemStatus {
    Open,
    Definition,
    Analysis,
    Countermeasure,
    Monitoring,
    Closed,
    Cancelled,
}

impl ProblemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Definition => "DEFINITION",
            Self::Analysis => "ANALYSIS",
            Self::Countermeasure => "COUNTERMEASURE",
            Self::Monitoring => "MONITORING",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(Self::Open),
            "DEFINITION" => Some(Self::Definition),
            "ANALYSIS" => Some(Self::Analysis),
            "COUNTERMEASURE" => Some(Self::Countermeasure),
            "MONITORING" => Some(Self::Monitoring),
            "CLOSED" => Some(Self::Closed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// The persisted problem record, as owned by the storage collaborator.
///
/// `rcfa_analysis` and `five_whys` hold JSON blobs produced by
/// [`crate::codec::encode`]; older records may hold free text instead.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProblemRecord {
    pub id: ProblemId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub rcfa_analysis: Option<String>,
    #[serde(default)]
    pub five_whys: Option<String>,
    #[serde(default)]
    pub countermeasure: Option<String>,
    #[serde(default)]
    pub function_failure: Option<String>,
    #[serde(default)]
    pub failure_mode: Option<String>,
    pub status: ProblemStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Fields written back on commit. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProblemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rcfa_analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub five_whys: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countermeasure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_mode: Option<String>,
}

fn filled(value: Option<&String>) -> bool {
    value.is_some_and(|text| !text.is_empty())
}

impl ProblemRecord {
    #[must_use]
    pub fn new(title: impl Into<String>, description: Option<String>, now: OffsetDateTime) -> Self {
        Self {
            id: ProblemId::new(),
            title: title.into(),
            description,
            root_cause: None,
            rcfa_analysis: None,
            five_whys: None,
            countermeasure: None,
            function_failure: None,
            failure_mode: None,
            status: ProblemStatus::Open,
            created_at: now,
            resolved_at: None,
            actions: Vec::new(),
        }
    }

    pub fn apply_patch(&mut self, patch: &ProblemPatch) {
        let fields = [
            (&mut self.root_cause, &patch.root_cause),
            (&mut self.rcfa_analysis, &patch.rcfa_analysis),
            (&mut self.five_whys, &patch.five_whys),
            (&mut self.countermeasure, &patch.countermeasure),
            (&mut self.function_failure, &patch.function_failure),
            (&mut self.failure_mode, &patch.failure_mode),
        ];
        for (slot, value) in fields {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
    }

    /// Move the record forward through its workflow as far as its current
    /// content allows. Returns the status before advancing when it changed.
    pub fn advance_status(&mut self, now: OffsetDateTime) -> Option<ProblemStatus> {
        let before = self.status;
        if before == ProblemStatus::Cancelled {
            return None;
        }

        if self.status == ProblemStatus::Open
            && filled(self.function_failure.as_ref())
            && filled(self.failure_mode.as_ref())
        {
            self.status = ProblemStatus::Definition;
        }

        if self.status == ProblemStatus::Definition
            && (filled(self.five_whys.as_ref()) || filled(self.rcfa_analysis.as_ref()))
        {
            self.status = ProblemStatus::Analysis;
        }

        if self.status == ProblemStatus::Analysis
            && filled(self.root_cause.as_ref())
            && filled(self.countermeasure.as_ref())
        {
            self.status = ProblemStatus::Countermeasure;
        }

        if self.status == ProblemStatus::Countermeasure && !self.actions.is_empty() {
            self.status = ProblemStatus::Monitoring;
        }

        if self.status == ProblemStatus::Monitoring
            && !self.actions.is_empty()
            && self.actions.iter().all(|action| action.status == ActionStatus::Completed)
        {
            self.status = ProblemStatus::Closed;
            self.resolved_at = Some(now);
        }

        if self.status == before {
            return None;
        }
        tracing::info!(
            problem_id = %self.id,
            from = before.as_str(),
            to = self.status.as_str(),
            "problem status advanced"
        );
        Some(before)
    }
}
