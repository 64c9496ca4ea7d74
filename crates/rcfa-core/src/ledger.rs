use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

use crate::error::RcfaError;
use crate::record::ProblemId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ActionId(pub Ulid);

impl ActionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ActionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Pending,
    Completed,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A remediation task attached to an analysis.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub problem_id: ProblemId,
    pub description: String,
    pub assignee_id: String,
    pub due_date: Option<Date>,
    pub status: ActionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Action {
    /// A fresh `PENDING` action for `problem_id`.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] when the description or assignee is blank.
    pub fn pending(
        problem_id: ProblemId,
        input: NewAction,
        now: OffsetDateTime,
    ) -> Result<Self, RcfaError> {
        input.validate()?;
        Ok(Self {
            id: ActionId::new(),
            problem_id,
            description: input.description,
            assignee_id: input.assignee_id,
            due_date: input.due_date,
            status: ActionStatus::Pending,
            created_at: now,
        })
    }

    /// Move the action to `next`. `PENDING` to `COMPLETED` is one-way;
    /// repeating the current status is a no-op. Returns whether anything changed.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] when a `COMPLETED` action is asked to
    /// go back to `PENDING`.
    pub fn transition(&mut self, next: ActionStatus) -> Result<bool, RcfaError> {
        if self.status == next {
            return Ok(false);
        }
        if self.status == ActionStatus::Completed {
            return Err(RcfaError::Validation(format!(
                "action {} is COMPLETED and cannot return to {}",
                self.id,
                next.as_str()
            )));
        }
        self.status = next;
        Ok(true)
    }

    #[must_use]
    pub fn is_overdue(&self, today: Date) -> bool {
        self.status == ActionStatus::Pending && self.due_date.is_some_and(|due| due < today)
    }
}

/// Input for [`ActionLedger::assign`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewAction {
    pub description: String,
    pub assignee_id: String,
    pub due_date: Option<Date>,
}

impl NewAction {
    /// Check the fields an action cannot exist without.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] when the description or assignee is blank.
    pub fn validate(&self) -> Result<(), RcfaError> {
        if self.description.trim().is_empty() {
            return Err(RcfaError::Validation("action description MUST be provided".to_string()));
        }
        if self.assignee_id.trim().is_empty() {
            return Err(RcfaError::Validation("action assignee MUST be provided".to_string()));
        }
        Ok(())
    }
}

/// Remediation tasks for one problem, in assignment order.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActionLedger {
    problem_id: ProblemId,
    actions: Vec<Action>,
}

impl ActionLedger {
    #[must_use]
    pub fn new(problem_id: ProblemId) -> Self {
        Self { problem_id, actions: Vec::new() }
    }

    #[must_use]
    pub fn from_actions(problem_id: ProblemId, actions: Vec<Action>) -> Self {
        Self { problem_id, actions }
    }

    #[must_use]
    pub fn problem_id(&self) -> ProblemId {
        self.problem_id
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.actions.iter().find(|action| action.id == id)
    }

    /// Append a new `PENDING` action.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] when the description or assignee is blank.
    pub fn assign(&mut self, input: NewAction, now: OffsetDateTime) -> Result<&Action, RcfaError> {
        let action = Action::pending(self.problem_id, input, now)?;
        tracing::debug!(problem_id = %self.problem_id, action_id = %action.id, "action assigned");
        self.actions.push(action);
        Ok(&self.actions[self.actions.len() - 1])
    }

    /// Insert or replace an action that already has an identity (for example
    /// one returned by the store).
    pub fn upsert(&mut self, action: Action) {
        match self.actions.iter_mut().find(|existing| existing.id == action.id) {
            Some(existing) => *existing = action,
            None => self.actions.push(action),
        }
    }

    /// Move an action to `status`; see [`Action::transition`].
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] for an unknown id and
    /// [`RcfaError::Validation`] for a `COMPLETED` action sent back to `PENDING`.
    pub fn set_status(&mut self, id: ActionId, status: ActionStatus) -> Result<&Action, RcfaError> {
        let index = self
            .actions
            .iter()
            .position(|action| action.id == id)
            .ok_or_else(|| RcfaError::NotFound(format!("action {id}")))?;

        if self.actions[index].transition(status)? {
            tracing::debug!(
                problem_id = %self.problem_id,
                action_id = %id,
                status = status.as_str(),
                "action status changed"
            );
        }
        Ok(&self.actions[index])
    }

    #[must_use]
    pub fn all_completed(&self) -> bool {
        !self.actions.is_empty()
            && self.actions.iter().all(|action| action.status == ActionStatus::Completed)
    }
}
