use std::path::PathBuf;

use anyhow::{Context, Result};
use rcfa_core::{
    encode, Action, ActionId, ActionStatus, NewAction, ProblemId, ProblemRecord, RcfaError,
};
use rcfa_store_sqlite::{ActionFilter, SchemaStatus, SqliteStore, StoreOptions};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

mod session;

pub use session::AnalysisSession;

pub const API_CONTRACT_VERSION: &str = "rcfa.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RcfaApi {
    db_path: PathBuf,
    options: StoreOptions,
}

impl RcfaApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_options(db_path, StoreOptions::default())
    }

    #[must_use]
    pub fn with_options(db_path: PathBuf, options: StoreOptions) -> Self {
        Self { db_path, options }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open_with(&self.db_path, self.options)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open_with(&self.db_path, self.options)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open_with(&self.db_path, self.options)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Create a new problem in `OPEN` status.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] (inside `anyhow`) for a blank title, or an
    /// error when persistence fails.
    pub fn open_problem(&self, title: &str, description: Option<String>) -> Result<ProblemRecord> {
        if title.trim().is_empty() {
            return Err(RcfaError::Validation("problem title MUST be provided".to_string()).into());
        }

        let mut store = self.open_store()?;
        let record = ProblemRecord::new(title, description, OffsetDateTime::now_utc());
        store.create_problem(&record)?;
        tracing::info!(problem_id = %record.id, "problem opened");
        Ok(record)
    }

    /// Fetch a stored problem record.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] (inside `anyhow`) for an unknown id.
    pub fn load_record(&self, problem_id: ProblemId) -> Result<ProblemRecord> {
        let store = self.open_store()?;
        let record = store
            .load_record(problem_id)?
            .ok_or_else(|| RcfaError::NotFound(format!("problem {problem_id}")))?;
        Ok(record)
    }

    /// Load a problem and start an editing session on its analysis.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] (inside `anyhow`) for an unknown id, or an error
    /// when the store cannot be read.
    pub fn load_session(&self, problem_id: ProblemId) -> Result<AnalysisSession> {
        let record = self.load_record(problem_id)?;
        let session = AnalysisSession::from_record(&record)?;
        if !session.report().is_clean() {
            tracing::warn!(
                problem_id = %problem_id,
                notes = session.report().notes.len(),
                "analysis loaded with fallbacks"
            );
        }
        Ok(session)
    }

    /// Write the session's analysis back to its problem and advance the
    /// problem status.
    ///
    /// # Errors
    /// Returns an error when encoding or persistence fails.
    pub fn commit(&self, session: &mut AnalysisSession) -> Result<ProblemRecord> {
        let patch = encode(session.analysis())?;
        let mut store = self.open_store()?;
        let record = store.save_record(session.problem_id(), &patch, OffsetDateTime::now_utc())?;
        session.mark_saved(&patch, record.status)?;
        tracing::info!(
            problem_id = %record.id,
            status = record.status.as_str(),
            steps = session.analysis().chain().len(),
            "analysis committed"
        );
        Ok(record)
    }

    /// Assign a new action to the session's problem and persist it immediately.
    ///
    /// # Errors
    /// Returns [`RcfaError::Validation`] (inside `anyhow`) for a blank description or
    /// assignee, or an error when persistence fails. The session is unchanged on error.
    pub fn assign_action(&self, session: &mut AnalysisSession, input: NewAction) -> Result<Action> {
        let mut store = self.open_store()?;
        let (action, record) =
            store.create_action(session.problem_id(), &input, OffsetDateTime::now_utc())?;
        session.apply_stored_action(action.clone(), record.status);
        Ok(action)
    }

    /// Mark one of the session's actions completed and persist it immediately.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] (inside `anyhow`) for an unknown action, or an
    /// error when persistence fails. The session is unchanged on error.
    pub fn complete_action(
        &self,
        session: &mut AnalysisSession,
        action_id: ActionId,
    ) -> Result<Action> {
        let mut store = self.open_store()?;
        let (action, record) = store.update_action_status(
            session.problem_id(),
            action_id,
            ActionStatus::Completed,
            OffsetDateTime::now_utc(),
        )?;
        session.apply_stored_action(action.clone(), record.status);
        Ok(action)
    }

    /// List actions across every problem, earliest due date first.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        let store = self.open_store()?;
        store.list_actions(filter)
    }

    /// Pending actions whose due date is before `today`, across every problem.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn overdue_actions(&self, filter: &ActionFilter, today: Date) -> Result<Vec<Action>> {
        let actions = self.list_actions(filter).context("failed to list actions")?;
        Ok(actions.into_iter().filter(|action| action.is_overdue(today)).collect())
    }
}
