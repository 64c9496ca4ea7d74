use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rcfa_core::{
    Action, ActionId, ActionLedger, ActionStatus, NewAction, ProblemId, ProblemPatch,
    ProblemRecord, ProblemStatus, RcfaError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS problems (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL CHECK (length(title) > 0),
  description TEXT,
  root_cause TEXT,
  rcfa_analysis TEXT,
  five_whys TEXT,
  countermeasure TEXT,
  function_failure TEXT,
  failure_mode TEXT,
  status TEXT NOT NULL CHECK (status IN ('OPEN','DEFINITION','ANALYSIS','COUNTERMEASURE','MONITORING','CLOSED','CANCELLED')),
  created_at TEXT NOT NULL,
  resolved_at TEXT
);

CREATE TABLE IF NOT EXISTS problem_actions (
  id TEXT PRIMARY KEY,
  problem_id TEXT NOT NULL,
  description TEXT NOT NULL,
  assignee_id TEXT NOT NULL,
  due_date TEXT,
  status TEXT NOT NULL CHECK (status IN ('PENDING','COMPLETED')),
  created_at TEXT NOT NULL,
  FOREIGN KEY (problem_id) REFERENCES problems(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_problem_actions_problem ON problem_actions(problem_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_problem_actions_assignee ON problem_actions(assignee_id, status);
CREATE INDEX IF NOT EXISTS idx_problem_actions_due_date ON problem_actions(due_date, created_at);
";

const PROBLEM_COLUMNS: &str = "id, title, description, root_cause, rcfa_analysis, five_whys,
    countermeasure, function_failure, failure_mode, status, created_at, resolved_at";

const ACTION_COLUMNS: &str =
    "id, problem_id, description, assignee_id, due_date, status, created_at";

/// Connection tuning for [`SqliteStore::open_with`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreOptions {
    pub busy_timeout_ms: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { busy_timeout_ms: 5_000 }
    }
}

/// Narrowing for [`SqliteStore::list_actions`]. Empty filter lists everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionFilter {
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub status: Option<ActionStatus>,
}

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed problem store with default [`StoreOptions`].
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open a SQLite-backed problem store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            options.busy_timeout_ms
        ))
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (target, sql) in [(1_i64, MIGRATION_001_SQL), (2_i64, MIGRATION_002_SQL)] {
            if version >= target {
                continue;
            }
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{target} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{target}"))?;
            record_schema_version(&tx, target)?;
            tx.commit().with_context(|| format!("failed to commit migration v{target}"))?;
            tracing::info!(version = target, "schema migration applied");
            version = target;
        }

        Ok(())
    }

    /// Persist a new problem record together with any actions it already carries.
    ///
    /// # Errors
    /// Returns an error when the title is empty or any write in the transaction fails.
    pub fn create_problem(&mut self, record: &ProblemRecord) -> Result<()> {
        if record.title.trim().is_empty() {
            return Err(RcfaError::Validation("problem title MUST be provided".to_string()).into());
        }

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            &format!(
                "INSERT INTO problems({PROBLEM_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                record.id.to_string(),
                record.title,
                record.description,
                record.root_cause,
                record.rcfa_analysis,
                record.five_whys,
                record.countermeasure,
                record.function_failure,
                record.failure_mode,
                record.status.as_str(),
                rfc3339(record.created_at)?,
                record.resolved_at.map(rfc3339).transpose()?,
            ],
        )
        .context("failed to insert problem")?;

        for action in &record.actions {
            insert_action_row(&tx, action)?;
        }

        tx.commit().context("failed to commit problem insert")?;
        tracing::debug!(problem_id = %record.id, "problem created");
        Ok(())
    }

    /// Load one problem record with its actions in assignment order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn load_record(&self, id: ProblemId) -> Result<Option<ProblemRecord>> {
        load_record_from(&self.conn, id)
    }

    /// Apply a patch to a stored problem, then advance its status.
    ///
    /// Load, patch, status recomputation and write happen in one transaction;
    /// concurrent writers resolve as last-write-wins.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] (inside `anyhow`) for an unknown problem, or an
    /// error when any read or write fails.
    pub fn save_record(
        &mut self,
        id: ProblemId,
        patch: &ProblemPatch,
        now: OffsetDateTime,
    ) -> Result<ProblemRecord> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let mut record = load_record_from(&tx, id)?
            .ok_or_else(|| RcfaError::NotFound(format!("problem {id}")))?;

        record.apply_patch(patch);
        record.advance_status(now);

        tx.execute(
            "UPDATE problems SET
                root_cause = ?2, rcfa_analysis = ?3, five_whys = ?4, countermeasure = ?5,
                function_failure = ?6, failure_mode = ?7, status = ?8, resolved_at = ?9
             WHERE id = ?1",
            params![
                id.to_string(),
                record.root_cause,
                record.rcfa_analysis,
                record.five_whys,
                record.countermeasure,
                record.function_failure,
                record.failure_mode,
                record.status.as_str(),
                record.resolved_at.map(rfc3339).transpose()?,
            ],
        )
        .context("failed to update problem")?;

        tx.commit().context("failed to commit problem update")?;
        tracing::debug!(problem_id = %id, status = record.status.as_str(), "problem saved");
        Ok(record)
    }

    /// Create a `PENDING` action on a problem, then advance the problem's status.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] for an unknown problem and
    /// [`RcfaError::Validation`] for a blank description or assignee (both inside
    /// `anyhow`), or an error when any read or write fails.
    pub fn create_action(
        &mut self,
        problem_id: ProblemId,
        input: &NewAction,
        now: OffsetDateTime,
    ) -> Result<(Action, ProblemRecord)> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let mut ledger = load_ledger(&tx, problem_id)?;
        let action = ledger.assign(input.clone(), now)?.clone();

        insert_action_row(&tx, &action)?;
        let record = advance_stored_status(&tx, problem_id, now)?;

        tx.commit().context("failed to commit action insert")?;
        tracing::info!(problem_id = %problem_id, action_id = %action.id, "action created");
        Ok((action, record))
    }

    /// Set an action's status, then advance the owning problem's status.
    ///
    /// Status changes are one-way: a `COMPLETED` action never returns to `PENDING`.
    ///
    /// # Errors
    /// Returns [`RcfaError::NotFound`] when the action does not belong to the problem
    /// and [`RcfaError::Validation`] for a `COMPLETED` action sent back to `PENDING`
    /// (both inside `anyhow`), or an error when any read or write fails.
    pub fn update_action_status(
        &mut self,
        problem_id: ProblemId,
        action_id: ActionId,
        status: ActionStatus,
        now: OffsetDateTime,
    ) -> Result<(Action, ProblemRecord)> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let mut ledger = load_ledger(&tx, problem_id)?;
        let action = ledger
            .set_status(action_id, status)
            .map_err(|err| match err {
                RcfaError::NotFound(_) => {
                    RcfaError::NotFound(format!("action {action_id} on problem {problem_id}"))
                }
                other => other,
            })?
            .clone();

        tx.execute(
            "UPDATE problem_actions SET status = ?3 WHERE id = ?1 AND problem_id = ?2",
            params![action_id.to_string(), problem_id.to_string(), action.status.as_str()],
        )
        .context("failed to update action status")?;
        let record = advance_stored_status(&tx, problem_id, now)?;

        tx.commit().context("failed to commit action status update")?;
        tracing::info!(
            problem_id = %problem_id,
            action_id = %action_id,
            status = action.status.as_str(),
            "action status updated"
        );
        Ok((action, record))
    }

    /// List actions across all problems, earliest due date first with undated
    /// actions last, ties broken by creation time.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_actions(&self, filter: &ActionFilter) -> Result<Vec<Action>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS}
             FROM problem_actions
             WHERE (?1 IS NULL OR assignee_id = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY due_date IS NULL ASC, due_date ASC, created_at ASC, id ASC"
        ))?;

        let mut rows = stmt.query(params![
            filter.assignee_id,
            filter.status.map(ActionStatus::as_str),
        ])?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next()? {
            actions.push(action_from_row(row)?);
        }
        Ok(actions)
    }
}

fn load_record_from(conn: &Connection, id: ProblemId) -> Result<Option<ProblemRecord>> {
    let raw = conn
        .query_row(
            &format!("SELECT {PROBLEM_COLUMNS} FROM problems WHERE id = ?1"),
            params![id.to_string()],
            |row| {
                Ok(ProblemRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                    root_cause: row.get(3)?,
                    rcfa_analysis: row.get(4)?,
                    five_whys: row.get(5)?,
                    countermeasure: row.get(6)?,
                    function_failure: row.get(7)?,
                    failure_mode: row.get(8)?,
                    status: row.get(9)?,
                    created_at: row.get(10)?,
                    resolved_at: row.get(11)?,
                })
            },
        )
        .optional()
        .context("failed to read problem")?;

    let Some(raw) = raw else {
        return Ok(None);
    };

    let actions = load_actions(conn, id)?;
    Ok(Some(ProblemRecord {
        id: parse_problem_id(&raw.id)?,
        title: raw.title,
        description: raw.description,
        root_cause: raw.root_cause,
        rcfa_analysis: raw.rcfa_analysis,
        five_whys: raw.five_whys,
        countermeasure: raw.countermeasure,
        function_failure: raw.function_failure,
        failure_mode: raw.failure_mode,
        status: ProblemStatus::parse(&raw.status)
            .ok_or_else(|| anyhow!("unknown problem status: {}", raw.status))?,
        created_at: parse_rfc3339(&raw.created_at)?,
        resolved_at: raw.resolved_at.as_deref().map(parse_rfc3339).transpose()?,
        actions,
    }))
}

struct ProblemRow {
    id: String,
    title: String,
    description: Option<String>,
    root_cause: Option<String>,
    rcfa_analysis: Option<String>,
    five_whys: Option<String>,
    countermeasure: Option<String>,
    function_failure: Option<String>,
    failure_mode: Option<String>,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
}

fn load_actions(conn: &Connection, problem_id: ProblemId) -> Result<Vec<Action>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACTION_COLUMNS}
         FROM problem_actions
         WHERE problem_id = ?1
         ORDER BY created_at ASC, id ASC"
    ))?;
    let mut rows = stmt.query(params![problem_id.to_string()])?;
    let mut actions = Vec::new();
    while let Some(row) = rows.next()? {
        actions.push(action_from_row(row)?);
    }
    Ok(actions)
}

fn action_from_row(row: &Row<'_>) -> Result<Action> {
    let id_raw: String = row.get(0)?;
    let problem_id_raw: String = row.get(1)?;
    let due_date_raw: Option<String> = row.get(4)?;
    let status_raw: String = row.get(5)?;

    Ok(Action {
        id: ActionId(parse_ulid(&id_raw)?),
        problem_id: parse_problem_id(&problem_id_raw)?,
        description: row.get(2)?,
        assignee_id: row.get(3)?,
        due_date: due_date_raw.as_deref().map(parse_date).transpose()?,
        status: ActionStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown action status: {status_raw}"))?,
        created_at: parse_rfc3339(&row.get::<_, String>(6)?)?,
    })
}

fn insert_action_row(conn: &Connection, action: &Action) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO problem_actions({ACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            action.id.to_string(),
            action.problem_id.to_string(),
            action.description,
            action.assignee_id,
            action.due_date.map(format_date).transpose()?,
            action.status.as_str(),
            rfc3339(action.created_at)?,
        ],
    )
    .context("failed to insert action")?;
    Ok(())
}

fn advance_stored_status(
    conn: &Connection,
    id: ProblemId,
    now: OffsetDateTime,
) -> Result<ProblemRecord> {
    let mut record =
        load_record_from(conn, id)?.ok_or_else(|| RcfaError::NotFound(format!("problem {id}")))?;
    if record.advance_status(now).is_some() {
        conn.execute(
            "UPDATE problems SET status = ?2, resolved_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                record.status.as_str(),
                record.resolved_at.map(rfc3339).transpose()?,
            ],
        )
        .context("failed to update problem status")?;
    }
    Ok(record)
}

fn load_ledger(conn: &Connection, problem_id: ProblemId) -> Result<ActionLedger> {
    let record = load_record_from(conn, problem_id)?
        .ok_or_else(|| RcfaError::NotFound(format!("problem {problem_id}")))?;
    Ok(ActionLedger::from_actions(problem_id, record.actions))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn format_date(value: Date) -> Result<String> {
    value
        .format(time::macros::format_description!("[year]-[month]-[day]"))
        .context("failed to format calendar date")
}

fn parse_date(value: &str) -> Result<Date> {
    Date::parse(value, time::macros::format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid calendar date: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

fn parse_problem_id(raw: &str) -> Result<ProblemId> {
    Ok(ProblemId(parse_ulid(raw)?))
}
