//! ControlStore PostgreSQL implementation.
//!
//! The claim path is the only non-trivial storage requirement: the
//! oldest-PENDING selector runs with `FOR UPDATE SKIP LOCKED` so
//! concurrent claimers never observe the same row, and the claim
//! transaction contains only the locking select, the state update, and
//! the commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use codemend_core::store::{ControlStore, StepTransition, StoreError};
use codemend_core::types::{AgentRole, Job, JobState, Step, StepState};

const CLAIM_SELECT: &str = "SELECT id, job_id, role, state, attempt, worker_id, heartbeat_at, \
     created_at, started_at, finished_at, result_json, conversation_history \
     FROM steps WHERE state = 'PENDING' \
     ORDER BY created_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED";

const STEP_COLUMNS: &str = "id, job_id, role, state, attempt, worker_id, heartbeat_at, \
     created_at, started_at, finished_at, result_json, conversation_history";

/// PostgreSQL-backed control store.
pub struct PgControlStore {
    pool: PgPool,
}

impl PgControlStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(connection_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(connection_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                repo_url TEXT NOT NULL,
                git_ref TEXT NOT NULL,
                state TEXT NOT NULL,
                workspace_ref TEXT NOT NULL,
                snapshot_key TEXT NULL,
                task_description TEXT NULL,
                failing_test TEXT NULL,
                consecutive_test_failures INT NOT NULL DEFAULT 0,
                iteration_count INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INT NOT NULL DEFAULT 0,
                worker_id TEXT NULL,
                heartbeat_at TIMESTAMPTZ NULL,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ NULL,
                finished_at TIMESTAMPTZ NULL,
                result_json TEXT NULL,
                conversation_history TEXT NULL
            )",
            "CREATE INDEX IF NOT EXISTS steps_pending_idx ON steps (created_at) \
             WHERE state = 'PENDING'",
            "CREATE INDEX IF NOT EXISTS steps_job_idx ON steps (job_id)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    async fn update_job_in<'c>(
        job: &Job,
        tx: &mut Transaction<'c, Postgres>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE jobs SET state = $1, snapshot_key = $2, consecutive_test_failures = $3, \
             iteration_count = $4, updated_at = $5 WHERE id = $6",
        )
        .bind(job.state.as_str())
        .bind(job.snapshot_key.as_deref())
        .bind(job.consecutive_test_failures as i32)
        .bind(job.iteration_count as i32)
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn update_step_in<'c>(
        step: &Step,
        tx: &mut Transaction<'c, Postgres>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE steps SET state = $1, attempt = $2, worker_id = $3, heartbeat_at = $4, \
             started_at = $5, finished_at = $6, result_json = $7, conversation_history = $8 \
             WHERE id = $9",
        )
        .bind(step.state.as_str())
        .bind(step.attempt as i32)
        .bind(step.worker_id.as_deref())
        .bind(step.heartbeat_at)
        .bind(step.started_at)
        .bind(step.finished_at)
        .bind(step.result_json.as_deref())
        .bind(step.conversation_history.as_deref())
        .bind(&step.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn insert_step_in<'c>(
        step: &Step,
        tx: &mut Transaction<'c, Postgres>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO steps (id, job_id, role, state, attempt, worker_id, heartbeat_at, \
             created_at, started_at, finished_at, result_json, conversation_history) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&step.id)
        .bind(&step.job_id)
        .bind(step.role.as_str())
        .bind(step.state.as_str())
        .bind(step.attempt as i32)
        .bind(step.worker_id.as_deref())
        .bind(step.heartbeat_at)
        .bind(step.created_at)
        .bind(step.started_at)
        .bind(step.finished_at)
        .bind(step.result_json.as_deref())
        .bind(step.conversation_history.as_deref())
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ControlStore for PgControlStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, repo_url, git_ref, state, workspace_ref, snapshot_key, \
             task_description, failing_test, consecutive_test_failures, iteration_count, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&job.id)
        .bind(&job.repo_url)
        .bind(&job.git_ref)
        .bind(job.state.as_str())
        .bind(&job.workspace_ref)
        .bind(job.snapshot_key.as_deref())
        .bind(job.task_description.as_deref())
        .bind(job.failing_test.as_deref())
        .bind(job.consecutive_test_failures as i32)
        .bind(job.iteration_count as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::update_job_in(job, &mut tx).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn fetch_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            "SELECT id, repo_url, git_ref, state, workspace_ref, snapshot_key, \
             task_description, failing_test, consecutive_test_failures, iteration_count, \
             created_at, updated_at FROM jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        row.map(|r| job_from_row(&r)).transpose()
    }

    async fn insert_step(&self, step: &Step) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::insert_step_in(step, &mut tx).await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn fetch_step(&self, step_id: &str) -> Result<Option<Step>, StoreError> {
        let sql = format!("SELECT {} FROM steps WHERE id = $1", STEP_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        row.map(|r| step_from_row(&r)).transpose()
    }

    async fn steps_for_job(&self, job_id: &str) -> Result<Vec<Step>, StoreError> {
        let sql = format!(
            "SELECT {} FROM steps WHERE job_id = $1 ORDER BY created_at ASC, id ASC",
            STEP_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        rows.iter().map(step_from_row).collect()
    }

    async fn claim_next_pending(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Step>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let row = sqlx::query(CLAIM_SELECT)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let Some(row) = row else {
            // No pending work; dropping the transaction performs no writes.
            return Ok(None);
        };
        let mut step = step_from_row(&row)?;
        step.begin(worker_id, now);
        sqlx::query(
            "UPDATE steps SET state = $1, worker_id = $2, started_at = $3, heartbeat_at = $4 \
             WHERE id = $5",
        )
        .bind(step.state.as_str())
        .bind(step.worker_id.as_deref())
        .bind(step.started_at)
        .bind(step.heartbeat_at)
        .bind(&step.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Connection(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Some(step))
    }

    async fn running_stalled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError> {
        let sql = format!(
            "SELECT {} FROM steps WHERE state = 'RUNNING' AND heartbeat_at < $1",
            STEP_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        rows.iter().map(step_from_row).collect()
    }

    async fn commit_transition(&self, transition: &StepTransition) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        if let Some(step) = &transition.step {
            Self::update_step_in(step, &mut tx).await?;
        }
        if let Some(job) = &transition.job {
            Self::update_job_in(job, &mut tx).await?;
        }
        if let Some(step) = &transition.enqueue {
            Self::insert_step_in(step, &mut tx).await?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn save_history(&self, step_id: &str, history_json: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE steps SET conversation_history = $1 WHERE id = $2")
            .bind(history_json)
            .bind(step_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn save_snapshot_key(
        &self,
        job_id: &str,
        snapshot_key: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET snapshot_key = $1, updated_at = $2 WHERE id = $3")
            .bind(snapshot_key)
            .bind(Utc::now())
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn record_heartbeat(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE steps SET heartbeat_at = $1 WHERE id = $2")
            .bind(at)
            .bind(step_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let state_text: String = column(row, "state")?;
    let state = JobState::parse(&state_text)
        .ok_or_else(|| StoreError::Serialization(format!("unknown job state '{state_text}'")))?;
    Ok(Job {
        id: column(row, "id")?,
        repo_url: column(row, "repo_url")?,
        git_ref: column(row, "git_ref")?,
        state,
        workspace_ref: column(row, "workspace_ref")?,
        snapshot_key: column(row, "snapshot_key")?,
        task_description: column(row, "task_description")?,
        failing_test: column(row, "failing_test")?,
        consecutive_test_failures: column::<i32>(row, "consecutive_test_failures")? as u32,
        iteration_count: column::<i32>(row, "iteration_count")? as u32,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn step_from_row(row: &PgRow) -> Result<Step, StoreError> {
    let role_text: String = column(row, "role")?;
    let role = AgentRole::parse(&role_text)
        .ok_or_else(|| StoreError::Serialization(format!("unknown agent role '{role_text}'")))?;
    let state_text: String = column(row, "state")?;
    let state = StepState::parse(&state_text)
        .ok_or_else(|| StoreError::Serialization(format!("unknown step state '{state_text}'")))?;
    Ok(Step {
        id: column(row, "id")?,
        job_id: column(row, "job_id")?,
        role,
        state,
        attempt: column::<i32>(row, "attempt")? as u32,
        worker_id: column(row, "worker_id")?,
        heartbeat_at: column(row, "heartbeat_at")?,
        created_at: column(row, "created_at")?,
        started_at: column(row, "started_at")?,
        finished_at: column(row, "finished_at")?,
        result_json: column(row, "result_json")?,
        conversation_history: column(row, "conversation_history")?,
    })
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Serialization(format!("column '{name}': {e}")))
}
