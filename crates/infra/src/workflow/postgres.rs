//! Postgres-backed workflow checkpoints.
//!
//! One row per project in `workflow_instances`: the full instance as `jsonb`
//! plus its state in a plain column so incomplete instances can be found
//! without decoding every row. Same runtime bridging as the Postgres
//! relationship store: synchronous trait, queries via `Handle::block_on`.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use adminhub_projects::ProjectId;

use super::state::WorkflowState;
use super::store::{WorkflowStore, WorkflowStoreError};
use super::types::WorkflowInstance;

const TERMINAL_STATES: [WorkflowState; 3] = [
    WorkflowState::Completed,
    WorkflowState::Failed,
    WorkflowState::Cancelled,
];

#[derive(Debug, Clone)]
pub struct PostgresWorkflowStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), WorkflowStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                project_id UUID PRIMARY KEY,
                tenant_id  UUID NOT NULL,
                state      TEXT NOT NULL,
                body       JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        Ok(())
    }

    #[instrument(skip(self, instance), fields(project_id = %instance.project_id()), err)]
    async fn insert(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_instances (project_id, tenant_id, state, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (project_id) DO NOTHING
            "#,
        )
        .bind(*instance.project_id().as_aggregate_id().as_uuid())
        .bind(*instance.tenant_id().as_uuid())
        .bind(instance.state.as_str())
        .bind(encode(instance)?)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        if result.rows_affected() == 0 {
            return Err(WorkflowStoreError::AlreadyExists(instance.project_id()));
        }
        Ok(())
    }

    #[instrument(skip(self, instance), fields(project_id = %instance.project_id(), state = %instance.state), err)]
    async fn update(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET state = $2, body = $3, updated_at = $4
            WHERE project_id = $1
            "#,
        )
        .bind(*instance.project_id().as_aggregate_id().as_uuid())
        .bind(instance.state.as_str())
        .bind(encode(instance)?)
        .bind(instance.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(WorkflowStoreError::NotFound(instance.project_id()));
        }
        Ok(())
    }

    async fn fetch(&self, project_id: ProjectId) -> Result<Option<WorkflowInstance>, WorkflowStoreError> {
        let row = sqlx::query("SELECT body FROM workflow_instances WHERE project_id = $1")
            .bind(*project_id.as_aggregate_id().as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        row.as_ref().map(decode).transpose()
    }

    async fn fetch_incomplete(&self) -> Result<Vec<WorkflowInstance>, WorkflowStoreError> {
        let terminal: Vec<&str> = TERMINAL_STATES.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query(
            r#"
            SELECT body FROM workflow_instances
            WHERE state <> ALL($1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(terminal)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_incomplete", e))?;

        rows.iter().map(decode).collect()
    }
}

fn encode(instance: &WorkflowInstance) -> Result<serde_json::Value, WorkflowStoreError> {
    serde_json::to_value(instance)
        .map_err(|e| WorkflowStoreError::Storage(format!("failed to encode workflow: {e}")))
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<WorkflowInstance, WorkflowStoreError> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| WorkflowStoreError::Storage(format!("failed to read workflow row: {e}")))?;
    serde_json::from_value(body)
        .map_err(|e| WorkflowStoreError::Storage(format!("failed to decode workflow: {e}")))
}

impl WorkflowStore for PostgresWorkflowStore {
    fn create(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        self.runtime.block_on(self.insert(instance))
    }

    fn load(&self, project_id: ProjectId) -> Result<Option<WorkflowInstance>, WorkflowStoreError> {
        self.runtime.block_on(self.fetch(project_id))
    }

    fn save(&self, instance: &WorkflowInstance) -> Result<(), WorkflowStoreError> {
        self.runtime.block_on(self.update(instance))
    }

    fn list_incomplete(&self) -> Result<Vec<WorkflowInstance>, WorkflowStoreError> {
        self.runtime.block_on(self.fetch_incomplete())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> WorkflowStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            WorkflowStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            WorkflowStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => WorkflowStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
