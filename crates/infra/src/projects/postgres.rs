//! Postgres-backed project store.
//!
//! Projects live in `projects` as `jsonb` with tenant, version and creation
//! time in plain columns. `insert` writes the project row and its
//! `project.created` outbox row in one transaction, so a committed project
//! always has its creation record and a rolled-back one has neither.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use adminhub_core::{AggregateRoot, ExpectedVersion, TenantId};
use adminhub_projects::{Project, ProjectId};

use super::store::{ProjectStore, ProjectStoreError};
use crate::outbox::OutboxRecord;
use crate::outbox::postgres::append_in;

#[derive(Debug, Clone)]
pub struct PostgresProjectStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresProjectStore {
    /// The outbox table must exist too (`PostgresOutbox::ensure_schema`).
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), ProjectStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id         UUID PRIMARY KEY,
                tenant_id  UUID NOT NULL,
                version    BIGINT NOT NULL,
                body       JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS projects_tenant_idx
                ON projects (tenant_id, created_at)
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    #[instrument(skip(self, project, created), fields(project_id = %project.id_typed()), err)]
    async fn insert_with_record(
        &self,
        project: &Project,
        created: &OutboxRecord,
    ) -> Result<(), ProjectStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO projects (id, tenant_id, version, body, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(uuid_of(project.id_typed()))
        .bind(*project.tenant_id().as_uuid())
        .bind(version_column(project.version()))
        .bind(encode(project)?)
        .bind(project.audit().created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        if result.rows_affected() == 0 {
            return Err(ProjectStoreError::AlreadyExists(project.id_typed()));
        }

        append_in(&mut tx, created).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn select(&self, tenant_id: TenantId, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        let row = sqlx::query("SELECT body FROM projects WHERE tenant_id = $1 AND id = $2")
            .bind(*tenant_id.as_uuid())
            .bind(uuid_of(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode).transpose()
    }

    async fn select_tenant(&self, tenant_id: TenantId) -> Result<Vec<Project>, ProjectStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM projects
            WHERE tenant_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self, project), fields(project_id = %project.id_typed(), version = project.version()), err)]
    async fn compare_and_set(
        &self,
        project: &Project,
        expected: ExpectedVersion,
    ) -> Result<(), ProjectStoreError> {
        let id = project.id_typed();
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET version = $3, body = $4
            WHERE tenant_id = $1 AND id = $2
              AND ($5::BIGINT IS NULL OR version = $5)
            "#,
        )
        .bind(*project.tenant_id().as_uuid())
        .bind(uuid_of(id))
        .bind(version_column(project.version()))
        .bind(encode(project)?)
        .bind(expected_column(expected))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM projects WHERE tenant_id = $1 AND id = $2")
                .bind(*project.tenant_id().as_uuid())
                .bind(uuid_of(id))
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("save", e))?;

        match actual {
            None => Err(ProjectStoreError::NotFound(id)),
            Some(actual) => Err(ProjectStoreError::Conflict {
                id,
                expected,
                actual: u64::try_from(actual).unwrap_or_default(),
            }),
        }
    }
}

fn uuid_of(id: ProjectId) -> uuid::Uuid {
    *id.as_aggregate_id().as_uuid()
}

fn version_column(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

/// `NULL` skips the version check.
fn expected_column(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(version_column(v)),
    }
}

fn encode(project: &Project) -> Result<serde_json::Value, ProjectStoreError> {
    serde_json::to_value(project)
        .map_err(|e| ProjectStoreError::Storage(format!("failed to encode project: {e}")))
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Project, ProjectStoreError> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| ProjectStoreError::Storage(format!("failed to read project row: {e}")))?;
    serde_json::from_value(body)
        .map_err(|e| ProjectStoreError::Storage(format!("failed to decode project: {e}")))
}

impl ProjectStore for PostgresProjectStore {
    fn insert(&self, project: &Project, created: OutboxRecord) -> Result<(), ProjectStoreError> {
        self.runtime.block_on(self.insert_with_record(project, &created))
    }

    fn get(&self, tenant_id: TenantId, id: ProjectId) -> Result<Option<Project>, ProjectStoreError> {
        self.runtime.block_on(self.select(tenant_id, id))
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<Project>, ProjectStoreError> {
        self.runtime.block_on(self.select_tenant(tenant_id))
    }

    fn save(&self, project: &Project, expected: ExpectedVersion) -> Result<(), ProjectStoreError> {
        self.runtime.block_on(self.compare_and_set(project, expected))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ProjectStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            ProjectStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            ProjectStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => ProjectStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
