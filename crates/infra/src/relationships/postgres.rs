//! Postgres-backed relationship store.
//!
//! Tuples live in `relationship_tuples`, one row per fact, keyed by all four
//! columns so a duplicate write is a no-op (`ON CONFLICT DO NOTHING`).
//! Subjects are stored in their textual form (`user:<uuid>`, `tenant:<id>`,
//! `tenant:<id>#member`).
//!
//! The `RelationshipStore` trait is synchronous; queries run on the tokio
//! runtime given at construction via `Handle::block_on`. Call it from plain
//! threads (workflow runners, the relay), never from inside an async task.
//!
//! A check issues one query per evaluation step and is not isolated from
//! concurrent writes.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use adminhub_auth::{
    ObjectRef, Relation, RelationSchema, RelationshipStore, RelationshipStoreError,
    RelationshipTuple, Subject, TupleFilter, TupleReader, evaluate,
};

#[derive(Debug, Clone)]
pub struct PostgresRelationshipStore {
    pool: Arc<PgPool>,
    runtime: Handle,
    schema: Arc<RelationSchema>,
}

impl PostgresRelationshipStore {
    pub fn new(pool: PgPool, runtime: Handle, schema: RelationSchema) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
            schema: Arc::new(schema),
        }
    }

    /// Create the tuple table and its lookup index if missing.
    pub async fn ensure_schema(&self) -> Result<(), RelationshipStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationship_tuples (
                object_type TEXT NOT NULL,
                object_id   TEXT NOT NULL,
                relation    TEXT NOT NULL,
                subject     TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (object_type, object_id, relation, subject)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_table", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS relationship_tuples_subject_idx
                ON relationship_tuples (subject)
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_index", e))?;

        Ok(())
    }

    #[instrument(skip(self, tuple), fields(tuple = %tuple), err)]
    async fn insert(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO relationship_tuples (object_type, object_id, relation, subject)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .bind(tuple.relation.as_str())
        .bind(tuple.subject.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, tuple), fields(tuple = %tuple), err)]
    async fn delete(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM relationship_tuples
            WHERE object_type = $1 AND object_id = $2 AND relation = $3 AND subject = $4
            "#,
        )
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .bind(tuple.relation.as_str())
        .bind(tuple.subject.to_string())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS found FROM relationship_tuples
            WHERE object_type = $1 AND object_id = $2 AND relation = $3 AND subject = $4
            "#,
        )
        .bind(&tuple.object.object_type)
        .bind(&tuple.object.object_id)
        .bind(tuple.relation.as_str())
        .bind(tuple.subject.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("exists", e))?;

        Ok(row.is_some())
    }

    async fn select(&self, filter: &TupleFilter) -> Result<Vec<RelationshipTuple>, RelationshipStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT object_type, object_id, relation, subject
            FROM relationship_tuples
            WHERE ($1::text IS NULL OR subject = $1)
              AND ($2::text IS NULL OR relation = $2)
              AND ($3::text IS NULL OR object_type = $3)
              AND ($4::text IS NULL OR object_id = $4)
            "#,
        )
        .bind(filter.subject.as_ref().map(ToString::to_string))
        .bind(filter.relation.as_ref().map(|r| r.as_str().to_string()))
        .bind(filter.object.as_ref().map(|o| o.object_type.clone()))
        .bind(filter.object.as_ref().map(|o| o.object_id.clone()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("select", e))?;

        let mut tuples = rows
            .iter()
            .map(tuple_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tuples.sort();
        Ok(tuples)
    }
}

fn tuple_from_row(row: &sqlx::postgres::PgRow) -> Result<RelationshipTuple, RelationshipStoreError> {
    let get = |column: &str| -> Result<String, RelationshipStoreError> {
        row.try_get::<String, _>(column)
            .map_err(|e| RelationshipStoreError::Malformed(format!("column {column}: {e}")))
    };

    let subject: Subject = get("subject")?.parse()?;
    Ok(RelationshipTuple::new(
        subject,
        Relation::new(get("relation")?),
        ObjectRef::new(get("object_type")?, get("object_id")?),
    ))
}

impl TupleReader for PostgresRelationshipStore {
    fn contains(&self, tuple: &RelationshipTuple) -> Result<bool, RelationshipStoreError> {
        self.runtime.block_on(self.exists(tuple))
    }

    fn subjects_of(
        &self,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<Vec<Subject>, RelationshipStoreError> {
        let filter = TupleFilter {
            relation: Some(relation.clone()),
            ..TupleFilter::for_object(object.clone())
        };
        let tuples = self.runtime.block_on(self.select(&filter))?;
        Ok(tuples.into_iter().map(|t| t.subject).collect())
    }
}

impl RelationshipStore for PostgresRelationshipStore {
    fn check(
        &self,
        subject: &Subject,
        relation: &Relation,
        object: &ObjectRef,
    ) -> Result<bool, RelationshipStoreError> {
        evaluate(self, &self.schema, subject, relation, object)
    }

    fn write(&self, tuple: RelationshipTuple) -> Result<(), RelationshipStoreError> {
        if self.runtime.block_on(self.insert(&tuple))? {
            debug!(%tuple, "relationship written");
        }
        Ok(())
    }

    fn remove(&self, tuple: &RelationshipTuple) -> Result<(), RelationshipStoreError> {
        if self.runtime.block_on(self.delete(tuple))? {
            debug!(%tuple, "relationship removed");
        }
        Ok(())
    }

    fn read(&self, filter: &TupleFilter) -> Result<Vec<RelationshipTuple>, RelationshipStoreError> {
        self.runtime.block_on(self.select(filter))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RelationshipStoreError {
    match err {
        sqlx::Error::Database(db_err) => RelationshipStoreError::Unavailable(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RelationshipStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RelationshipStoreError::Malformed(format!("decode error in {operation}: {err}"))
        }
        _ => RelationshipStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
