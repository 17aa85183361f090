//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ResearchSessionRepository` port from the `core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use research_core::domain::{
    NewResearchSession, ResearchSession, ResearchSessionUpdate, ResearchStatus, SessionFilter,
    ValidationError,
};
use research_core::ports::{PortError, PortResult, ResearchSessionRepository};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, user_id, original_query, status, final_report, \
     parent_research_id, trace_id, created_at, updated_at";

/// Keeps `updated_at` strictly increasing even when two writes share a transaction clock.
const TOUCH_UPDATED_AT: &str =
    "updated_at = GREATEST(now(), updated_at + interval '1 microsecond')";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ResearchSessionRepository` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Rejects `parent` if `id` is already one of its ancestors.
    async fn check_parent_chain(&self, id: Uuid, parent: Uuid) -> PortResult<()> {
        let closes_loop: bool = sqlx::query_scalar(
            "WITH RECURSIVE ancestors(id, parent_research_id) AS ( \
                 SELECT id, parent_research_id FROM research_sessions WHERE id = $1 \
                 UNION \
                 SELECT r.id, r.parent_research_id FROM research_sessions r \
                 JOIN ancestors a ON r.id = a.parent_research_id \
             ) \
             SELECT EXISTS (SELECT 1 FROM ancestors WHERE id = $2)",
        )
        .bind(parent)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)?;

        if closes_loop {
            return Err(ValidationError::ParentCycle(parent).into());
        }
        Ok(())
    }

    async fn apply_update(
        &self,
        id: Uuid,
        expected: Option<ResearchStatus>,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        changes.validate_for(id)?;
        if let Some(Some(parent)) = changes.parent_research {
            self.check_parent_chain(id, parent).await?;
        }

        let mut query = QueryBuilder::<Postgres>::new("UPDATE research_sessions SET ");
        let mut set = query.separated(", ");
        if let Some(status) = changes.status {
            set.push("status = ").push_bind_unseparated(status.as_str());
        }
        if let Some(final_report) = changes.final_report {
            set.push("final_report = ").push_bind_unseparated(final_report);
        }
        if let Some(trace_id) = changes.trace_id {
            set.push("trace_id = ").push_bind_unseparated(trace_id);
        }
        if let Some(parent) = changes.parent_research {
            set.push("parent_research_id = ").push_bind_unseparated(parent);
        }
        set.push(TOUCH_UPDATED_AT);

        query.push(" WHERE id = ").push_bind(id);
        if let Some(expected) = expected {
            query.push(" AND status = ").push_bind(expected.as_str());
        }
        query.push(" RETURNING ").push(SESSION_COLUMNS);

        let record = query
            .build_query_as::<ResearchSessionRecord>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;

        match record {
            Some(record) => {
                debug!(session_id = %id, "research session updated");
                record.to_domain()
            }
            // Either the row is gone or its status moved on under us.
            None => match expected {
                Some(expected) => {
                    let current = self.get(id).await?;
                    Err(PortError::Conflict(format!(
                        "ResearchSession {} is {}, expected {}",
                        id, current.status, expected
                    )))
                }
                None => Err(PortError::session_not_found(id)),
            },
        }
    }
}

fn map_db_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::Validation("parent research does not exist".to_string())
        }
        sqlx::Error::Database(db) if db.is_check_violation() => {
            PortError::Validation(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ResearchSessionRecord {
    id: Uuid,
    user_id: i64,
    original_query: String,
    status: String,
    final_report: Option<String>,
    parent_research_id: Option<Uuid>,
    trace_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ResearchSessionRecord {
    fn to_domain(self) -> PortResult<ResearchSession> {
        let status = self
            .status
            .parse::<ResearchStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(ResearchSession {
            id: self.id,
            user_id: self.user_id,
            original_query: self.original_query,
            status,
            final_report: self.final_report,
            parent_research: self.parent_research_id,
            trace_id: self.trace_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

//=========================================================================================
// `ResearchSessionRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ResearchSessionRepository for DbAdapter {
    async fn create(&self, new: NewResearchSession) -> PortResult<ResearchSession> {
        new.validate()?;
        let sql = format!(
            "INSERT INTO research_sessions \
             (id, user_id, original_query, parent_research_id, trace_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, ResearchSessionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(new.original_query)
            .bind(new.parent_research)
            .bind(new.trace_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        debug!(session_id = %record.id, user_id = record.user_id, "research session created");
        record.to_domain()
    }

    async fn get(&self, id: Uuid) -> PortResult<ResearchSession> {
        let sql = format!("SELECT {} FROM research_sessions WHERE id = $1", SESSION_COLUMNS);
        let record = sqlx::query_as::<_, ResearchSessionRecord>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::session_not_found(id),
                _ => PortError::Unexpected(e.to_string()),
            })?;
        record.to_domain()
    }

    async fn list(&self, filter: &SessionFilter) -> PortResult<Vec<ResearchSession>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(SESSION_COLUMNS).push(" FROM research_sessions WHERE TRUE");
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(parent) = filter.parent_research {
            query.push(" AND parent_research_id = ").push_bind(parent);
        }
        query.push(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }
        if let Some(offset) = filter.offset {
            query.push(" OFFSET ").push_bind(i64::from(offset));
        }

        let records = query
            .build_query_as::<ResearchSessionRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn update(
        &self,
        id: Uuid,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        self.apply_update(id, None, changes).await
    }

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: ResearchStatus,
        changes: ResearchSessionUpdate,
    ) -> PortResult<ResearchSession> {
        self.apply_update(id, Some(expected), changes).await
    }

    async fn delete(&self, id: Uuid) -> PortResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // The foreign key would null these too; doing it here also refreshes updated_at.
        let orphaned = sqlx::query(&format!(
            "UPDATE research_sessions SET parent_research_id = NULL, {} \
             WHERE parent_research_id = $1",
            TOUCH_UPDATED_AT
        ))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?
        .rows_affected();

        let deleted = sqlx::query("DELETE FROM research_sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .rows_affected();
        if deleted == 0 {
            return Err(PortError::session_not_found(id));
        }

        tx.commit()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        debug!(session_id = %id, orphaned, "research session deleted");
        Ok(())
    }
}
