use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::{CommitOutcome, StoreError, SwapResult, WorkflowStore};
use crate::config::DatabaseConfig;
use crate::workflows::{
    Approval, CompletionCommit, IdempotencyRecord, Step, StepArtifact, StepAttempt, UsageRecord,
    Workflow, WorkflowState,
};

/// Durable store backed by SQLite. The state column is guarded by a CHECK
/// constraint listing every workflow state.
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    /// Create the database if needed, connect and optionally run migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        if config.auto_migrate {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }

    async fn current_state<'e, E>(
        executor: E,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let row = sqlx::query("SELECT state FROM workflows WHERE id = ?1 AND organization_id = ?2")
            .bind(workflow_id.to_string())
            .bind(organization_id)
            .fetch_optional(executor)
            .await?;

        row.map(|r| parse_state(&r.get::<String, _>("state")))
            .transpose()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width keeps lexical order equal to chronological order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(format!("timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::corrupt(format!("id '{raw}': {e}")))
}

fn parse_state(raw: &str) -> Result<WorkflowState, StoreError> {
    raw.parse()
        .map_err(|e: crate::workflows::ParseError| StoreError::corrupt(e.to_string()))
}

fn parse_step(raw: &str) -> Result<Step, StoreError> {
    raw.parse()
        .map_err(|e: crate::workflows::ParseError| StoreError::corrupt(e.to_string()))
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, StoreError> {
    let metadata: String = row.get("step_metadata");
    let step_metadata: Map<String, Value> = serde_json::from_str(&metadata)?;

    Ok(Workflow {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        organization_id: row.get("organization_id"),
        state: parse_state(&row.get::<String, _>("state"))?,
        step_metadata,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

const SELECT_WORKFLOW: &str = r#"
    SELECT id, organization_id, state, step_metadata, created_at, updated_at
    FROM workflows
    WHERE id = ?1 AND organization_id = ?2
"#;

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows (id, organization_id, state, step_metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.organization_id)
        .bind(workflow.state.as_str())
        .bind(serde_json::to_string(&workflow.step_metadata)?)
        .bind(timestamp(workflow.created_at))
        .bind(timestamp(workflow.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(workflow.id));
        }
        Ok(())
    }

    async fn load_workflow(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query(SELECT_WORKFLOW)
            .bind(workflow_id.to_string())
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn compare_and_swap_state(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        expected: WorkflowState,
        next: WorkflowState,
        attempt: Option<StepAttempt>,
    ) -> Result<SwapResult, StoreError> {
        // A NULL path leaves step_metadata untouched; a NULL id stores JSON null
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET state = ?1,
                step_metadata = CASE WHEN ?6 IS NULL THEN step_metadata
                                     ELSE json_set(step_metadata, '$.' || ?6, ?7) END,
                updated_at = ?2
            WHERE id = ?3 AND organization_id = ?4 AND state = ?5
            "#,
        )
        .bind(next.as_str())
        .bind(timestamp(Utc::now()))
        .bind(workflow_id.to_string())
        .bind(organization_id)
        .bind(expected.as_str())
        .bind(attempt.map(|a| a.metadata_key()))
        .bind(attempt.and_then(|a| a.dispatch_id).map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(SwapResult {
                applied: true,
                current_state: Some(next),
            });
        }

        let current_state = Self::current_state(&self.pool, workflow_id, organization_id).await?;
        debug!(
            workflow_id = %workflow_id,
            expected = %expected,
            current = ?current_state,
            "Conditional update matched no row"
        );
        Ok(SwapResult {
            applied: false,
            current_state,
        })
    }

    async fn commit_step_completion(
        &self,
        commit: &CompletionCommit,
    ) -> Result<CommitOutcome, StoreError> {
        let workflow_id = commit.workflow_id.to_string();
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO idempotency_records (workflow_id, step, token, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (workflow_id, step, token) DO NOTHING
            "#,
        )
        .bind(&workflow_id)
        .bind(commit.step.as_str())
        .bind(&commit.token)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Duplicate);
        }

        let swapped = sqlx::query(
            r#"
            UPDATE workflows
            SET state = ?1,
                step_metadata = CASE WHEN ?7 IS NULL
                    THEN json_set(step_metadata, '$.' || ?2, json('true'))
                    ELSE json_set(step_metadata, '$.' || ?2, json('true'), '$.' || ?7, ?8) END,
                updated_at = ?3
            WHERE id = ?4 AND organization_id = ?5 AND state = ?6
            "#,
        )
        .bind(commit.next_state.as_str())
        .bind(commit.step.metadata_key())
        .bind(&now)
        .bind(&workflow_id)
        .bind(&commit.organization_id)
        .bind(commit.expected_state.as_str())
        .bind(commit.next_attempt.map(|a| a.metadata_key()))
        .bind(
            commit
                .next_attempt
                .and_then(|a| a.dispatch_id)
                .map(|id| id.to_string()),
        )
        .execute(&mut *tx)
        .await?;

        if swapped.rows_affected() == 0 {
            let current =
                Self::current_state(&mut *tx, commit.workflow_id, &commit.organization_id).await?;
            tx.rollback().await?;
            return Ok(CommitOutcome::StateMoved(current));
        }

        sqlx::query(
            r#"
            INSERT INTO step_artifacts (workflow_id, step, idempotency_token, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&workflow_id)
        .bind(commit.step.as_str())
        .bind(&commit.token)
        .bind(serde_json::to_string(&commit.artifact)?)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if let Some(usage) = &commit.usage {
            sqlx::query(
                r#"
                INSERT INTO usage_records
                    (workflow_id, organization_id, step, idempotency_token, kind, quantity, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&workflow_id)
            .bind(&commit.organization_id)
            .bind(commit.step.as_str())
            .bind(&commit.token)
            .bind(&usage.kind)
            .bind(usage.quantity)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query(SELECT_WORKFLOW)
            .bind(&workflow_id)
            .bind(&commit.organization_id)
            .fetch_one(&mut *tx)
            .await?;
        let workflow = workflow_from_row(&row)?;

        tx.commit().await?;
        Ok(CommitOutcome::Applied(workflow))
    }

    async fn insert_approval(&self, approval: &Approval) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO approvals
                (id, workflow_id, organization_id, entity_type, decision, approver_id, notes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(approval.id.to_string())
        .bind(approval.workflow_id.to_string())
        .bind(&approval.organization_id)
        .bind(&approval.entity_type)
        .bind(approval.decision.as_str())
        .bind(&approval.approver_id)
        .bind(approval.notes.as_deref())
        .bind(timestamp(approval.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_approvals(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<Approval>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, organization_id, entity_type, decision, approver_id, notes, created_at
            FROM approvals
            WHERE workflow_id = ?1 AND organization_id = ?2
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Approval {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    workflow_id: parse_uuid(&row.get::<String, _>("workflow_id"))?,
                    organization_id: row.get("organization_id"),
                    entity_type: row.get("entity_type"),
                    decision: row
                        .get::<String, _>("decision")
                        .parse()
                        .map_err(|e: crate::workflows::ParseError| {
                            StoreError::corrupt(e.to_string())
                        })?,
                    approver_id: row.get("approver_id"),
                    notes: row.get("notes"),
                    created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn find_idempotency_record(
        &self,
        workflow_id: Uuid,
        step: Step,
        token: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT workflow_id, step, token, created_at
            FROM idempotency_records
            WHERE workflow_id = ?1 AND step = ?2 AND token = ?3
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(step.as_str())
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(IdempotencyRecord {
                workflow_id: parse_uuid(&row.get::<String, _>("workflow_id"))?,
                step: parse_step(&row.get::<String, _>("step"))?,
                token: row.get("token"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            })
        })
        .transpose()
    }

    async fn list_artifacts(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
        step: Option<Step>,
    ) -> Result<Vec<StepArtifact>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT a.workflow_id, a.step, a.idempotency_token, a.payload, a.created_at
            FROM step_artifacts a
            JOIN workflows w ON w.id = a.workflow_id
            WHERE a.workflow_id = ?1 AND w.organization_id = ?2
              AND (?3 IS NULL OR a.step = ?3)
            ORDER BY a.created_at ASC, a.rowid ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(organization_id)
        .bind(step.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(StepArtifact {
                    workflow_id: parse_uuid(&row.get::<String, _>("workflow_id"))?,
                    step: parse_step(&row.get::<String, _>("step"))?,
                    idempotency_token: row.get("idempotency_token"),
                    payload: serde_json::from_str(&row.get::<String, _>("payload"))?,
                    created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn list_usage(
        &self,
        workflow_id: Uuid,
        organization_id: &str,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, organization_id, step, idempotency_token, kind, quantity, created_at
            FROM usage_records
            WHERE workflow_id = ?1 AND organization_id = ?2
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UsageRecord {
                    workflow_id: parse_uuid(&row.get::<String, _>("workflow_id"))?,
                    organization_id: row.get("organization_id"),
                    step: parse_step(&row.get::<String, _>("step"))?,
                    idempotency_token: row.get("idempotency_token"),
                    kind: row.get("kind"),
                    quantity: row.get("quantity"),
                    created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}
