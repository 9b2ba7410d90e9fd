use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{QueryBuilder, Sqlite};
use tracing::warn;

use crate::entities::{SqliteStore, TaskFilter, TaskRecord};
use crate::types::{TaskStatus, TaskTransition, PROGRESS_COMPLETE};

const TASK_COLUMNS: &str = "task_id, task_name, company, scene, status, progress, \
     result_content, error_msg, update_content, input_data, created_at, updated_at";

type TaskRow = (
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

/// Durable task table. Every method is a single atomic statement.
pub trait TaskStore: Send + Sync + 'static {
    /// Insert a new row. Fails with a unique violation if the `task_id`
    /// exists or the identity already has a non-terminal task.
    fn create_task(&self, record: TaskRecord)
    -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    fn get_task(
        &self,
        task_id: &str,
    ) -> impl Future<Output = Result<Option<TaskRecord>, sqlx::Error>> + Send;

    /// Apply `transition` if the row exists and its current status is a valid
    /// predecessor. Returns the number of rows changed (0 or 1).
    fn update_task_state(
        &self,
        task_id: &str,
        transition: &TaskTransition,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Set the user-edited content. Returns the number of rows changed.
    fn update_task_content(
        &self,
        task_id: &str,
        content: &str,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn delete_task(&self, task_id: &str) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn delete_tasks(
        &self,
        task_ids: &[String],
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// One page of matching rows, newest first, plus the total match count.
    fn query_tasks(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<(Vec<TaskRecord>, u64), sqlx::Error>> + Send;

    /// Fail every `pending`/`processing` row with `reason`. Used at startup to
    /// clean up after a previous process.
    fn interrupt_active_tasks(
        &self,
        reason: &str,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

/// True when `err` is the partial unique index on active
/// `(task_name, company)` rows rather than a primary-key collision.
pub fn is_active_identity_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && !db.message().contains(".task_id"),
        _ => false,
    }
}

impl TaskStore for SqliteStore {
    async fn create_task(&self, record: TaskRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO interpretation_tasks (task_id, task_name, company, scene, status, progress, \
             result_content, error_msg, update_content, input_data, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&record.task_id)
        .bind(&record.task_name)
        .bind(&record.company)
        .bind(&record.scene)
        .bind(record.status.as_str())
        .bind(i64::from(record.progress))
        .bind(&record.result_content)
        .bind(&record.error_msg)
        .bind(&record.update_content)
        .bind(&record.input_data)
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, sqlx::Error> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM interpretation_tasks WHERE task_id = ?1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn update_task_state(
        &self,
        task_id: &str,
        transition: &TaskTransition,
    ) -> Result<u64, sqlx::Error> {
        let next = transition.status();
        let guard = status_list(next.predecessors());
        let updated_at = timestamp(Utc::now());

        let result = match transition {
            TaskTransition::Processing { progress } => {
                sqlx::query(&format!(
                    "UPDATE interpretation_tasks \
                     SET status = ?1, progress = MAX(progress, ?2), updated_at = ?3 \
                     WHERE task_id = ?4 AND status IN ({guard})"
                ))
                .bind(next.as_str())
                .bind(i64::from((*progress).min(PROGRESS_COMPLETE)))
                .bind(&updated_at)
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
            TaskTransition::Completed { result_content } => {
                sqlx::query(&format!(
                    "UPDATE interpretation_tasks \
                     SET status = ?1, progress = ?2, result_content = ?3, error_msg = NULL, updated_at = ?4 \
                     WHERE task_id = ?5 AND status IN ({guard})"
                ))
                .bind(next.as_str())
                .bind(i64::from(PROGRESS_COMPLETE))
                .bind(result_content)
                .bind(&updated_at)
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
            TaskTransition::Failed { reason } => {
                sqlx::query(&format!(
                    "UPDATE interpretation_tasks \
                     SET status = ?1, result_content = NULL, error_msg = ?2, updated_at = ?3 \
                     WHERE task_id = ?4 AND status IN ({guard})"
                ))
                .bind(next.as_str())
                .bind(reason)
                .bind(&updated_at)
                .bind(task_id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn update_task_content(&self, task_id: &str, content: &str) -> Result<u64, sqlx::Error> {
        let updated_at = timestamp(Utc::now());
        let result = sqlx::query(
            "UPDATE interpretation_tasks SET update_content = ?1, updated_at = ?2 WHERE task_id = ?3",
        )
        .bind(content)
        .bind(&updated_at)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_task(&self, task_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM interpretation_tasks WHERE task_id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_tasks(&self, task_ids: &[String]) -> Result<u64, sqlx::Error> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM interpretation_tasks WHERE task_id IN (");
        let mut ids = qb.separated(", ");
        for id in task_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query_tasks(
        &self,
        filter: &TaskFilter,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<TaskRecord>, u64), sqlx::Error> {
        let mut count_qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM interpretation_tasks");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM interpretation_tasks"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(offset);
        let rows: Vec<TaskRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok((
            rows.into_iter().map(from_row).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn interrupt_active_tasks(&self, reason: &str) -> Result<u64, sqlx::Error> {
        let updated_at = timestamp(Utc::now());
        let result = sqlx::query(&format!(
            "UPDATE interpretation_tasks \
             SET status = ?1, result_content = NULL, error_msg = ?2, updated_at = ?3 \
             WHERE status IN ({})",
            status_list(TaskStatus::Failed.predecessors())
        ))
        .bind(TaskStatus::Failed.as_str())
        .bind(reason)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &TaskFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(name) = &filter.task_name_contains {
        qb.push(" AND task_name LIKE ")
            .push_bind(format!("%{}%", escape_like(name)))
            .push(" ESCAPE '\\'");
    }
    if let Some(company) = &filter.company {
        qb.push(" AND company = ").push_bind(company.clone());
    }
    if let Some(scene) = &filter.scene {
        qb.push(" AND scene = ").push_bind(scene.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(date) = filter.created_on_or_before {
        qb.push(" AND substr(created_at, 1, 10) <= ")
            .push_bind(date.format("%Y-%m-%d").to_string());
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `'pending', 'processing'`, built from enum names only.
fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_row(row: TaskRow) -> TaskRecord {
    let (
        task_id,
        task_name,
        company,
        scene,
        status,
        progress,
        result_content,
        error_msg,
        update_content,
        input_data,
        created_at,
        updated_at,
    ) = row;

    let status = TaskStatus::from_str(&status).unwrap_or_else(|_| {
        warn!(task_id = %task_id, raw = %status, "unknown task status; reporting as failed");
        TaskStatus::Failed
    });

    TaskRecord {
        status,
        progress: progress.clamp(0, i64::from(PROGRESS_COMPLETE)) as u8,
        result_content,
        error_msg,
        update_content,
        input_data,
        created_at: created_at.parse().unwrap_or_else(|e: chrono::ParseError| {
            warn!(raw = %created_at, error = %e, "failed to parse task created_at; using now");
            Utc::now()
        }),
        updated_at: updated_at.parse().unwrap_or_else(|e: chrono::ParseError| {
            warn!(raw = %updated_at, error = %e, "failed to parse task updated_at; using now");
            Utc::now()
        }),
        task_id,
        task_name,
        company,
        scene,
    }
}
