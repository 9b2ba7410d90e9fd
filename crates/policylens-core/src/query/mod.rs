//! Read path and record mutations. Every call goes straight to the store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::QueryConfig;
use crate::entities::{TaskFilter, TaskRecord, TaskStore};
use crate::error::{CoreError, ValidationError};
use crate::types::{Page, TaskStatus};

/// Lookup of the tasks submitted under one `(task_name, company)`.
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    /// Substring match.
    pub task_name: String,
    /// Exact match.
    pub company: String,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Filtered listing of all tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub company: Option<String>,
    pub scene: Option<String>,
    pub created_on_or_before: Option<NaiveDate>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Client-facing summary of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub task_name: String,
    pub company: String,
    pub scene: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub result_content: Option<String>,
    pub error_msg: Option<String>,
    pub update_content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            task_name: record.task_name,
            company: record.company,
            scene: record.scene,
            status: record.status,
            progress: record.progress,
            result_content: record.result_content,
            error_msg: record.error_msg,
            update_content: record.update_content,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

pub struct QueryService<S: TaskStore> {
    store: Arc<S>,
    config: QueryConfig,
}

impl<S: TaskStore> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: TaskStore> std::fmt::Debug for QueryService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("config", &self.config)
            .finish()
    }
}

impl<S: TaskStore> QueryService<S> {
    pub fn new(store: Arc<S>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub async fn query_status(&self, query: &StatusQuery) -> Result<Page<TaskView>, CoreError> {
        let task_name = required("task_name", &query.task_name)?;
        let company = required("company", &query.company)?;
        let (page, page_size) = self.resolve_page(query.page, query.page_size)?;

        let filter = TaskFilter {
            task_name_contains: Some(task_name.to_owned()),
            company: Some(company.to_owned()),
            ..Default::default()
        };
        self.fetch(&filter, page, page_size).await
    }

    pub async fn list_tasks(&self, query: &TaskListQuery) -> Result<Page<TaskView>, CoreError> {
        let (page, page_size) = self.resolve_page(query.page, query.page_size)?;
        let filter = TaskFilter {
            task_name_contains: None,
            company: optional(&query.company),
            scene: optional(&query.scene),
            status: query.status,
            created_on_or_before: query.created_on_or_before,
        };
        self.fetch(&filter, page, page_size).await
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskView, CoreError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(not_found(task_id));
        }
        self.store
            .get_task(task_id)
            .await?
            .map(TaskView::from)
            .ok_or_else(|| not_found(task_id))
    }

    /// Store user edits on a task. Independent of the task's status.
    pub async fn update_content(&self, task_id: &str, content: &str) -> Result<(), CoreError> {
        let task_id = task_id.trim();
        if task_id.is_empty() || self.store.update_task_content(task_id, content).await? == 0 {
            return Err(not_found(task_id));
        }
        debug!(task_id, "task content updated");
        Ok(())
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), CoreError> {
        let task_id = task_id.trim();
        if task_id.is_empty() || self.store.delete_task(task_id).await? == 0 {
            return Err(not_found(task_id));
        }
        info!(task_id, "task deleted");
        Ok(())
    }

    /// Delete every listed task in one statement and return how many existed.
    pub async fn delete_tasks(&self, task_ids: &[String]) -> Result<u64, CoreError> {
        let ids: Vec<String> = task_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .collect();
        if ids.is_empty() {
            return Err(ValidationError::InvalidRequest("task_ids list is required".into()).into());
        }
        let removed = self.store.delete_tasks(&ids).await?;
        info!(requested = ids.len(), removed, "tasks deleted");
        Ok(removed)
    }

    fn resolve_page(&self, page: Option<i64>, page_size: Option<i64>) -> Result<(u32, u32), ValidationError> {
        let page = page.unwrap_or(1);
        if page < 1 {
            return Err(ValidationError::InvalidPagination(format!(
                "page must be at least 1, got {page}"
            )));
        }
        let page_size = page_size.unwrap_or(i64::from(self.config.default_page_size));
        if page_size < 1 {
            return Err(ValidationError::InvalidPagination(format!(
                "page_size must be at least 1, got {page_size}"
            )));
        }
        let page_size = page_size.min(i64::from(self.config.max_page_size));
        let page = u32::try_from(page).map_err(|_| {
            ValidationError::InvalidPagination(format!("page {page} is out of range"))
        })?;
        Ok((page, page_size as u32))
    }

    async fn fetch(&self, filter: &TaskFilter, page: u32, page_size: u32) -> Result<Page<TaskView>, CoreError> {
        let (rows, total) = self.store.query_tasks(filter, page, page_size).await?;
        Ok(Page::new(rows, page, page_size, total).map(TaskView::from))
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(value)
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn not_found(task_id: &str) -> CoreError {
    CoreError::NotFound(format!("task {task_id}"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::SqliteStore;
    use crate::types::{NewTask, TaskTransition};
    use chrono::{Duration, TimeZone};

    async fn service() -> (Arc<SqliteStore>, QueryService<SqliteStore>) {
        let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let service = QueryService::new(
            store.clone(),
            QueryConfig {
                default_page_size: 10,
                max_page_size: 5,
            },
        );
        (store, service)
    }

    async fn seed(store: &SqliteStore, task_id: &str, name: &str, company: &str, minutes: i64) {
        let mut record = TaskRecord::pending(task_id, &NewTask::new(name, company, "medical"), None);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes);
        record.created_at = at;
        record.updated_at = at;
        store.create_task(record).await.unwrap();
        store
            .update_task_state(task_id, &TaskTransition::Processing { progress: 5 })
            .await
            .unwrap();
        store
            .update_task_state(
                task_id,
                &TaskTransition::Completed {
                    result_content: "{}".into(),
                },
            )
            .await
            .unwrap();
    }

    fn status_query(name: &str, company: &str, page: Option<i64>, page_size: Option<i64>) -> StatusQuery {
        StatusQuery {
            task_name: name.into(),
            company: company.into(),
            page,
            page_size,
        }
    }

    #[tokio::test]
    async fn pages_are_newest_first_with_full_totals() {
        let (store, service) = service().await;
        for i in 0..12 {
            seed(&store, &format!("T{i:02}"), &format!("order {i}"), "acme", i).await;
        }
        seed(&store, "TX", "order x", "globex", 99).await;

        let page = service
            .query_status(&status_query("order", "acme", Some(2), Some(5)))
            .await
            .unwrap();
        assert_eq!(page.total, 12);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next && page.has_prev);
        let ids: Vec<_> = page.items.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, ["T06", "T05", "T04", "T03", "T02"]);
    }

    #[tokio::test]
    async fn page_size_is_clamped_and_defaults_apply() {
        let (store, service) = service().await;
        for i in 0..7 {
            seed(&store, &format!("T{i}"), "same", "acme", i).await;
        }

        let page = service
            .query_status(&status_query("same", "acme", None, Some(500)))
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 5);
        assert_eq!(page.items.len(), 5);

        let page = service
            .query_status(&status_query("same", "acme", None, None))
            .await
            .unwrap();
        // Default 10 is itself clamped by the configured maximum of 5.
        assert_eq!(page.page_size, 5);
    }

    #[tokio::test]
    async fn invalid_pagination_is_rejected() {
        let (_store, service) = service().await;
        for (page, size) in [(Some(0), None), (None, Some(0)), (Some(-3), Some(5))] {
            let err = service
                .query_status(&status_query("a", "b", page, size))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                CoreError::Validation(ValidationError::InvalidPagination(_))
            ));
        }
    }

    #[tokio::test]
    async fn identity_fields_are_required() {
        let (_store, service) = service().await;
        let err = service
            .query_status(&status_query("", "acme", None, None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::MissingField("task_name"))
        ));
    }

    #[tokio::test]
    async fn unknown_identity_returns_an_empty_page() {
        let (_store, service) = service().await;
        let page = service
            .query_status(&status_query("nothing", "nobody", None, None))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[tokio::test]
    async fn listing_filters_by_company_and_status() {
        let (store, service) = service().await;
        seed(&store, "T1", "a", "acme", 0).await;
        seed(&store, "T2", "b", "globex", 1).await;
        store
            .create_task(TaskRecord::pending("T3", &NewTask::new("c", "acme", "life"), None))
            .await
            .unwrap();

        let page = service
            .list_tasks(&TaskListQuery {
                company: Some("acme".into()),
                status: Some(TaskStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].task_id, "T1");

        // Blank filters mean "all".
        let page = service
            .list_tasks(&TaskListQuery {
                company: Some(" ".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn mutations_report_missing_tasks() {
        let (store, service) = service().await;
        seed(&store, "T1", "a", "acme", 0).await;

        service.update_content("T1", "edited").await.unwrap();
        assert_eq!(
            service.get_task("T1").await.unwrap().update_content.as_deref(),
            Some("edited")
        );

        assert!(matches!(
            service.update_content("nope", "x").await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(service.get_task("  ").await, Err(CoreError::NotFound(_))));

        service.delete_task("T1").await.unwrap();
        assert!(matches!(service.delete_task("T1").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn batch_delete_ignores_blank_ids() {
        let (store, service) = service().await;
        seed(&store, "T1", "a", "acme", 0).await;
        seed(&store, "T2", "b", "acme", 1).await;

        let removed = service
            .delete_tasks(&[" T1 ".into(), "".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let err = service.delete_tasks(&["  ".into()]).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::InvalidRequest(_))
        ));
    }
}
