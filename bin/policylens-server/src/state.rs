//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use policylens_core::entities::SqliteStore;
use policylens_core::intake::LocalFileStager;
use policylens_core::interpreter::Interpreter;
use policylens_core::{Config, QueryService, TaskRunner};

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Persistent task store.
    pub store: Arc<SqliteStore>,
    /// Schedules interpretation executions.
    pub runner: TaskRunner<SqliteStore>,
    /// Read path and record mutations.
    pub queries: QueryService<SqliteStore>,
    /// Writes uploads under `config.upload_dir`.
    pub stager: Arc<LocalFileStager>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<SqliteStore>, interpreter: Arc<dyn Interpreter>) -> Self {
        let runner = TaskRunner::new(
            Arc::clone(&store),
            interpreter,
            config.runner,
            config.intake,
        );
        let queries = QueryService::new(Arc::clone(&store), config.query);
        let stager = Arc::new(LocalFileStager::new(config.upload_dir.clone()));
        Self {
            config,
            store,
            runner,
            queries,
            stager,
        }
    }
}
