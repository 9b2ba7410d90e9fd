//! Asynchronous interpretation task engine.
//!
//! A submission is validated and staged by [`intake`], recorded in the
//! [`entities`] store as `Pending`, and executed off the request path by the
//! [`runner`], which calls an [`interpreter`] and advances the row to a
//! terminal state. Clients observe progress through [`query`].

pub mod config;
pub mod entities;
pub mod error;
pub mod intake;
pub mod interpreter;
pub mod query;
pub mod runner;
pub mod types;

pub use config::Config;
pub use entities::{SqliteStore, TaskFilter, TaskRecord, TaskStore};
pub use error::{AdapterError, CoreError, Result, ValidationError};
pub use intake::{FileHandle, HandleSet, SubmissionBundle, UploadedFile};
pub use interpreter::{InterpretRequest, Interpreter};
pub use query::{QueryService, StatusQuery, TaskListQuery, TaskView};
pub use runner::TaskRunner;
pub use types::{NewTask, Page, TaskStatus, TaskTransition};
