pub mod task;

pub use task::{TaskFilter, TaskRecord};
