pub mod forms;
pub mod interpretation;
pub mod task;
