//! Task data model: wire structs, the state graph, views and validation.

pub mod state;
pub mod task;
pub mod validation;
pub mod view;

pub use state::TaskState;
pub use task::{
    CancelTaskResponse, CreateTaskResponse, Executor, ExecutorLog, Input, IoType,
    ListTasksResponse, Output, OutputFileLog, Resources, Task, TaskDocument, TaskLog,
};
pub use view::View;
