pub mod task;
pub mod user;

pub use task::{
    AuditLog, CreateTaskRequest, Priority, SortBy, SortOrder, Status, Task, TaskDetail,
    TaskFilter, TaskView, UpdateTaskRequest,
};
pub use user::{PublicUser, User};
