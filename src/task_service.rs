//! Task Engine: validation, CRUD orchestration, audit diffing and
//! reassignment detection. Persistence goes through the store traits so the
//! whole pipeline is testable against in-memory doubles.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    AuditLog, CreateTaskRequest, PublicUser, SortBy, SortOrder, Status, Task, TaskDetail,
    TaskFilter, TaskView, UpdateTaskRequest, User,
};
use crate::repository::{TaskStore, UserStore};

/// Detail views surface at most this many audit entries; the store may
/// retain more.
const AUDIT_DETAIL_LIMIT: usize = 10;

pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    users: Arc<dyn UserStore>,
}

/// What a mutation caller needs to drive notification fan-out.
pub struct UpdateOutcome {
    pub task: TaskView,
    pub was_reassigned: bool,
    pub new_assignee_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: String,
    pub new_value: String,
}

/// Pure diff over the tracked fields {status, priority, assignedTo}.
/// Title, description and due date changes are deliberately not audited.
pub fn diff_tracked_fields(old: &Task, new: &Task) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.status != new.status {
        changes.push(FieldChange {
            field: "status",
            old_value: old.status.as_str().to_string(),
            new_value: new.status.as_str().to_string(),
        });
    }
    if old.priority != new.priority {
        changes.push(FieldChange {
            field: "priority",
            old_value: old.priority.as_str().to_string(),
            new_value: new.priority.as_str().to_string(),
        });
    }
    if old.assigned_to_id != new.assigned_to_id {
        changes.push(FieldChange {
            field: "assignedTo",
            old_value: render_assignee(&old.assigned_to_id),
            new_value: render_assignee(&new.assigned_to_id),
        });
    }
    changes
}

// Existing audit history uses the literal string "none" for an absent
// assignee, so keep rendering it bit-for-bit.
fn render_assignee(id: &Option<String>) -> String {
    id.clone().unwrap_or_else(|| "none".to_string())
}

/// Single-key sort with a deterministic id-ascending tiebreak, so repeated
/// queries return a stable sequence.
pub fn sort_tasks(tasks: &mut [Task], sort_by: SortBy, order: SortOrder) {
    tasks.sort_by(|a, b| {
        let key = match sort_by {
            SortBy::DueDate => a.due_date.cmp(&b.due_date),
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::Priority => a.priority.rank().cmp(&b.priority.rank()),
            SortBy::Status => a.status.rank().cmp(&b.status.rank()),
        };
        let key = match order {
            SortOrder::Asc => key,
            SortOrder::Desc => key.reverse(),
        };
        key.then_with(|| a.id.cmp(&b.id))
    });
}

fn validate_title(title: &str) -> Result<(), ApiError> {
    let len = title.chars().count();
    if len == 0 {
        return Err(ApiError::Validation("title is required".to_string()));
    }
    if len > 100 {
        return Err(ApiError::Validation(
            "title must be at most 100 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), ApiError> {
    if description.is_empty() {
        return Err(ApiError::Validation("description is required".to_string()));
    }
    Ok(())
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, users: Arc<dyn UserStore>) -> Self {
        TaskService { tasks, users }
    }

    pub async fn create_task(
        &self,
        input: CreateTaskRequest,
        creator_id: &str,
    ) -> Result<TaskView, ApiError> {
        validate_title(&input.title)?;
        validate_description(&input.description)?;

        if let Some(assignee_id) = &input.assigned_to_id {
            self.require_assignee(assignee_id).await?;
        }
        let creator = self.require_user(creator_id).await?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            description: input.description,
            due_date: input.due_date,
            priority: input.priority,
            status: input.status.unwrap_or(Status::Todo),
            creator_id: creator_id.to_string(),
            assigned_to_id: input.assigned_to_id,
            created_at: now,
            updated_at: now,
        };
        self.tasks.create(&task).await?;

        // Exactly one CREATED entry per creation.
        self.tasks
            .append_audit(&AuditLog {
                id: Uuid::new_v4().to_string(),
                task_id: task.id.clone(),
                action: "CREATED".to_string(),
                field: None,
                old_value: None,
                new_value: None,
                user_id: creator.id.clone(),
                user_name: creator.name.clone(),
                created_at: now,
            })
            .await?;

        self.view(task).await
    }

    pub async fn get_task(&self, id: &str) -> Result<TaskDetail, ApiError> {
        let task = self
            .tasks
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("task not found".to_string()))?;
        let audit_logs = self.tasks.recent_audit(id, AUDIT_DETAIL_LIMIT).await?;
        Ok(TaskDetail {
            view: self.view(task).await?,
            audit_logs,
        })
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<TaskView>, ApiError> {
        let mut tasks = self
            .tasks
            .find_filtered(filter.status, filter.priority)
            .await?;
        sort_tasks(
            &mut tasks,
            filter.sort_by.unwrap_or(SortBy::CreatedAt),
            filter.order.unwrap_or(SortOrder::Desc),
        );
        self.views(tasks).await
    }

    pub async fn update_task(
        &self,
        id: &str,
        patch: UpdateTaskRequest,
        actor_id: &str,
    ) -> Result<UpdateOutcome, ApiError> {
        let existing = self
            .tasks
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("task not found".to_string()))?;

        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }
        if let Some(Some(assignee_id)) = &patch.assigned_to_id {
            self.require_assignee(assignee_id).await?;
        }
        let actor = self.require_user(actor_id).await?;

        let was_reassigned = match &patch.assigned_to_id {
            Some(new_assignee) => *new_assignee != existing.assigned_to_id,
            None => false,
        };
        let new_assignee_id = patch.assigned_to_id.clone().flatten();

        let mut updated = existing.clone();
        if let Some(title) = patch.title {
            updated.title = title;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(due_date) = patch.due_date {
            updated.due_date = due_date;
        }
        if let Some(priority) = patch.priority {
            updated.priority = priority;
        }
        if let Some(status) = patch.status {
            updated.status = status;
        }
        if let Some(assignee) = patch.assigned_to_id {
            updated.assigned_to_id = assignee;
        }
        updated.updated_at = Utc::now();

        // Last write wins here: no version check, and the audit rows below
        // are not in one transaction with this write. See DESIGN.md for why
        // both gaps stay.
        self.tasks.update(&updated).await?;

        for change in diff_tracked_fields(&existing, &updated) {
            self.tasks
                .append_audit(&AuditLog {
                    id: Uuid::new_v4().to_string(),
                    task_id: updated.id.clone(),
                    action: "UPDATED".to_string(),
                    field: Some(change.field.to_string()),
                    old_value: Some(change.old_value),
                    new_value: Some(change.new_value),
                    user_id: actor.id.clone(),
                    user_name: actor.name.clone(),
                    created_at: updated.updated_at,
                })
                .await?;
        }

        Ok(UpdateOutcome {
            task: self.view(updated).await?,
            was_reassigned,
            new_assignee_id,
        })
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        if self.tasks.find_by_id(id).await?.is_none() {
            return Err(ApiError::NotFound("task not found".to_string()));
        }
        self.tasks.delete(id).await
    }

    pub async fn tasks_assigned_to(&self, user_id: &str) -> Result<Vec<TaskView>, ApiError> {
        let mut tasks = self.tasks.find_by_assignee(user_id).await?;
        sort_tasks(&mut tasks, SortBy::DueDate, SortOrder::Asc);
        self.views(tasks).await
    }

    pub async fn tasks_created_by(&self, user_id: &str) -> Result<Vec<TaskView>, ApiError> {
        let mut tasks = self.tasks.find_by_creator(user_id).await?;
        sort_tasks(&mut tasks, SortBy::CreatedAt, SortOrder::Desc);
        self.views(tasks).await
    }

    pub async fn overdue_tasks(&self) -> Result<Vec<TaskView>, ApiError> {
        let mut tasks = self.tasks.find_overdue(Utc::now()).await?;
        sort_tasks(&mut tasks, SortBy::DueDate, SortOrder::Asc);
        self.views(tasks).await
    }

    async fn require_user(&self, id: &str) -> Result<User, ApiError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
    }

    async fn require_assignee(&self, id: &str) -> Result<(), ApiError> {
        if self.users.find_by_id(id).await?.is_none() {
            return Err(ApiError::Validation("assignee not found".to_string()));
        }
        Ok(())
    }

    async fn view(&self, task: Task) -> Result<TaskView, ApiError> {
        let creator = self
            .users
            .find_by_id(&task.creator_id)
            .await?
            .map(|u| PublicUser::from(&u));
        let assigned_to = match &task.assigned_to_id {
            Some(id) => self.users.find_by_id(id).await?.map(|u| PublicUser::from(&u)),
            None => None,
        };
        Ok(TaskView {
            task,
            creator,
            assigned_to,
        })
    }

    async fn views(&self, tasks: Vec<Task>) -> Result<Vec<TaskView>, ApiError> {
        let mut cache: HashMap<String, Option<PublicUser>> = HashMap::new();
        let mut views = Vec::with_capacity(tasks.len());
        for task in tasks {
            let creator = self.cached_user(&mut cache, &task.creator_id).await?;
            let assigned_to = match &task.assigned_to_id {
                Some(id) => self.cached_user(&mut cache, id).await?,
                None => None,
            };
            views.push(TaskView {
                task,
                creator,
                assigned_to,
            });
        }
        Ok(views)
    }

    async fn cached_user(
        &self,
        cache: &mut HashMap<String, Option<PublicUser>>,
        id: &str,
    ) -> Result<Option<PublicUser>, ApiError> {
        if let Some(hit) = cache.get(id) {
            return Ok(hit.clone());
        }
        let user = self
            .users
            .find_by_id(id)
            .await?
            .map(|u| PublicUser::from(&u));
        cache.insert(id.to_string(), user.clone());
        Ok(user)
    }
}
