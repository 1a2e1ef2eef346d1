//! Dashboard Aggregator: three parallel reads composed into one view, with
//! the user scoping of the overdue set done in memory.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::ApiError;
use crate::models::{Status, Task, TaskView};
use crate::task_service::TaskService;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_assigned: usize,
    pub total_created: usize,
    pub total_overdue: usize,
    pub completed_tasks: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub assigned_tasks: Vec<TaskView>,
    pub created_tasks: Vec<TaskView>,
    pub overdue_tasks: Vec<TaskView>,
    pub stats: DashboardStats,
}

/// The store-level overdue query is user-agnostic; scoping happens here so
/// the same query can be reused elsewhere.
pub fn involves_user(task: &Task, user_id: &str) -> bool {
    task.assigned_to_id.as_deref() == Some(user_id) || task.creator_id == user_id
}

pub async fn build_dashboard(
    service: &TaskService,
    user_id: &str,
) -> Result<DashboardData, ApiError> {
    let (assigned, created, overdue) = futures::try_join!(
        service.tasks_assigned_to(user_id),
        service.tasks_created_by(user_id),
        service.overdue_tasks(),
    )?;

    let overdue: Vec<TaskView> = overdue
        .into_iter()
        .filter(|t| involves_user(&t.task, user_id))
        .collect();

    let stats = DashboardStats {
        total_assigned: assigned.len(),
        total_created: created.len(),
        total_overdue: overdue.len(),
        completed_tasks: assigned
            .iter()
            .filter(|t| t.task.status == Status::Completed)
            .count(),
    };

    Ok(DashboardData {
        assigned_tasks: assigned,
        created_tasks: created,
        overdue_tasks: overdue,
        stats,
    })
}

/// GET /tasks/dashboard
pub async fn get_dashboard(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&req)?;
    let service = TaskService::new(data.tasks.clone(), data.users.clone());
    let dashboard = build_dashboard(&service, &user.id).await?;
    Ok(HttpResponse::Ok().json(dashboard))
}
