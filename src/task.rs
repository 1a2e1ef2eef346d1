//! HTTP handlers for the task surface. Mutations run through the Task
//! Engine, then hand the outcome to the Change Notifier; fan-out is
//! fire-and-forget and never fails the request.

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::ApiError;
use crate::models::{CreateTaskRequest, TaskFilter, UpdateTaskRequest};
use crate::notification_server::{Broadcast, NotifyAssignee, TaskEventKind};
use crate::task_service::{TaskService, UpdateOutcome};

fn service(data: &web::Data<AppState>) -> TaskService {
    TaskService::new(data.tasks.clone(), data.users.clone())
}

/// Who gets the targeted `task:assigned` event, if anyone. Unassignment
/// flips `was_reassigned` but leaves no target, so only the broadcast goes
/// out.
fn assignment_target(outcome: &UpdateOutcome) -> Option<&str> {
    if outcome.was_reassigned {
        outcome.new_assignee_id.as_deref()
    } else {
        None
    }
}

/// POST /tasks
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let actor = current_user(&req)?;
    let task = service(&data)
        .create_task(payload.into_inner(), &actor.id)
        .await?;
    info!("task {} created by {}", task.task.id, actor.id);

    data.notifier.do_send(Broadcast {
        kind: TaskEventKind::Created,
        payload: serde_json::to_value(&task)?,
    });

    Ok(HttpResponse::Created().json(serde_json::json!({
        "message": "Task created successfully",
        "task": task,
    })))
}

/// GET /tasks/{id}
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    current_user(&req)?;
    let detail = service(&data).get_task(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(detail))
}

/// GET /tasks
pub async fn list_tasks(
    req: HttpRequest,
    data: web::Data<AppState>,
    filter: web::Query<TaskFilter>,
) -> Result<HttpResponse, ApiError> {
    current_user(&req)?;
    let tasks = service(&data).list_tasks(filter.into_inner()).await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// PUT /tasks/{id}
pub async fn update_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> Result<HttpResponse, ApiError> {
    let actor = current_user(&req)?;
    let task_id = path.into_inner();
    let outcome = service(&data)
        .update_task(&task_id, payload.into_inner(), &actor.id)
        .await?;

    let task_json = serde_json::to_value(&outcome.task)?;
    data.notifier.do_send(Broadcast {
        kind: TaskEventKind::Updated,
        payload: task_json.clone(),
    });

    if let Some(assignee_id) = assignment_target(&outcome) {
        info!("task {} reassigned to {}", task_id, assignee_id);
        data.notifier.do_send(NotifyAssignee {
            user_id: assignee_id.to_string(),
            task: task_json,
            message: format!(
                "You have been assigned to task: {}",
                outcome.task.task.title
            ),
        });
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Task updated successfully",
        "task": outcome.task,
    })))
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let actor = current_user(&req)?;
    let task_id = path.into_inner();
    service(&data).delete_task(&task_id).await?;
    info!("task {} deleted by {}", task_id, actor.id);

    data.notifier.do_send(Broadcast {
        kind: TaskEventKind::Deleted,
        payload: serde_json::json!({ "taskId": task_id }),
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Task deleted successfully",
    })))
}
