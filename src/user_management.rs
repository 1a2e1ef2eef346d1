use actix_web::{web, HttpRequest, HttpResponse};

use crate::app_state::AppState;
use crate::auth::current_user;
use crate::error::ApiError;
use crate::models::PublicUser;

/// GET /users — everyone without their credential hash, for the assignment
/// dropdown.
pub async fn list_users(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    current_user(&req)?;
    let users = data.users.find_all().await?;
    let users: Vec<PublicUser> = users.iter().map(PublicUser::from).collect();
    Ok(HttpResponse::Ok().json(users))
}

/// GET /users/{id}
pub async fn get_user_by_id(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    current_user(&req)?;
    let id = path.into_inner();
    let user = data
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}
