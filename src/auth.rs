use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::{PublicUser, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

/// Verified identity, inserted into request extensions by the auth
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
}

pub fn create_jwt(user_id: &str, email: &str, secret: &str) -> Result<String, ApiError> {
    let expiration = Utc::now() + Duration::days(7);
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| ApiError::Token(e.to_string()))
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Pulls the identity the middleware stored for this request.
pub fn current_user(req: &HttpRequest) -> Result<AuthenticatedUser, ApiError> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or(ApiError::Auth)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// POST /auth/register
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let payload = payload.into_inner();
    if data.users.find_by_email(&payload.email).await?.is_some() {
        return Err(ApiError::Validation("email already registered".to_string()));
    }

    let hashed = hash(&payload.password, DEFAULT_COST)?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: payload.email,
        name: payload.name,
        password: hashed,
        created_at: now,
        updated_at: now,
    };
    data.users.create(&user).await?;
    info!("user {} registered", user.id);

    let token = create_jwt(&user.id, &user.email, &data.config.jwt_secret)?;
    Ok(HttpResponse::Created().json(serde_json::json!({
        "user": PublicUser::from(&user),
        "token": token,
    })))
}

/// POST /auth/login
pub async fn login(
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = data
        .users
        .find_by_email(&payload.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify(&payload.password, &user.password).unwrap_or(false) {
        return Err(ApiError::InvalidCredentials);
    }

    let token = create_jwt(&user.id, &user.email, &data.config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user": PublicUser::from(&user),
        "token": token,
    })))
}

/// GET /auth/profile
pub async fn get_profile(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let identity = current_user(&req)?;
    let user = data
        .users
        .find_by_id(&identity.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "createdAt": user.created_at,
    })))
}

/// PUT /auth/profile
pub async fn update_profile(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<UpdateProfileRequest>,
) -> Result<HttpResponse, ApiError> {
    let identity = current_user(&req)?;
    let payload = payload.into_inner();

    if let Some(email) = &payload.email {
        if let Some(existing) = data.users.find_by_email(email).await? {
            if existing.id != identity.id {
                return Err(ApiError::Validation("email already in use".to_string()));
            }
        }
    }

    let user = data
        .users
        .update_profile(&identity.id, payload.name.as_deref(), payload.email.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}
