mod app_state;
mod auth;
mod config;
mod dashboard;
mod db;
mod error;
mod models;
mod notification_server;
mod repository;
mod task;
mod task_service;
mod user_management;
mod web_socket_server;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use chrono::Utc;
use env_logger::Env;
use futures::future::{ok, Ready};

use crate::app_state::AppState;
use crate::auth::{
    get_profile, login, register, update_profile, validate_jwt, AuthenticatedUser,
};
use crate::dashboard::get_dashboard;
use crate::repository::{MongoTaskStore, MongoUserStore};
use crate::task::{create_task, delete_task, get_task, list_tasks, update_task};
use crate::user_management::{get_user_by_id, list_users};
use crate::web_socket_server::ws_index;

/// Bearer-token middleware. A valid token puts the identity into request
/// extensions; an invalid one fails the request outright; no header at all
/// passes through and protected handlers reject on their own.
#[derive(Clone)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Authentication {
            secret: secret.to_string(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if auth_str.starts_with("Bearer ") {
                    let token = auth_str.trim_start_matches("Bearer ").trim();
                    match validate_jwt(token, &self.secret) {
                        Ok(claims) => {
                            req.extensions_mut().insert(AuthenticatedUser {
                                id: claims.sub,
                                email: claims.email,
                            });
                        }
                        Err(e) => {
                            let (req_parts, _payload) = req.into_parts();
                            let resp = HttpResponse::Unauthorized()
                                .json(serde_json::json!({
                                    "error": format!("invalid token: {}", e),
                                }))
                                .map_into_boxed_body();
                            let srv_resp = ServiceResponse::new(req_parts, resp);
                            return Box::pin(async move { Ok(srv_resp) });
                        }
                    }
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let db = match db::connect(&config.mongo_uri, &config.database_name).await {
        Ok(db) => db,
        Err(e) => {
            log::error!("MongoDB initialization failed: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e));
        }
    };
    let tasks = Arc::new(MongoTaskStore::new(db.clone()));
    let users = Arc::new(MongoUserStore::new(db));

    // The connection registry lives exactly as long as the server; handlers
    // reach it through AppState, never through a global.
    let notifier = notification_server::NotificationServer::new().start();

    let state = AppState {
        notifier,
        tasks,
        users,
        config: config.clone(),
    };

    println!("Server running at http://{}", config.bind_addr);
    println!("Allowed CORS Origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&state.config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(&state.config.jwt_secret))
            .app_data(web::Data::new(state.clone()))
            .route("/health", web::get().to(health))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/profile", web::get().to(get_profile))
                    .route("/profile", web::put().to(update_profile)),
            )
            .service(
                web::scope("/tasks")
                    // Literal route first so it never collides with {id}.
                    .route("/dashboard", web::get().to(get_dashboard))
                    .route("", web::post().to(create_task))
                    .route("", web::get().to(list_tasks))
                    .route("/{id}", web::get().to(get_task))
                    .route("/{id}", web::put().to(update_task))
                    .route("/{id}", web::delete().to(delete_task)),
            )
            .service(
                web::scope("/users")
                    .route("", web::get().to(list_users))
                    .route("/{id}", web::get().to(get_user_by_id)),
            )
            .service(web::resource("/ws").route(web::get().to(ws_index)))
    })
    .bind(bind_addr)?
    .run()
    .await
}
