use actix::prelude::*;
use actix_web::{error::ErrorUnauthorized, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::app_state::AppState;
use crate::auth::validate_jwt;
use crate::notification_server::{
    Broadcast, Connect, Disconnect, NotificationServer, ServerEvent, TaskEventKind, Typing,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct WsAuth {
    pub token: Option<String>,
}

/// Frames a client may push upstream.
#[derive(Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

pub struct WsSession {
    pub user_id: String,
    pub hb: Instant,
    pub server: Addr<NotificationServer>,
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        self.server.do_send(Connect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.server.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("websocket heartbeat failed for user {}, disconnecting", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                // Clients may push a task:update which is rebroadcast to
                // every viewer.
                Ok(frame) if frame.event == "task:update" => {
                    self.server.do_send(Broadcast {
                        kind: TaskEventKind::Updated,
                        payload: frame.data,
                    });
                }
                // Typing indicators go to every other viewer of the task.
                Ok(frame) if frame.event == "user:typing" => {
                    if let Some(task_id) = frame.data.get("taskId").and_then(|v| v.as_str()) {
                        self.server.do_send(Typing {
                            user_id: self.user_id.clone(),
                            task_id: task_id.to_string(),
                            conn: ctx.address().recipient(),
                        });
                    }
                }
                Ok(frame) => {
                    debug!("ignoring client event {:?}", frame.event);
                }
                Err(e) => {
                    debug!("unparseable client frame: {}", e);
                }
            },
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                warn!("websocket error for user {}: {}", self.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<ServerEvent> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

/// GET /ws?token=… — the handshake is rejected before any registration
/// happens, so a failed auth never leaves a half-connected session.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsAuth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = query
        .into_inner()
        .token
        .ok_or_else(|| ErrorUnauthorized("missing token"))?;
    let claims = validate_jwt(&token, &data.config.jwt_secret)
        .map_err(|_| ErrorUnauthorized("invalid token"))?;

    let session = WsSession {
        user_id: claims.sub,
        hb: Instant::now(),
        server: data.notifier.clone(),
    };
    ws::start(session, &req, stream)
}
