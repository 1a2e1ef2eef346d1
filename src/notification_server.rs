//! Change Notifier actor. Owns the registry of live websocket connections
//! keyed by user id; created once at server start and handed to sessions and
//! HTTP handlers through `AppState`.

use actix::prelude::*;
use log::{debug, info};
use serde_json::json;
use std::collections::HashMap;

/// A fully serialized frame pushed to one websocket session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct ServerEvent(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Created,
    Updated,
    Deleted,
}

impl TaskEventKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskEventKind::Created => "task:created",
            TaskEventKind::Updated => "task:updated",
            TaskEventKind::Deleted => "task:deleted",
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<ServerEvent>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<ServerEvent>,
}

/// Delivered to every connected client; every viewer's task list may need
/// refreshing regardless of relevance.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Broadcast {
    pub kind: TaskEventKind,
    pub payload: serde_json::Value,
}

/// Delivered only to the new assignee's connection group.
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyAssignee {
    pub user_id: String,
    pub task: serde_json::Value,
    pub message: String,
}

/// Typing indicator relayed to everyone except the connection it came from.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Typing {
    pub user_id: String,
    pub task_id: String,
    pub conn: Recipient<ServerEvent>,
}

#[derive(Default)]
pub struct NotificationServer {
    // Multiple live connections per user are expected (several tabs).
    sessions: HashMap<String, Vec<Recipient<ServerEvent>>>,
}

impl NotificationServer {
    pub fn new() -> Self {
        NotificationServer::default()
    }

    fn send_to_all(&self, frame: &str) {
        for addrs in self.sessions.values() {
            for addr in addrs {
                // do_send: delivery is best-effort, a dead session must not
                // block the rest of the fan-out.
                addr.do_send(ServerEvent(frame.to_owned()));
            }
        }
    }
}

impl Actor for NotificationServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for NotificationServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        let group = self.sessions.entry(msg.user_id.clone()).or_default();
        group.push(msg.addr);
        info!("user {} connected ({} live sessions)", msg.user_id, group.len());
    }
}

impl Handler<Disconnect> for NotificationServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        if let Some(addrs) = self.sessions.get_mut(&msg.user_id) {
            let before = addrs.len();
            // Drop only the closing connection; an empty group stays
            // registered and is harmless to broadcast to.
            addrs.retain(|a| a != &msg.addr);
            if addrs.len() < before {
                info!(
                    "user {} disconnected ({} live sessions)",
                    msg.user_id,
                    addrs.len()
                );
            }
        }
    }
}

impl Handler<Broadcast> for NotificationServer {
    type Result = ();

    fn handle(&mut self, msg: Broadcast, _: &mut Context<Self>) {
        debug!("broadcasting {}", msg.kind.name());
        let frame = json!({ "event": msg.kind.name(), "data": msg.payload }).to_string();
        self.send_to_all(&frame);
    }
}

impl Handler<NotifyAssignee> for NotificationServer {
    type Result = ();

    fn handle(&mut self, msg: NotifyAssignee, _: &mut Context<Self>) {
        let frame = json!({
            "event": "task:assigned",
            "data": { "task": msg.task, "message": msg.message },
        })
        .to_string();
        if let Some(addrs) = self.sessions.get(&msg.user_id) {
            debug!("task:assigned -> {} ({} sessions)", msg.user_id, addrs.len());
            for addr in addrs {
                addr.do_send(ServerEvent(frame.clone()));
            }
        }
    }
}

impl Handler<Typing> for NotificationServer {
    type Result = ();

    fn handle(&mut self, msg: Typing, _: &mut Context<Self>) {
        let frame = json!({
            "event": "user:typing",
            "data": { "userId": msg.user_id, "taskId": msg.task_id },
        })
        .to_string();
        for addrs in self.sessions.values() {
            for addr in addrs {
                if addr != &msg.conn {
                    addr.do_send(ServerEvent(frame.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Collector {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<ServerEvent> for Collector {
        type Result = ();

        fn handle(&mut self, msg: ServerEvent, _: &mut Context<Self>) {
            self.frames.lock().unwrap().push(msg.0);
        }
    }

    // Mailboxes are FIFO, so awaiting a Flush guarantees every earlier
    // ServerEvent has been handled.
    #[derive(Message)]
    #[rtype(result = "usize")]
    struct Flush;

    impl Handler<Flush> for Collector {
        type Result = usize;

        fn handle(&mut self, _: Flush, _: &mut Context<Self>) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    fn collector() -> (Addr<Collector>, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector {
            frames: frames.clone(),
        }
        .start();
        (addr, frames)
    }

    #[actix_rt::test]
    async fn broadcast_reaches_every_connection() {
        let server = NotificationServer::new().start();
        let (c1, f1) = collector();
        let (c2, f2) = collector();

        server
            .send(Connect {
                user_id: "u1".into(),
                addr: c1.clone().recipient(),
            })
            .await
            .unwrap();
        server
            .send(Connect {
                user_id: "u2".into(),
                addr: c2.clone().recipient(),
            })
            .await
            .unwrap();

        server
            .send(Broadcast {
                kind: TaskEventKind::Created,
                payload: serde_json::json!({ "id": "t1" }),
            })
            .await
            .unwrap();

        assert_eq!(c1.send(Flush).await.unwrap(), 1);
        assert_eq!(c2.send(Flush).await.unwrap(), 1);

        let frame: serde_json::Value =
            serde_json::from_str(&f1.lock().unwrap()[0]).unwrap();
        assert_eq!(frame["event"], "task:created");
        assert_eq!(frame["data"]["id"], "t1");
        let other: serde_json::Value =
            serde_json::from_str(&f2.lock().unwrap()[0]).unwrap();
        assert_eq!(other["event"], "task:created");
    }

    #[actix_rt::test]
    async fn assigned_event_only_reaches_the_target_user() {
        let server = NotificationServer::new().start();
        let (target, frames) = collector();
        let (bystander, _) = collector();

        server
            .send(Connect {
                user_id: "u1".into(),
                addr: target.clone().recipient(),
            })
            .await
            .unwrap();
        server
            .send(Connect {
                user_id: "u2".into(),
                addr: bystander.clone().recipient(),
            })
            .await
            .unwrap();

        server
            .send(NotifyAssignee {
                user_id: "u1".into(),
                task: serde_json::json!({ "id": "t1", "title": "A" }),
                message: "You have been assigned to task: A".into(),
            })
            .await
            .unwrap();

        assert_eq!(target.send(Flush).await.unwrap(), 1);
        assert_eq!(bystander.send(Flush).await.unwrap(), 0);

        let frame: serde_json::Value =
            serde_json::from_str(&frames.lock().unwrap()[0]).unwrap();
        assert_eq!(frame["event"], "task:assigned");
        assert_eq!(frame["data"]["message"], "You have been assigned to task: A");
    }

    #[actix_rt::test]
    async fn disconnect_stops_delivery_and_empty_groups_are_harmless() {
        let server = NotificationServer::new().start();
        let (c1, _) = collector();

        let recipient = c1.clone().recipient::<ServerEvent>();
        server
            .send(Connect {
                user_id: "u1".into(),
                addr: recipient.clone(),
            })
            .await
            .unwrap();
        server
            .send(Disconnect {
                user_id: "u1".into(),
                addr: recipient,
            })
            .await
            .unwrap();

        // Both of these now hit an empty group and must not fail.
        server
            .send(Broadcast {
                kind: TaskEventKind::Deleted,
                payload: serde_json::json!({ "taskId": "t1" }),
            })
            .await
            .unwrap();
        server
            .send(NotifyAssignee {
                user_id: "u1".into(),
                task: serde_json::json!({}),
                message: "m".into(),
            })
            .await
            .unwrap();

        assert_eq!(c1.send(Flush).await.unwrap(), 0);
    }

    #[actix_rt::test]
    async fn disconnect_for_an_unknown_connection_leaves_the_registry_alone() {
        let server = NotificationServer::new().start();
        let (c1, _) = collector();
        let (stranger, _) = collector();

        server
            .send(Connect {
                user_id: "u1".into(),
                addr: c1.clone().recipient(),
            })
            .await
            .unwrap();
        // Never-registered user id and a stranger's address must both be
        // ignored without touching u1's group.
        server
            .send(Disconnect {
                user_id: "ghost".into(),
                addr: stranger.clone().recipient(),
            })
            .await
            .unwrap();
        server
            .send(Disconnect {
                user_id: "u1".into(),
                addr: stranger.recipient(),
            })
            .await
            .unwrap();

        server
            .send(Broadcast {
                kind: TaskEventKind::Updated,
                payload: serde_json::json!({ "id": "t1" }),
            })
            .await
            .unwrap();

        assert_eq!(c1.send(Flush).await.unwrap(), 1);
    }

    #[actix_rt::test]
    async fn typing_is_relayed_to_everyone_but_the_sender() {
        let server = NotificationServer::new().start();
        let (sender, _) = collector();
        let (viewer, frames) = collector();

        let sender_conn = sender.clone().recipient::<ServerEvent>();
        server
            .send(Connect {
                user_id: "u1".into(),
                addr: sender_conn.clone(),
            })
            .await
            .unwrap();
        server
            .send(Connect {
                user_id: "u2".into(),
                addr: viewer.clone().recipient(),
            })
            .await
            .unwrap();

        server
            .send(Typing {
                user_id: "u1".into(),
                task_id: "t1".into(),
                conn: sender_conn,
            })
            .await
            .unwrap();

        assert_eq!(sender.send(Flush).await.unwrap(), 0);
        assert_eq!(viewer.send(Flush).await.unwrap(), 1);

        let frame: serde_json::Value =
            serde_json::from_str(&frames.lock().unwrap()[0]).unwrap();
        assert_eq!(frame["event"], "user:typing");
        assert_eq!(frame["data"]["userId"], "u1");
        assert_eq!(frame["data"]["taskId"], "t1");
    }
}
