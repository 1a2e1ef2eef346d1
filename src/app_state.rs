use crate::config::Config;
use crate::notification_server::NotificationServer;
use crate::repository::{TaskStore, UserStore};
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub notifier: Addr<NotificationServer>,
    pub tasks: Arc<dyn TaskStore>,
    pub users: Arc<dyn UserStore>,
    pub config: Config,
}
