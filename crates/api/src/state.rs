//! Shared application state

use sqlx::PgPool;
use std::sync::Arc;

use huddle_realtime::{Hub, LocalLinks};

use crate::auth::JwtManager;
use crate::config::Config;

/// State handed to every route and socket task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Hub,
    /// Writer channels of sockets accepted by this process; idle when a
    /// managed gateway holds the sockets
    pub links: Arc<LocalLinks>,
    /// Present only when `JWT_SECRET` is configured
    pub jwt: Option<JwtManager>,
    /// Present only when `DATABASE_URL` is configured
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config: Config,
        hub: Hub,
        links: Arc<LocalLinks>,
        pool: Option<PgPool>,
    ) -> Self {
        let jwt = config.jwt_secret.as_deref().map(JwtManager::new);
        Self {
            config: Arc::new(config),
            hub,
            links,
            jwt,
            pool,
        }
    }
}
