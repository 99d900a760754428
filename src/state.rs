use crate::{config::AppConfig, directory::Directory, query::QueryEngine};
use std::{sync::Arc, time::Instant};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub directory: Directory,
    pub engine: QueryEngine,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, directory: Directory, engine: QueryEngine) -> Self {
        Self {
            config,
            directory,
            engine,
            started: Instant::now(),
        }
    }
}
