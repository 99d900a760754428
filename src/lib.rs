pub mod compiler;
pub mod config;
pub mod directory;
pub mod downstream;
pub mod encode;
pub mod error;
pub mod parser;
pub mod profile;
pub mod query;
pub mod server;
pub mod state;
pub mod swagger;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the gateway using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config)?.run().await
}
