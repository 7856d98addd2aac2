use std::path::PathBuf;
use tutor_planner::config::{CONFIG_ENV, Config, DEFAULT_CONFIG_PATH};
use tutor_planner::server;
use tutor_planner::workspace::Workspace;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&path)?;
    let workspace = Workspace::open(config)?;

    server::run_server(workspace).await?;
    Ok(())
}
