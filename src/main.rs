mod actions;
mod admin;
mod api;
mod app;
mod auth;
mod config;
mod model;
mod normalizer;
mod server;
mod store;
mod wire;

use config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.level);
    if let Err(err) = app::run(config).await {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase()));
    fmt().with_env_filter(filter).with_target(false).init();
}
