use crate::api::Gateway;
use crate::auth::BasicAuth;
use crate::config::Config;
use crate::server::{self, ConnectionLimits};
use crate::store::ExchangeStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

const ADMIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        return Err(format!("unknown command: {command}").into());
    }

    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    let store = Arc::new(ExchangeStore::new(config.protocol.queue_scope));
    tracing::info!(
        auth = config.auth.enabled,
        queue_scope = ?store.scope(),
        "exchange store ready"
    );
    let auth = BasicAuth::new(config.auth.enabled, config.auth.clients.clone());
    let gateway = Arc::new(Gateway::new(store, auth, config.protocol.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut admin_task = None;
    if config.admin.enabled {
        let addr: SocketAddr = format!("{}:{}", config.admin.host, config.admin.port).parse()?;
        let token = config.admin.token.clone().unwrap_or_default();
        let admin_gateway = gateway.clone();
        let admin_shutdown = shutdown_rx.clone();
        admin_task = Some(tokio::spawn(async move {
            if let Err(err) = crate::admin::start(addr, token, admin_gateway, admin_shutdown).await {
                tracing::error!(error = %err, "admin listener failed");
            }
        }));
    }

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    let limits = ConnectionLimits {
        read_timeout: config.server.read_timeout(),
        write_timeout: config.server.write_timeout(),
        max_body: config.server.max_body_bytes,
    };

    let serve = server::serve(listener, gateway, limits, shutdown_rx);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result,
        signal = shutdown_signal() => {
            tracing::info!(signal, "shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    let result = serve.await;
    if let Some(task) = admin_task {
        let _ = tokio::time::timeout(ADMIN_SHUTDOWN_GRACE, task).await;
    }
    result
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "interrupt",
            _ = sigterm.recv() => "terminate",
        },
        Err(err) => {
            tracing::warn!(error = %err, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            "interrupt"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "interrupt"
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("wrote {}", path.display());
    Ok(())
}
