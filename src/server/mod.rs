use crate::api::Gateway;
use crate::wire::{self, RequestError, Response};
use axum::http::StatusCode;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_body: usize,
}

pub async fn serve(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    limits: ConnectionLimits,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(addr = %listener.local_addr()?, "legacy http listener ready");
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        // EMFILE and friends: back off instead of spinning.
                        tracing::warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let gateway = gateway.clone();
                connections.spawn(async move {
                    handle_connection(&mut stream, &gateway, peer, limits).await;
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    drop(listener);
    let in_flight = connections.len();
    tracing::info!(in_flight, "legacy http listener stopped, draining connections");
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(remaining = connections.len(), "drain deadline elapsed, aborting connections");
        connections.shutdown().await;
    }
    Ok(())
}

// A stalled or vanished peer just gets its connection dropped.
pub async fn handle_connection<S>(
    stream: &mut S,
    gateway: &Gateway,
    peer: SocketAddr,
    limits: ConnectionLimits,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let parsed = {
        let mut reader = BufReader::new(&mut *stream);
        tokio::time::timeout(
            limits.read_timeout,
            wire::read_request(&mut reader, limits.max_body),
        )
        .await
    };

    let response = match parsed {
        Err(_) => {
            tracing::debug!(peer = %peer, "read deadline elapsed, dropping connection");
            return;
        }
        Ok(Err(err)) if err.warrants_reply() => {
            tracing::debug!(peer = %peer, error = %err, "bad request");
            Response::error(StatusCode::BAD_REQUEST, "bad request")
        }
        Ok(Err(RequestError::Closed)) => {
            tracing::debug!(peer = %peer, "peer closed before request completed");
            return;
        }
        Ok(Err(err)) => {
            tracing::debug!(peer = %peer, error = %err, "request read failed");
            return;
        }
        Ok(Ok(req)) => {
            let response = dispatch_isolated(gateway, &req);
            tracing::debug!(peer = %peer, status = response.status.as_u16(), "response ready");
            response
        }
    };

    match tokio::time::timeout(limits.write_timeout, response.write_to(&mut *stream)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(peer = %peer, error = %err, "write failed"),
        Err(_) => tracing::debug!(peer = %peer, "write deadline elapsed"),
    }
    let _ = stream.shutdown().await;
}

fn dispatch_isolated(gateway: &Gateway, req: &wire::Request) -> Response {
    dispatch_with(req, |req| gateway.dispatch(req))
}

fn dispatch_with<F>(req: &wire::Request, handler: F) -> Response
where
    F: FnOnce(&wire::Request) -> Response,
{
    match panic::catch_unwind(AssertUnwindSafe(|| handler(req))) {
        Ok(response) => response,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(path = %req.path, panic = %reason, "handler panicked");
            Response::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}
