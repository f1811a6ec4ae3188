//! Listener setup and the serve loop: socket activation, plain HTTP, and
//! the ACME-backed HTTPS pair.

use std::collections::HashMap;
use std::future::IntoFuture as _;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use futures::StreamExt as _;
use rustls_acme::caches::DirCache;
use rustls_acme::AcmeConfig;

use k_core::ServerConfig;

use crate::error::{io_err, ServerError};
use crate::mux::Mux;

/// Read the routing table at `config_path` and serve it until failure.
pub fn start(config_path: &Path) -> Result<(), ServerError> {
    let bytes = std::fs::read(config_path).map_err(|e| io_err(config_path, e))?;
    let config: ServerConfig = serde_json::from_slice(&bytes)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Serve)?;
    runtime.block_on(run(config))
}

/// Run the router. The HTTPS and HTTP accept loops run as a pair; whichever
/// exits first takes the router down with it.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let (mux, hostnames) = Mux::compile(&config)?;
    let mux = Arc::new(mux);
    let mut inherited = listen_fds()?;
    let http = take_or_bind(&mut inherited, "http", config.http)?;

    let app = Router::new()
        .fallback(serve_request)
        .with_state(Arc::clone(&mux));

    if config.lets_encrypt_email.is_empty() {
        tracing::info!("LetsEncryptEmail not set - only listening for http");
        tracing::info!("listening on :{}", config.http);
        let listener = into_tokio(http)?;
        return axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(ServerError::Serve);
    }

    let https = take_or_bind(&mut inherited, "https", config.https)?;
    let mut state = AcmeConfig::new(hostnames)
        .contact_push(format!("mailto:{}", config.lets_encrypt_email))
        .cache(DirCache::new(config.lets_encrypt_cache_path.clone()))
        .directory_lets_encrypt(true)
        .state();
    let rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(state.resolver());
    let acceptor = state.axum_acceptor(Arc::new(rustls_config));
    tokio::spawn(async move {
        while let Some(event) = state.next().await {
            match event {
                Ok(ok) => tracing::info!("acme event: {ok:?}"),
                Err(err) => tracing::error!("acme error: {err}"),
            }
        }
    });

    // Port 80 still serves the full application to loopback clients (the
    // tunnel, health checks); everyone else is sent to HTTPS.
    let front = Router::new()
        .fallback(redirect_or_serve)
        .with_state(Arc::clone(&mux));

    tracing::info!("listening on :{} and :{}", config.http, config.https);
    let http_listener = into_tokio(http)?;
    let http_server = axum::serve(
        http_listener,
        front.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .into_future();
    let https_server = axum_server::from_tcp(https)
        .acceptor(acceptor)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = http_server => result.map_err(ServerError::Serve),
        result = https_server => result.map_err(ServerError::Serve),
    }
}

async fn serve_request(
    State(mux): State<Arc<Mux>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    mux.handle(remote, req).await
}

async fn redirect_or_serve(
    State(mux): State<Arc<Mux>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    if remote.ip().is_loopback() {
        return mux.handle(remote, req).await;
    }
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(""))
        .unwrap_or("");
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Redirect::temporary(&format!("https://{host}{path}")).into_response()
}

/// Adopt a named systemd-activated listener, or bind the port ourselves.
fn take_or_bind(
    inherited: &mut HashMap<String, std::net::TcpListener>,
    name: &str,
    port: u16,
) -> Result<std::net::TcpListener, ServerError> {
    if let Some(listener) = inherited.remove(name) {
        return Ok(listener);
    }
    std::net::TcpListener::bind(format!("[::]:{port}")).map_err(ServerError::Listen)
}

fn into_tokio(listener: std::net::TcpListener) -> Result<tokio::net::TcpListener, ServerError> {
    listener.set_nonblocking(true).map_err(ServerError::Listen)?;
    tokio::net::TcpListener::from_std(listener).map_err(ServerError::Listen)
}

/// File descriptors inherited from the supervisor, keyed by
/// `LISTEN_FDNAMES` entry. Descriptors start at 3 and are marked
/// close-on-exec.
///
/// <https://www.freedesktop.org/software/systemd/man/sd_listen_fds.html>
#[cfg(unix)]
fn listen_fds() -> Result<HashMap<String, std::net::TcpListener>, ServerError> {
    use std::os::fd::FromRawFd as _;

    let mut listeners = HashMap::new();
    let Some(pid) = std::env::var("LISTEN_PID")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
    else {
        return Ok(listeners);
    };
    if pid != std::process::id() {
        return Ok(listeners);
    }
    let count = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if count == 0 {
        return Ok(listeners);
    }
    let names: Vec<String> = std::env::var("LISTEN_FDNAMES")
        .unwrap_or_default()
        .split(':')
        .map(str::to_string)
        .collect();
    for i in 0..count {
        let fd = 3 + i as std::os::fd::RawFd;
        let _ = nix::fcntl::fcntl(
            fd,
            nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC),
        );
        let Some(name) = names.get(i) else {
            continue;
        };
        let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        listeners.insert(name.clone(), listener);
    }
    Ok(listeners)
}

#[cfg(not(unix))]
fn listen_fds() -> Result<HashMap<String, std::net::TcpListener>, ServerError> {
    Ok(HashMap::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_activation_env_means_no_inherited_listeners() {
        // LISTEN_PID is unset (or someone else's) in the test environment.
        let listeners = listen_fds().expect("listen_fds");
        assert!(listeners.is_empty());
    }

    #[test]
    fn routing_table_json_parses_into_server_config() {
        let json = r#"{
            "HTTP": 8080,
            "HTTPS": 8443,
            "LetsEncryptEmail": "",
            "LetsEncryptCachePath": "/tmp/cache",
            "Routes": [
                {"Patterns": ["example.com/"], "Target": "http://127.0.0.1:9000"}
            ]
        }"#;
        let config: ServerConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.http, 8080);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].target, "http://127.0.0.1:9000");
    }
}
