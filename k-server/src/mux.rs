//! Route compilation and request dispatch.
//!
//! Each configured route becomes one compiled handler per pattern. A
//! request is matched on `(host, path prefix)` — host-specific patterns
//! beat host-less ones, longer prefixes beat shorter — then flows through
//! basic auth, the leaf handler (static tree or reverse proxy), the
//! error-page rewrite, and the access log.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use http::{header, Request, StatusCode, Uri};
use tower::util::ServiceExt as _;
use tower_http::services::ServeDir;

use k_core::{BasicAuth, Route, ServerConfig};

use crate::error::ServerError;
use crate::journal;
use crate::middleware::{
    check_basic_auth, error_redirect, redirect_to, unauthorized, AccessLog, LoggingBody,
    PendingRecord,
};
use crate::proxy::{self, ProxyClient};

enum Target {
    Static(ServeDir),
    Proxy(Uri),
}

struct CompiledRoute {
    target: Target,
    auth: Option<BasicAuth>,
    log: Arc<AccessLog>,
    err_paths: BTreeMap<u16, String>,
}

struct CompiledPattern {
    host: String,
    prefix: String,
    route: Arc<CompiledRoute>,
}

/// The compiled route table plus the shared upstream client.
pub struct Mux {
    patterns: Vec<CompiledPattern>,
    client: ProxyClient,
}

impl Mux {
    /// Compile the route table. Routes that fail to compile are reported to
    /// the journal at priority 1 and skipped; a malformed pattern aborts.
    ///
    /// Also returns every non-empty hostname, for the ACME whitelist.
    pub fn compile(config: &ServerConfig) -> Result<(Mux, Vec<String>), ServerError> {
        let mut patterns = Vec::new();
        let mut hostnames = Vec::new();
        for route in &config.routes {
            let compiled = match compile_route(route) {
                Ok(compiled) => Arc::new(compiled),
                Err(err) => {
                    let message = format!("bad route [{:?}]: {err}", route.patterns);
                    tracing::warn!("{message}");
                    if let Err(err) = journal::log(&message, 1, &route.log_fields) {
                        tracing::warn!("journal log failed: {err}");
                    }
                    continue;
                }
            };
            for pattern in &route.patterns {
                let Some((host, suffix)) = pattern.split_once('/') else {
                    return Err(ServerError::BadPattern(pattern.clone()));
                };
                if !host.is_empty() {
                    hostnames.push(host.to_string());
                }
                patterns.push(CompiledPattern {
                    host: host.to_string(),
                    prefix: format!("/{suffix}"),
                    route: Arc::clone(&compiled),
                });
            }
        }
        Ok((
            Mux {
                patterns,
                client: proxy::client(),
            },
            hostnames,
        ))
    }

    /// Dispatch one request through the matched route's full stack.
    pub async fn handle(&self, remote: SocketAddr, req: Request<Body>) -> Response {
        let host = request_host(&req);
        let path = req.uri().path().to_string();
        let Some(matched) = self.find(&host, &path) else {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::NOT_FOUND;
            return resp;
        };
        let route = Arc::clone(&matched.route);

        // Auth gates before the access log: failed challenges are not
        // journal traffic.
        if let Some(auth) = &route.auth {
            if !check_basic_auth(auth, req.headers()) {
                return unauthorized(&auth.realm);
            }
        }

        let mut pending = PendingRecord::new(Arc::clone(&route.log), &req, remote);
        let req = strip_prefix(req, &matched.prefix);
        let resp = match &route.target {
            Target::Static(dir) => match dir.clone().oneshot(req).await {
                Ok(resp) => resp.map(Body::new),
                Err(err) => match err {},
            },
            Target::Proxy(target) => proxy::forward(&self.client, target, remote, req).await,
        };

        let status = resp.status();
        pending.set_status(status);
        let resp = match error_redirect(&route.err_paths, status) {
            Some(path) => redirect_to(path),
            None => resp,
        };
        LoggingBody::wrap(resp, pending)
    }

    fn find(&self, host: &str, path: &str) -> Option<&CompiledPattern> {
        self.patterns
            .iter()
            .filter(|p| (p.host.is_empty() || p.host == host) && prefix_match(&p.prefix, path))
            .max_by_key(|p| (!p.host.is_empty(), p.prefix.len()))
    }
}

fn compile_route(route: &Route) -> Result<CompiledRoute, ServerError> {
    let target = if route.target.starts_with('/') {
        Target::Static(ServeDir::new(&route.target))
    } else {
        let uri: Uri = route
            .target
            .parse()
            .map_err(|source| ServerError::BadTarget {
                target: route.target.clone(),
                source,
            })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ServerError::RelativeTarget(route.target.clone()));
        }
        Target::Proxy(uri)
    };
    Ok(CompiledRoute {
        target,
        auth: (!route.basic_auth.is_empty()).then(|| route.basic_auth.clone()),
        log: Arc::new(AccessLog::new(&route.log_format, route.log_fields.clone())?),
        err_paths: route.err_paths.clone(),
    })
}

/// `/p/` matches its subtree (and `/p` itself); `/p` matches exactly.
fn prefix_match(prefix: &str, path: &str) -> bool {
    if let Some(dir) = prefix.strip_suffix('/') {
        path.starts_with(prefix) || path == dir
    } else {
        path == prefix
    }
}

fn request_host<B>(req: &Request<B>) -> String {
    let host = req.uri().host().map(str::to_string).or_else(|| {
        req.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let host = host.unwrap_or_default();
    host.split(':').next().unwrap_or("").to_string()
}

/// Drop the matched prefix from the request path, keeping it absolute.
fn strip_prefix(mut req: Request<Body>, prefix: &str) -> Request<Body> {
    if prefix == "/" {
        return req;
    }
    let path = req.uri().path();
    let base = prefix.trim_end_matches('/');
    let stripped = match path.strip_prefix(base) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => return req,
    };
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{stripped}?{query}"),
        None => stripped.to_string(),
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    if let Ok(uri) = Uri::from_parts(parts) {
        *req.uri_mut() = uri;
    }
    req
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
