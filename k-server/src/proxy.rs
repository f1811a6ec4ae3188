//! Single-host reverse proxy on top of hyper's pooled client, including
//! pass-through of protocol upgrades (websockets).

use std::net::SocketAddr;

use axum::body::Body;
use axum::response::Response;
use http::uri::Scheme;
use http::{HeaderValue, Request, StatusCode, Uri};
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};

pub type ProxyClient = Client<HttpConnector, Body>;

pub fn client() -> ProxyClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Forward `req` to `target`, preserving the original path, query, and
/// `Host` header. Upstream failures become 502.
pub async fn forward(
    client: &ProxyClient,
    target: &Uri,
    remote: SocketAddr,
    mut req: Request<Body>,
) -> Response {
    let client_upgrade = req.extensions_mut().remove::<OnUpgrade>();

    let (mut parts, body) = req.into_parts();
    let Some(authority) = target.authority().cloned() else {
        return status_response(StatusCode::BAD_GATEWAY);
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = Uri::builder()
        .scheme(target.scheme().cloned().unwrap_or(Scheme::HTTP))
        .authority(authority)
        .path_and_query(path_and_query)
        .build();
    parts.uri = match uri {
        Ok(uri) => uri,
        Err(err) => {
            tracing::warn!("proxy uri rebuild failed: {err}");
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };
    append_forwarded_for(&mut parts.headers, remote);

    let mut resp = match client.request(Request::from_parts(parts, body)).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!("proxy to {target} failed: {err}");
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };

    if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let upstream_upgrade = hyper::upgrade::on(&mut resp);
            tokio::spawn(async move {
                match tokio::try_join!(client_upgrade, upstream_upgrade) {
                    Ok((client_io, upstream_io)) => {
                        let mut client_io = TokioIo::new(client_io);
                        let mut upstream_io = TokioIo::new(upstream_io);
                        if let Err(err) =
                            tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await
                        {
                            tracing::debug!("upgraded connection closed: {err}");
                        }
                    }
                    Err(err) => tracing::warn!("upgrade failed: {err}"),
                }
            });
        }
    }
    resp.map(Body::new)
}

fn append_forwarded_for(headers: &mut http::HeaderMap, remote: SocketAddr) {
    let ip = remote.ip().to_string();
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}

fn status_response(status: StatusCode) -> Response {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp
}
