//! Per-route request plumbing: basic auth, error-page redirects, and the
//! access log that rides along on the response body.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http::{header, HeaderMap, Request, StatusCode};
use http_body::Body as _;
use subtle::ConstantTimeEq as _;

use k_core::BasicAuth;

use crate::error::ServerError;
use crate::journal;

/// Common Log Format with the remote IP already masked.
const COMMON_LOG_FORMAT: &str = "{{ remote }} - {{ user_agent }} [{{ timestamp }}] \
\"{{ method }} {{ host }}{{ uri }} {{ proto }}\" {{ status }} {{ size }}";

// ---------------------------------------------------------------------------
// Basic auth
// ---------------------------------------------------------------------------

/// Constant-time check of the `Authorization: Basic` header.
pub fn check_basic_auth(auth: &BasicAuth, headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, password)) = decoded.split_once(':') else {
        return false;
    };
    // Bitwise and, not &&: both comparisons always run.
    ct_eq(user, &auth.user) & ct_eq(password, &auth.password)
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The 401 challenge for a failed basic-auth check.
pub fn unauthorized(realm: &str) -> Response {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    if let Ok(value) = format!("Basic realm=\"{realm}\"").parse() {
        resp.headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    resp
}

// ---------------------------------------------------------------------------
// Error-page redirects
// ---------------------------------------------------------------------------

/// The redirect target for `status`, if the route maps it (or 0 as the
/// default) to a non-empty path.
pub fn error_redirect(err_paths: &BTreeMap<u16, String>, status: StatusCode) -> Option<&str> {
    let path = err_paths
        .get(&status.as_u16())
        .or_else(|| err_paths.get(&0))?;
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// A 307 pointing at the configured error page.
pub fn redirect_to(path: &str) -> Response {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::TEMPORARY_REDIRECT;
    if let Ok(value) = path.parse() {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

// ---------------------------------------------------------------------------
// Access log
// ---------------------------------------------------------------------------

/// A route's compiled log format plus the static fields attached to every
/// record.
pub struct AccessLog {
    tera: tera::Tera,
    fields: BTreeMap<String, String>,
}

impl AccessLog {
    pub fn new(
        format: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<AccessLog, ServerError> {
        let format = if format.is_empty() {
            COMMON_LOG_FORMAT
        } else {
            format
        };
        let mut tera = tera::Tera::default();
        tera.add_raw_template("log", format)?;
        Ok(AccessLog { tera, fields })
    }

    fn render(&self, ctx: &tera::Context) -> Result<String, tera::Error> {
        self.tera.render("log", ctx)
    }
}

/// Everything an access-log record needs except the response size, which is
/// only known once the body has been streamed.
pub struct PendingRecord {
    log: Arc<AccessLog>,
    remote: String,
    user_agent: String,
    timestamp: String,
    proto: String,
    method: String,
    host: String,
    uri: String,
    status: u16,
}

impl PendingRecord {
    pub fn new<B>(log: Arc<AccessLog>, req: &Request<B>, remote: SocketAddr) -> PendingRecord {
        PendingRecord {
            log,
            remote: mask_ip(remote.ip()),
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            proto: format!("{:?}", req.version()),
            method: req.method().to_string(),
            host: req
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
            uri: req.uri().to_string(),
            status: 0,
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status.as_u16();
    }

    fn emit(self, size: u64) {
        let mut ctx = tera::Context::new();
        ctx.insert("remote", &self.remote);
        ctx.insert("user_agent", &self.user_agent);
        ctx.insert("timestamp", &self.timestamp);
        ctx.insert("proto", &self.proto);
        ctx.insert("method", &self.method);
        ctx.insert("host", &self.host);
        ctx.insert("uri", &self.uri);
        ctx.insert("status", &self.status);
        ctx.insert("size", &size);
        match self.log.render(&ctx) {
            Ok(message) => {
                if let Err(err) = journal::log(&message, 6, &self.log.fields) {
                    tracing::warn!("journal log failed: {err}");
                }
            }
            Err(err) => tracing::warn!("access log format failed: {err}"),
        }
    }
}

/// Response body wrapper that counts streamed bytes and emits the access
/// record when the body completes (or is dropped mid-stream).
pub struct LoggingBody {
    inner: Body,
    count: u64,
    pending: Option<PendingRecord>,
}

impl LoggingBody {
    pub fn wrap(resp: Response, pending: PendingRecord) -> Response {
        resp.map(|inner| {
            Body::new(LoggingBody {
                inner,
                count: 0,
                pending: Some(pending),
            })
        })
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.emit(self.count);
        }
    }
}

impl http_body::Body for LoggingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.count += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for LoggingBody {
    fn drop(&mut self) {
        self.finish();
    }
}

// ---------------------------------------------------------------------------
// IP masking
// ---------------------------------------------------------------------------

/// Mask the remote IP to /16 (IPv4) or /56 (IPv6) before it reaches a log.
pub fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => {
            let o = ip.octets();
            Ipv4Addr::new(o[0], o[1], 0, 0).to_string()
        }
        IpAddr::V6(ip) => {
            let masked = u128::from(ip) & (!0u128 << 72);
            Ipv6Addr::from(masked).to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_header(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let token = BASE64.encode(format!("{user}:{password}"));
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {token}").parse().expect("header"),
        );
        headers
    }

    fn auth() -> BasicAuth {
        BasicAuth {
            user: "u".to_string(),
            password: "p".to_string(),
            realm: "r".to_string(),
        }
    }

    #[test]
    fn basic_auth_accepts_exact_credentials() {
        assert!(check_basic_auth(&auth(), &auth_header("u", "p")));
    }

    #[test]
    fn basic_auth_rejects_wrong_or_missing_credentials() {
        assert!(!check_basic_auth(&auth(), &auth_header("u", "wrong")));
        assert!(!check_basic_auth(&auth(), &auth_header("wrong", "p")));
        assert!(!check_basic_auth(&auth(), &HeaderMap::new()));
    }

    #[test]
    fn unauthorized_carries_the_realm_challenge() {
        let resp = unauthorized("internal");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok()),
            Some("Basic realm=\"internal\"")
        );
    }

    #[test]
    fn error_redirect_prefers_exact_status_over_default() {
        let paths = BTreeMap::from([
            (0u16, "/error".to_string()),
            (404u16, "/missing".to_string()),
        ]);
        assert_eq!(
            error_redirect(&paths, StatusCode::NOT_FOUND),
            Some("/missing")
        );
        assert_eq!(
            error_redirect(&paths, StatusCode::INTERNAL_SERVER_ERROR),
            Some("/error")
        );
    }

    #[test]
    fn error_redirect_ignores_unmapped_and_empty() {
        let paths = BTreeMap::from([(404u16, String::new())]);
        assert_eq!(error_redirect(&paths, StatusCode::NOT_FOUND), None);
        assert_eq!(error_redirect(&paths, StatusCode::OK), None);
    }

    #[test]
    fn mask_ip_zeroes_host_bits() {
        assert_eq!(mask_ip("203.0.113.7".parse().expect("ip")), "203.0.0.0");
        assert_eq!(
            mask_ip("2001:db8:aaaa:bbff:1:2:3:4".parse().expect("ip")),
            "2001:db8:aaaa:bb00::"
        );
    }

    #[test]
    fn default_log_format_is_common_log_format() {
        let log = AccessLog::new("", BTreeMap::new()).expect("format");
        let mut ctx = tera::Context::new();
        ctx.insert("remote", "203.0.0.0");
        ctx.insert("user_agent", "curl/8");
        ctx.insert("timestamp", "2026-01-01T00:00:00Z");
        ctx.insert("proto", "HTTP/1.1");
        ctx.insert("method", "GET");
        ctx.insert("host", "example.com");
        ctx.insert("uri", "/x");
        ctx.insert("status", &200u16);
        ctx.insert("size", &5u64);
        assert_eq!(
            log.render(&ctx).expect("render"),
            "203.0.0.0 - curl/8 [2026-01-01T00:00:00Z] \"GET example.com/x HTTP/1.1\" 200 5"
        );
    }

    #[test]
    fn custom_log_format_is_used() {
        let log = AccessLog::new("{{ method }} {{ status }}", BTreeMap::new()).expect("format");
        let mut ctx = tera::Context::new();
        ctx.insert("method", "POST");
        ctx.insert("status", &503u16);
        assert_eq!(log.render(&ctx).expect("render"), "POST 503");
    }
}
