//! # k-server
//!
//! The reverse HTTP router behind `k serve`: a multi-host static/proxy mux
//! compiled from the rendered `k-http.json` routing table, with
//! socket-activated listeners, ACME TLS, basic-auth gating, error-page
//! redirects, and structured access logging to the systemd journal.

pub mod error;
pub mod journal;
pub mod middleware;
pub mod mux;
pub mod proxy;
pub mod serve;

pub use error::ServerError;
pub use mux::Mux;
pub use serve::start;
