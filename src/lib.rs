//! A forwarding HTTP gateway that makes any URL reachable from browsers.
//!
//! A request to `http://gateway/<url>` is forwarded to `<url>` and the
//! response is relayed back with `Access-Control-Allow-Origin: *` and an
//! `Access-Control-Expose-Headers` listing, so that scripts on any origin can
//! read it. Upstream redirects are followed on the client's behalf and
//! recorded in `x-cors-redirect-N` headers.
//!
//! ```no_run
//! use cors_gateway::{CorsGateway, ProxyConfig};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> n0_error::Result<()> {
//! let gateway = CorsGateway::new(ProxyConfig::default().require_headers(["origin"]))?;
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! gateway.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

pub use reqwest::Url;

pub use self::{
    access::{AccessDecision, AccessHandler, OriginPolicy},
    config::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_REDIRECTS, HELP_TEXT, ListenerOpts, ProxyConfig},
    error::{RequestError, UpstreamError},
    headers::{X_FINAL_URL, X_REQUEST_URL, redirect_header_name},
    redirect::{Ending, ProxyOutcome, RedirectChain, RedirectHop},
    server::{ConnInfo, CorsGateway},
    target::{Resolved, Target},
    upstream::{Direct, EnvProxyResolver, ProxyResolver},
    util::HyperBody,
};

mod access;
mod config;
mod cors;
mod error;
mod headers;
mod redirect;
mod response;
mod server;
mod target;
mod upstream;
mod util;
