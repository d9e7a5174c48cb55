use std::time::Duration;

use clap::Parser;
use cors_gateway::{CorsGateway, EnvProxyResolver, ListenerOpts, ProxyConfig};
use http::{HeaderName, HeaderValue};
use n0_error::{Result, StdResultExt};
use tokio::net::TcpListener;
use tracing::info;

/// Forwarding HTTP gateway: `GET /<url>` fetches `<url>` and adds CORS headers.
///
/// Outbound requests honor the `http_proxy`, `https_proxy` and `no_proxy`
/// environment variables.
#[derive(Parser, Debug)]
#[clap(version)]
struct Cli {
    /// Interface to listen on.
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on.
    #[clap(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
    /// Origins that are denied.
    #[clap(long, env = "CORSANYWHERE_BLACKLIST", value_delimiter = ',')]
    origin_blacklist: Vec<String>,
    /// If set, only these origins are served.
    #[clap(long, env = "CORSANYWHERE_WHITELIST", value_delimiter = ',')]
    origin_whitelist: Vec<String>,
    /// Requests must carry at least one of these headers.
    #[clap(long, env = "CORSANYWHERE_REQUIRE_HEADER", value_delimiter = ',')]
    require_header: Vec<String>,
    /// Request headers stripped before forwarding.
    #[clap(
        long,
        env = "CORSANYWHERE_REMOVE_HEADERS",
        value_delimiter = ',',
        default_value = "cookie,cookie2"
    )]
    remove_headers: Vec<String>,
    /// Request headers forced on every forwarded request, as `name=value`.
    #[clap(long, env = "CORSANYWHERE_SET_HEADERS", value_delimiter = ',', value_parser = parse_header_pair)]
    set_header: Vec<(HeaderName, HeaderValue)>,
    /// Redirects followed per request.
    #[clap(long, env = "CORSANYWHERE_MAX_REDIRECTS", default_value_t = cors_gateway::DEFAULT_MAX_REDIRECTS)]
    max_redirects: usize,
    /// Access-Control-Max-Age for preflight responses, in seconds.
    #[clap(long, env = "CORSANYWHERE_CORS_MAX_AGE")]
    cors_max_age: Option<u64>,
    /// Deadline for each upstream hop to send its response headers, in seconds.
    #[clap(long, env = "CORSANYWHERE_TIMEOUT")]
    timeout: Option<u64>,
    /// Largest request body forwarded upstream, in bytes.
    #[clap(long, env = "CORSANYWHERE_MAX_BODY_SIZE", default_value_t = cors_gateway::DEFAULT_MAX_BODY_SIZE)]
    max_body_size: usize,
    /// Do not add X-Forwarded-* headers.
    #[clap(long, env = "CORSANYWHERE_NO_XFWD")]
    no_xfwd: bool,
    /// Clients connect over TLS terminated in front of this process.
    #[clap(long)]
    tls: bool,
}

fn parse_header_pair(s: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
    let name = HeaderName::try_from(name.trim()).map_err(|err| err.to_string())?;
    let value = HeaderValue::try_from(value.trim()).map_err(|err| err.to_string())?;
    Ok((name, value))
}

fn non_empty(values: Vec<String>) -> impl Iterator<Item = String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let mut config = ProxyConfig::default()
        .origin_blacklist(non_empty(cli.origin_blacklist))
        .origin_whitelist(non_empty(cli.origin_whitelist))
        .require_headers(non_empty(cli.require_header))
        .remove_headers(non_empty(cli.remove_headers))
        .set_headers(cli.set_header)
        .max_redirects(cli.max_redirects)
        .max_body_size(cli.max_body_size)
        .forward_headers(!cli.no_xfwd)
        .proxy_resolver(EnvProxyResolver::from_env()?);
    if let Some(max_age) = cli.cors_max_age {
        config = config.cors_max_age(max_age);
    }
    if let Some(timeout) = cli.timeout {
        config = config.timeout(Duration::from_secs(timeout));
    }

    let gateway = CorsGateway::new(config)?.listener_opts(ListenerOpts { tls: cli.tls });
    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .std_context("failed to bind listener")?;
    info!(addr = %listener.local_addr()?, "running cors gateway");

    tokio::select! {
        res = gateway.serve(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    }
}
