use std::{convert::Infallible, error::Error, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http::{
    Method, Request, Response,
    header::HOST,
    request::Parts,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::{body::Body, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use n0_error::{Result, anyerr};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error_span, info, warn};

use crate::{
    ListenerOpts, ProxyConfig, RequestError, Resolved, Target, cors,
    headers::Forwarded,
    redirect::{Replay, chase},
    response,
    upstream::build_client,
    util::HyperBody,
};

/// Addresses of the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ConnInfo {
    /// Address of the client.
    pub remote_addr: SocketAddr,
    /// Address the gateway accepted the connection on.
    pub local_addr: SocketAddr,
}

/// HTTP gateway that forwards `/<url>` requests to `<url>` and adds CORS headers.
///
/// Cheap to clone; clones share configuration and the upstream connection pool.
/// Dropping the future of an in-flight request (e.g. because the client went
/// away) cancels the upstream request as well.
#[derive(derive_more::Debug, Clone)]
pub struct CorsGateway {
    config: Arc<ProxyConfig>,
    #[debug("reqwest::Client")]
    client: reqwest::Client,
    listener: ListenerOpts,
}

impl CorsGateway {
    /// Creates a gateway. Fails if the upstream HTTP client cannot be built.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            listener: ListenerOpts::default(),
        })
    }

    pub fn listener_opts(mut self, opts: ListenerOpts) -> Self {
        self.listener = opts;
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accepts connections from the listener and serves each in a new task.
    ///
    /// Runs until the listener errors. Connection tasks are cancelled when
    /// this future is dropped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "cors gateway listening");
        let cancel_token = CancellationToken::new();
        let _cancel_guard = cancel_token.clone().drop_guard();
        let mut id = 0;
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let this = self.clone();
            let conn = ConnInfo {
                remote_addr,
                local_addr,
            };
            tokio::spawn(
                cancel_token
                    .child_token()
                    .run_until_cancelled_owned(async move {
                        debug!(%remote_addr, "accepted connection");
                        if let Err(err) = this.serve_connection(stream, conn).await {
                            warn!("Failed to serve connection: {err:#}");
                        }
                    })
                    .instrument(error_span!("conn", id)),
            );
            id += 1;
        }
    }

    /// Serves HTTP/1.1 and HTTP/2 requests on a single connection.
    ///
    /// Use this to put the gateway behind your own listener, e.g. a TLS acceptor.
    pub async fn serve_connection<IO>(&self, io: IO, conn: ConnInfo) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(io);
        let service = service_fn(|req| {
            let this = self.clone();
            async move { Ok::<_, Infallible>(this.handle(req, conn).await) }
        });
        let builder = auto::Builder::new(TokioExecutor::new());
        builder
            .serve_connection(io, service)
            .await
            .map_err(|err| anyerr!("{err}"))?;
        Ok(())
    }

    /// Answers a single request.
    pub async fn handle<B>(&self, req: Request<B>, conn: ConnInfo) -> Response<HyperBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let span = debug_span!("req", method = %req.method(), uri = %req.uri());
        self.handle_inner(req, conn).instrument(span).await
    }

    async fn handle_inner<B>(&self, req: Request<B>, conn: ConnInfo) -> Response<HyperBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let preflight = parts.method == Method::OPTIONS;
        let cors = cors::cors_headers(&parts.headers, preflight, self.config.cors_max_age);
        if preflight {
            return response::preflight(cors);
        }

        let path = parts
            .uri
            .path_and_query()
            .map(|path| path.as_str())
            .unwrap_or("/");
        let target = match Target::resolve(path) {
            Ok(Resolved::Proxy(target)) => target,
            Ok(Resolved::Help) => return response::help(&self.config.help_text, cors),
            Ok(Resolved::IsCorsNeeded) => return response::is_cors_needed(),
            Err(err) => {
                debug!("rejected target: {err}");
                return response::rejected(&err, cors);
            }
        };

        if let Err(err) = self.config.check_access(&parts.headers).await {
            debug!(%target, "access denied: {err}");
            return response::rejected(&err, cors);
        }

        let limit = self.config.max_body_size;
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(limit, "request body too large");
                return response::rejected(&RequestError::BodyTooLarge { limit }, cors);
            }
            Err(err) => {
                warn!("failed to read request body: {err}");
                return response::bad_request("Failed to read request body", cors);
            }
        };

        let base_url = gateway_base_url(&parts, conn, self.listener.tls);
        let forwarded = self.config.forward_headers.then(|| Forwarded {
            client_ip: conn.remote_addr.ip(),
            port: conn.local_addr.port(),
            proto: if self.listener.tls { "https" } else { "http" },
        });
        let replay = Replay {
            method: parts.method.clone(),
            headers: &parts.headers,
            body,
            forwarded,
        };
        let outcome = chase(&self.client, &self.config, target, replay).await;
        debug!(
            final_url = %outcome.final_url,
            redirects = outcome.chain.len(),
            "upstream exchange finished"
        );
        response::compose(outcome, cors, &base_url)
    }
}

/// `<scheme>://<host>` under which clients reach the gateway.
///
/// The scheme is `https` for TLS listeners or when a fronting proxy reports
/// `X-Forwarded-Proto: https`.
fn gateway_base_url(parts: &Parts, conn: ConnInfo, tls: bool) -> String {
    let forwarded_https = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("https"));
    let scheme = if tls || forwarded_https { "https" } else { "http" };
    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_else(|| conn.local_addr.to_string());
    format!("{scheme}://{host}")
}
