use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::{
    AccessHandler, OriginPolicy, ProxyResolver,
    access::{AccessDecision, DynAccessHandler},
    upstream::Direct,
};

/// Redirects followed per request unless configured otherwise.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Largest request body accepted for forwarding unless configured otherwise.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Usage text served for requests without a target.
pub const HELP_TEXT: &str = "\
This API enables cross-origin requests to anywhere.

Usage:

/               Shows help
/iscorsneeded   This is the only resource on this host which is served without CORS headers.
/<url>          Create a request to <url>, and includes CORS headers in the response.

If the protocol is omitted, it defaults to http (https if port 443 is specified).

Cookies are disabled and stripped from requests.

Redirects are automatically followed. For debugging purposes, each followed redirect results
in the addition of a X-CORS-Redirect-n header, where n starts at 1. These headers are not
accessible by the XMLHttpRequest API.
After 5 redirects, the redirects are not followed any more. The gateway then
answers with a 302 whose body is \"redirecting ad infinitum...\" and whose Location
points at the next URL through this API.

The requested URL is available in the X-Request-URL response header.
The final URL, after following all redirects, is available in the X-Final-URL response header.
";

/// Gateway configuration.
///
/// Built once at startup and shared read-only by all requests.
///
/// ```
/// use cors_gateway::ProxyConfig;
///
/// let config = ProxyConfig::default()
///     .origin_whitelist(["https://app.example.com"])
///     .remove_headers(["cookie", "cookie2"])
///     .max_redirects(3);
/// ```
#[derive(derive_more::Debug, Clone)]
pub struct ProxyConfig {
    pub(crate) policy: OriginPolicy,
    #[debug("{:?}", access_handler.as_ref().map(|_| "DynAccessHandler"))]
    pub(crate) access_handler: Option<Arc<DynAccessHandler<'static>>>,
    pub(crate) remove_headers: Vec<String>,
    pub(crate) set_headers: Vec<(HeaderName, HeaderValue)>,
    pub(crate) forward_headers: bool,
    pub(crate) max_redirects: usize,
    pub(crate) cors_max_age: Option<u64>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_body_size: usize,
    pub(crate) help_text: String,
    #[debug("ProxyResolver")]
    pub(crate) proxy_resolver: Arc<dyn ProxyResolver>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            policy: OriginPolicy::default(),
            access_handler: None,
            remove_headers: Vec::new(),
            set_headers: Vec::new(),
            forward_headers: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            cors_max_age: None,
            timeout: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            help_text: HELP_TEXT.to_string(),
            proxy_resolver: Arc::new(Direct),
        }
    }
}

impl ProxyConfig {
    /// Origins whose requests are answered with 403.
    pub fn origin_blacklist(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy = self.policy.blacklist(origins);
        self
    }

    /// If non-empty, only requests from these origins are served.
    pub fn origin_whitelist(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy = self.policy.whitelist(origins);
        self
    }

    /// At least one of these headers must be present on a request.
    pub fn require_headers(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy = self.policy.require_headers(names);
        self
    }

    /// Adds a check that runs after the origin rules.
    pub fn access_handler(mut self, handler: impl AccessHandler + 'static) -> Self {
        self.access_handler = Some(DynAccessHandler::new_arc(handler));
        self
    }

    /// Request headers stripped before forwarding.
    pub fn remove_headers(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.remove_headers = names
            .into_iter()
            .map(|name| name.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Request headers forced on every forwarded request.
    ///
    /// Applied last, so they override both client values and [`Self::remove_headers`].
    pub fn set_headers(mut self, headers: impl IntoIterator<Item = (HeaderName, HeaderValue)>) -> Self {
        self.set_headers = headers.into_iter().collect();
        self
    }

    /// Whether to add `X-Forwarded-*` headers to forwarded requests. Enabled by default.
    pub fn forward_headers(mut self, enabled: bool) -> Self {
        self.forward_headers = enabled;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// `Access-Control-Max-Age` sent on preflight responses.
    pub fn cors_max_age(mut self, seconds: u64) -> Self {
        self.cors_max_age = Some(seconds);
        self
    }

    /// Deadline for each upstream hop to deliver its response headers.
    ///
    /// Expiry answers 404 like any other transport failure. Response bodies
    /// are streamed without a deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Largest request body, in bytes, that is accepted for forwarding.
    ///
    /// Larger bodies are answered with 413 without contacting the upstream.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = text.into();
        self
    }

    /// Forward proxy selection for upstream requests. Defaults to direct connections.
    pub fn proxy_resolver(mut self, resolver: impl ProxyResolver) -> Self {
        self.proxy_resolver = Arc::new(resolver);
        self
    }

    pub(crate) async fn check_access(&self, headers: &HeaderMap) -> AccessDecision {
        self.policy.evaluate(headers)?;
        if let Some(handler) = &self.access_handler {
            handler.check(headers).await?;
        }
        Ok(())
    }
}

/// Facts about the listening socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOpts {
    /// Clients reach the listener over TLS, terminated in front of the gateway.
    ///
    /// Makes forwarded requests report `X-Forwarded-Proto: https` and rewritten
    /// `Location` headers point at an `https` gateway URL.
    pub tls: bool,
}
