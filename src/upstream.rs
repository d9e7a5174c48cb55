//! Choosing an outbound forward proxy per upstream request.

use std::sync::Arc;

use n0_error::{Result, StdResultExt};
use reqwest::Url;
use tracing::debug;

use crate::ProxyConfig;

/// Picks the forward proxy for an upstream request, or `None` to connect directly.
///
/// Consulted for every outbound request, including each redirect hop.
/// Any `Fn(scheme, host, port) -> Option<Url>` closure is a resolver.
pub trait ProxyResolver: Send + Sync + 'static {
    fn proxy_for(&self, scheme: &str, host: &str, port: u16) -> Option<Url>;
}

impl<F> ProxyResolver for F
where
    F: Fn(&str, &str, u16) -> Option<Url> + Send + Sync + 'static,
{
    fn proxy_for(&self, scheme: &str, host: &str, port: u16) -> Option<Url> {
        self(scheme, host, port)
    }
}

/// Resolver that always connects directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct Direct;

impl ProxyResolver for Direct {
    fn proxy_for(&self, _scheme: &str, _host: &str, _port: u16) -> Option<Url> {
        None
    }
}

/// Resolver driven by the conventional `http_proxy`, `https_proxy` and `no_proxy` variables.
///
/// The proxy is chosen by the target scheme. A `no_proxy` entry of `host:port`
/// excludes exactly that host and port (default ports included), a bare `host`
/// excludes the host on any port, and `*` disables proxying altogether.
#[derive(Debug, Clone, Default)]
pub struct EnvProxyResolver {
    http_proxy: Option<Url>,
    https_proxy: Option<Url>,
    no_proxy: NoProxy,
}

impl EnvProxyResolver {
    pub fn new(http_proxy: Option<Url>, https_proxy: Option<Url>, no_proxy: &str) -> Self {
        Self {
            http_proxy,
            https_proxy,
            no_proxy: NoProxy::parse(no_proxy),
        }
    }

    /// Reads the process environment.
    ///
    /// `http_proxy` is only honored in lowercase. For `https_proxy` and `no_proxy`
    /// the lowercase variable takes precedence over the uppercase one.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| var(name))
                .find(|value| !value.trim().is_empty())
        };
        let http_proxy = lookup(&["http_proxy"])
            .map(|value| parse_proxy_url(&value))
            .transpose()?;
        let https_proxy = lookup(&["https_proxy", "HTTPS_PROXY"])
            .map(|value| parse_proxy_url(&value))
            .transpose()?;
        let no_proxy = lookup(&["no_proxy", "NO_PROXY"]).unwrap_or_default();
        Ok(Self::new(http_proxy, https_proxy, &no_proxy))
    }
}

impl ProxyResolver for EnvProxyResolver {
    fn proxy_for(&self, scheme: &str, host: &str, port: u16) -> Option<Url> {
        let proxy = match scheme {
            "http" => self.http_proxy.as_ref(),
            "https" => self.https_proxy.as_ref(),
            _ => None,
        }?;
        if self.no_proxy.matches(host, port) {
            return None;
        }
        Some(proxy.clone())
    }
}

fn parse_proxy_url(value: &str) -> Result<Url> {
    let value = value.trim();
    if value.contains("://") {
        Url::parse(value).std_context("invalid proxy URL")
    } else {
        Url::parse(&format!("http://{value}")).std_context("invalid proxy URL")
    }
}

#[derive(Debug, Clone, Default)]
struct NoProxy {
    all: bool,
    entries: Vec<(String, Option<u16>)>,
}

impl NoProxy {
    fn parse(list: &str) -> Self {
        let mut no_proxy = Self::default();
        for entry in list.split([',', ' ']).map(str::trim).filter(|e| !e.is_empty()) {
            if entry == "*" {
                no_proxy.all = true;
                continue;
            }
            let entry = entry.to_ascii_lowercase();
            let parsed = match entry.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                    match port.parse::<u16>() {
                        Ok(port) => (host.to_string(), Some(port)),
                        Err(_) => continue,
                    }
                }
                _ => (entry.clone(), None),
            };
            no_proxy.entries.push(parsed);
        }
        no_proxy
    }

    fn matches(&self, host: &str, port: u16) -> bool {
        self.all
            || self.entries.iter().any(|(entry_host, entry_port)| {
                entry_host.eq_ignore_ascii_case(host) && entry_port.is_none_or(|p| p == port)
            })
    }
}

/// Builds the client used for all upstream requests.
///
/// Redirects are never followed by the client itself, and proxy selection is
/// delegated to the configured [`ProxyResolver`]. The configured timeout is
/// applied per hop by [`crate::redirect`], not on the client.
pub(crate) fn build_client(config: &ProxyConfig) -> Result<reqwest::Client> {
    let resolver: Arc<dyn ProxyResolver> = config.proxy_resolver.clone();
    let proxy = reqwest::Proxy::custom(move |url| {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        let proxy = resolver.proxy_for(url.scheme(), host, port);
        if let Some(proxy) = &proxy {
            debug!(%url, %proxy, "using forward proxy");
        }
        proxy
    });
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .proxy(proxy)
        .build()
        .std_context("failed to build upstream client")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use reqwest::Url;

    use super::{EnvProxyResolver, ProxyResolver};

    fn resolver(vars: &[(&str, &str)]) -> EnvProxyResolver {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvProxyResolver::from_vars(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn proxy_per_scheme() {
        let resolver = resolver(&[
            ("http_proxy", "http://127.0.0.1:3128"),
            ("HTTPS_PROXY", "http://127.0.0.1:3129"),
        ]);
        assert_eq!(
            resolver.proxy_for("http", "example.com", 80).unwrap().as_str(),
            "http://127.0.0.1:3128/"
        );
        assert_eq!(
            resolver.proxy_for("https", "example.com", 443).unwrap().as_str(),
            "http://127.0.0.1:3129/"
        );
    }

    #[test]
    fn uppercase_http_proxy_is_ignored() {
        let resolver = resolver(&[("HTTP_PROXY", "http://127.0.0.1:3128")]);
        assert!(resolver.proxy_for("http", "example.com", 80).is_none());
    }

    #[test]
    fn lowercase_wins() {
        let resolver = resolver(&[
            ("https_proxy", "http://lower:1"),
            ("HTTPS_PROXY", "http://upper:1"),
            ("NO_PROXY", "example.com"),
            ("no_proxy", "other.test"),
        ]);
        assert_eq!(
            resolver.proxy_for("https", "example.com", 443).unwrap().host_str(),
            Some("lower")
        );
        assert!(resolver.proxy_for("https", "other.test", 443).is_none());
    }

    #[test]
    fn no_proxy_matches_host_and_port() {
        let resolver = resolver(&[
            ("https_proxy", "127.0.0.1:3129"),
            ("no_proxy", "example.com:443, skip.test"),
        ]);
        assert!(resolver.proxy_for("https", "example.com", 443).is_none());
        assert!(resolver.proxy_for("https", "example.com", 8443).is_some());
        assert!(resolver.proxy_for("https", "sub.example.com", 443).is_some());
        assert!(resolver.proxy_for("https", "skip.test", 1234).is_none());

        let all = super::EnvProxyResolver::new(
            Some(Url::parse("http://127.0.0.1:3128").unwrap()),
            None,
            "*",
        );
        assert!(all.proxy_for("http", "example.com", 80).is_none());
    }

    #[test]
    fn closures_are_resolvers() {
        let proxy = Url::parse("http://127.0.0.1:3128").unwrap();
        let resolver = move |scheme: &str, _host: &str, _port: u16| {
            (scheme == "http").then(|| proxy.clone())
        };
        assert!(resolver.proxy_for("http", "example.com", 80).is_some());
        assert!(resolver.proxy_for("https", "example.com", 443).is_none());
    }
}
