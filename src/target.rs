//! Decoding the upstream target from the inbound request path.
//!
//! The path after the leading slash holds the target URL: `/https://host/p?q`,
//! or a scheme-less `/host:port/p` that defaults to `http` (`https` for port 443).

use std::net::IpAddr;

use reqwest::Url;

use crate::RequestError;

mod tlds;

/// What an inbound path asks the gateway to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// No target is encoded, serve the usage text.
    Help,
    /// The `/iscorsneeded` probe.
    IsCorsNeeded,
    /// Forward to this target.
    Proxy(Target),
}

/// Absolute `http` or `https` URL a request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("{url}")]
pub struct Target {
    url: Url,
}

impl Target {
    /// Decodes the target from an inbound path and query, e.g. `/example.com:8080/a?b`.
    ///
    /// Hosts given without an explicit scheme must be IP literals or end in a
    /// known top-level domain, so that `/favicon.ico` is not mistaken for a host.
    pub fn resolve(path: &str) -> Result<Resolved, RequestError> {
        let raw = path.strip_prefix('/').unwrap_or(path);
        let (explicit_scheme, rest) = match split_scheme(raw) {
            Some((scheme, rest)) => (Some(scheme), rest),
            None if has_scheme_prefix(raw) => return no_target(path),
            None => (None, raw.strip_prefix("//").unwrap_or(raw)),
        };

        let end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, tail) = rest.split_at(end);
        let (host, port) = split_port(authority);
        if host.is_empty() {
            return no_target(path);
        }
        if host.eq_ignore_ascii_case("iscorsneeded") {
            return Ok(Resolved::IsCorsNeeded);
        }
        let port = port.filter(|port| !port.is_empty());
        if let Some(port) = port
            && port.parse::<u16>().is_err()
        {
            return Err(RequestError::PortTooLarge {
                port: port.to_string(),
            });
        }

        let scheme = match explicit_scheme {
            Some(scheme) => scheme,
            None => {
                if !is_valid_hostname(host) {
                    return Err(RequestError::InvalidHost {
                        host: host.to_ascii_lowercase(),
                    });
                }
                if port == Some("443") { "https" } else { "http" }
            }
        };

        let invalid_host = || RequestError::InvalidHost {
            host: host.to_ascii_lowercase(),
        };
        let url = Url::parse(&format!("{scheme}://{authority}{tail}")).map_err(|_| invalid_host())?;
        Target::from_url(url).map(Resolved::Proxy).ok_or_else(invalid_host)
    }

    /// Wraps an absolute URL, rejecting anything but `http`/`https` with a host.
    pub fn from_url(url: Url) -> Option<Self> {
        let usable = matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| !host.is_empty());
        usable.then_some(Self { url })
    }

    /// Resolves a `Location` value against this target.
    pub fn join(&self, location: &str) -> Option<Self> {
        self.url.join(location).ok().and_then(Self::from_url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn into_url(self) -> Url {
        self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Port including the scheme default.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// `host[:port]` as sent in the `Host` header. Default ports are omitted.
    pub fn authority(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{port}", self.host()),
            None => self.host().to_string(),
        }
    }
}

fn no_target(path: &str) -> Result<Resolved, RequestError> {
    if is_missing_slash(path) {
        Err(RequestError::MissingSlash)
    } else {
        Ok(Resolved::Help)
    }
}

fn split_scheme(raw: &str) -> Option<(&'static str, &str)> {
    for (prefix, scheme) in [("http://", "http"), ("https://", "https")] {
        if let Some(head) = raw.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            return Some((scheme, &raw[prefix.len()..]));
        }
    }
    None
}

fn has_scheme_prefix(raw: &str) -> bool {
    ["http:", "https:"].iter().any(|prefix| {
        raw.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// `/http:/host`: a single slash after the scheme.
fn is_missing_slash(path: &str) -> bool {
    let Some(raw) = path.strip_prefix('/') else {
        return false;
    };
    ["http:/", "https:/"].iter().any(|prefix| {
        raw.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            && raw[prefix.len()..]
                .chars()
                .next()
                .is_some_and(|next| next != '/')
    })
}

/// Splits a trailing `:digits` port off an authority. Bracketed IPv6 hosts keep their colons.
fn split_port(authority: &str) -> (&str, Option<&str>) {
    match authority.rsplit_once(':') {
        Some((host, port))
            if port.bytes().all(|b| b.is_ascii_digit())
                && (!host.contains(':') || host.ends_with(']')) =>
        {
            (host, Some(port))
        }
        _ => (authority, None),
    }
}

fn is_valid_hostname(host: &str) -> bool {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if bare.parse::<IpAddr>().is_ok() {
        return true;
    }
    let host = host.strip_suffix('.').unwrap_or(host);
    match host.rsplit_once('.') {
        Some((name, tld)) if !name.is_empty() => tlds::is_known(tld),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{Resolved, Target};
    use crate::RequestError;

    fn proxied(path: &str) -> String {
        match Target::resolve(path) {
            Ok(Resolved::Proxy(target)) => target.to_string(),
            other => panic!("expected a proxy target for {path}, got {other:?}"),
        }
    }

    #[test]
    fn help_paths() {
        for path in ["/", "", "//example.com", "//", "/http://", "/https:///x"] {
            assert_eq!(Target::resolve(path).unwrap(), Resolved::Help, "{path}");
        }
    }

    #[test]
    fn scheme_less_targets() {
        assert_eq!(proxied("/example.com"), "http://example.com/");
        assert_eq!(proxied("///example.com"), "http://example.com/");
        assert_eq!(proxied("/example.com:443"), "https://example.com/");
        assert_eq!(proxied("/example.com:1337/a/b?c=d"), "http://example.com:1337/a/b?c=d");
        assert_eq!(proxied("/example.com?x=1"), "http://example.com/?x=1");
        assert_eq!(proxied("/127.0.0.1:8080/path"), "http://127.0.0.1:8080/path");
        assert_eq!(proxied("/[::1]:8080/"), "http://[::1]:8080/");
    }

    #[test]
    fn explicit_scheme_targets() {
        assert_eq!(proxied("/http://example.com"), "http://example.com/");
        assert_eq!(proxied("/HTTPS://example.com/x"), "https://example.com/x");
        assert_eq!(proxied("/http://robots.txt"), "http://robots.txt/");
        assert_eq!(proxied("/http://localhost:3000/"), "http://localhost:3000/");
        assert_eq!(proxied("/https://example.com:443/"), "https://example.com/");
    }

    #[test]
    fn port_too_large() {
        let err = Target::resolve("/example.com:65536").unwrap_err();
        assert!(matches!(err, RequestError::PortTooLarge { ref port } if port == "65536"));
        assert_eq!(err.body(), "Port number too large: 65536");
        assert!(Target::resolve("/http://example.com:99999/").is_err());
        assert!(Target::resolve("/example.com:65535").is_ok());
    }

    #[test]
    fn invalid_hosts() {
        for (path, host) in [
            ("/favicon.ico", "favicon.ico"),
            ("/robots.txt", "robots.txt"),
            ("/localhost", "localhost"),
            ("/notatld.invalidtld", "notatld.invalidtld"),
        ] {
            let err = Target::resolve(path).unwrap_err();
            assert_eq!(err.body(), format!("Invalid host: {host}"));
        }
        assert_eq!(proxied("/xn--bcher-kva.xn--tckwe"), "http://xn--bcher-kva.xn--tckwe/");
    }

    #[test]
    fn missing_slash() {
        let err = Target::resolve("/http:/example.com").unwrap_err();
        assert!(matches!(err, RequestError::MissingSlash));
        assert!(matches!(
            Target::resolve("/https:/example.com/x").unwrap_err(),
            RequestError::MissingSlash
        ));
        assert_eq!(Target::resolve("/http:example.com").unwrap(), Resolved::Help);
    }

    #[test]
    fn iscorsneeded() {
        assert_eq!(Target::resolve("/iscorsneeded").unwrap(), Resolved::IsCorsNeeded);
    }

    #[test]
    fn join_and_authority() {
        let Resolved::Proxy(target) = Target::resolve("/example.com:8080/a/b").unwrap() else {
            panic!("expected target");
        };
        assert_eq!(target.authority(), "example.com:8080");
        assert_eq!(target.port(), 8080);
        assert_eq!(
            target.join("/redirecttarget").unwrap().to_string(),
            "http://example.com:8080/redirecttarget"
        );
        assert_eq!(
            target.join("https://other.test/x").unwrap().authority(),
            "other.test"
        );
        assert!(target.join("ftp://example.com/").is_none());
    }
}
