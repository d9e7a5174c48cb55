//! Header rewriting between the client and the upstream server.

use std::net::IpAddr;

use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{
        ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_REQUEST_HEADERS,
        ACCESS_CONTROL_REQUEST_METHOD, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST,
        PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, SET_COOKIE, TE, TRAILER, TRANSFER_ENCODING,
        UPGRADE,
    },
};

use crate::{ProxyConfig, Target};

/// Target URL decoded from the inbound request.
pub const X_REQUEST_URL: HeaderName = HeaderName::from_static("x-request-url");
/// URL the response body was fetched from, after followed redirects.
pub const X_FINAL_URL: HeaderName = HeaderName::from_static("x-final-url");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const SET_COOKIE2: HeaderName = HeaderName::from_static("set-cookie2");

const HOP_BY_HOP: [HeaderName; 9] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    HeaderName::from_static("proxy-connection"),
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Name of the header recording the `index`th followed redirect, starting at 1.
pub fn redirect_header_name(index: usize) -> String {
    format!("x-cors-redirect-{index}")
}

/// Values for the `X-Forwarded-*` headers, fixed for the lifetime of a request.
#[derive(Debug, Clone)]
pub(crate) struct Forwarded {
    pub client_ip: IpAddr,
    pub port: u16,
    pub proto: &'static str,
}

/// Removes hop-by-hop headers, including those named in `Connection`.
pub(crate) fn filter_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Headers for one upstream request, rebuilt from the inbound headers on every hop.
///
/// Order matters: configured removals run before the forwarding headers are
/// added, and configured headers are set last so they always win.
pub(crate) fn outbound_headers(
    inbound: &HeaderMap,
    target: &Target,
    config: &ProxyConfig,
    forwarded: Option<&Forwarded>,
    reissued_as_get: bool,
) -> HeaderMap {
    let mut headers = inbound.clone();
    filter_hop_by_hop_headers(&mut headers);
    for name in [
        HOST,
        CONTENT_LENGTH,
        ACCESS_CONTROL_REQUEST_METHOD,
        ACCESS_CONTROL_REQUEST_HEADERS,
    ] {
        headers.remove(name);
    }
    if reissued_as_get {
        headers.remove(CONTENT_TYPE);
    }
    for name in &config.remove_headers {
        headers.remove(name.as_str());
    }

    if let Some(forwarded) = forwarded {
        append_list(&mut headers, X_FORWARDED_FOR, &forwarded.client_ip.to_string());
        append_list(&mut headers, X_FORWARDED_PORT, &forwarded.port.to_string());
        append_list(&mut headers, X_FORWARDED_PROTO, forwarded.proto);
        if let Ok(host) = HeaderValue::from_str(&target.authority()) {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }

    for (name, value) in &config.set_headers {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Appends `value` to a comma separated header, creating it if absent.
fn append_list(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let joined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {value}"),
        _ => value.to_string(),
    };
    if let Ok(joined) = HeaderValue::from_str(&joined) {
        headers.insert(name, joined);
    }
}

/// Upstream response headers as relayed to the client.
///
/// Hop-by-hop headers are dropped, and so are cookies, since the gateway is
/// shared between all origins.
pub(crate) fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    filter_hop_by_hop_headers(&mut headers);
    headers.remove(SET_COOKIE);
    headers.remove(SET_COOKIE2);
    headers
}

/// Builds `Access-Control-Expose-Headers` for a composed response.
///
/// Lists every response header name except the CORS ones, followed by any
/// names the upstream itself declared as exposed.
pub(crate) fn expose_headers(headers: &HeaderMap) -> Option<HeaderValue> {
    let mut names: Vec<String> = headers
        .keys()
        .map(HeaderName::as_str)
        .filter(|name| !name.starts_with("access-control-"))
        .map(str::to_string)
        .collect();
    let declared = headers
        .get_all(ACCESS_CONTROL_EXPOSE_HEADERS)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty());
    for name in declared {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return None;
    }
    HeaderValue::from_str(&names.join(",")).ok()
}
