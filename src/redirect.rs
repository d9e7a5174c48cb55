//! Following upstream redirects on behalf of the client.
//!
//! A request moves through `Requesting -> (Redirected -> Requesting)* -> end`,
//! where the end is one of [`Ending`]. 301, 302 and 303 responses with a usable
//! `Location` are followed, 303 reissued as a bodiless `GET` (`HEAD` stays
//! `HEAD`). 307 and 308 are passed back to the client with the `Location`
//! pointing through the gateway.
//!
//! The configured timeout bounds each hop until its response headers arrive.
//! The body of the final response is streamed afterwards without a deadline.
//!
//! The hop budget (`max_redirects`) bounds the chase. Revisiting a URL is
//! tolerated while budget remains, so handshakes that bounce through the same
//! URL still work. Once the last hop of the budget points at an already
//! visited URL, or a redirect arrives after the budget is spent, the chase
//! stops with [`Ending::LoopDetected`] without issuing another request.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, header::LOCATION};
use reqwest::Url;
use tracing::{debug, warn};

use crate::{
    ProxyConfig, Target,
    error::UpstreamError,
    headers::{Forwarded, outbound_headers, redirect_header_name},
};

/// One followed redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    /// Status of the redirect response.
    pub status: StatusCode,
    /// Resolved URL the redirect pointed at.
    pub location: Url,
}

/// Redirects followed for one inbound request, in order.
#[derive(Debug, Clone, Default)]
pub struct RedirectChain {
    hops: Vec<RedirectHop>,
}

impl RedirectChain {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RedirectHop> {
        self.hops.iter()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.hops.iter().any(|hop| &hop.location == url)
    }

    /// `(x-cors-redirect-N, "<status> <url>")` for every hop, numbered from 1.
    pub fn header_entries(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.hops.iter().enumerate().map(|(i, hop)| {
            (
                redirect_header_name(i + 1),
                format!("{} {}", hop.status.as_u16(), hop.location),
            )
        })
    }

    fn push(&mut self, hop: RedirectHop) {
        self.hops.push(hop);
    }
}

/// How the chase ended.
#[derive(Debug)]
pub enum Ending {
    /// The upstream answered with a response that is relayed as is.
    Done(reqwest::Response),
    /// A 307 or 308 that is relayed with its `Location` routed through the gateway.
    NotFollowed {
        response: reqwest::Response,
        location: Url,
    },
    /// Redirects kept coming after the hop budget was spent, or the last hop
    /// of the budget pointed back at an already visited URL.
    LoopDetected { target: Url },
    /// The upstream could not be reached or did not answer in time.
    Failed(UpstreamError),
}

/// Result of forwarding one inbound request.
#[derive(Debug)]
pub struct ProxyOutcome {
    /// Target decoded from the inbound request.
    pub request_url: Url,
    /// Last URL actually requested.
    pub final_url: Url,
    pub chain: RedirectChain,
    pub ending: Ending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transition {
    Done,
    NotFollowed { location: Url },
    Redirected { reissue_as_get: bool },
    LoopDetected { target: Url, revisit: bool },
}

/// Redirect bookkeeping, independent of any I/O.
#[derive(Debug, Clone)]
pub(crate) struct RedirectState {
    first: Target,
    current: Target,
    chain: RedirectChain,
    max_redirects: usize,
}

impl RedirectState {
    pub(crate) fn new(first: Target, max_redirects: usize) -> Self {
        Self {
            current: first.clone(),
            first,
            chain: RedirectChain::default(),
            max_redirects,
        }
    }

    pub(crate) fn current(&self) -> &Target {
        &self.current
    }

    /// Advances on an upstream response. On `Redirected`, [`Self::current`] is the next target.
    pub(crate) fn on_response(&mut self, status: StatusCode, location: Option<&str>) -> Transition {
        let follow = match status.as_u16() {
            301..=303 => true,
            307 | 308 => false,
            _ => return Transition::Done,
        };
        let Some(next) = location.and_then(|location| self.current.join(location)) else {
            return Transition::Done;
        };
        if !follow {
            return Transition::NotFollowed {
                location: next.into_url(),
            };
        }

        let hop = self.chain.len() + 1;
        if hop > self.max_redirects {
            return Transition::LoopDetected {
                target: next.into_url(),
                revisit: false,
            };
        }
        let revisit = next == self.first || self.chain.contains(next.url());
        self.chain.push(RedirectHop {
            status,
            location: next.url().clone(),
        });
        if revisit && hop == self.max_redirects {
            return Transition::LoopDetected {
                target: next.into_url(),
                revisit: true,
            };
        }
        self.current = next;
        Transition::Redirected {
            reissue_as_get: status == StatusCode::SEE_OTHER,
        }
    }

    pub(crate) fn finish(self, ending: Ending) -> ProxyOutcome {
        ProxyOutcome {
            request_url: self.first.into_url(),
            final_url: self.current.into_url(),
            chain: self.chain,
            ending,
        }
    }
}

/// Inbound request data replayed on every hop.
#[derive(Debug)]
pub(crate) struct Replay<'a> {
    pub method: Method,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
    pub forwarded: Option<Forwarded>,
}

/// Sends the request upstream and follows redirects until an [`Ending`] is reached.
pub(crate) async fn chase(
    client: &reqwest::Client,
    config: &ProxyConfig,
    target: Target,
    request: Replay<'_>,
) -> ProxyOutcome {
    let Replay {
        mut method,
        headers: inbound,
        mut body,
        forwarded,
    } = request;
    let mut reissued_as_get = false;
    let mut state = RedirectState::new(target, config.max_redirects);
    loop {
        let target = state.current().clone();
        let headers = outbound_headers(inbound, &target, config, forwarded.as_ref(), reissued_as_get);
        debug!(%method, %target, hop = state.chain.len(), "sending upstream request");

        let mut builder = client
            .request(method.clone(), target.url().clone())
            .headers(headers);
        if !body.is_empty() || !matches!(method, Method::GET | Method::HEAD) {
            builder = builder.body(body.clone());
        }
        let response = match send(builder, config.timeout).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%target, "upstream request failed: {err:#}");
                return state.finish(Ending::Failed(err));
            }
        };

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        match state.on_response(response.status(), location.as_deref()) {
            Transition::Done => return state.finish(Ending::Done(response)),
            Transition::NotFollowed { location } => {
                return state.finish(Ending::NotFollowed { response, location });
            }
            Transition::LoopDetected { target, revisit } => {
                if revisit {
                    debug!(%target, hops = state.chain.len(), "redirect loop detected");
                } else {
                    debug!(%target, hops = state.chain.len(), "redirect budget exhausted");
                }
                return state.finish(Ending::LoopDetected { target });
            }
            Transition::Redirected { reissue_as_get } => {
                debug!(status = %response.status(), next = %state.current(), "following redirect");
                if reissue_as_get {
                    if method != Method::HEAD {
                        method = Method::GET;
                    }
                    body = Bytes::new();
                    reissued_as_get = true;
                }
            }
        }
    }
}

/// Sends one hop, waiting at most `timeout` for the response headers.
async fn send(
    builder: reqwest::RequestBuilder,
    timeout: Option<Duration>,
) -> Result<reqwest::Response, UpstreamError> {
    let Some(timeout) = timeout else {
        return builder
            .send()
            .await
            .map_err(|source| UpstreamError::Request { source });
    };
    match tokio::time::timeout(timeout, builder.send()).await {
        Ok(res) => res.map_err(|source| UpstreamError::Request { source }),
        Err(_elapsed) => Err(UpstreamError::Timeout { timeout }),
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::{RedirectState, Transition};
    use crate::{Resolved, Target};

    fn target(url: &str) -> Target {
        match Target::resolve(&format!("/{url}")).unwrap() {
            Resolved::Proxy(target) => target,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_redirects_are_done() {
        let mut state = RedirectState::new(target("http://example.com/"), 5);
        assert_eq!(state.on_response(StatusCode::OK, None), Transition::Done);
        assert_eq!(
            state.on_response(StatusCode::CREATED, Some("/created")),
            Transition::Done
        );
        assert_eq!(state.on_response(StatusCode::FOUND, None), Transition::Done);
        assert_eq!(
            state.on_response(StatusCode::FOUND, Some("mailto:x@example.com")),
            Transition::Done
        );
    }

    #[test]
    fn follows_and_records() {
        let mut state = RedirectState::new(target("http://example.com/redirect"), 5);
        assert_eq!(
            state.on_response(StatusCode::FOUND, Some("/redirecttarget")),
            Transition::Redirected {
                reissue_as_get: false
            }
        );
        assert_eq!(state.current().to_string(), "http://example.com/redirecttarget");
        assert_eq!(
            state.on_response(StatusCode::SEE_OTHER, Some("https://other.test/")),
            Transition::Redirected {
                reissue_as_get: true
            }
        );
        assert_eq!(state.on_response(StatusCode::OK, None), Transition::Done);

        let outcome = state.finish(super::Ending::LoopDetected {
            target: "http://unused.test/".parse().unwrap(),
        });
        let headers: Vec<_> = outcome.chain.header_entries().collect();
        assert_eq!(
            headers,
            vec![
                (
                    "x-cors-redirect-1".to_string(),
                    "302 http://example.com/redirecttarget".to_string()
                ),
                (
                    "x-cors-redirect-2".to_string(),
                    "303 https://other.test/".to_string()
                ),
            ]
        );
        assert_eq!(outcome.request_url.as_str(), "http://example.com/redirect");
        assert_eq!(outcome.final_url.as_str(), "https://other.test/");
    }

    #[test]
    fn temporary_redirects_are_not_followed() {
        let mut state = RedirectState::new(target("http://example.com/a"), 5);
        assert_eq!(
            state.on_response(StatusCode::TEMPORARY_REDIRECT, Some("/b")),
            Transition::NotFollowed {
                location: "http://example.com/b".parse().unwrap()
            }
        );
        assert_eq!(
            state.on_response(StatusCode::PERMANENT_REDIRECT, Some("http://other.test/")),
            Transition::NotFollowed {
                location: "http://other.test/".parse().unwrap()
            }
        );
        assert!(state.chain.is_empty());
    }

    #[test]
    fn self_loop_stops_at_budget() {
        let mut state = RedirectState::new(target("http://example.com/redirectloop"), 5);
        for _ in 0..4 {
            assert!(matches!(
                state.on_response(StatusCode::FOUND, Some("/redirectloop")),
                Transition::Redirected { .. }
            ));
        }
        assert_eq!(
            state.on_response(StatusCode::FOUND, Some("/redirectloop")),
            Transition::LoopDetected {
                target: "http://example.com/redirectloop".parse().unwrap(),
                revisit: true,
            }
        );
        assert_eq!(state.chain.len(), 5);
    }

    #[test]
    fn distinct_chain_within_budget_is_fetched() {
        let mut state = RedirectState::new(target("http://example.com/0"), 5);
        for i in 1..=5 {
            assert!(matches!(
                state.on_response(StatusCode::MOVED_PERMANENTLY, Some(&format!("/{i}"))),
                Transition::Redirected { .. }
            ));
        }
        assert_eq!(state.current().to_string(), "http://example.com/5");
        assert_eq!(
            state.on_response(StatusCode::FOUND, Some("/6")),
            Transition::LoopDetected {
                target: "http://example.com/6".parse().unwrap(),
                revisit: false,
            }
        );
        assert_eq!(state.chain.len(), 5);
    }

    #[test]
    fn two_node_loop_stops_at_budget() {
        let mut state = RedirectState::new(target("http://example.com/ping"), 5);
        for next in ["/pong", "/ping", "/pong", "/ping"] {
            assert!(matches!(
                state.on_response(StatusCode::FOUND, Some(next)),
                Transition::Redirected { .. }
            ));
        }
        assert_eq!(
            state.on_response(StatusCode::FOUND, Some("/pong")),
            Transition::LoopDetected {
                target: "http://example.com/pong".parse().unwrap(),
                revisit: true,
            }
        );
        assert_eq!(state.chain.len(), 5);
        assert_eq!(state.current().to_string(), "http://example.com/ping");
    }

    #[test]
    fn unusable_location_is_done() {
        let mut state = RedirectState::new(target("http://example.com/a"), 5);
        for location in ["mailto:x@example.com", "ftp://example.com/file", "http://"] {
            assert_eq!(
                state.on_response(StatusCode::FOUND, Some(location)),
                Transition::Done,
                "{location}"
            );
        }
        assert!(state.chain.is_empty());
        assert_eq!(state.current().to_string(), "http://example.com/a");
    }

    #[test]
    fn zero_budget_never_follows() {
        let mut state = RedirectState::new(target("http://example.com/"), 0);
        assert!(matches!(
            state.on_response(StatusCode::FOUND, Some("/next")),
            Transition::LoopDetected { .. }
        ));
        assert!(state.chain.is_empty());
    }
}
