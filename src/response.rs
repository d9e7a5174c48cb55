//! Responses sent back to the client.

use http::{
    HeaderMap, HeaderName, HeaderValue, Response, StatusCode,
    header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE, LOCATION},
};

use crate::{
    RequestError,
    error::error_chain,
    headers::{X_FINAL_URL, X_REQUEST_URL, expose_headers, response_headers},
    redirect::{Ending, ProxyOutcome},
    util::{HyperBody, empty_body, full_body, stream_body},
};

pub(crate) const LOOP_BODY: &str = "redirecting ad infinitum...";
pub(crate) const PROXY_ERROR_PREFIX: &str = "Not found because of proxy error: ";

fn build(status: StatusCode, headers: HeaderMap, body: HyperBody) -> Response<HyperBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn text(status: StatusCode, mut headers: HeaderMap, body: String) -> Response<HyperBody> {
    if !body.is_empty() {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    build(status, headers, full_body(body))
}

pub(crate) fn preflight(cors: HeaderMap) -> Response<HyperBody> {
    build(StatusCode::OK, cors, empty_body())
}

pub(crate) fn help(text_body: &str, cors: HeaderMap) -> Response<HyperBody> {
    text(StatusCode::OK, cors, text_body.to_string())
}

/// The `/iscorsneeded` probe, deliberately without CORS headers.
pub(crate) fn is_cors_needed() -> Response<HyperBody> {
    text(StatusCode::OK, HeaderMap::new(), "no".to_string())
}

pub(crate) fn rejected(err: &RequestError, cors: HeaderMap) -> Response<HyperBody> {
    text(err.status(), cors, err.body())
}

pub(crate) fn bad_request(reason: &str, cors: HeaderMap) -> Response<HyperBody> {
    text(StatusCode::BAD_REQUEST, cors, reason.to_string())
}

/// Composes the client response for a finished chase.
///
/// Gateway headers (`x-request-url`, `x-final-url`, `x-cors-redirect-N`) and
/// the CORS headers are added whatever the ending, and all non-CORS names
/// are listed in `Access-Control-Expose-Headers`.
pub(crate) fn compose(outcome: ProxyOutcome, cors: HeaderMap, base_url: &str) -> Response<HyperBody> {
    let ProxyOutcome {
        request_url,
        final_url,
        chain,
        ending,
    } = outcome;

    let (status, mut headers, body) = match ending {
        Ending::Done(response) => {
            let headers = response_headers(response.headers());
            (response.status(), headers, stream_body(response))
        }
        Ending::NotFollowed { response, location } => {
            let mut headers = response_headers(response.headers());
            insert(&mut headers, LOCATION, &through_gateway(base_url, location.as_str()));
            (response.status(), headers, stream_body(response))
        }
        Ending::LoopDetected { target } => {
            let mut headers = HeaderMap::new();
            insert(&mut headers, LOCATION, &through_gateway(base_url, target.as_str()));
            (StatusCode::FOUND, headers, full_body(LOOP_BODY))
        }
        Ending::Failed(err) => {
            let body = format!("{PROXY_ERROR_PREFIX}{}", error_chain(&err));
            let mut headers = HeaderMap::new();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            (StatusCode::NOT_FOUND, headers, full_body(body))
        }
    };

    insert(&mut headers, X_REQUEST_URL, request_url.as_str());
    insert(&mut headers, X_FINAL_URL, final_url.as_str());
    for (name, value) in chain.header_entries() {
        if let Ok(name) = HeaderName::try_from(name) {
            insert(&mut headers, name, &value);
        }
    }
    headers.extend(cors);
    if let Some(exposed) = expose_headers(&headers) {
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, exposed);
    }
    build(status, headers, body)
}

/// Routes an absolute URL back through the gateway, `<base>/<url>`.
fn through_gateway(base_url: &str, url: &str) -> String {
    format!("{base_url}/{url}")
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
