use std::time::Duration;

use http::StatusCode;
use n0_error::stack_error;

/// Reasons a request is answered by the gateway itself instead of being proxied.
///
/// The [`Display`](std::fmt::Display) output of each variant is the response body
/// sent to the client, except for origin denials which answer with an empty body.
#[stack_error(derive)]
#[non_exhaustive]
pub enum RequestError {
    /// The encoded target carries a port above 65535.
    #[error("Port number too large: {port}")]
    PortTooLarge {
        /// Port text as it appeared in the request path.
        port: String,
    },

    /// The encoded target has no usable host (e.g. `/favicon.ico`).
    #[error("Invalid host: {host}")]
    InvalidHost {
        /// Host text as it appeared in the request path.
        host: String,
    },

    /// The path looks like `/http:/host`, usually a URL normalized by a frontend.
    #[error("The URL is invalid: two slashes are needed after the http(s):.")]
    MissingSlash,

    /// The `Origin` header is on the operator's blacklist.
    #[error("The origin \"{origin}\" was blacklisted by the operator of this proxy.")]
    OriginBlacklisted { origin: String },

    /// A whitelist is configured and the `Origin` header is not on it.
    #[error("The origin \"{origin}\" was not whitelisted by the operator of this proxy.")]
    OriginNotWhitelisted { origin: String },

    /// None of the configured required headers is present.
    #[error("Missing required request header. Must specify one of: {expected}")]
    MissingRequiredHeader {
        /// Comma-joined header names, in configured order.
        expected: String,
    },

    /// The request body is larger than the configured limit.
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Rejected by an embedder-supplied [`AccessHandler`](crate::AccessHandler).
    #[error("{reason}")]
    Denied { status: StatusCode, reason: String },
}

impl RequestError {
    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PortTooLarge { .. } | Self::MissingSlash => StatusCode::BAD_REQUEST,
            Self::InvalidHost { .. } => StatusCode::NOT_FOUND,
            Self::OriginBlacklisted { .. } | Self::OriginNotWhitelisted { .. } => {
                StatusCode::FORBIDDEN
            }
            Self::MissingRequiredHeader { .. } => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Denied { status, .. } => *status,
        }
    }

    /// Response body sent to the client.
    pub fn body(&self) -> String {
        match self {
            Self::OriginBlacklisted { .. } | Self::OriginNotWhitelisted { .. } => String::new(),
            other => other.to_string(),
        }
    }
}

/// Failures before the upstream response headers arrive.
#[stack_error(derive)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Connecting, sending the request or reading the response head failed.
    #[error("upstream request failed")]
    Request {
        #[error(source, std_err)]
        source: reqwest::Error,
    },

    /// No response headers arrived within the configured timeout.
    #[error("no response from upstream within {timeout:?}")]
    Timeout { timeout: Duration },
}

/// Renders an error with its chain of sources, `outer: inner: root`.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !out.ends_with(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = inner.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use std::time::Duration;

    use super::{RequestError, UpstreamError, error_chain};

    #[test]
    fn status_and_body() {
        let err = RequestError::PortTooLarge {
            port: "65536".into(),
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body(), "Port number too large: 65536");

        let err = RequestError::InvalidHost {
            host: "favicon.ico".into(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.body(), "Invalid host: favicon.ico");

        let err = RequestError::OriginBlacklisted {
            origin: "http://denied.origin.test".into(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.body(), "");
        assert!(err.to_string().contains("blacklisted"));

        let err = RequestError::BodyTooLarge { limit: 1024 };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.body(), "Request body exceeds 1024 bytes");
    }

    #[test]
    fn timeout_renders_duration() {
        let err = UpstreamError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(error_chain(&err), "no response from upstream within 1.5s");
    }
}
