use std::{collections::HashSet, future::Future};

use dynosaur::dynosaur;
use http::{HeaderMap, header::ORIGIN};

use crate::RequestError;

/// Outcome of an access check: `Ok(())` lets the request through.
pub type AccessDecision = Result<(), RequestError>;

#[dynosaur(pub(crate) DynAccessHandler = dyn(box) AccessHandler)]
/// Decides whether an inbound request may be proxied.
///
/// Runs after the built-in [`OriginPolicy`] accepted the request, so
/// implementations only add further restrictions.
pub trait AccessHandler: Send + Sync {
    /// Checks the inbound request headers.
    ///
    /// Returning an error answers the request with [`RequestError::status`].
    fn check<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> impl Future<Output = AccessDecision> + Send + 'a;
}

/// Origin and header based access rules configured by the operator.
///
/// Rules are evaluated in order: blacklist, whitelist, required headers.
/// Origins are compared as exact strings.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    require_headers: Vec<String>,
}

impl OriginPolicy {
    /// Origins that are always denied.
    pub fn blacklist(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.blacklist = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Origins that are allowed. An empty whitelist allows every origin.
    pub fn whitelist(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.whitelist = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Header names of which at least one must be present on the request.
    pub fn require_headers(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.require_headers = names
            .into_iter()
            .map(|name| name.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn evaluate(&self, headers: &HeaderMap) -> AccessDecision {
        let origin = headers
            .get(ORIGIN)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default();

        if self.blacklist.contains(&origin) {
            return Err(RequestError::OriginBlacklisted { origin });
        }
        if !self.whitelist.is_empty() && !self.whitelist.contains(&origin) {
            return Err(RequestError::OriginNotWhitelisted { origin });
        }
        if !self.require_headers.is_empty()
            && !self
                .require_headers
                .iter()
                .any(|name| headers.contains_key(name.as_str()))
        {
            return Err(RequestError::MissingRequiredHeader {
                expected: self.require_headers.join(","),
            });
        }
        Ok(())
    }
}

impl AccessHandler for OriginPolicy {
    async fn check<'a>(&'a self, headers: &'a HeaderMap) -> AccessDecision {
        self.evaluate(headers)
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue, StatusCode};

    use super::OriginPolicy;
    use crate::RequestError;

    fn with_origin(origin: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static(origin));
        headers
    }

    #[test]
    fn empty_policy_allows_everything() {
        let policy = OriginPolicy::default();
        assert!(policy.evaluate(&HeaderMap::new()).is_ok());
        assert!(policy.evaluate(&with_origin("null")).is_ok());
    }

    #[test]
    fn blacklist() {
        let policy = OriginPolicy::default().blacklist(["http://denied.origin.test"]);
        let err = policy
            .evaluate(&with_origin("http://denied.origin.test"))
            .unwrap_err();
        assert!(matches!(err, RequestError::OriginBlacklisted { .. }));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        assert!(policy.evaluate(&with_origin("https://denied.origin.test")).is_ok());
        assert!(policy.evaluate(&with_origin("http://allowed.origin.test")).is_ok());
        assert!(policy.evaluate(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn whitelist() {
        let policy = OriginPolicy::default().whitelist(["https://permitted.origin.test"]);
        assert!(policy.evaluate(&with_origin("https://permitted.origin.test")).is_ok());

        let err = policy
            .evaluate(&with_origin("http://permitted.origin.test"))
            .unwrap_err();
        assert!(matches!(err, RequestError::OriginNotWhitelisted { .. }));

        let err = policy.evaluate(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let policy = OriginPolicy::default()
            .blacklist(["http://both.origin.test"])
            .whitelist(["http://both.origin.test"]);
        let err = policy
            .evaluate(&with_origin("http://both.origin.test"))
            .unwrap_err();
        assert!(matches!(err, RequestError::OriginBlacklisted { .. }));
    }

    #[test]
    fn required_headers() {
        let policy = OriginPolicy::default().require_headers(["Origin", "X-Requested-With"]);

        let err = policy.evaluate(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.body(),
            "Missing required request header. Must specify one of: origin,x-requested-with"
        );

        assert!(policy.evaluate(&with_origin("null")).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert("x-requested-with", HeaderValue::from_static(""));
        assert!(policy.evaluate(&headers).is_ok());
    }
}
