//! # Request Builder
//!
//! Produces the outgoing [`ImageRequest`] for a URL: base `Accept` header,
//! global per-host headers and credentials, HTTP cache mode and timeout,
//! then the caller's modification hook, which may override any of it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::cache::CachePolicy;
use crate::policy::{Credentials, GlobalPolicyStore};

/// Hook run last on every request built for a download.
pub type RequestModifier = Arc<dyn Fn(&mut ImageRequest) + Send + Sync>;

/// How intermediate HTTP caches may answer the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCacheMode {
    /// Let HTTP caching headers decide
    ProtocolDefault,
    /// Ask every cache on the way to revalidate with the origin
    ReloadIgnoringCache,
}

impl From<CachePolicy> for HttpCacheMode {
    fn from(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::ForceDownload => HttpCacheMode::ReloadIgnoringCache,
            _ => HttpCacheMode::ProtocolDefault,
        }
    }
}

/// A fully resolved outgoing image request.
#[derive(Clone)]
pub struct ImageRequest {
    pub url: Url,
    pub cache_mode: HttpCacheMode,
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub credentials: Option<Credentials>,
    /// Per-request certificate trust override
    pub accept_invalid_certs: bool,
}

impl ImageRequest {
    /// Set a header, replacing any existing value. Invalid input is ignored.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Apply this request onto a reqwest client.
    pub fn to_http(&self, client: &Client) -> RequestBuilder {
        let mut builder = client
            .get(self.url.clone())
            .headers(self.headers.clone())
            .timeout(self.timeout);

        if self.cache_mode == HttpCacheMode::ReloadIgnoringCache {
            builder = builder
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        builder
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("url", &self.url.as_str())
            .field("cache_mode", &self.cache_mode)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.len())
            .field("credentials", &self.credentials)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Builds [`ImageRequest`]s from the shared policy store.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    policy: Arc<GlobalPolicyStore>,
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl RequestFactory {
    pub fn new(policy: Arc<GlobalPolicyStore>, timeout: Duration, accept_invalid_certs: bool) -> Self {
        Self {
            policy,
            timeout,
            accept_invalid_certs,
        }
    }

    pub fn build(
        &self,
        url: &Url,
        cache_policy: CachePolicy,
        modifier: Option<&RequestModifier>,
    ) -> ImageRequest {
        let host = url.host_str();

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("image/*"));
        for (name, value) in &self.policy.headers_for(host) {
            headers.insert(name.clone(), value.clone());
        }

        let mut request = ImageRequest {
            url: url.clone(),
            cache_mode: cache_policy.into(),
            timeout: self.timeout,
            headers,
            credentials: self.policy.credentials_for(host),
            accept_invalid_certs: self.accept_invalid_certs
                || self.policy.trusts_all_certificates(),
        };

        if let Some(modify) = modifier {
            modify(&mut request);
        }

        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> (Arc<GlobalPolicyStore>, RequestFactory) {
        let policy = Arc::new(GlobalPolicyStore::new());
        let factory = RequestFactory::new(policy.clone(), Duration::from_secs(30), false);
        (policy, factory)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_base_request() {
        let (_, factory) = factory();
        let request = factory.build(&url("https://img.example.com/a.png"), CachePolicy::Automatic, None);

        assert_eq!(request.headers.get(header::ACCEPT).unwrap(), "image/*");
        assert_eq!(request.cache_mode, HttpCacheMode::ProtocolDefault);
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(request.credentials.is_none());
        assert!(!request.accept_invalid_certs);
    }

    #[test]
    fn test_force_download_reloads() {
        let (_, factory) = factory();
        let request = factory.build(
            &url("https://img.example.com/a.png"),
            CachePolicy::ForceDownload,
            None,
        );
        assert_eq!(request.cache_mode, HttpCacheMode::ReloadIgnoringCache);

        let http = request.to_http(&Client::new()).build().unwrap();
        assert_eq!(http.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    }

    #[test]
    fn test_policy_headers_and_credentials_applied() {
        let (policy, factory) = factory();
        policy.set_header("X-Token", Some("global"), None);
        policy.set_header("X-Token", Some("host"), Some("img.example.com"));
        policy.set_credentials(Some(Credentials::new("u", "p")), Some("img.example.com"));

        let request = factory.build(&url("https://img.example.com/a.png"), CachePolicy::Protocol, None);
        assert_eq!(request.headers.get("x-token").unwrap(), "host");
        assert_eq!(request.credentials.as_ref().unwrap().username, "u");

        let http = request.to_http(&Client::new()).build().unwrap();
        let auth = http.headers().get(header::AUTHORIZATION).unwrap();
        assert!(auth.to_str().unwrap().starts_with("Basic "));
    }

    #[test]
    fn test_modifier_overrides_everything() {
        let (policy, factory) = factory();
        policy.set_header("X-Token", Some("global"), None);
        policy.set_credentials(Some(Credentials::new("u", "p")), None);

        let modifier: RequestModifier = Arc::new(|request: &mut ImageRequest| {
            request.set_header("X-Token", "mine");
            request.set_header("Accept", "image/webp");
            request.credentials = None;
            request.timeout = Duration::from_secs(5);
            request.accept_invalid_certs = true;
        });

        let request = factory.build(
            &url("https://img.example.com/a.png"),
            CachePolicy::Automatic,
            Some(&modifier),
        );
        assert_eq!(request.headers.get("x-token").unwrap(), "mine");
        assert_eq!(request.headers.get(header::ACCEPT).unwrap(), "image/webp");
        assert!(request.credentials.is_none());
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert!(request.accept_invalid_certs);
    }

    #[test]
    fn test_global_trust_switch_propagates() {
        let (policy, factory) = factory();
        policy.trust_all_certificates();
        let request = factory.build(&url("https://img.example.com/a.png"), CachePolicy::Automatic, None);
        assert!(request.accept_invalid_certs);
    }
}
