//! # Global Policy Store
//!
//! Process-wide request defaults with per-host overrides. Host headers are
//! layered over the global map; credentials are host-specific or global,
//! never merged.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

/// Basic-Auth credentials attached to outgoing requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
struct PolicyState {
    global_headers: HeaderMap,
    host_headers: HashMap<String, HeaderMap>,
    global_credentials: Option<Credentials>,
    host_credentials: HashMap<String, Credentials>,
}

/// Shared header, credential and certificate-trust defaults.
#[derive(Debug, Default)]
pub struct GlobalPolicyStore {
    state: RwLock<PolicyState>,
    trust_all_certificates: AtomicBool,
}

fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}

impl GlobalPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (`Some`) or remove (`None`) a header, globally or for one host.
    ///
    /// Invalid header names or values are logged and ignored.
    pub fn set_header(&self, name: &str, value: Option<&str>, host: Option<&str>) {
        let Ok(header_name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
            warn!("Invalid header name: '{}'", name);
            return;
        };

        let header_value = match value.map(HeaderValue::from_str) {
            Some(Ok(v)) => Some(v),
            Some(Err(_)) => {
                warn!(header = %header_name, "Invalid header value, ignoring");
                return;
            }
            None => None,
        };

        let mut state = self.state.write();
        let map = match host {
            Some(host) => state.host_headers.entry(normalize_host(host)).or_default(),
            None => &mut state.global_headers,
        };

        match header_value {
            Some(v) => {
                map.insert(header_name.clone(), v);
            }
            None => {
                map.remove(&header_name);
            }
        }
        debug!(header = %header_name, host = ?host, removed = value.is_none(), "Updated global header");
    }

    /// Global headers with the host's overrides layered on top.
    pub fn headers_for(&self, host: Option<&str>) -> HeaderMap {
        let state = self.state.read();
        let mut merged = state.global_headers.clone();

        let Some(overrides) = host.and_then(|h| state.host_headers.get(&normalize_host(h))) else {
            return merged;
        };

        for (name, value) in overrides {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Set (`Some`) or clear (`None`) credentials, globally or for one host.
    pub fn set_credentials(&self, credentials: Option<Credentials>, host: Option<&str>) {
        let mut state = self.state.write();
        match (host, credentials) {
            (Some(host), Some(c)) => {
                state.host_credentials.insert(normalize_host(host), c);
            }
            (Some(host), None) => {
                state.host_credentials.remove(&normalize_host(host));
            }
            (None, c) => state.global_credentials = c,
        }
    }

    /// Host credentials if present, otherwise the global ones.
    pub fn credentials_for(&self, host: Option<&str>) -> Option<Credentials> {
        let state = self.state.read();
        host.and_then(|h| state.host_credentials.get(&normalize_host(h)))
            .or(state.global_credentials.as_ref())
            .cloned()
    }

    /// Accept any TLS certificate for every request that does not override it.
    ///
    /// Development use only.
    pub fn trust_all_certificates(&self) {
        warn!(
            "DANGER: certificate validation is DISABLED for all image requests. \
             Never ship this setting to production."
        );
        self.trust_all_certificates.store(true, Ordering::Release);
    }

    pub fn trusts_all_certificates(&self) -> bool {
        self.trust_all_certificates.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_headers_without_host_overrides() {
        let store = GlobalPolicyStore::new();
        store.set_header("X-Api-Key", Some("global"), None);

        let headers = store.headers_for(Some("cdn.example.com"));
        assert_eq!(headers.get("x-api-key").unwrap(), "global");
        assert_eq!(store.headers_for(None), headers);
    }

    #[test]
    fn test_host_headers_merge_over_global() {
        let store = GlobalPolicyStore::new();
        store.set_header("X-Api-Key", Some("global"), None);
        store.set_header("X-Client", Some("pixcache"), None);
        store.set_header("X-Api-Key", Some("per-host"), Some("CDN.example.com"));

        let headers = store.headers_for(Some("cdn.example.com"));
        assert_eq!(headers.get("x-api-key").unwrap(), "per-host");
        assert_eq!(headers.get("x-client").unwrap(), "pixcache");

        let other = store.headers_for(Some("other.example.com"));
        assert_eq!(other.get("x-api-key").unwrap(), "global");
    }

    #[test]
    fn test_remove_header() {
        let store = GlobalPolicyStore::new();
        store.set_header("X-Trace", Some("1"), None);
        store.set_header("X-Trace", None, None);
        assert!(store.headers_for(None).get("x-trace").is_none());
    }

    #[test]
    fn test_invalid_header_is_ignored() {
        let store = GlobalPolicyStore::new();
        store.set_header("bad header", Some("v"), None);
        store.set_header("X-Ok", Some("line\nbreak"), None);
        assert!(store.headers_for(None).is_empty());
    }

    #[test]
    fn test_credentials_fall_back_to_global() {
        let store = GlobalPolicyStore::new();
        assert!(store.credentials_for(Some("a.example.com")).is_none());

        store.set_credentials(Some(Credentials::new("global", "pw")), None);
        store.set_credentials(Some(Credentials::new("host", "pw2")), Some("a.example.com"));

        assert_eq!(
            store.credentials_for(Some("a.example.com")).unwrap().username,
            "host"
        );
        assert_eq!(
            store.credentials_for(Some("b.example.com")).unwrap().username,
            "global"
        );
        assert_eq!(store.credentials_for(None).unwrap().username, "global");

        store.set_credentials(None, Some("a.example.com"));
        assert_eq!(
            store.credentials_for(Some("a.example.com")).unwrap().username,
            "global"
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_trust_all_is_opt_in() {
        let store = GlobalPolicyStore::new();
        assert!(!store.trusts_all_certificates());
        store.trust_all_certificates();
        assert!(store.trusts_all_certificates());
    }
}
