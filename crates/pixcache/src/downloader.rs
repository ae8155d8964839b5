use reqwest::Client;
use tracing::debug;

use crate::{ImageError, ImageManagerConfig};

/// Create a reqwest Client with the provided configuration.
///
/// `accept_invalid_certs` disables certificate validation for every request
/// sent through the returned client.
pub fn create_client(
    config: &ImageManagerConfig,
    accept_invalid_certs: bool,
) -> Result<Client, ImageError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.max_concurrent_downloads.max(1))
        .user_agent(&config.user_agent)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if accept_invalid_certs {
        debug!("Building HTTP client without certificate validation");
        client_builder = client_builder.danger_accept_invalid_certs(true);
    } else {
        debug!("Building HTTP client with certificate validation");
    }

    client_builder
        .build()
        .map_err(|e| ImageError::Client(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_clients() {
        let config = ImageManagerConfig::default();
        assert!(create_client(&config, false).is_ok());
        assert!(create_client(&config, true).is_ok());
    }
}
