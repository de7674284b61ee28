// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used to reach the collector.
//!
//! The client carries the per-request timeout, connection pooling and TCP
//! keep-alive settings. When an HTTPS proxy is configured but cannot be parsed
//! the client falls back to a direct connection instead of failing startup.

use crate::config::ShipperConfig;
use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Builds the collector client, falling back to a proxy-less client and then to
/// reqwest defaults rather than failing.
#[must_use]
pub fn get_client(config: &ShipperConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "LOGS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "LOGS | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    config: &ShipperConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout())
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            client = client.proxy(reqwest::Proxy::https(https_uri.clone())?);
        }
    }

    Ok(client.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_without_proxy() {
        let config = ShipperConfig::default();
        assert!(build_client(&config, true).is_ok());
    }

    #[test]
    fn test_invalid_proxy_falls_back() {
        let config = ShipperConfig {
            https_proxy: Some("http://[invalid".to_string()),
            ..Default::default()
        };
        assert!(build_client(&config, true).is_err());
        // still returns a usable client
        let _client = get_client(&config);
    }
}
