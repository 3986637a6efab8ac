//! Outbound HTTP clients used by every pipeline stage

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use url::Url;

use crate::error::{PoolError, Result};
use crate::models::Proxy;

/// Client that never goes through a proxy, including environment-configured ones
pub fn direct_client(headers: &HeaderMap, timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .no_proxy()
        .default_headers(headers.clone())
        .timeout(timeout)
        .build()?;

    Ok(client)
}

/// Client that sends every request through `proxy` as a plain HTTP proxy
pub fn proxied_client(proxy: &Proxy, headers: &HeaderMap, timeout: Duration) -> Result<Client> {
    let upstream = ReqwestProxy::all(proxy.url())?;

    let client = Client::builder()
        .proxy(upstream)
        .default_headers(headers.clone())
        .timeout(timeout)
        // One-off probes; keeping idle connections to random proxies is pointless.
        .pool_max_idle_per_host(0)
        .build()?;

    Ok(client)
}

/// GET `url` and read the body, bounded by `timeout` as a whole
pub async fn fetch_text(client: &Client, url: &Url, timeout: Duration) -> Result<(StatusCode, String)> {
    let request = async {
        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, PoolError>((status, body))
    };

    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(PoolError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}
