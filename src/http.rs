use reqwest::Client;
use std::time::Duration;

/// Outbound HTTP client for the eBay APIs.
pub fn build_client() -> Client {
    let timeout = secs_from_env("HTTP_TIMEOUT_SECS", 20);
    let connect = secs_from_env("HTTP_CONNECT_TIMEOUT_SECS", 5);
    Client::builder()
        .user_agent(concat!("resale-ops-api/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
