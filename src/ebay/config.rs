use crate::config::parse_env_bool;
use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static APP_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_APP_ID_PRODUCTION").unwrap_or_default());

pub static APP_SECRET: Lazy<String> =
    Lazy::new(|| env::var("EBAY_CERT_ID_PRODUCTION").unwrap_or_default());

pub static EBAY_REFRESH_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    env::var("EBAY_REFRESH_TOKEN")
        .ok()
        .filter(|v| !v.trim().is_empty())
});

pub static NETWORK_ENABLED: Lazy<bool> = Lazy::new(|| parse_env_bool("EBAY_ENABLE_NETWORK"));

/// Items requested per inventory page; eBay caps this at 200.
pub static PAGE_LIMIT: Lazy<u32> = Lazy::new(|| {
    env::var("EBAY_PAGE_LIMIT")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| (1..=200).contains(v))
        .unwrap_or(100)
});

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

pub const USER_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.inventory.readonly",
];
