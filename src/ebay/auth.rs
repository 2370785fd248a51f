use crate::ebay::config::{APP_ID, APP_SECRET, OAUTH_TOKEN_URL};
use crate::http::build_client;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("missing EBAY_REFRESH_TOKEN")]
    MissingRefreshToken,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

fn basic_auth_header() -> Result<String, EbayAuthError> {
    if APP_ID.is_empty() || APP_SECRET.is_empty() {
        return Err(EbayAuthError::MissingCredentials);
    }
    Ok(encode_basic(&APP_ID, &APP_SECRET))
}

fn encode_basic(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{client_id}:{client_secret}")))
}

pub async fn get_user_access_token_from_refresh(
    refresh_token: &str,
    scopes: &[&str],
) -> Result<String, EbayAuthError> {
    let authorization = basic_auth_header()?;
    if refresh_token.trim().is_empty() {
        return Err(EbayAuthError::MissingRefreshToken);
    }
    let scope = scopes.join(" ");
    let body = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("scope", scope.as_str()),
    ];
    let response = build_client()
        .post(OAUTH_TOKEN_URL.as_str())
        .header(reqwest::header::AUTHORIZATION, authorization)
        .form(&body)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayAuthError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;
    Ok(payload.access_token)
}
