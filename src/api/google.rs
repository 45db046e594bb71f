//! Minimal Google OAuth2 authorization-code client.
//!
//! Only the two upstream calls live here (code exchange and userinfo); state
//! handling and account bridging stay in the provider-agnostic auth layer.

use anyhow::{anyhow, Context, Result};
use secrecy::ExposeSecret;
use serde::Deserialize;
use url::Url;

use crate::{auth::oauth2::ProviderClaims, cli::globals::GlobalArgs, APP_USER_AGENT};

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/token";
const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v1/userinfo";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    name: Option<String>,
}

fn redirect_uri(globals: &GlobalArgs) -> String {
    format!("{}/v1/oauth2/google/callback", globals.base_url)
}

/// Build the consent-screen URL the browser is redirected to.
pub fn authorize_url(globals: &GlobalArgs, state: &str) -> Result<String> {
    let client_id = globals
        .google_client_id
        .as_deref()
        .ok_or_else(|| anyhow!("google oauth2 is not configured"))?;

    let mut url = Url::parse(AUTHORIZE_ENDPOINT)?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", &redirect_uri(globals))
        .append_pair("response_type", "code")
        .append_pair("scope", "openid email profile")
        .append_pair("state", state);

    Ok(url.into())
}

/// Exchange the authorization code for an access token and fetch the
/// user's profile claims.
pub async fn exchange_code(globals: &GlobalArgs, code: &str) -> Result<ProviderClaims> {
    let client_id = globals
        .google_client_id
        .as_deref()
        .ok_or_else(|| anyhow!("google oauth2 is not configured"))?;

    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()?;

    let token: TokenResponse = client
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", client_id),
            ("client_secret", globals.google_client_secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &redirect_uri(globals)),
        ])
        .send()
        .await?
        .error_for_status()
        .context("token exchange rejected")?
        .json()
        .await?;

    let info: UserInfo = client
        .get(USERINFO_ENDPOINT)
        .bearer_auth(&token.access_token)
        .send()
        .await?
        .error_for_status()
        .context("userinfo request rejected")?
        .json()
        .await?;

    Ok(ProviderClaims {
        nickname: None,
        email: info.email,
        fullname: info.name,
    })
}
