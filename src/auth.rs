//! Identity verification at the API boundary.
//!
//! Handlers never look at tokens themselves: the HTTP layer turns a verified
//! token into a [`Session`] and passes it down explicitly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::settings;

pub const TOKEN_COOKIE: &str = "firebaseToken";
pub const TOKEN_COOKIE_MAX_AGE_SECS: u64 = 3600;

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No authorization token provided")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Identity provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &str) -> Result<Session, AuthError>;
}

pub fn verifier_from_settings(
    auth: &settings::Auth,
) -> Result<Box<dyn IdentityVerifier>, anyhow::Error> {
    match auth {
        settings::Auth::IdentityToolkit { url, api_key } => {
            Ok(Box::new(IdentityToolkitVerifier::new(url, api_key)?))
        }
        settings::Auth::Static { tokens } => {
            log::warn!("Using static token authentication, do not use in production.");
            Ok(Box::new(StaticTokenVerifier::new(tokens.clone())))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

/// Resolves ID tokens through the Identity Toolkit `accounts:lookup` endpoint.
pub struct IdentityToolkitVerifier {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl IdentityToolkitVerifier {
    pub fn new(url: &str, api_key: &str) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for IdentityToolkitVerifier {
    async fn verify(&self, token: &str) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(format!("{}/v1/accounts:lookup?key={}", self.url, self.api_key))
            .json(&json!({ "idToken": token }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            log::debug!("Identity provider rejected token with status {}", status);
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!("unexpected status {}", status)));
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let user = lookup
            .users
            .into_iter()
            .next()
            .filter(|user| !user.disabled)
            .ok_or(AuthError::InvalidToken)?;

        Ok(Session {
            user_id: user.local_id,
            email: user.email,
            display_name: user.display_name,
            photo_url: user.photo_url,
        })
    }
}

/// Token -> user id table, for local development and tests.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Session, AuthError> {
        let user_id = self.tokens.get(token).ok_or(AuthError::InvalidToken)?;

        Ok(Session {
            user_id: user_id.clone(),
            email: None,
            display_name: None,
            photo_url: None,
        })
    }
}

/// Token from the session cookie, falling back to `Authorization: Bearer`.
pub fn extract_token(cookie_header: Option<&str>, authorization: Option<&str>) -> Option<String> {
    let from_cookie = cookie_header.and_then(|cookies| {
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
    });

    from_cookie.or_else(|| {
        authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        TOKEN_COOKIE, token, TOKEN_COOKIE_MAX_AGE_SECS
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
