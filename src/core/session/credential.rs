//! Single-use session credential acquisition.
//!
//! Every `start()` fetches a fresh credential from the host application's
//! token endpoint; credentials are never reused across sessions. The endpoint
//! answers with one of `{token}`, `{signed_url}`, or `{access_token}`.

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{VoiceError, VoiceResult};

/// A single-use credential for one connection attempt.
#[derive(Debug, Clone)]
pub enum SessionCredential {
    /// A token to embed in the constructed stream URL.
    Token(String),
    /// A pre-signed stream URL, used verbatim.
    SignedUrl(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    signed_url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_credential(self) -> Option<SessionCredential> {
        if let Some(url) = self.signed_url {
            return Some(SessionCredential::SignedUrl(url));
        }

        self.token
            .or(self.access_token)
            .map(SessionCredential::Token)
    }
}

/// Fetch a credential from the token endpoint.
///
/// HTTP 429 maps to [`VoiceError::RateLimited`]; any other non-2xx maps to
/// [`VoiceError::Credential`] carrying the response body text.
pub async fn fetch_credential(
    http: &reqwest::Client,
    endpoint: &str,
) -> VoiceResult<SessionCredential> {
    debug!("Requesting session credential from {endpoint}");

    let response = http
        .get(endpoint)
        .send()
        .await
        .map_err(|e| VoiceError::Credential(format!("token endpoint unreachable: {e}")))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(VoiceError::RateLimited(if body.is_empty() {
            "token endpoint returned HTTP 429".to_string()
        } else {
            body
        }));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(VoiceError::Credential(format!(
            "token endpoint returned HTTP {}: {body}",
            status.as_u16()
        )));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| VoiceError::Credential(format!("unreadable token response: {e}")))?;

    parsed.into_credential().ok_or_else(|| {
        VoiceError::Credential("token response contained no token or signed_url".to_string())
    })
}
