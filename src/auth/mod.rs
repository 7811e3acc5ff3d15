//! Client-credentials token exchange.
//!
//! Package downloads from a gated manifest host are authorized by trading
//! a client id/secret/scope for a short-lived bearer token. The exchange
//! targets a well-known path on the manifest's own origin (same scheme,
//! host, and port as the manifest URI):
//!
//! ```text
//! POST {scheme}://{host}:{port}/appupdates/account/token
//! { "clientId": "...", "clientSecret": "...", "scope": "..." }
//! ```
//!
//! A 200 response carries `{ "token": "<opaque bearer token>" }`; any
//! other status is an authorization failure. Tokens are deliberately not
//! cached: each gated download re-authenticates, and a rejected exchange
//! aborts the update rather than falling back to an unauthenticated
//! download.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::ClientCredentials;
use crate::constants::TOKEN_ENDPOINT_PATH;
use crate::core::AgentError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Builds the token endpoint URL from the manifest URI's origin.
pub fn token_endpoint(manifest_uri: &Url) -> Url {
    let mut endpoint = manifest_uri.clone();
    endpoint.set_path(TOKEN_ENDPOINT_PATH);
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    endpoint
}

/// Exchanges client credentials for a bearer token.
///
/// Returns [`AgentError::AuthRejected`] for any non-200 response and
/// [`AgentError::Transport`] when no response was obtained at all.
pub async fn exchange_token(
    http: &reqwest::Client,
    manifest_uri: &Url,
    credentials: &ClientCredentials,
) -> Result<String, AgentError> {
    let endpoint = token_endpoint(manifest_uri);
    debug!(endpoint = %endpoint, client_id = %credentials.client_id, "exchanging client credentials for bearer token");

    let response = http
        .post(endpoint)
        .json(credentials)
        .send()
        .await
        .map_err(|source| AgentError::Transport {
            operation: "token exchange".to_string(),
            source,
        })?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(AgentError::AuthRejected { status: response.status().as_u16() });
    }

    let body: TokenResponse =
        response.json().await.map_err(|source| AgentError::Transport {
            operation: "token exchange".to_string(),
            source,
        })?;
    Ok(body.token)
}
