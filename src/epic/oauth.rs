// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! OAuth 2.0 Authorization Code with PKCE against the Epic identity
//! provider.
//!
//! No client secret exists anywhere in this flow: the authorization code is
//! bound to a locally generated random verifier (RFC 7636, `S256`), and the
//! token endpoint receives `client_id` plus the verifier only.
//!
//! Per login attempt: a `state` + verifier pair is cached as a
//! [`PendingAuthorization`] when the login URL is issued, validated and
//! consumed by [`OAuthClient::exchange_code`], and lazily garbage-collected
//! ten minutes after issuance.
//!
//! Access tokens are derived on demand and never persisted; only the
//! refresh token is stored, always through [`CredentialVault`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use url::Url;

use crate::config::{Config, OAUTH_SCOPES};
use crate::error::ActionError;
use crate::limits::RateLimiter;
use crate::models::{Account, AccountId, ActionKind, PendingAuthorization, TokenBundle};
use crate::registry::AccountRegistry;
use crate::vault::CredentialVault;

use super::transport::{bearer, RawResponse, Transport};

/// Lifetime of a pending login attempt.
const PENDING_AUTH_TTL_MINUTES: i64 = 10;

/// Entropy of `state` and the PKCE verifier: 32 random bytes become 43
/// url-safe characters under unpadded base64url.
const TOKEN_ENTROPY_BYTES: usize = 32;

/// PKCE login-URL generation, code exchange and refresh-token derivation.
pub struct OAuthClient {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    vault: Arc<CredentialVault>,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl OAuthClient {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>, vault: Arc<CredentialVault>) -> Self {
        Self {
            config,
            transport,
            vault,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Build the authorization URL for `requester_id` and cache the
    /// matching verifier under a fresh `state`.
    pub fn generate_login_url(&self, requester_id: u64) -> (String, String) {
        let state = random_urlsafe();
        let verifier = random_urlsafe();
        let challenge = pkce_challenge(&verifier);

        let mut url = Url::parse(&self.config.authorize_url)
            .unwrap_or_else(|_| Url::parse("https://www.epicgames.com/id/authorize").expect("static URL"));
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &OAUTH_SCOPES.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "login");

        let now = Utc::now();
        let authorization = PendingAuthorization {
            state: state.clone(),
            code_verifier: verifier,
            requester_id,
            created_at: now,
            expires_at: now + Duration::minutes(PENDING_AUTH_TTL_MINUTES),
        };

        let mut pending = self.pending.lock().expect("pending auth lock poisoned");
        gc_expired(&mut pending, now);
        pending.insert(state.clone(), authorization);

        info!(requester = requester_id, state = %&state[..8], "login URL issued");
        (url.to_string(), state)
    }

    /// Exchange an authorization code for tokens. The `state` must exist,
    /// be unexpired and belong to `requester_id`; it is consumed on
    /// success.
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        requester_id: u64,
    ) -> Result<TokenBundle, ActionError> {
        let verifier = self.pending_verifier(state, requester_id)?;

        let form = [
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("code_verifier".to_string(), verifier),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
        ];

        let response = self
            .transport
            .post_form(&self.config.token_url(), &[], &form)
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;
        let payload = token_payload(response, "code exchange")?;

        let access_token = required_str(&payload, "access_token")?;
        let refresh_token = required_str(&payload, "refresh_token")?;
        let expires_at = expiry_from(&payload);

        // The identity call fills in whatever the token body left out
        let (account_id, display_name) = match payload.get("account_id").and_then(|v| v.as_str()) {
            Some(id) => {
                let display = self
                    .verify_identity(&access_token)
                    .await
                    .map(|(_, name)| name)
                    .unwrap_or_default();
                (AccountId::from(id), display)
            }
            None => self.verify_identity(&access_token).await?,
        };

        let mut pending = self.pending.lock().expect("pending auth lock poisoned");
        pending.remove(state);
        drop(pending);

        info!(requester = requester_id, account = %account_id, "authorization code exchanged");
        Ok(TokenBundle {
            access_token,
            refresh_token,
            expires_at,
            account_id,
            display_name,
        })
    }

    /// Derive a fresh access token from a stored (encrypted) refresh
    /// token. The returned bundle carries the rotated refresh token when
    /// the provider issued one, else the previous value; the caller
    /// re-encrypts and persists it.
    pub async fn refresh(&self, encrypted_refresh_token: &str) -> Result<TokenBundle, ActionError> {
        let refresh_token = self.vault.decrypt(encrypted_refresh_token)?;

        let form = [
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.clone()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];

        let response = self
            .transport
            .post_form(&self.config.token_url(), &[], &form)
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;
        let payload = token_payload(response, "token refresh")?;

        let access_token = required_str(&payload, "access_token")?;
        let rotated = payload
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(refresh_token);

        let account_id = payload
            .get("account_id")
            .and_then(|v| v.as_str())
            .map(AccountId::from)
            .unwrap_or_else(|| AccountId::from(""));

        Ok(TokenBundle {
            access_token,
            refresh_token: rotated,
            expires_at: expiry_from(&payload),
            account_id,
            display_name: String::new(),
        })
    }

    /// Resolve the bearer's own account id and display name.
    async fn verify_identity(&self, access_token: &str) -> Result<(AccountId, String), ActionError> {
        let response = self
            .transport
            .get(&self.config.verify_url(), &bearer(access_token))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        if !response.is_success() {
            warn!(status = response.status, "identity verification rejected");
            return Err(ActionError::Authentication(format!(
                "identity verification returned {}",
                response.status
            )));
        }

        let payload = response
            .json()
            .map_err(|e| ActionError::Protocol(format!("identity response: {e}")))?;
        let account_id = required_str(&payload, "account_id")?;
        let display_name = payload
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok((AccountId::from(account_id), display_name))
    }

    /// Validate a pending login attempt and hand back its verifier. The
    /// entry stays until the exchange succeeds, so a transient token-
    /// endpoint failure does not force a brand-new login URL.
    fn pending_verifier(&self, state: &str, requester_id: u64) -> Result<String, ActionError> {
        let now = Utc::now();
        let mut pending = self.pending.lock().expect("pending auth lock poisoned");
        gc_expired(&mut pending, now);

        let authorization = pending.get(state).ok_or_else(|| {
            warn!(state = %truncate(state), "unknown or expired login state");
            ActionError::Authentication("login session not found or expired".into())
        })?;

        if authorization.requester_id != requester_id {
            warn!(
                state = %truncate(state),
                expected = authorization.requester_id,
                got = requester_id,
                "login state belongs to a different requester"
            );
            return Err(ActionError::Authentication(
                "login session belongs to a different user".into(),
            ));
        }

        Ok(authorization.code_verifier.clone())
    }
}

/// Pull `code` and `state` out of a pasted redirect URL. The provider
/// normally puts both in the query, occasionally in the fragment.
pub fn extract_code_from_url(raw: &str) -> (Option<String>, Option<String>) {
    let Ok(url) = Url::parse(raw) else {
        return (None, None);
    };

    let pick = |pairs: url::form_urlencoded::Parse<'_>| {
        let mut code = None;
        let mut state = None;
        for (key, value) in pairs {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        (code, state)
    };

    let (code, state) = pick(url.query_pairs());
    if code.is_some() {
        return (code, state);
    }

    match url.fragment() {
        Some(fragment) => pick(url::form_urlencoded::parse(fragment.as_bytes())),
        None => (None, None),
    }
}

// =============================================================================
// Access broker
// =============================================================================

/// The shared "give me a live bearer token" path used by every
/// authenticated upstream client.
///
/// Derives an access token for the active account by refreshing its stored
/// credential, persisting the rotated refresh token back through the
/// registry. Concurrent callers are not coalesced; upstream refresh is
/// idempotent-safe per call.
pub struct AccessBroker {
    registry: Arc<AccountRegistry>,
    vault: Arc<CredentialVault>,
    oauth: Arc<OAuthClient>,
    limiter: Arc<RateLimiter>,
}

impl AccessBroker {
    pub fn new(
        registry: Arc<AccountRegistry>,
        vault: Arc<CredentialVault>,
        oauth: Arc<OAuthClient>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            registry,
            vault,
            oauth,
            limiter,
        }
    }

    /// The active account together with a freshly derived access token.
    pub async fn access_token(&self) -> Result<(Account, String), ActionError> {
        let account = self
            .registry
            .active()?
            .ok_or_else(|| ActionError::Authentication("no active linked account".into()))?;

        self.limiter.acquire(ActionKind::TokenRefresh).await;

        let bundle = self.oauth.refresh(&account.encrypted_refresh_token).await?;

        let encrypted = self.vault.encrypt(&bundle.refresh_token)?;
        if !self
            .registry
            .update_tokens(account.slot, &encrypted, bundle.expires_at)?
        {
            // Slot vanished mid-flight (concurrent removal); token is still valid
            warn!(slot = account.slot, "account removed while refreshing its token");
        }

        Ok((account, bundle.access_token))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn random_urlsafe() -> String {
    let mut bytes = [0_u8; TOKEN_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(digest.as_slice())
}

fn gc_expired(pending: &mut HashMap<String, PendingAuthorization>, now: DateTime<Utc>) {
    pending.retain(|_, auth| auth.expires_at > now);
}

fn truncate(state: &str) -> &str {
    &state[..state.len().min(8)]
}

/// Decode a token-endpoint response, mapping the failure modes of the
/// provider contract.
fn token_payload(response: RawResponse, context: &str) -> Result<serde_json::Value, ActionError> {
    if response.status >= 500 {
        error!(status = response.status, context, "token endpoint unavailable");
        return Err(ActionError::UpstreamUnavailable(format!(
            "{context} returned {}",
            response.status
        )));
    }

    if !response.is_success() {
        // Provider error details go to the logs, never to the end user
        let detail = response.json().ok();
        let code = detail
            .as_ref()
            .and_then(|v| v.get("errorCode"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let message = detail
            .as_ref()
            .and_then(|v| v.get("errorMessage"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        error!(status = response.status, code, message, context, "token request rejected");
        return Err(ActionError::Authentication(format!(
            "{context} rejected with status {}",
            response.status
        )));
    }

    response
        .json()
        .map_err(|e| ActionError::Protocol(format!("{context} body: {e}")))
}

fn required_str(payload: &serde_json::Value, field: &str) -> Result<String, ActionError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ActionError::Protocol(format!("missing required field '{field}'")))
}

fn expiry_from(payload: &serde_json::Value) -> DateTime<Utc> {
    let expires_in = payload.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
    Utc::now() + Duration::seconds(expires_in)
}
