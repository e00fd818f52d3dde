// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Friend-graph operations for the active account.
//!
//! Both operations run the full admission pipeline (rate limiter, then
//! compliance for mutations) before any network traffic, and record the
//! outcome in the audit log. A failure at any stage logs that stage's
//! cause and never partially applies: compliance counters are only touched
//! after the upstream call succeeded.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::audit::{ActionAuditLog, ActionRecord};
use crate::config::Config;
use crate::error::ActionError;
use crate::limits::{ActionTarget, ComplianceGuard, RateLimiter};
use crate::models::{AccountId, ActionKind, FriendEntry};
use crate::registry::AccountRegistry;

use super::identity::IdentityResolver;
use super::oauth::AccessBroker;
use super::transport::{bearer, Transport};

pub struct FriendGraphClient {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    registry: Arc<AccountRegistry>,
    broker: Arc<AccessBroker>,
    identity: Arc<IdentityResolver>,
    limiter: Arc<RateLimiter>,
    compliance: Arc<ComplianceGuard>,
    audit: Arc<ActionAuditLog>,
}

impl FriendGraphClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        registry: Arc<AccountRegistry>,
        broker: Arc<AccessBroker>,
        identity: Arc<IdentityResolver>,
        limiter: Arc<RateLimiter>,
        compliance: Arc<ComplianceGuard>,
        audit: Arc<ActionAuditLog>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
            broker,
            identity,
            limiter,
            compliance,
            audit,
        }
    }

    /// Send a friend request to `handle` from the active account. Returns
    /// the resolved account id of the new friend.
    pub async fn add_friend(&self, handle: &str, actor_id: u64) -> Result<AccountId, ActionError> {
        self.limiter.acquire(ActionKind::FriendAdd).await;

        let result = self.add_friend_inner(handle).await;
        match &result {
            Ok(friend_id) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::FriendAdd, actor_id)
                        .with_details(json!({ "handle": handle, "friend_id": friend_id })),
                );
                self.limiter.apply_natural_delay(ActionKind::FriendAdd).await;
                info!(handle, "friend request sent");
            }
            Err(err) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::FriendAdd, actor_id)
                        .with_details(json!({ "handle": handle }))
                        .failed(err.to_string()),
                );
            }
        }
        result
    }

    async fn add_friend_inner(&self, handle: &str) -> Result<AccountId, ActionError> {
        let account = self
            .registry
            .active()?
            .ok_or_else(|| ActionError::Authentication("no active linked account".into()))?;

        self.compliance.validate(
            ActionKind::FriendAdd,
            &account.account_id,
            &ActionTarget::Friend { handle },
        )?;

        let (account, access_token) = self.broker.access_token().await?;
        let friend_id = self.identity.resolve(handle, &access_token).await?;

        let url = format!("{}/friends/{}", self.config.friends_api, friend_id);
        let response = self
            .transport
            .post_json(&url, &bearer(&access_token), &json!({}))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        match response.status {
            200 | 204 => {
                self.compliance.record(ActionKind::FriendAdd, &account.account_id);
                Ok(friend_id)
            }
            403 => Err(ActionError::Compliance(
                "The friend request was refused by the upstream service.".into(),
            )),
            404 => Err(ActionError::NotFound(format!("player '{handle}'"))),
            status if status >= 500 => Err(ActionError::UpstreamUnavailable(format!(
                "friend endpoint returned {status}"
            ))),
            status => Err(ActionError::UpstreamUnavailable(format!(
                "friend request failed with {status}"
            ))),
        }
    }

    /// Normalized friend list of the active account. Read-only; no
    /// compliance quota applies.
    pub async fn list_friends(&self, actor_id: u64) -> Result<Vec<FriendEntry>, ActionError> {
        self.limiter.acquire(ActionKind::FriendList).await;

        let result = self.list_friends_inner().await;
        match &result {
            Ok(friends) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::FriendList, actor_id)
                        .with_details(json!({ "count": friends.len() })),
                );
                self.limiter.apply_natural_delay(ActionKind::FriendList).await;
            }
            Err(err) => {
                self.audit
                    .log(ActionRecord::new(ActionKind::FriendList, actor_id).failed(err.to_string()));
            }
        }
        result
    }

    async fn list_friends_inner(&self) -> Result<Vec<FriendEntry>, ActionError> {
        let (account, access_token) = self.broker.access_token().await?;

        let url = format!("{}/friends/{}", self.config.friends_api, account.account_id);
        let response = self
            .transport
            .get(&url, &bearer(&access_token))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        if !response.is_success() {
            return Err(ActionError::UpstreamUnavailable(format!(
                "friend list returned {}",
                response.status
            )));
        }

        let payload = response
            .json()
            .map_err(|e| ActionError::Protocol(format!("friend list body: {e}")))?;
        let entries = payload
            .as_array()
            .ok_or_else(|| ActionError::Protocol("friend list is not an array".into()))?;

        Ok(entries.iter().map(normalize_friend).collect())
    }
}

fn normalize_friend(entry: &serde_json::Value) -> FriendEntry {
    FriendEntry {
        account_id: AccountId::from(
            entry.get("accountId").and_then(|v| v.as_str()).unwrap_or_default(),
        ),
        display_name: entry
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string(),
        status: entry
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        favorite: entry.get("favorite").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn friend_entries_normalize_with_defaults() {
        let full = normalize_friend(&json!({
            "accountId": "friend-1",
            "displayName": "Ally",
            "status": "ACCEPTED",
            "favorite": true
        }));
        assert_eq!(full.account_id, AccountId::from("friend-1"));
        assert_eq!(full.display_name, "Ally");
        assert_eq!(full.status, "ACCEPTED");
        assert!(full.favorite);

        let sparse = normalize_friend(&json!({ "accountId": "friend-2" }));
        assert_eq!(sparse.display_name, "Unknown");
        assert_eq!(sparse.status, "unknown");
        assert!(!sparse.favorite);
    }
}
