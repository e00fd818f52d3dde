// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Two-phase gift flow: prepare → confirm | cancel.
//!
//! `prepare` is local and reversible; nothing touches the network until an
//! explicit `confirm`. Confirmation ids are claimed atomically (checked
//! and removed in one critical section), so a double confirm issues at
//! most one upstream call; the loser sees `NotFound`. A pending
//! confirmation older than five minutes is rejected server-side even if
//! the UI timeout never fired.
//!
//! The pending record is always gone before the HTTP result is evaluated,
//! so a retry after an ambiguous failure can never double-send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{ActionAuditLog, ActionRecord};
use crate::config::Config;
use crate::error::ActionError;
use crate::limits::{ActionTarget, ComplianceGuard, RateLimiter};
use crate::models::{AccountId, ActionKind, PendingGiftConfirmation};
use crate::registry::AccountRegistry;

use super::identity::IdentityResolver;
use super::oauth::AccessBroker;
use super::transport::{bearer, Transport};

/// Server-side lifetime of a prepared gift, matching the confirmation UI
/// timeout.
const CONFIRMATION_TTL_MINUTES: i64 = 5;

/// Result of `prepare`: what the confirmation UI shows.
#[derive(Debug, Clone)]
pub struct GiftPrepared {
    pub confirmation_id: String,
    pub recipient: String,
    pub item_id: String,
    pub message: String,
    /// Gifts the active account may still send today, for visibility.
    pub remaining_quota: Option<u32>,
}

/// Result of a confirmed, successfully sent gift.
#[derive(Debug, Clone)]
pub struct GiftReceipt {
    pub recipient: String,
    pub recipient_id: AccountId,
    pub item_id: String,
}

pub struct GiftTransactionFlow {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    registry: Arc<AccountRegistry>,
    broker: Arc<AccessBroker>,
    identity: Arc<IdentityResolver>,
    limiter: Arc<RateLimiter>,
    compliance: Arc<ComplianceGuard>,
    audit: Arc<ActionAuditLog>,
    pending: Mutex<HashMap<String, PendingGiftConfirmation>>,
    message: RwLock<String>,
}

impl GiftTransactionFlow {
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
        let message = RwLock::new(config.gift_message.clone());
        Self {
            config,
            transport,
            registry,
            broker,
            identity,
            limiter,
            compliance,
            audit,
            pending: Mutex::new(HashMap::new()),
            message,
        }
    }

    /// Replace the message attached to outgoing gifts.
    pub fn set_gift_message(&self, message: impl Into<String>) {
        let message = message.into();
        info!(message = %message, "gift message updated");
        *self.message.write().expect("gift message lock poisoned") = message;
    }

    /// Stage a gift for confirmation. Local only; no upstream call, no
    /// quota consumed.
    pub fn prepare(
        &self,
        recipient: &str,
        item_id: &str,
        requester_id: u64,
    ) -> Result<GiftPrepared, ActionError> {
        let confirmation_id = Uuid::new_v4().to_string();
        let message = self.message.read().expect("gift message lock poisoned").clone();

        let remaining_quota = match self.registry.active()? {
            Some(account) => self
                .compliance
                .remaining_quota(ActionKind::GiftSend, &account.account_id),
            None => None,
        };

        let confirmation = PendingGiftConfirmation {
            confirmation_id: confirmation_id.clone(),
            recipient: recipient.to_string(),
            item_id: item_id.to_string(),
            requester_id,
            message: message.clone(),
            created_at: Utc::now(),
        };

        let mut pending = self.pending.lock().expect("pending gift lock poisoned");
        pending.insert(confirmation_id.clone(), confirmation);
        drop(pending);

        info!(recipient, item_id, "gift prepared");
        Ok(GiftPrepared {
            confirmation_id,
            recipient: recipient.to_string(),
            item_id: item_id.to_string(),
            message,
            remaining_quota,
        })
    }

    /// Execute a prepared gift. The confirmation id is consumed whether or
    /// not the upstream call succeeds.
    pub async fn confirm(&self, confirmation_id: &str) -> Result<GiftReceipt, ActionError> {
        let confirmation = self.claim(confirmation_id)?;
        let actor_id = confirmation.requester_id;

        self.limiter.acquire(ActionKind::GiftSend).await;

        let result = self.send(&confirmation).await;
        match &result {
            Ok(receipt) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::GiftSend, actor_id).with_details(json!({
                        "recipient": receipt.recipient,
                        "recipient_id": receipt.recipient_id,
                        "item_id": receipt.item_id,
                    })),
                );
                self.limiter.apply_natural_delay(ActionKind::GiftSend).await;
                info!(recipient = %receipt.recipient, item = %receipt.item_id, "gift sent");
            }
            Err(err) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::GiftSend, actor_id)
                        .with_details(json!({
                            "recipient": confirmation.recipient,
                            "item_id": confirmation.item_id,
                        }))
                        .failed(err.to_string()),
                );
            }
        }
        result
    }

    /// Drop a prepared gift without contacting the upstream service.
    /// Returns `false` when the id is already gone (idempotent-safe).
    pub fn cancel(&self, confirmation_id: &str) -> bool {
        let mut pending = self.pending.lock().expect("pending gift lock poisoned");
        match pending.remove(confirmation_id) {
            Some(confirmation) => {
                drop(pending);
                if expired(&confirmation) {
                    return false;
                }
                info!(
                    recipient = %confirmation.recipient,
                    item = %confirmation.item_id,
                    "gift cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// Atomically check-and-remove the pending record, so two concurrent
    /// confirms of the same id can never both proceed.
    fn claim(&self, confirmation_id: &str) -> Result<PendingGiftConfirmation, ActionError> {
        let mut pending = self.pending.lock().expect("pending gift lock poisoned");
        let confirmation = pending
            .remove(confirmation_id)
            .ok_or_else(|| ActionError::NotFound("confirmation (already used or unknown)".into()))?;
        drop(pending);

        if expired(&confirmation) {
            warn!(confirmation_id, "stale gift confirmation rejected");
            return Err(ActionError::NotFound(
                "confirmation expired; prepare the gift again".into(),
            ));
        }
        Ok(confirmation)
    }

    async fn send(&self, confirmation: &PendingGiftConfirmation) -> Result<GiftReceipt, ActionError> {
        let account = self
            .registry
            .active()?
            .ok_or_else(|| ActionError::Authentication("no active linked account".into()))?;

        self.compliance.validate(
            ActionKind::GiftSend,
            &account.account_id,
            &ActionTarget::Gift {
                item_id: &confirmation.item_id,
                recipient: &confirmation.recipient,
            },
        )?;

        let (account, access_token) = self.broker.access_token().await?;
        let recipient_id = self
            .identity
            .resolve(&confirmation.recipient, &access_token)
            .await?;

        let payload = json!({
            "offerId": confirmation.item_id,
            "recipientId": recipient_id,
            "message": confirmation.message,
        });

        let url = format!("{}/gift/{}", self.config.gift_api, account.account_id);
        let response = self
            .transport
            .post_json(&url, &bearer(&access_token), &payload)
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        match response.status {
            200 | 201 | 204 => {
                self.compliance.record(ActionKind::GiftSend, &account.account_id);
                Ok(GiftReceipt {
                    recipient: confirmation.recipient.clone(),
                    recipient_id,
                    item_id: confirmation.item_id.clone(),
                })
            }
            400 => Err(ActionError::Compliance(
                "Gift rejected: verify the item id and the recipient.".into(),
            )),
            403 => Err(ActionError::Compliance(
                "This item cannot be gifted from the active account right now.".into(),
            )),
            404 => Err(ActionError::UpstreamUnavailable(
                "gifting is not available upstream".into(),
            )),
            502 | 503 => Err(ActionError::UpstreamUnavailable(format!(
                "gift endpoint returned {}",
                response.status
            ))),
            status => Err(ActionError::UpstreamUnavailable(format!(
                "gift request failed with {status}"
            ))),
        }
    }
}

fn expired(confirmation: &PendingGiftConfirmation) -> bool {
    Utc::now() - confirmation.created_at > Duration::minutes(CONFIRMATION_TTL_MINUTES)
}
