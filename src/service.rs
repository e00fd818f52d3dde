// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! # Service Facade
//!
//! The narrow interface the command layer consumes. One [`Automation`]
//! aggregate is constructed at process start (explicit dependency
//! injection, no globals) and shared behind an `Arc`.
//!
//! Every operation returns a plain serializable response carrying
//! `success` and, on failure, a short actionable `error` message. Expected
//! failures never cross this boundary as `Err`; the full causes go to the
//! tracing logs.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::audit::{ActionAuditLog, ActionRecord};
use crate::config::Config;
use crate::epic::oauth::AccessBroker;
use crate::epic::{
    FriendGraphClient, GiftTransactionFlow, HttpTransport, IdentityResolver, OAuthClient,
    RemoteCatalogCache, Transport, TransportError,
};
use crate::error::ActionError;
use crate::limits::{ComplianceConfig, ComplianceGuard, RateLimiter, RateLimiterConfig, RateUsage};
use crate::models::{AccountSummary, ActionKind, CatalogSource, FriendEntry, StoreItem};
use crate::registry::{AccountRegistry, RegistryError};
use crate::vault::{CredentialVault, VaultError};

/// Startup failures while wiring the core together.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Response Models
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginUrlResponse {
    pub success: bool,
    pub url: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountLinkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountListResponse {
    pub success: bool,
    pub accounts: Vec<AccountSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendAddResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friend_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendListResponse {
    pub success: bool,
    pub friends: Vec<FriendEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftPrepareResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_quota: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftConfirmResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftCancelResponse {
    pub success: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub success: bool,
    pub items: Vec<StoreItem>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CatalogSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemInfoResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<StoreItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Automation Aggregate
// =============================================================================

/// All core services, wired once at startup.
pub struct Automation {
    config: Arc<Config>,
    registry: Arc<AccountRegistry>,
    vault: Arc<CredentialVault>,
    oauth: Arc<OAuthClient>,
    compliance: Arc<ComplianceGuard>,
    limiter: Arc<RateLimiter>,
    audit: Arc<ActionAuditLog>,
    catalog: RemoteCatalogCache,
    friends: FriendGraphClient,
    gifts: GiftTransactionFlow,
}

impl Automation {
    /// Build the core against the production HTTP transport.
    pub fn new(config: Config) -> Result<Self, InitError> {
        let transport = Arc::new(HttpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Build the core over an explicit transport (tests inject stubs here).
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self, InitError> {
        let config = Arc::new(config);
        let vault = Arc::new(CredentialVault::from_config(&config)?);
        let registry = Arc::new(AccountRegistry::open(
            &config.accounts_db_path,
            config.max_accounts,
        )?);
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let compliance = Arc::new(ComplianceGuard::new(ComplianceConfig::default()));
        let audit = Arc::new(ActionAuditLog::new());

        let oauth = Arc::new(OAuthClient::new(
            config.clone(),
            transport.clone(),
            vault.clone(),
        ));
        let broker = Arc::new(AccessBroker::new(
            registry.clone(),
            vault.clone(),
            oauth.clone(),
            limiter.clone(),
        ));
        let identity = Arc::new(IdentityResolver::new(config.clone(), transport.clone()));

        let catalog = RemoteCatalogCache::new(
            config.clone(),
            transport.clone(),
            broker.clone(),
            limiter.clone(),
            audit.clone(),
        );
        let friends = FriendGraphClient::new(
            config.clone(),
            transport.clone(),
            registry.clone(),
            broker.clone(),
            identity.clone(),
            limiter.clone(),
            compliance.clone(),
            audit.clone(),
        );
        let gifts = GiftTransactionFlow::new(
            config.clone(),
            transport,
            registry.clone(),
            broker,
            identity,
            limiter.clone(),
            compliance.clone(),
            audit.clone(),
        );

        Ok(Self {
            config,
            registry,
            vault,
            oauth,
            compliance,
            limiter,
            audit,
            catalog,
            friends,
            gifts,
        })
    }

    // =========================================================================
    // Account onboarding
    // =========================================================================

    /// Issue a login URL for the requester. The returned `state` must come
    /// back with the authorization code.
    pub fn generate_login_url(&self, requester_id: u64) -> LoginUrlResponse {
        let (url, state) = self.oauth.generate_login_url(requester_id);
        LoginUrlResponse {
            success: true,
            url,
            state,
        }
    }

    /// Exchange an authorization code, store the new credential in `slot`
    /// and make that slot active.
    pub async fn exchange_code(
        &self,
        slot: u8,
        name: &str,
        code: &str,
        state: &str,
        requester_id: u64,
    ) -> AccountLinkResponse {
        let result = self.link_account(slot, name, code, state, requester_id).await;
        match result {
            Ok(account) => AccountLinkResponse {
                success: true,
                account: Some(account),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, slot, "account link failed");
                AccountLinkResponse {
                    success: false,
                    account: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    /// Link an account from a pasted redirect URL (the browser lands on a
    /// page whose address carries `code` and `state`).
    pub async fn add_account(
        &self,
        slot: u8,
        name: &str,
        redirect_url: &str,
        requester_id: u64,
    ) -> AccountLinkResponse {
        let (code, state) = crate::epic::oauth::extract_code_from_url(redirect_url);
        match (code, state) {
            (Some(code), Some(state)) => {
                self.exchange_code(slot, name, &code, &state, requester_id).await
            }
            _ => AccountLinkResponse {
                success: false,
                account: None,
                error: Some("The pasted URL carries no authorization code. Copy the full redirect address.".into()),
            },
        }
    }

    async fn link_account(
        &self,
        slot: u8,
        name: &str,
        code: &str,
        state: &str,
        requester_id: u64,
    ) -> Result<AccountSummary, ActionError> {
        let bundle = self.oauth.exchange_code(code, state, requester_id).await?;

        let encrypted = self.vault.encrypt(&bundle.refresh_token)?;

        let display_name = if bundle.display_name.is_empty() {
            name.to_string()
        } else {
            bundle.display_name.clone()
        };

        let stored = self.registry.add(
            slot,
            name,
            &encrypted,
            &bundle.account_id,
            &display_name,
            bundle.expires_at,
        )?;
        if !stored {
            return Err(ActionError::Compliance(format!(
                "Slot must be between 1 and {}.",
                self.config.max_accounts
            )));
        }

        self.registry.switch_active(slot)?;
        let account = self
            .registry
            .get(Some(slot))?
            .ok_or_else(|| ActionError::NotFound(format!("slot {slot}")))?;
        Ok(AccountSummary::from(&account))
    }

    // =========================================================================
    // Account management
    // =========================================================================

    pub fn list_accounts(&self) -> AccountListResponse {
        match self.registry.list() {
            Ok(accounts) => AccountListResponse {
                success: true,
                accounts,
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "account listing failed");
                AccountListResponse {
                    success: false,
                    accounts: Vec::new(),
                    error: Some(ActionError::from(err).user_message()),
                }
            }
        }
    }

    pub fn switch_account(&self, slot: u8, actor_id: u64) -> CommandResponse {
        match self.registry.switch_active(slot) {
            Ok(true) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::AccountSwitch, actor_id)
                        .with_details(json!({ "slot": slot })),
                );
                CommandResponse {
                    success: true,
                    error: None,
                }
            }
            Ok(false) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::AccountSwitch, actor_id)
                        .with_details(json!({ "slot": slot }))
                        .failed("slot not linked"),
                );
                CommandResponse {
                    success: false,
                    error: Some(format!("No account is linked in slot {slot}.")),
                }
            }
            Err(err) => {
                warn!(error = %err, slot, "account switch failed");
                CommandResponse {
                    success: false,
                    error: Some(ActionError::from(err).user_message()),
                }
            }
        }
    }

    pub fn remove_account(&self, slot: u8) -> CommandResponse {
        match self.registry.remove(slot) {
            Ok(true) => CommandResponse {
                success: true,
                error: None,
            },
            Ok(false) => CommandResponse {
                success: false,
                error: Some(format!("No account is linked in slot {slot}.")),
            },
            Err(err) => {
                warn!(error = %err, slot, "account removal failed");
                CommandResponse {
                    success: false,
                    error: Some(ActionError::from(err).user_message()),
                }
            }
        }
    }

    pub fn rename_account(&self, slot: u8, new_name: &str) -> CommandResponse {
        match self.registry.update_name(slot, new_name) {
            Ok(true) => CommandResponse {
                success: true,
                error: None,
            },
            Ok(false) => CommandResponse {
                success: false,
                error: Some("Slot not linked, or the name is empty / longer than 50 characters.".into()),
            },
            Err(err) => {
                warn!(error = %err, slot, "account rename failed");
                CommandResponse {
                    success: false,
                    error: Some(ActionError::from(err).user_message()),
                }
            }
        }
    }

    // =========================================================================
    // Friends
    // =========================================================================

    pub async fn add_friend(&self, handle: &str, actor_id: u64) -> FriendAddResponse {
        match self.friends.add_friend(handle, actor_id).await {
            Ok(friend_id) => FriendAddResponse {
                success: true,
                friend_id: Some(friend_id.into()),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, handle, "friend add failed");
                FriendAddResponse {
                    success: false,
                    friend_id: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    pub async fn list_friends(&self, actor_id: u64) -> FriendListResponse {
        match self.friends.list_friends(actor_id).await {
            Ok(friends) => FriendListResponse {
                success: true,
                friends,
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "friend list failed");
                FriendListResponse {
                    success: false,
                    friends: Vec::new(),
                    error: Some(err.user_message()),
                }
            }
        }
    }

    // =========================================================================
    // Gifts
    // =========================================================================

    pub fn prepare_gift(&self, recipient: &str, item_id: &str, actor_id: u64) -> GiftPrepareResponse {
        match self.gifts.prepare(recipient, item_id, actor_id) {
            Ok(prepared) => {
                let summary = match prepared.remaining_quota {
                    Some(left) => format!(
                        "Gift '{}' to {}. {} of today's gift quota left after sending.",
                        prepared.item_id,
                        prepared.recipient,
                        left.saturating_sub(1)
                    ),
                    None => format!("Gift '{}' to {}.", prepared.item_id, prepared.recipient),
                };
                GiftPrepareResponse {
                    success: true,
                    confirmation_id: Some(prepared.confirmation_id),
                    summary: Some(summary),
                    remaining_quota: prepared.remaining_quota,
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "gift prepare failed");
                GiftPrepareResponse {
                    success: false,
                    confirmation_id: None,
                    summary: None,
                    remaining_quota: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    pub async fn confirm_gift(&self, confirmation_id: &str) -> GiftConfirmResponse {
        match self.gifts.confirm(confirmation_id).await {
            Ok(receipt) => GiftConfirmResponse {
                success: true,
                recipient: Some(receipt.recipient),
                item_id: Some(receipt.item_id),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, confirmation_id, "gift confirm failed");
                GiftConfirmResponse {
                    success: false,
                    recipient: None,
                    item_id: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    pub fn cancel_gift(&self, confirmation_id: &str) -> GiftCancelResponse {
        let cancelled = self.gifts.cancel(confirmation_id);
        GiftCancelResponse {
            success: cancelled,
            cancelled,
        }
    }

    /// Change the message attached to outgoing gifts.
    pub fn set_gift_message(&self, message: &str) {
        self.gifts.set_gift_message(message);
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub async fn get_catalog(&self, use_cache: bool, actor_id: u64) -> CatalogResponse {
        match self.catalog.get(use_cache, actor_id).await {
            Ok(snapshot) => CatalogResponse {
                success: true,
                items: snapshot.items,
                cached: snapshot.cached,
                source: Some(snapshot.source),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, "catalog fetch failed");
                CatalogResponse {
                    success: false,
                    items: Vec::new(),
                    cached: false,
                    source: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    pub async fn get_item_info(&self, item_id: &str, actor_id: u64) -> ItemInfoResponse {
        match self.catalog.item_info(item_id, actor_id).await {
            Ok(item) => ItemInfoResponse {
                success: true,
                item: Some(item),
                error: None,
            },
            Err(err) => {
                warn!(error = %err, item_id, "item info failed");
                ItemInfoResponse {
                    success: false,
                    item: None,
                    error: Some(err.user_message()),
                }
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Recent audit records for owner review.
    pub fn recent_actions(&self, kind: Option<ActionKind>, minutes: i64) -> Vec<ActionRecord> {
        self.audit.recent(kind, minutes)
    }

    /// Rate-limiter window usage, for the dashboard.
    pub async fn rate_stats(&self) -> Vec<RateUsage> {
        self.limiter.stats().await
    }

    /// Remaining daily quota of a kind for the active account.
    pub fn remaining_quota(&self, kind: ActionKind) -> Option<u32> {
        let account = self.registry.active().ok().flatten()?;
        self.compliance.remaining_quota(kind, &account.account_id)
    }
}
