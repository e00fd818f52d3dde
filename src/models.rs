// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! # Core Data Models
//!
//! Record types shared across the automation core. All types derive
//! `Serialize`/`Deserialize` for storage (redb values are JSON bytes) and
//! for the plain result objects returned by the [`crate::service`] facade.
//!
//! ## Account Id Type
//!
//! The [`AccountId`] newtype wraps upstream Epic account identifiers. It
//! provides type safety and keeps Discord user ids (`u64`) and Epic account
//! ids (opaque strings) from being confused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Account Id Type
// =============================================================================

/// Upstream Epic account identifier wrapper.
///
/// Opaque string assigned by the identity provider; used as the key for
/// compliance counters and as the path segment of friend/gift calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        AccountId(value)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        AccountId(value.to_string())
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.0
    }
}

// =============================================================================
// Action Kinds
// =============================================================================

/// Every automated action the core can perform against the upstream APIs.
///
/// Shared by the rate limiter (admission policies), the compliance guard
/// (daily quotas) and the audit log (record classification).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FriendAdd,
    FriendList,
    GiftSend,
    CatalogGet,
    ItemInfo,
    TokenRefresh,
    AccountSwitch,
}

impl ActionKind {
    /// All kinds, for building policy tables.
    pub const ALL: [ActionKind; 7] = [
        ActionKind::FriendAdd,
        ActionKind::FriendList,
        ActionKind::GiftSend,
        ActionKind::CatalogGet,
        ActionKind::ItemInfo,
        ActionKind::TokenRefresh,
        ActionKind::AccountSwitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FriendAdd => "friend_add",
            ActionKind::FriendList => "friend_list",
            ActionKind::GiftSend => "gift_send",
            ActionKind::CatalogGet => "catalog_get",
            ActionKind::ItemInfo => "item_info",
            ActionKind::TokenRefresh => "token_refresh",
            ActionKind::AccountSwitch => "account_switch",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Linked Accounts
// =============================================================================

/// A linked Epic account slot as persisted in the registry.
///
/// Only the refresh token is ever stored, and only encrypted. Access tokens
/// are derived on demand and live exclusively on the stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Slot number, 1-based, unique within the registry.
    pub slot: u8,
    /// Owner-facing label for the slot.
    pub name: String,
    /// Upstream account id.
    pub account_id: AccountId,
    /// Display name reported by the identity provider at link time.
    pub display_name: String,
    /// Vault ciphertext of the refresh token.
    pub encrypted_refresh_token: String,
    /// Expiry of the stored refresh token.
    pub token_expiry: DateTime<Utc>,
    /// Whether this slot is the one operations act on.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Redacted account shape returned by listings; carries no token material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSummary {
    pub slot: u8,
    pub name: String,
    pub account_id: AccountId,
    pub display_name: String,
    pub active: bool,
    pub token_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        AccountSummary {
            slot: account.slot,
            name: account.name.clone(),
            account_id: account.account_id.clone(),
            display_name: account.display_name.clone(),
            active: account.active,
            token_expiry: account.token_expiry,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Result of a successful code exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    /// Short-lived bearer token. Never persisted.
    pub access_token: String,
    /// Long-lived refresh token, plaintext; the caller encrypts before
    /// handing it to the registry.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub account_id: AccountId,
    pub display_name: String,
}

/// A login attempt awaiting its authorization-code callback.
///
/// Keyed by the OAuth `state` value; consumed exactly once by a successful
/// exchange, invalid after ten minutes.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    pub requester_id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Gifts
// =============================================================================

/// A prepared gift waiting for an explicit confirm (or cancel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGiftConfirmation {
    pub confirmation_id: String,
    pub recipient: String,
    pub item_id: String,
    pub requester_id: u64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Catalog
// =============================================================================

/// Which upstream produced a catalog snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// Public rotating-shop endpoint.
    Primary,
    /// Authenticated commerce endpoint.
    Secondary,
}

/// A normalized shop item.
///
/// `item_id` is the stable cosmetic id usable for gift calls; `offer_id`
/// is the purchase offer and rotates with the shop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreItem {
    pub item_id: String,
    pub offer_id: String,
    pub name: String,
    pub price: u32,
    pub original_price: u32,
    pub rarity: String,
    pub item_type: String,
    pub image_url: String,
    pub featured: bool,
}

// =============================================================================
// Friends
// =============================================================================

/// One entry of the active account's friend list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendEntry {
    pub account_id: AccountId,
    pub display_name: String,
    pub status: String,
    pub favorite: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_conversions_round_trip() {
        let id = AccountId::from("abc123def456");
        assert_eq!(id.to_string(), "abc123def456");
        assert_eq!(String::from(id.clone()), "abc123def456");
        assert_eq!(AccountId::from(String::from("x")), AccountId::from("x"));
    }

    #[test]
    fn action_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ActionKind::GiftSend).unwrap();
        assert_eq!(json, r#""gift_send""#);
        assert_eq!(ActionKind::CatalogGet.as_str(), "catalog_get");
    }

    #[test]
    fn summary_redacts_token_material() {
        let account = Account {
            slot: 1,
            name: "main".into(),
            account_id: AccountId::from("epic-1"),
            display_name: "Owner".into(),
            encrypted_refresh_token: "ciphertext".into(),
            token_expiry: Utc::now(),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let summary = AccountSummary::from(&account);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("ciphertext"));
        assert_eq!(summary.slot, 1);
        assert!(summary.active);
    }
}
