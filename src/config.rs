// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! # Runtime Configuration
//!
//! Environment-driven configuration, read once at process start and handed
//! to [`crate::service::Automation`]. Endpoint defaults target the
//! production Epic Games services; every value can be overridden for
//! staging or tests.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `EPIC_CLIENT_ID` | Public OAuth client id (PKCE, no secret) | built-in public client |
//! | `EPIC_REDIRECT_URI` | Redirect URI registered for the client | Epic redirect page |
//! | `EPIC_AUTHORIZE_URL` | Browser-facing authorization endpoint | epicgames.com/id/authorize |
//! | `EPIC_ACCOUNT_API` | Account service base (token, verify, lookup) | prod03 account service |
//! | `EPIC_FRIENDS_API` | Friends service base | prod friends service |
//! | `EPIC_GIFT_API` | Gift service base | prod gift service |
//! | `EPIC_CATALOG_API` | Authenticated catalog base (secondary source) | prod catalog service |
//! | `SHOP_API_URL` | Public rotating-shop endpoint (primary source) | fortnite-api.com/v2/shop/br |
//! | `SHOP_API_KEY` | API key header for the public shop endpoint | unset |
//! | `EPIC_VAULT_KEY` | Base64 32-byte vault master key | unset (key file) |
//! | `EPIC_VAULT_KEY_FILE` | Path of the generated/stored key file | `.epic_vault_key` |
//! | `ACCOUNTS_DB_PATH` | redb database file for account slots | `accounts.redb` |
//! | `MAX_ACCOUNTS` | Linked-account slot limit | `5` |
//! | `GIFT_MESSAGE` | Message attached to outgoing gifts | built-in greeting |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |

use std::env;
use std::path::PathBuf;

/// Public Epic Games OAuth client id used when none is configured.
const DEFAULT_CLIENT_ID: &str = "3f69e56c749492c8cc29f1af08aa12e";

const DEFAULT_REDIRECT_URI: &str = "https://www.epicgames.com/id/api/redirect";
const DEFAULT_AUTHORIZE_URL: &str = "https://www.epicgames.com/id/authorize";
const DEFAULT_ACCOUNT_API: &str = "https://account-public-service-prod03.ol.epicgames.com";
const DEFAULT_FRIENDS_API: &str = "https://friends-public-service-prod.ol.epicgames.com/friends/api/public";
const DEFAULT_GIFT_API: &str = "https://gift-public-service-prod.ol.epicgames.com/gift/api/public";
const DEFAULT_CATALOG_API: &str = "https://catalog-public-service-prod.ol.epicgames.com/catalog/api/shared";
const DEFAULT_SHOP_API_URL: &str = "https://fortnite-api.com/v2/shop/br";

const DEFAULT_GIFT_MESSAGE: &str = "Enjoy this gift from ONZA Bot!";

/// Scopes requested on login. `offline_access` is required to receive a
/// refresh token.
pub const OAUTH_SCOPES: [&str; 5] = [
    "basic_profile",
    "friends_list",
    "presence",
    "openid",
    "offline_access",
];

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub account_api: String,
    pub friends_api: String,
    pub gift_api: String,
    pub catalog_api: String,
    pub shop_api_url: String,
    pub shop_api_key: Option<String>,
    pub vault_key: Option<String>,
    pub vault_key_file: PathBuf,
    pub accounts_db_path: PathBuf,
    pub max_accounts: u8,
    pub gift_message: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        Config {
            client_id: env_or_default("EPIC_CLIENT_ID", DEFAULT_CLIENT_ID),
            redirect_uri: env_or_default("EPIC_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            authorize_url: env_or_default("EPIC_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
            account_api: trimmed(env_or_default("EPIC_ACCOUNT_API", DEFAULT_ACCOUNT_API)),
            friends_api: trimmed(env_or_default("EPIC_FRIENDS_API", DEFAULT_FRIENDS_API)),
            gift_api: trimmed(env_or_default("EPIC_GIFT_API", DEFAULT_GIFT_API)),
            catalog_api: trimmed(env_or_default("EPIC_CATALOG_API", DEFAULT_CATALOG_API)),
            shop_api_url: env_or_default("SHOP_API_URL", DEFAULT_SHOP_API_URL),
            shop_api_key: env_optional("SHOP_API_KEY"),
            vault_key: env_optional("EPIC_VAULT_KEY"),
            vault_key_file: PathBuf::from(env_or_default("EPIC_VAULT_KEY_FILE", ".epic_vault_key")),
            accounts_db_path: PathBuf::from(env_or_default("ACCOUNTS_DB_PATH", "accounts.redb")),
            max_accounts: env_or_default("MAX_ACCOUNTS", "5").parse().unwrap_or(5),
            gift_message: env_or_default("GIFT_MESSAGE", DEFAULT_GIFT_MESSAGE),
        }
    }

    /// Token endpoint on the account service.
    pub fn token_url(&self) -> String {
        format!("{}/account/api/oauth/token", self.account_api)
    }

    /// Identity verification endpoint (resolves the bearer's own account).
    pub fn verify_url(&self) -> String {
        format!("{}/account/api/oauth/verify", self.account_api)
    }

    /// Display-name lookup endpoint.
    pub fn display_name_url(&self, handle: &str) -> String {
        format!(
            "{}/account/api/public/account/displayName/{}",
            self.account_api, handle
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn trimmed(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
