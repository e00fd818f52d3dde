// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Crate-wide error taxonomy for automated actions.
//!
//! Expected failures travel as values: every public operation returns a
//! `Result` whose error maps to a short, actionable message for the bot
//! user, while the full upstream detail goes to the tracing logs only.

use crate::registry::RegistryError;
use crate::vault::VaultError;

/// Failure modes of an automated action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Token missing, expired or rejected upstream. Recoverable by
    /// re-linking the account.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Quota exceeded or malformed target; terminal for this attempt.
    #[error("{0}")]
    Compliance(String),

    /// Network error or upstream 5xx. The caller may retry; the core never
    /// retries internally.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Target handle, item or confirmation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream answered with a body we cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ActionError {
    /// Short actionable message for the end user. Provider error bodies
    /// never pass through here.
    pub fn user_message(&self) -> String {
        match self {
            ActionError::Authentication(_) => {
                "Could not authenticate the active account. Re-link it with a fresh login.".into()
            }
            ActionError::Compliance(reason) => reason.clone(),
            ActionError::UpstreamUnavailable(_) => {
                "The upstream service is unavailable right now. Try again in a few minutes.".into()
            }
            ActionError::NotFound(what) => format!("Not found: {what}"),
            ActionError::Protocol(_) => {
                "The upstream service sent an unexpected response. Try again later.".into()
            }
            ActionError::Vault(_) => {
                "Stored credentials could not be read. Re-link the account.".into()
            }
            ActionError::Registry(_) => "Account storage error. Check the logs.".into(),
        }
    }
}
