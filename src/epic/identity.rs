// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Display-name → account-id resolution, shared by the friend and gift
//! flows.

use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::error::ActionError;
use crate::models::AccountId;

use super::transport::{bearer, Transport};

pub struct IdentityResolver {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
}

impl IdentityResolver {
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Resolve a player handle to its upstream account id.
    pub async fn resolve(&self, handle: &str, access_token: &str) -> Result<AccountId, ActionError> {
        let url = self.config.display_name_url(handle.trim());
        let response = self
            .transport
            .get(&url, &bearer(access_token))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        match response.status {
            200 => {
                let payload = response
                    .json()
                    .map_err(|e| ActionError::Protocol(format!("account lookup body: {e}")))?;
                payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .map(AccountId::from)
                    .ok_or_else(|| ActionError::Protocol("account lookup missing 'id'".into()))
            }
            404 => Err(ActionError::NotFound(format!("player '{handle}'"))),
            401 | 403 => {
                warn!(status = response.status, "account lookup rejected the bearer token");
                Err(ActionError::Authentication(format!(
                    "account lookup returned {}",
                    response.status
                )))
            }
            status => Err(ActionError::UpstreamUnavailable(format!(
                "account lookup returned {status}"
            ))),
        }
    }
}
