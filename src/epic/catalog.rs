// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Item-shop catalog with a one-hour cache and two upstream sources.
//!
//! A fresh cache hit is returned without touching the rate limiter or the
//! network. On a miss, the public rotating-shop endpoint is tried first;
//! any failure there (non-200, malformed body, empty normalized result)
//! falls back to the authenticated commerce endpoint with a freshly
//! derived access token.
//!
//! ## Normalization
//!
//! Upstream shapes differ per source and have changed over time, so every
//! field is resolved by an ordered list of extraction strategies: JSON
//! pointers tried in sequence, first hit wins. Three payload layouts are
//! tolerated: entries nested under named section keys (`featured`/`daily`,
//! with or without a `data`/`storefront` wrapper), a flat entry array, and
//! entries carrying a `section` discriminator.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::audit::{ActionAuditLog, ActionRecord};
use crate::config::Config;
use crate::error::ActionError;
use crate::limits::RateLimiter;
use crate::models::{ActionKind, CatalogSource, StoreItem};

use super::oauth::AccessBroker;
use super::transport::{bearer, Transport};

/// Cache lifetime for a fetched shop snapshot.
const CACHE_TTL: i64 = 3600;

/// Image CDN pattern used when the payload carries no usable asset URL.
const IMAGE_CDN: &str = "https://fortnite-api.com/images/cosmetics/br";

/// A catalog result as handed to callers.
#[derive(Debug, Clone)]
pub struct ShopSnapshot {
    pub items: Vec<StoreItem>,
    pub cached: bool,
    pub source: CatalogSource,
}

struct CachedShop {
    items: Vec<StoreItem>,
    source: CatalogSource,
    fetched_at: DateTime<Utc>,
}

/// TTL-cached, two-source catalog client.
pub struct RemoteCatalogCache {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    broker: Arc<AccessBroker>,
    limiter: Arc<RateLimiter>,
    audit: Arc<ActionAuditLog>,
    cache: tokio::sync::Mutex<Option<CachedShop>>,
}

impl RemoteCatalogCache {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        broker: Arc<AccessBroker>,
        limiter: Arc<RateLimiter>,
        audit: Arc<ActionAuditLog>,
    ) -> Self {
        Self {
            config,
            transport,
            broker,
            limiter,
            audit,
            cache: tokio::sync::Mutex::new(None),
        }
    }

    /// Current shop items. With `use_cache`, a snapshot younger than one
    /// hour is returned without any upstream traffic.
    pub async fn get(&self, use_cache: bool, actor_id: u64) -> Result<ShopSnapshot, ActionError> {
        if use_cache {
            let cache = self.cache.lock().await;
            if let Some(shop) = cache.as_ref() {
                if Utc::now() - shop.fetched_at < Duration::seconds(CACHE_TTL) {
                    self.audit.log(
                        ActionRecord::new(ActionKind::CatalogGet, actor_id)
                            .with_details(json!({ "cached": true })),
                    );
                    return Ok(ShopSnapshot {
                        items: shop.items.clone(),
                        cached: true,
                        source: shop.source,
                    });
                }
            }
        }

        self.limiter.acquire(ActionKind::CatalogGet).await;

        let (items, source) = match self.fetch_primary().await {
            Ok(items) => (items, CatalogSource::Primary),
            Err(primary_err) => {
                warn!(error = %primary_err, "primary catalog source failed, trying secondary");
                match self.fetch_secondary().await {
                    Ok(items) => (items, CatalogSource::Secondary),
                    Err(secondary_err) => {
                        self.audit.log(
                            ActionRecord::new(ActionKind::CatalogGet, actor_id)
                                .failed(secondary_err.to_string()),
                        );
                        return Err(secondary_err);
                    }
                }
            }
        };

        {
            let mut cache = self.cache.lock().await;
            *cache = Some(CachedShop {
                items: items.clone(),
                source,
                fetched_at: Utc::now(),
            });
        }

        self.audit.log(
            ActionRecord::new(ActionKind::CatalogGet, actor_id)
                .with_details(json!({ "count": items.len(), "source": source })),
        );
        self.limiter.apply_natural_delay(ActionKind::CatalogGet).await;

        info!(count = items.len(), source = ?source, "catalog fetched");
        Ok(ShopSnapshot {
            items,
            cached: false,
            source,
        })
    }

    /// Detail lookup for a single catalog item via the authenticated
    /// commerce endpoint.
    pub async fn item_info(&self, item_id: &str, actor_id: u64) -> Result<StoreItem, ActionError> {
        self.limiter.acquire(ActionKind::ItemInfo).await;

        let result = self.fetch_item(item_id).await;
        match &result {
            Ok(_) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::ItemInfo, actor_id)
                        .with_details(json!({ "item_id": item_id })),
                );
                self.limiter.apply_natural_delay(ActionKind::ItemInfo).await;
            }
            Err(err) => {
                self.audit.log(
                    ActionRecord::new(ActionKind::ItemInfo, actor_id)
                        .with_details(json!({ "item_id": item_id }))
                        .failed(err.to_string()),
                );
            }
        }
        result
    }

    async fn fetch_primary(&self) -> Result<Vec<StoreItem>, ActionError> {
        let mut headers = Vec::new();
        if let Some(key) = &self.config.shop_api_key {
            headers.push(("x-api-key".to_string(), key.clone()));
        }

        let response = self
            .transport
            .get(&self.config.shop_api_url, &headers)
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        if !response.is_success() {
            return Err(ActionError::UpstreamUnavailable(format!(
                "shop endpoint returned {}",
                response.status
            )));
        }

        let payload = response
            .json()
            .map_err(|e| ActionError::Protocol(format!("shop body: {e}")))?;
        let items = normalize_catalog(&payload);
        if items.is_empty() {
            return Err(ActionError::Protocol("shop payload contained no items".into()));
        }
        Ok(items)
    }

    async fn fetch_secondary(&self) -> Result<Vec<StoreItem>, ActionError> {
        let (_, access_token) = self.broker.access_token().await?;

        let url = format!("{}/namespace/fn/storefront", self.config.catalog_api);
        let response = self
            .transport
            .get(&url, &bearer(&access_token))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        if !response.is_success() {
            return Err(ActionError::UpstreamUnavailable(format!(
                "catalog endpoint returned {}",
                response.status
            )));
        }

        let payload = response
            .json()
            .map_err(|e| ActionError::Protocol(format!("catalog body: {e}")))?;
        let items = normalize_catalog(&payload);
        if items.is_empty() {
            return Err(ActionError::Protocol("catalog payload contained no items".into()));
        }
        Ok(items)
    }

    async fn fetch_item(&self, item_id: &str) -> Result<StoreItem, ActionError> {
        let (_, access_token) = self.broker.access_token().await?;

        let url = format!("{}/namespace/fn/items/{}", self.config.catalog_api, item_id);
        let response = self
            .transport
            .get(&url, &bearer(&access_token))
            .await
            .map_err(|e| ActionError::UpstreamUnavailable(e.to_string()))?;

        match response.status {
            200 => {
                let payload = response
                    .json()
                    .map_err(|e| ActionError::Protocol(format!("item body: {e}")))?;
                normalize_entry(&payload, false)
                    .ok_or_else(|| ActionError::Protocol("item payload not recognizable".into()))
            }
            404 => Err(ActionError::NotFound(format!("item '{item_id}'"))),
            status => Err(ActionError::UpstreamUnavailable(format!(
                "item endpoint returned {status}"
            ))),
        }
    }
}

// =============================================================================
// Normalization strategies
// =============================================================================

/// Extract raw entries from any of the tolerated payload layouts, tagged
/// with whether they came from a featured section.
fn extract_entries(payload: &Value) -> Vec<(Value, bool)> {
    let roots = [
        Some(payload),
        payload.get("data"),
        payload.get("storefront"),
    ];

    // Entries nested under named section keys
    for root in roots.into_iter().flatten() {
        let mut entries = Vec::new();
        for (section, featured) in [("featured", true), ("daily", false)] {
            if let Some(list) = root
                .pointer(&format!("/{section}/entries"))
                .and_then(Value::as_array)
            {
                entries.extend(list.iter().cloned().map(|e| (e, featured)));
            }
        }
        if !entries.is_empty() {
            return entries;
        }
    }

    // Flat entry array (entries may carry their own `section` discriminator)
    for root in [Some(payload), payload.get("data")].into_iter().flatten() {
        if let Some(list) = root.get("entries").and_then(Value::as_array) {
            return list.iter().cloned().map(|e| (e, false)).collect();
        }
    }

    payload
        .as_array()
        .map(|list| list.iter().cloned().map(|e| (e, false)).collect())
        .unwrap_or_default()
}

/// Normalize a whole catalog payload, dropping unrecognizable entries.
fn normalize_catalog(payload: &Value) -> Vec<StoreItem> {
    extract_entries(payload)
        .iter()
        .filter_map(|(entry, featured)| normalize_entry(entry, *featured))
        .collect()
}

/// Resolve one entry into a [`StoreItem`]; `None` when no id can be found.
fn normalize_entry(entry: &Value, from_featured_section: bool) -> Option<StoreItem> {
    let offer_id = first_str(entry, &["/offerId", "/id"]);

    // Stable cosmetic id for gift calls; the offer id rotates with the shop
    let item_id = first_str(entry, &["/items/0/id", "/mainId"])
        .or_else(|| offer_id.clone())?;
    let offer_id = offer_id.unwrap_or_else(|| item_id.clone());

    let name = first_str(entry, &["/bundle/name", "/items/0/name", "/title", "/name"])
        .unwrap_or_else(|| cleaned_id(&item_id));

    let price = first_price(
        entry,
        &["/finalPrice", "/price/finalPrice", "/prices/0/finalPrice", "/price"],
    )
    .unwrap_or(0);
    let original_price = first_price(
        entry,
        &["/regularPrice", "/price/regularPrice", "/prices/0/regularPrice"],
    )
    .unwrap_or(price);

    let rarity = first_str(entry, &["/items/0/rarity/value", "/rarity/value", "/rarity"])
        .unwrap_or_else(|| "common".to_string());
    let item_type = first_str(entry, &["/items/0/type/value", "/type/value", "/type"])
        .unwrap_or_else(|| "unknown".to_string());

    let image_url = first_str(
        entry,
        &[
            "/newDisplayAsset/materialInstances/0/images/Background",
            "/items/0/images/icon",
            "/displayAsset/url",
            "/imageUrl",
            "/image",
        ],
    )
    .unwrap_or_else(|| format!("{IMAGE_CDN}/{item_id}/icon.png"));

    let featured = from_featured_section
        || entry
            .pointer("/section/id")
            .and_then(Value::as_str)
            .is_some_and(|id| id.eq_ignore_ascii_case("featured"));

    Some(StoreItem {
        item_id,
        offer_id,
        name,
        price,
        original_price,
        rarity,
        item_type,
        image_url,
        featured,
    })
}

/// First pointer yielding a non-empty string.
fn first_str(entry: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| entry.pointer(p))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First pointer yielding a numeric price.
fn first_price(entry: &Value, pointers: &[&str]) -> Option<u32> {
    pointers
        .iter()
        .filter_map(|p| entry.pointer(p))
        .find_map(Value::as_u64)
        .map(|v| v.min(u32::MAX as u64) as u32)
}

/// Turn an asset id like `CID_028_Athena_Commando_F` into something
/// presentable when no display name is available.
fn cleaned_id(id: &str) -> String {
    let cleaned: Vec<&str> = id
        .split(['_', '-'])
        .filter(|part| {
            !part.is_empty()
                && !(part.len() <= 3
                    && part.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()))
        })
        .collect();

    if cleaned.is_empty() {
        id.to_string()
    } else {
        cleaned.join(" ")
    }
}
