// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! # Epic Games Upstream Integration
//!
//! Clients for the upstream services the automation core talks to:
//!
//! - `oauth` - PKCE login, code exchange, refresh-token derivation and the
//!   shared access broker
//! - `identity` - display-name → account-id resolution
//! - `friends` - friend-add and friend-list operations
//! - `gifting` - the two-phase prepare/confirm/cancel gift flow
//! - `catalog` - TTL-cached, two-source item-shop snapshot
//!
//! Every client goes through the [`transport::Transport`] seam and the
//! admission gates in [`crate::limits`] before touching the network.

pub mod catalog;
pub mod friends;
pub mod gifting;
pub mod identity;
pub mod oauth;
pub mod transport;

pub use catalog::{RemoteCatalogCache, ShopSnapshot};
pub use friends::FriendGraphClient;
pub use gifting::{GiftPrepared, GiftReceipt, GiftTransactionFlow};
pub use identity::IdentityResolver;
pub use oauth::{AccessBroker, OAuthClient};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};
