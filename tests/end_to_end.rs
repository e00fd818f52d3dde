// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! End-to-end scenarios over a scripted stub transport: onboarding via
//! PKCE, the two-phase gift flow, quota exhaustion and catalog fallback.
//! Tests run with a paused tokio clock so rate-limit sleeps cost nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use onza_epic::config::Config;
use onza_epic::epic::{RawResponse, Transport, TransportError};
use onza_epic::models::{ActionKind, CatalogSource};
use onza_epic::registry::AccountRegistry;
use onza_epic::service::Automation;
use onza_epic::vault::CredentialVault;

// =============================================================================
// Stub transport
// =============================================================================

#[derive(Clone)]
struct StubResponse {
    status: u16,
    body: String,
}

#[derive(Default)]
struct StubTransport {
    /// substring pattern → response, first match wins, repeatable
    routes: Mutex<Vec<(String, StubResponse)>>,
    /// every completed request as "METHOD url"
    calls: Mutex<Vec<String>>,
    /// form bodies per token-style request
    forms: Mutex<Vec<(String, HashMap<String, String>)>>,
}

impl StubTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn route(&self, pattern: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), StubResponse { status, body: body.to_string() }));
    }

    /// Replace an existing route with the same pattern.
    fn reroute(&self, pattern: &str, status: u16, body: Value) {
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(p, _)| p != pattern);
        routes.insert(
            0,
            (pattern.to_string(), StubResponse { status, body: body.to_string() }),
        );
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn forms_for(&self, pattern: &str) -> Vec<HashMap<String, String>> {
        self.forms
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains(pattern))
            .map(|(_, form)| form.clone())
            .collect()
    }

    fn handle(&self, method: &str, url: &str) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(format!("{method} {url}"));

        let routes = self.routes.lock().unwrap();
        for (pattern, response) in routes.iter() {
            if url.contains(pattern.as_str()) {
                return Ok(RawResponse {
                    status: response.status,
                    body: response.body.clone(),
                });
            }
        }
        Err(TransportError::Request(format!("no stub route for {url}")))
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get(
        &self,
        url: &str,
        _headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        self.handle("GET", url)
    }

    async fn post_form(
        &self,
        url: &str,
        _headers: &[(String, String)],
        form: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        self.forms
            .lock()
            .unwrap()
            .push((url.to_string(), form.iter().cloned().collect()));
        self.handle("POST", url)
    }

    async fn post_json(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _body: &Value,
    ) -> Result<RawResponse, TransportError> {
        self.handle("POST", url)
    }
}

// =============================================================================
// Fixture helpers
// =============================================================================

fn test_config(dir: &TempDir) -> Config {
    Config {
        client_id: "test-client".into(),
        redirect_uri: "https://stub.test/redirect".into(),
        authorize_url: "https://stub.test/authorize".into(),
        account_api: "https://account.stub.test".into(),
        friends_api: "https://friends.stub.test/friends/api/public".into(),
        gift_api: "https://gift.stub.test/gift/api/public".into(),
        catalog_api: "https://catalog.stub.test/catalog/api/shared".into(),
        shop_api_url: "https://shop.stub.test/v2/shop/br".into(),
        shop_api_key: Some("shop-key".into()),
        vault_key: None,
        vault_key_file: dir.path().join("vault.key"),
        accounts_db_path: dir.path().join("accounts.redb"),
        max_accounts: 5,
        gift_message: "gg".into(),
    }
}

/// Stub the identity provider: token endpoint plus verify endpoint.
fn stub_identity(stub: &StubTransport) {
    stub.route(
        "/account/api/oauth/token",
        200,
        json!({
            "access_token": "at-live",
            "refresh_token": "rt-plain",
            "expires_in": 3600,
            "account_id": "epic-owner"
        }),
    );
    stub.route(
        "/account/api/oauth/verify",
        200,
        json!({ "account_id": "epic-owner", "displayName": "Owner" }),
    );
}

/// Run the full login → exchange onboarding against slot 1.
async fn onboard(automation: &Automation) {
    let login = automation.generate_login_url(7);
    assert!(login.success);
    assert!(login.url.contains("code_challenge_method=S256"));
    assert!(login.url.contains(&format!("state={}", login.state)));
    assert!(login.url.contains("client_id=test-client"));

    let linked = automation
        .exchange_code(1, "main", "auth-code", &login.state, 7)
        .await;
    assert!(linked.success, "onboarding failed: {:?}", linked.error);

    let account = linked.account.expect("linked account summary");
    assert_eq!(account.slot, 1);
    assert!(account.active);
    assert_eq!(account.display_name, "Owner");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn onboarding_stores_an_encrypted_credential() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let stub = StubTransport::new();
    stub_identity(&stub);

    let automation = Automation::with_transport(config.clone(), stub.clone()).unwrap();
    onboard(&automation).await;

    // The token exchange used PKCE material and never a client secret
    let forms = stub.forms_for("/account/api/oauth/token");
    let exchange = &forms[0];
    assert_eq!(exchange.get("grant_type").unwrap(), "authorization_code");
    assert_eq!(exchange.get("client_id").unwrap(), "test-client");
    assert!(exchange.get("code_verifier").unwrap().len() >= 43);
    assert!(!exchange.contains_key("client_secret"));

    // Release the database, then inspect what actually hit disk
    drop(automation);
    let registry = AccountRegistry::open(&config.accounts_db_path, 5).unwrap();
    let account = registry.get(Some(1)).unwrap().unwrap();
    assert!(account.active);
    assert_ne!(account.encrypted_refresh_token, "rt-plain");

    let vault = CredentialVault::from_config(&config).unwrap();
    assert_eq!(vault.decrypt(&account.encrypted_refresh_token).unwrap(), "rt-plain");
}

#[tokio::test(start_paused = true)]
async fn linking_from_a_pasted_redirect_url_works() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    let login = automation.generate_login_url(7);
    let redirect = format!("https://stub.test/redirect?code=auth-code&state={}", login.state);
    let linked = automation.add_account(2, "alt", &redirect, 7).await;
    assert!(linked.success, "link failed: {:?}", linked.error);
    assert_eq!(linked.account.unwrap().slot, 2);

    let garbage = automation.add_account(3, "x", "https://stub.test/redirect", 7).await;
    assert!(!garbage.success);
}

#[tokio::test(start_paused = true)]
async fn exchange_with_wrong_state_or_requester_fails() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    let unknown = automation.exchange_code(1, "main", "code", "bogus-state", 7).await;
    assert!(!unknown.success);

    let login = automation.generate_login_url(7);
    let stranger = automation.exchange_code(1, "main", "code", &login.state, 999).await;
    assert!(!stranger.success);

    // Neither attempt reached the token endpoint
    assert_eq!(stub.calls_matching("/account/api/oauth/token"), 0);
}

#[tokio::test(start_paused = true)]
async fn prepare_then_cancel_never_touches_the_network() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    let prepared = automation.prepare_gift("alice", "item-42", 7);
    assert!(prepared.success);

    let cancelled = automation.cancel_gift(&prepared.confirmation_id.unwrap());
    assert!(cancelled.cancelled);

    assert_eq!(stub.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_is_idempotent_safe() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    let prepared = automation.prepare_gift("alice", "item-42", 7);
    let id = prepared.confirmation_id.unwrap();
    assert!(automation.cancel_gift(&id).cancelled);
    assert!(!automation.cancel_gift(&id).cancelled);
    assert!(!automation.cancel_gift("never-existed").cancelled);
}

#[tokio::test(start_paused = true)]
async fn double_confirm_sends_exactly_one_gift() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/alice", 200, json!({ "id": "epic-alice" }));
    stub.route("gift.stub.test", 204, json!({}));

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    let prepared = automation.prepare_gift("alice", "item-42", 7);
    let id = prepared.confirmation_id.unwrap();

    let (first, second) = tokio::join!(automation.confirm_gift(&id), automation.confirm_gift(&id));

    let successes = [&first, &second].iter().filter(|r| r.success).count();
    assert_eq!(successes, 1, "exactly one confirm may execute");
    assert_eq!(stub.calls_matching("gift.stub.test"), 1);

    let loser = if first.success { &second } else { &first };
    assert!(loser.error.as_ref().unwrap().contains("Not found"));
}

#[tokio::test(start_paused = true)]
async fn daily_gift_quota_stops_the_eleventh_send() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/alice", 200, json!({ "id": "epic-alice" }));
    stub.route("gift.stub.test", 204, json!({}));

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    for attempt in 1..=10 {
        let prepared = automation.prepare_gift("alice", "item-42", 7);
        let confirmed = automation
            .confirm_gift(&prepared.confirmation_id.unwrap())
            .await;
        assert!(confirmed.success, "gift {attempt} should pass: {:?}", confirmed.error);
    }

    let prepared = automation.prepare_gift("alice", "item-42", 7);
    assert_eq!(prepared.remaining_quota, Some(0));
    let eleventh = automation
        .confirm_gift(&prepared.confirmation_id.unwrap())
        .await;
    assert!(!eleventh.success);
    assert!(eleventh.error.unwrap().contains("Daily gift limit"));

    // Exactly ten gift calls reached the upstream service
    assert_eq!(stub.calls_matching("gift.stub.test"), 10);
    assert_eq!(automation.remaining_quota(ActionKind::GiftSend), Some(0));
}

#[tokio::test(start_paused = true)]
async fn gift_failure_consumes_the_confirmation_without_recording_quota() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/alice", 200, json!({ "id": "epic-alice" }));
    stub.route("gift.stub.test", 403, json!({ "errorCode": "forbidden" }));

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    let prepared = automation.prepare_gift("alice", "item-42", 7);
    let id = prepared.confirmation_id.unwrap();
    let confirmed = automation.confirm_gift(&id).await;
    assert!(!confirmed.success);
    assert!(confirmed.error.unwrap().contains("cannot be gifted"));

    // The pending record is gone: a retry cannot double-send
    let retry = automation.confirm_gift(&id).await;
    assert!(!retry.success);
    assert_eq!(stub.calls_matching("gift.stub.test"), 1);

    // Failed sends never count against the daily quota
    assert_eq!(automation.remaining_quota(ActionKind::GiftSend), Some(10));
}

#[tokio::test(start_paused = true)]
async fn catalog_falls_back_to_the_secondary_source_and_caches() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("shop.stub.test", 503, json!({ "error": "maintenance" }));
    stub.route(
        "/catalog/api/shared/namespace/fn/storefront",
        200,
        json!({
            "storefront": {
                "featured": {
                    "entries": [{
                        "offerId": "offer-1",
                        "finalPrice": 1200,
                        "items": [{ "id": "CID_100", "name": "Featured Skin" }]
                    }]
                },
                "daily": { "entries": [] }
            }
        }),
    );

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    let first = automation.get_catalog(true, 7).await;
    assert!(first.success, "fallback should succeed: {:?}", first.error);
    assert_eq!(first.source, Some(CatalogSource::Secondary));
    assert!(!first.cached);
    assert_eq!(first.items.len(), 1);
    assert_eq!(first.items[0].name, "Featured Skin");

    let shop_calls = stub.calls_matching("shop.stub.test");
    let catalog_calls = stub.calls_matching("/namespace/fn/storefront");

    // Within the TTL the snapshot is served from cache: no new traffic
    let second = automation.get_catalog(true, 7).await;
    assert!(second.cached);
    assert_eq!(second.source, Some(CatalogSource::Secondary));
    assert_eq!(stub.calls_matching("shop.stub.test"), shop_calls);
    assert_eq!(stub.calls_matching("/namespace/fn/storefront"), catalog_calls);
}

#[tokio::test(start_paused = true)]
async fn catalog_prefers_the_primary_public_source() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub.route(
        "shop.stub.test",
        200,
        json!({
            "data": {
                "featured": { "entries": [{ "offerId": "offer-9", "items": [{ "id": "CID_900" }] }] },
                "daily": { "entries": [] }
            }
        }),
    );

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    // No linked account needed: the public source requires no bearer token
    let snapshot = automation.get_catalog(false, 7).await;
    assert!(snapshot.success);
    assert_eq!(snapshot.source, Some(CatalogSource::Primary));
    assert_eq!(stub.calls_matching("/account/api/oauth/token"), 0);
}

#[tokio::test(start_paused = true)]
async fn friend_add_runs_the_full_pipeline() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/buddy", 200, json!({ "id": "epic-buddy" }));
    stub.route("friends.stub.test", 204, json!({}));

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    let added = automation.add_friend("buddy", 7).await;
    assert!(added.success, "friend add failed: {:?}", added.error);
    assert_eq!(added.friend_id.as_deref(), Some("epic-buddy"));
    assert_eq!(stub.calls_matching("friends.stub.test"), 1);

    // Too-short handles are rejected before any network traffic
    let calls_before = stub.total_calls();
    let rejected = automation.add_friend("ab", 7).await;
    assert!(!rejected.success);
    assert_eq!(stub.total_calls(), calls_before);

    let audit = automation.recent_actions(Some(ActionKind::FriendAdd), 60);
    assert_eq!(audit.len(), 2);
    assert!(audit[0].success);
    assert!(!audit[1].success);
}

#[tokio::test(start_paused = true)]
async fn unresolvable_recipient_fails_without_a_gift_call() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/ghost", 404, json!({}));
    stub.route("gift.stub.test", 204, json!({}));

    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();
    onboard(&automation).await;

    let prepared = automation.prepare_gift("ghost", "item-42", 7);
    let confirmed = automation.confirm_gift(&prepared.confirmation_id.unwrap()).await;
    assert!(!confirmed.success);
    assert!(confirmed.error.unwrap().contains("ghost"));
    assert_eq!(stub.calls_matching("gift.stub.test"), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_rotation_is_persisted_through_the_vault() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let stub = StubTransport::new();
    stub_identity(&stub);
    stub.route("/account/api/public/account/displayName/buddy", 200, json!({ "id": "epic-buddy" }));
    stub.route("friends.stub.test", 204, json!({}));

    let automation = Automation::with_transport(config.clone(), stub.clone()).unwrap();
    onboard(&automation).await;

    // The next token refresh rotates the refresh token
    stub.reroute(
        "/account/api/oauth/token",
        200,
        json!({
            "access_token": "at-2",
            "refresh_token": "rt-rotated",
            "expires_in": 3600,
            "account_id": "epic-owner"
        }),
    );
    assert!(automation.add_friend("buddy", 7).await.success);

    drop(automation);
    let registry = AccountRegistry::open(&config.accounts_db_path, 5).unwrap();
    let account = registry.get(Some(1)).unwrap().unwrap();
    let vault = CredentialVault::from_config(&config).unwrap();
    assert_eq!(vault.decrypt(&account.encrypted_refresh_token).unwrap(), "rt-rotated");
}

#[tokio::test(start_paused = true)]
async fn switch_account_is_audited_and_exclusive() {
    let dir = TempDir::new().unwrap();
    let stub = StubTransport::new();
    stub_identity(&stub);
    let automation = Automation::with_transport(test_config(&dir), stub.clone()).unwrap();

    // Link two slots
    for slot in [1_u8, 2] {
        let login = automation.generate_login_url(7);
        let linked = automation
            .exchange_code(slot, &format!("acct-{slot}"), "code", &login.state, 7)
            .await;
        assert!(linked.success);
    }

    assert!(automation.switch_account(1, 7).success);
    let accounts = automation.list_accounts().accounts;
    let active: Vec<u8> = accounts.iter().filter(|a| a.active).map(|a| a.slot).collect();
    assert_eq!(active, vec![1]);

    assert!(!automation.switch_account(5, 7).success);
    let audit = automation.recent_actions(Some(ActionKind::AccountSwitch), 60);
    assert_eq!(audit.len(), 2);
}
