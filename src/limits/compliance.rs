// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Acceptable-use ceilings, separate from technical rate limiting.
//!
//! Counters are keyed by `(account, UTC date, kind)`, so daily quotas reset
//! implicitly at date rollover with no sweep job. An additional rolling
//! hourly ceiling on total upstream calls per account guards against
//! runaway automation. [`ComplianceGuard::record`] must be called only
//! after an upstream call actually succeeded, never before and never on
//! failure.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::error::ActionError;
use crate::models::{AccountId, ActionKind};

/// Minimum length of a friend handle.
const MIN_HANDLE_LEN: usize = 3;

/// Structural shape of the action being validated.
#[derive(Debug, Clone, Copy)]
pub enum ActionTarget<'a> {
    Gift { item_id: &'a str, recipient: &'a str },
    Friend { handle: &'a str },
    None,
}

/// Policy ceilings. More restrictive than the technical rate limits.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    /// Explicit allow-list; kinds absent here are rejected outright.
    pub enabled: HashMap<ActionKind, bool>,
    pub gift_sends_per_day: u32,
    pub friend_adds_per_day: u32,
    pub calls_per_hour: u32,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enabled: ActionKind::ALL.iter().map(|k| (*k, true)).collect(),
            gift_sends_per_day: 10,
            friend_adds_per_day: 20,
            calls_per_hour: 1_000,
        }
    }
}

#[derive(Default)]
struct CounterState {
    daily: HashMap<(AccountId, NaiveDate, ActionKind), u32>,
    hourly: HashMap<AccountId, VecDeque<DateTime<Utc>>>,
}

/// Per-account daily quotas and request-shape validation.
pub struct ComplianceGuard {
    config: ComplianceConfig,
    state: Mutex<CounterState>,
}

impl ComplianceGuard {
    pub fn new(config: ComplianceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CounterState::default()),
        }
    }

    /// Check whether `kind` may run for `account` right now. Returns the
    /// human-readable refusal reason as [`ActionError::Compliance`].
    pub fn validate(
        &self,
        kind: ActionKind,
        account: &AccountId,
        target: &ActionTarget<'_>,
    ) -> Result<(), ActionError> {
        self.validate_at(Utc::now(), kind, account, target)
    }

    fn validate_at(
        &self,
        now: DateTime<Utc>,
        kind: ActionKind,
        account: &AccountId,
        target: &ActionTarget<'_>,
    ) -> Result<(), ActionError> {
        match self.config.enabled.get(&kind) {
            Some(true) => {}
            Some(false) => {
                return Err(ActionError::Compliance(format!(
                    "Action '{kind}' is currently disabled."
                )))
            }
            None => {
                return Err(ActionError::Compliance(format!(
                    "Action '{kind}' is not on the allowed list."
                )))
            }
        }

        let mut state = self.state.lock().expect("compliance lock poisoned");
        let today = now.date_naive();

        if kind == ActionKind::GiftSend {
            let used = daily_count(&state, account, today, kind);
            if used >= self.config.gift_sends_per_day {
                return Err(ActionError::Compliance(format!(
                    "Daily gift limit reached ({}). Wait until tomorrow or switch accounts.",
                    self.config.gift_sends_per_day
                )));
            }
        }

        if kind == ActionKind::FriendAdd {
            let used = daily_count(&state, account, today, kind);
            if used >= self.config.friend_adds_per_day {
                return Err(ActionError::Compliance(format!(
                    "Daily friend-add limit reached ({}). Wait until tomorrow.",
                    self.config.friend_adds_per_day
                )));
            }
        }

        let calls = state.hourly.entry(account.clone()).or_default();
        let cutoff = now - Duration::hours(1);
        while calls.front().is_some_and(|t| *t <= cutoff) {
            calls.pop_front();
        }
        if calls.len() >= self.config.calls_per_hour as usize {
            return Err(ActionError::Compliance(format!(
                "Hourly API call ceiling reached ({}). Pause before continuing.",
                self.config.calls_per_hour
            )));
        }

        match target {
            ActionTarget::Gift { item_id, recipient } => {
                if item_id.trim().is_empty() {
                    return Err(ActionError::Compliance("Gift needs a valid item id.".into()));
                }
                if recipient.trim().is_empty() {
                    return Err(ActionError::Compliance(
                        "Gift needs a valid recipient handle.".into(),
                    ));
                }
            }
            ActionTarget::Friend { handle } => {
                if handle.trim().chars().count() < MIN_HANDLE_LEN {
                    return Err(ActionError::Compliance(format!(
                        "Friend handle must be at least {MIN_HANDLE_LEN} characters."
                    )));
                }
            }
            ActionTarget::None => {}
        }

        Ok(())
    }

    /// Count a succeeded action towards the quotas.
    pub fn record(&self, kind: ActionKind, account: &AccountId) {
        self.record_at(Utc::now(), kind, account);
    }

    fn record_at(&self, now: DateTime<Utc>, kind: ActionKind, account: &AccountId) {
        let mut state = self.state.lock().expect("compliance lock poisoned");
        let today = now.date_naive();

        *state
            .daily
            .entry((account.clone(), today, kind))
            .or_insert(0) += 1;
        state.hourly.entry(account.clone()).or_default().push_back(now);

        // Stale date keys are useless after rollover; drop them lazily
        state.daily.retain(|(_, date, _), _| *date >= today - Duration::days(1));

        debug!(kind = %kind, account = %account, "compliance counter incremented");
    }

    /// Actions of `kind` already counted for `account` today.
    pub fn daily_count(&self, kind: ActionKind, account: &AccountId) -> u32 {
        let state = self.state.lock().expect("compliance lock poisoned");
        daily_count(&state, account, Utc::now().date_naive(), kind)
    }

    /// Remaining daily quota, for kinds that have one.
    pub fn remaining_quota(&self, kind: ActionKind, account: &AccountId) -> Option<u32> {
        let ceiling = match kind {
            ActionKind::GiftSend => self.config.gift_sends_per_day,
            ActionKind::FriendAdd => self.config.friend_adds_per_day,
            _ => return None,
        };
        Some(ceiling.saturating_sub(self.daily_count(kind, account)))
    }
}

impl Default for ComplianceGuard {
    fn default() -> Self {
        Self::new(ComplianceConfig::default())
    }
}

fn daily_count(
    state: &CounterState,
    account: &AccountId,
    date: NaiveDate,
    kind: ActionKind,
) -> u32 {
    state
        .daily
        .get(&(account.clone(), date, kind))
        .copied()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ComplianceGuard {
        ComplianceGuard::default()
    }

    fn gift_target() -> ActionTarget<'static> {
        ActionTarget::Gift {
            item_id: "cid_001",
            recipient: "alice",
        }
    }

    #[test]
    fn unknown_and_disabled_kinds_are_rejected() {
        let mut config = ComplianceConfig::default();
        config.enabled.insert(ActionKind::GiftSend, false);
        config.enabled.remove(&ActionKind::FriendList);
        let guard = ComplianceGuard::new(config);
        let account = AccountId::from("acct");

        assert!(guard
            .validate(ActionKind::GiftSend, &account, &gift_target())
            .is_err());
        assert!(guard
            .validate(ActionKind::FriendList, &account, &ActionTarget::None)
            .is_err());
        assert!(guard
            .validate(ActionKind::CatalogGet, &account, &ActionTarget::None)
            .is_ok());
    }

    #[test]
    fn daily_gift_quota_is_enforced_per_account() {
        let guard = guard();
        let account = AccountId::from("acct-a");
        let other = AccountId::from("acct-b");

        for _ in 0..10 {
            guard
                .validate(ActionKind::GiftSend, &account, &gift_target())
                .unwrap();
            guard.record(ActionKind::GiftSend, &account);
        }

        let refusal = guard
            .validate(ActionKind::GiftSend, &account, &gift_target())
            .unwrap_err();
        assert!(refusal.user_message().contains("Daily gift limit"));

        // A different account is unaffected
        assert!(guard
            .validate(ActionKind::GiftSend, &other, &gift_target())
            .is_ok());
        assert_eq!(guard.remaining_quota(ActionKind::GiftSend, &account), Some(0));
        assert_eq!(guard.remaining_quota(ActionKind::GiftSend, &other), Some(10));
    }

    #[test]
    fn quota_resets_on_date_rollover() {
        let guard = guard();
        let account = AccountId::from("acct");
        let today = Utc::now();
        let tomorrow = today + Duration::days(1);

        for _ in 0..10 {
            guard.record_at(today, ActionKind::GiftSend, &account);
        }
        assert!(guard
            .validate_at(today, ActionKind::GiftSend, &account, &gift_target())
            .is_err());

        // Same account, next UTC date: counter starts from zero
        assert!(guard
            .validate_at(tomorrow, ActionKind::GiftSend, &account, &gift_target())
            .is_ok());
    }

    #[test]
    fn hourly_ceiling_counts_all_kinds_together() {
        let config = ComplianceConfig {
            calls_per_hour: 3,
            ..ComplianceConfig::default()
        };
        let guard = ComplianceGuard::new(config);
        let account = AccountId::from("acct");
        let now = Utc::now();

        for _ in 0..3 {
            guard.record_at(now, ActionKind::CatalogGet, &account);
        }
        let refusal = guard
            .validate_at(now, ActionKind::FriendList, &account, &ActionTarget::None)
            .unwrap_err();
        assert!(refusal.user_message().contains("Hourly API call ceiling"));

        // Calls older than an hour fall out of the window
        assert!(guard
            .validate_at(
                now + Duration::minutes(61),
                ActionKind::FriendList,
                &account,
                &ActionTarget::None
            )
            .is_ok());
    }

    #[test]
    fn structural_validation_rejects_malformed_targets() {
        let guard = guard();
        let account = AccountId::from("acct");

        assert!(guard
            .validate(
                ActionKind::GiftSend,
                &account,
                &ActionTarget::Gift {
                    item_id: "  ",
                    recipient: "alice"
                }
            )
            .is_err());
        assert!(guard
            .validate(
                ActionKind::GiftSend,
                &account,
                &ActionTarget::Gift {
                    item_id: "cid_001",
                    recipient: ""
                }
            )
            .is_err());
        assert!(guard
            .validate(
                ActionKind::FriendAdd,
                &account,
                &ActionTarget::Friend { handle: "ab" }
            )
            .is_err());
        assert!(guard
            .validate(
                ActionKind::FriendAdd,
                &account,
                &ActionTarget::Friend { handle: "abc" }
            )
            .is_ok());
    }

    #[test]
    fn failures_are_never_counted() {
        let guard = guard();
        let account = AccountId::from("acct");

        for _ in 0..20 {
            let _ = guard.validate(ActionKind::GiftSend, &account, &gift_target());
        }
        // validate alone never consumes quota
        assert_eq!(guard.daily_count(ActionKind::GiftSend, &account), 0);
        assert_eq!(guard.remaining_quota(ActionKind::GiftSend, &account), Some(10));
    }
}
