// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Sliding-window rate limiting with human-like pacing.
//!
//! [`RateLimiter::acquire`] admits at most `per_minute` attempts of a kind
//! inside any trailing 60-second window, enforces a minimum delay since the
//! previous attempt of the same kind (plus a little jitter), and keeps a
//! global cooldown between any two actions. Admission and attempt recording
//! happen inside one critical section, so two interleaved callers can never
//! both pass before either has recorded its attempt; the lock is never held
//! across a sleep.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::ActionKind;

/// Trailing window for per-minute ceilings.
const WINDOW: Duration = Duration::from_secs(60);

/// Upper bound of the random jitter added to natural waits.
const JITTER_MAX: Duration = Duration::from_millis(500);

/// Margin added when sleeping until the oldest window entry expires.
const WINDOW_SLACK: Duration = Duration::from_millis(100);

/// Human-variance multipliers for post-action delays.
const VARIANCE: [f64; 4] = [0.8, 1.0, 1.2, 1.5];

/// Pacing policy for one action kind.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    /// Ceiling of attempts per trailing 60 s.
    pub per_minute: u32,
    /// Minimum delay since the previous attempt of this kind.
    pub min_delay: Duration,
    /// Upper bound of the randomized post-action delay.
    pub max_delay: Duration,
}

impl RatePolicy {
    const fn new(per_minute: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            per_minute,
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub policies: HashMap<ActionKind, RatePolicy>,
    /// Minimum spacing between any two actions regardless of kind.
    pub global_cooldown: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(ActionKind::FriendAdd, RatePolicy::new(5, 2_000, 5_000));
        policies.insert(ActionKind::FriendList, RatePolicy::new(10, 1_000, 3_000));
        policies.insert(ActionKind::GiftSend, RatePolicy::new(3, 5_000, 10_000));
        policies.insert(ActionKind::CatalogGet, RatePolicy::new(20, 1_000, 2_000));
        policies.insert(ActionKind::ItemInfo, RatePolicy::new(30, 500, 1_500));
        policies.insert(ActionKind::TokenRefresh, RatePolicy::new(10, 2_000, 4_000));
        policies.insert(ActionKind::AccountSwitch, RatePolicy::new(5, 1_000, 2_000));

        Self {
            policies,
            global_cooldown: Duration::from_millis(500),
        }
    }
}

/// Current window usage for one action kind.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateUsage {
    pub kind: ActionKind,
    pub used: u32,
    pub limit: u32,
}

#[derive(Default)]
struct RateState {
    history: HashMap<ActionKind, VecDeque<Instant>>,
    last_of_kind: HashMap<ActionKind, Instant>,
    last_any: Option<Instant>,
}

impl RateState {
    fn prune(&mut self, kind: ActionKind, now: Instant) {
        if let Some(history) = self.history.get_mut(&kind) {
            while history.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                history.pop_front();
            }
        }
    }
}

/// Shared admission gate for all upstream calls.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<RateState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Block (asynchronously) until an attempt of `kind` is admissible,
    /// then record it. Returns once the caller may issue the upstream call.
    pub async fn acquire(&self, kind: ActionKind) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match self.required_wait(&mut state, kind, now) {
                    None => {
                        state.history.entry(kind).or_default().push_back(now);
                        state.last_of_kind.insert(kind, now);
                        state.last_any = Some(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };

            debug!(kind = %kind, wait_ms = wait.as_millis() as u64, "deferring action");
            tokio::time::sleep(wait).await;
        }
    }

    /// Sleep a randomized post-action interval so bursts of successful
    /// calls still look paced. Deliberate throttle, not an error path.
    pub async fn apply_natural_delay(&self, kind: ActionKind) {
        let Some(policy) = self.config.policies.get(&kind) else {
            return;
        };

        let (base, variance) = {
            let mut rng = rand::thread_rng();
            let base = rng.gen_range(policy.min_delay.as_secs_f64()..=policy.max_delay.as_secs_f64());
            let variance = VARIANCE[rng.gen_range(0..VARIANCE.len())];
            (base, variance)
        };

        let delay = Duration::from_secs_f64(base * variance);
        debug!(kind = %kind, delay_ms = delay.as_millis() as u64, "natural post-action delay");
        tokio::time::sleep(delay).await;
    }

    /// Window usage snapshot for every kind with recorded attempts.
    pub async fn stats(&self) -> Vec<RateUsage> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let kinds: Vec<ActionKind> = state.history.keys().copied().collect();
        let mut usage = Vec::with_capacity(kinds.len());
        for kind in kinds {
            state.prune(kind, now);
            let used = state.history.get(&kind).map_or(0, |h| h.len()) as u32;
            let limit = self.config.policies.get(&kind).map_or(0, |p| p.per_minute);
            usage.push(RateUsage { kind, used, limit });
        }
        usage.sort_by_key(|u| u.kind.as_str());
        usage
    }

    /// Wait required before an attempt of `kind` at `now`, or `None` when
    /// it is admissible immediately.
    fn required_wait(&self, state: &mut RateState, kind: ActionKind, now: Instant) -> Option<Duration> {
        let mut wait = Duration::ZERO;

        // 1. Minimum natural delay since the last attempt of this kind
        if let (Some(policy), Some(last)) =
            (self.config.policies.get(&kind), state.last_of_kind.get(&kind))
        {
            let elapsed = now.duration_since(*last);
            if elapsed < policy.min_delay {
                let jitter = Duration::from_secs_f64(
                    rand::thread_rng().gen_range(0.0..JITTER_MAX.as_secs_f64()),
                );
                wait = wait.max(policy.min_delay - elapsed + jitter);
            }
        }

        // 2. Sliding-window ceiling: wait until the oldest entry leaves
        if let Some(policy) = self.config.policies.get(&kind) {
            state.prune(kind, now);
            let history = state.history.entry(kind).or_default();
            if history.len() >= policy.per_minute as usize {
                if let Some(oldest) = history.front() {
                    let until_free = WINDOW.saturating_sub(now.duration_since(*oldest));
                    wait = wait.max(until_free + WINDOW_SLACK);
                }
            }
        }

        // 3. Global cooldown between any two actions
        if let Some(last_any) = state.last_any {
            let elapsed = now.duration_since(last_any);
            if elapsed < self.config.global_cooldown {
                wait = wait.max(self.config.global_cooldown - elapsed);
            }
        }

        (wait > Duration::ZERO).then_some(wait)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
