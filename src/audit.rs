// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Audit logging for automated upstream actions.
//!
//! Bounded, append-only, in-memory: the most recent 1,000 records are kept
//! for after-the-fact review (owner commands, dashboard). The audit log is
//! never consulted to gate behavior; quotas live in
//! [`crate::limits::ComplianceGuard`].

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::ActionKind;

/// Maximum number of records retained; the oldest are evicted first.
const MAX_RECORDS: usize = 1_000;

/// One attempted action, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Unique record id.
    pub id: String,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// What was attempted.
    pub kind: ActionKind,
    /// Discord user that triggered the action.
    pub actor_id: u64,
    /// Structured context (handles, item ids, counts). Never token material.
    pub details: serde_json::Value,
    /// Whether the upstream call succeeded.
    pub success: bool,
    /// Failure cause, when `success` is false.
    pub error: Option<String>,
}

impl ActionRecord {
    /// Create a successful record with empty details.
    pub fn new(kind: ActionKind, actor_id: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            actor_id,
            details: serde_json::Value::Null,
            success: true,
            error: None,
        }
    }

    /// Attach structured context.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Mark as failed with the cause.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Bounded in-memory record of attempted actions.
#[derive(Default)]
pub struct ActionAuditLog {
    records: Mutex<VecDeque<ActionRecord>>,
}

impl ActionAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest past the cap.
    pub fn log(&self, record: ActionRecord) {
        if record.success {
            info!(kind = %record.kind, actor = record.actor_id, "action recorded");
        } else {
            warn!(
                kind = %record.kind,
                actor = record.actor_id,
                error = record.error.as_deref().unwrap_or(""),
                "failed action recorded"
            );
        }

        let mut records = self.records.lock().expect("audit log lock poisoned");
        records.push_back(record);
        while records.len() > MAX_RECORDS {
            records.pop_front();
        }
    }

    /// Records from the trailing `minutes` window, newest last, optionally
    /// filtered by kind.
    pub fn recent(&self, kind: Option<ActionKind>, minutes: i64) -> Vec<ActionRecord> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        let records = self.records.lock().expect("audit log lock poisoned");
        records
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect()
    }

    /// Number of records of `kind` in the trailing window.
    pub fn count(&self, kind: ActionKind, minutes: i64) -> usize {
        self.recent(Some(kind), minutes).len()
    }
}
