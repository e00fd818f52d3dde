// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Linked-account registry backed by redb (pure Rust, ACID).
//!
//! One table: `accounts: slot (u8) → serialized Account (JSON bytes)`.
//! Every mutation commits before returning, so reads after writes are
//! always consistent within the process. Listings redact token material.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{info, warn};

use crate::models::{Account, AccountId, AccountSummary};

/// Primary table: slot number → serialized Account (JSON bytes).
const ACCOUNTS: TableDefinition<u8, &[u8]> = TableDefinition::new("accounts");

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// CRUD over the fixed set of linked-account slots.
pub struct AccountRegistry {
    db: Database,
    max_accounts: u8,
}

impl AccountRegistry {
    /// Open (or create) the registry database at the given path.
    pub fn open(path: &Path, max_accounts: u8) -> RegistryResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create the table so read transactions never fail on first use
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ACCOUNTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db, max_accounts })
    }

    /// Insert or update the account in `slot` (idempotent upsert keyed by
    /// slot). Returns `false` without touching storage when the slot is
    /// outside `[1, max_accounts]`.
    ///
    /// Updates preserve `created_at` and the `active` flag; new rows are
    /// inserted inactive and activated separately via [`switch_active`].
    ///
    /// [`switch_active`]: AccountRegistry::switch_active
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        slot: u8,
        name: &str,
        encrypted_refresh_token: &str,
        account_id: &AccountId,
        display_name: &str,
        token_expiry: DateTime<Utc>,
    ) -> RegistryResult<bool> {
        if slot < 1 || slot > self.max_accounts {
            warn!(slot, max = self.max_accounts, "rejected out-of-range account slot");
            return Ok(false);
        }

        let now = Utc::now();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let existing = match table.get(slot)? {
                Some(value) => Some(serde_json::from_slice::<Account>(value.value())?),
                None => None,
            };

            let account = match existing {
                Some(previous) => {
                    info!(slot, "slot occupied, updating linked account");
                    Account {
                        slot,
                        name: name.to_string(),
                        account_id: account_id.clone(),
                        display_name: display_name.to_string(),
                        encrypted_refresh_token: encrypted_refresh_token.to_string(),
                        token_expiry,
                        active: previous.active,
                        created_at: previous.created_at,
                        updated_at: now,
                    }
                }
                None => Account {
                    slot,
                    name: name.to_string(),
                    account_id: account_id.clone(),
                    display_name: display_name.to_string(),
                    encrypted_refresh_token: encrypted_refresh_token.to_string(),
                    token_expiry,
                    active: false,
                    created_at: now,
                    updated_at: now,
                },
            };

            let json = serde_json::to_vec(&account)?;
            table.insert(slot, json.as_slice())?;
        }
        write_txn.commit()?;

        info!(slot, name, "linked account stored");
        Ok(true)
    }

    /// Fetch the account in `slot`, or the unique active account when
    /// `slot` is `None`.
    pub fn get(&self, slot: Option<u8>) -> RegistryResult<Option<Account>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;

        match slot {
            Some(slot) => match table.get(slot)? {
                Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
                None => Ok(None),
            },
            None => {
                for entry in table.iter()? {
                    let (_, value) = entry?;
                    let account: Account = serde_json::from_slice(value.value())?;
                    if account.active {
                        return Ok(Some(account));
                    }
                }
                Ok(None)
            }
        }
    }

    /// The active account, if any.
    pub fn active(&self) -> RegistryResult<Option<Account>> {
        self.get(None)
    }

    /// All accounts sorted by slot, with token material redacted.
    pub fn list(&self) -> RegistryResult<Vec<AccountSummary>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACCOUNTS)?;

        let mut summaries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let account: Account = serde_json::from_slice(value.value())?;
            summaries.push(AccountSummary::from(&account));
        }
        summaries.sort_by_key(|s| s.slot);
        Ok(summaries)
    }

    /// Atomically deactivate every slot, then activate `slot`. Returns
    /// `false` (without committing a change) when the slot is not linked.
    pub fn switch_active(&self, slot: u8) -> RegistryResult<bool> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let mut accounts = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let account: Account = serde_json::from_slice(value.value())?;
                accounts.push((key.value(), account));
            }

            let found = accounts.iter().any(|(key, _)| *key == slot);
            if found {
                let now = Utc::now();
                for (key, mut account) in accounts {
                    let activate = key == slot;
                    if account.active != activate {
                        account.active = activate;
                        account.updated_at = now;
                        let json = serde_json::to_vec(&account)?;
                        table.insert(key, json.as_slice())?;
                    }
                }
            }
            found
        };

        if found {
            write_txn.commit()?;
            info!(slot, "active account switched");
        } else {
            write_txn.abort()?;
            warn!(slot, "cannot activate unknown slot");
        }
        Ok(found)
    }

    /// Remove the account in `slot`. Returns `false` if it was not linked.
    pub fn remove(&self, slot: u8) -> RegistryResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(ACCOUNTS)?;
            let was_present = table.remove(slot)?.is_some();
            was_present
        };
        write_txn.commit()?;

        if removed {
            info!(slot, "linked account removed");
        }
        Ok(removed)
    }

    /// Replace the stored refresh token (and its expiry) after a rotation.
    pub fn update_tokens(
        &self,
        slot: u8,
        encrypted_refresh_token: &str,
        token_expiry: DateTime<Utc>,
    ) -> RegistryResult<bool> {
        self.modify(slot, |account| {
            account.encrypted_refresh_token = encrypted_refresh_token.to_string();
            account.token_expiry = token_expiry;
        })
    }

    /// Rename a slot. Names must be non-empty and at most 50 characters.
    pub fn update_name(&self, slot: u8, new_name: &str) -> RegistryResult<bool> {
        let trimmed = new_name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > 50 {
            warn!(slot, "rejected invalid account name");
            return Ok(false);
        }
        let trimmed = trimmed.to_string();
        self.modify(slot, move |account| account.name = trimmed.clone())
    }

    /// Read-modify-write of a single slot inside one transaction.
    fn modify<F>(&self, slot: u8, mutate: F) -> RegistryResult<bool>
    where
        F: Fn(&mut Account),
    {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut table = write_txn.open_table(ACCOUNTS)?;

            let existing = match table.get(slot)? {
                Some(value) => Some(serde_json::from_slice::<Account>(value.value())?),
                None => None,
            };

            match existing {
                Some(mut account) => {
                    mutate(&mut account);
                    account.updated_at = Utc::now();
                    let json = serde_json::to_vec(&account)?;
                    table.insert(slot, json.as_slice())?;
                    true
                }
                None => false,
            }
        };

        if found {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(found)
    }
}
