// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 ONZA Bot Contributors

//! Tracing setup for the embedding process.
//!
//! The core only emits `tracing` events; the host process decides where
//! they go. `init()` installs a sensible default subscriber honoring
//! `RUST_LOG` (filter, default `info`) and `LOG_FORMAT` (`json` for
//! machine ingestion, anything else for human-readable output).

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Call once at startup; calling
/// again is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
