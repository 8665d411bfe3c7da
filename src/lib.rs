//! MCP Warden Library
//!
//! Security policy enforcement between an agent runtime and externally
//! supplied Model Context Protocol (MCP) tool/resource servers.
//!
//! # Features
//!
//! - **Tool poisoning detection**: pattern-based scanning of tool metadata
//!   for hidden-instruction indicators (hidden tags, comment blocks,
//!   injection phrases, invisible code points, custom patterns)
//! - **Tool access control**: per-server blocklists and deny-by-omission
//!   allowlists
//! - **Rate limiting**: per-server sliding-window call rate plus concurrency
//!   slots with non-blocking two-phase admission
//! - **Payload ceilings**: canonical-JSON byte limits on tool inputs and
//!   outputs
//! - **Violation ledger**: bounded, append-ordered audit record with derived
//!   metrics
//!
//! The [`manager::SecurityManager`] is the single entry point. Callers
//! register each server once, then wrap every tool invocation with
//! `check_tool_access` → `check_rate_limit` → `validate_input` → call →
//! `validate_output` → `release_rate_limit`, and observe violations via
//! `get_violations` / `get_security_metrics`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
pub mod payload;
pub mod ratelimit;
pub mod registration;
pub mod scanner;
pub mod violation;

pub use config::{SecurityPolicy, WardenConfig};
pub use error::{Error, Result};
pub use manager::{CallSlot, SecurityManager, SecurityMetrics};
pub use registration::{BusBindings, ServerRegistration};
pub use violation::{Decision, SecurityViolation, ViolationKind};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
