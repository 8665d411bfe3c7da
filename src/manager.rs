//! Security manager: the enforcement entry point.
//!
//! Composes the content scanner, payload validator, and rate limiter per
//! registered server, and owns the violation ledger. Callers wrap every tool
//! invocation as:
//!
//! ```text
//! check_tool_access → check_rate_limit → validate_input
//!     → (perform call) → validate_output → release_rate_limit
//! ```
//!
//! Policy violations are data: each check returns a [`Decision`], and denials
//! land in the ledger. Errors are reserved for misuse (operating on an
//! unregistered server) and invalid configuration.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{SecurityPolicy, WardenConfig};
use crate::payload::{PayloadValidator, SizeReport};
use crate::ratelimit::{Admission, RateLimiter};
use crate::registration::ServerRegistration;
use crate::scanner::ContentScanner;
use crate::violation::{Decision, SecurityViolation, ViolationKind, ViolationLedger};
use crate::{Error, Result};

// ============================================================================
// Manager
// ============================================================================

/// Compiled enforcement state for one registered server.
#[derive(Debug)]
struct ServerEntry {
    registration: ServerRegistration,
    policy: SecurityPolicy,
    scanner: ContentScanner,
    validator: PayloadValidator,
}

/// Policy enforcement layer over a set of registered servers.
///
/// All methods take `&self`; the manager is shared freely across threads.
#[derive(Debug)]
pub struct SecurityManager {
    config: WardenConfig,
    servers: DashMap<String, Arc<ServerEntry>>,
    limiter: RateLimiter,
    ledger: ViolationLedger,
}

impl SecurityManager {
    /// Manager with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: WardenConfig::default(),
            servers: DashMap::new(),
            limiter: RateLimiter::new(),
            ledger: ViolationLedger::default(),
        }
    }

    /// Manager with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration fails validation.
    pub fn with_config(config: WardenConfig) -> Result<Self> {
        config.validate()?;
        let ledger = ViolationLedger::new(config.ledger.capacity);
        Ok(Self {
            config,
            servers: DashMap::new(),
            limiter: RateLimiter::new(),
            ledger,
        })
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Register a server, compiling its effective policy.
    ///
    /// The effective policy is the registration's inline override when
    /// present, else the configured per-server override, else the deployment
    /// default. Idempotent upsert: re-registering replaces policy and
    /// bindings while the server's rate-limiter window (in-flight count,
    /// recent calls) survives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::InvalidPattern`] when the
    /// effective policy is invalid; nothing is registered in that case.
    pub fn register_server(&self, registration: ServerRegistration) -> Result<()> {
        let policy = match &registration.policy {
            Some(p) => p.clone(),
            None => self.config.effective_policy(&registration.server_id).clone(),
        };
        policy.validate()?;
        let scanner = ContentScanner::new(&policy.custom_detection_patterns)?;
        let validator = PayloadValidator::from_policy(&policy);

        let server_id = registration.server_id.clone();
        self.limiter
            .register(&server_id, policy.max_calls_per_minute, policy.max_concurrent_calls);
        let entry = ServerEntry {
            registration,
            policy,
            scanner,
            validator,
        };
        let replaced = self.servers.insert(server_id.clone(), Arc::new(entry));
        if replaced.is_some() {
            info!(server = server_id.as_str(), "Server re-registered; policy updated");
        } else {
            info!(server = server_id.as_str(), "Server registered");
        }
        Ok(())
    }

    /// Remove a server's registration and rate-limiter window.
    ///
    /// Idempotent. Ledger entries for the server survive.
    pub fn deregister_server(&self, server_id: &str) {
        let removed = self.servers.remove(server_id).is_some();
        self.limiter.deregister(server_id);
        if removed {
            info!(server = server_id, "Server deregistered");
        } else {
            debug!(server = server_id, "Deregistration of unknown server ignored");
        }
    }

    /// True when `server_id` is currently registered.
    #[must_use]
    pub fn is_registered(&self, server_id: &str) -> bool {
        self.servers.contains_key(server_id)
    }

    /// The registration for `server_id`, when present.
    #[must_use]
    pub fn registration(&self, server_id: &str) -> Option<ServerRegistration> {
        self.servers.get(server_id).map(|e| e.registration.clone())
    }

    /// Ids of all registered servers (snapshot).
    #[must_use]
    pub fn registered_servers(&self) -> Vec<String> {
        self.servers.iter().map(|e| e.key().clone()).collect()
    }

    // ── Tool access ───────────────────────────────────────────────────────────

    /// Decide whether `tool_name` on `server_id` may be surfaced to the
    /// agent.
    ///
    /// Ordered, short-circuiting checks: blocklist, then allowlist
    /// (deny-by-omission when non-empty), then the poisoning scan of the
    /// description. The first failing check records its violation; later
    /// checks do not run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn check_tool_access(
        &self,
        server_id: &str,
        tool_name: &str,
        tool_description: &str,
    ) -> Result<Decision> {
        let entry = self.entry(server_id)?;

        if entry.policy.is_blocked(tool_name) {
            let violation = SecurityViolation::new(
                ViolationKind::BlockedTool,
                server_id,
                format!("tool '{tool_name}' is on the blocklist"),
            )
            .with_tool(tool_name);
            return Ok(self.deny(violation));
        }

        if !entry.policy.allowlist_permits(tool_name) {
            let violation = SecurityViolation::new(
                ViolationKind::BlockedTool,
                server_id,
                format!("tool '{tool_name}' is not on the allowlist"),
            )
            .with_tool(tool_name);
            return Ok(self.deny(violation));
        }

        let report = entry.validator.check_description(&entry.scanner, tool_description);
        if !report.safe {
            let mut categories: Vec<&str> = Vec::new();
            for finding in &report.findings {
                if !categories.contains(&finding.category.as_str()) {
                    categories.push(finding.category.as_str());
                }
            }
            let violation = SecurityViolation::new(
                ViolationKind::ToolPoisoning,
                server_id,
                format!(
                    "tool description carries hidden-instruction indicators: {}",
                    categories.join(", ")
                ),
            )
            .with_tool(tool_name)
            .with_detail(json!({
                "categories": categories,
                "findings": report.findings,
            }));
            return Ok(self.deny(violation));
        }

        Ok(Decision::allow())
    }

    // ── Rate limiting ─────────────────────────────────────────────────────────

    /// Probe the server's rate limiter for admission.
    ///
    /// An allowing decision holds a concurrency slot that the caller must
    /// return via [`SecurityManager::release_rate_limit`] on every exit path.
    /// Prefer [`SecurityManager::try_acquire_slot`] for scope-bound release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn check_rate_limit(&self, server_id: &str) -> Result<Decision> {
        match self.limiter.acquire(server_id) {
            None => Err(Error::UnregisteredServer(server_id.to_string())),
            Some(Admission::Admitted) => Ok(Decision::allow()),
            Some(denied) => {
                let violation = SecurityViolation::new(
                    ViolationKind::RateLimitExceeded,
                    server_id,
                    denied.to_string(),
                );
                Ok(self.deny(violation))
            }
        }
    }

    /// Return the concurrency slot taken by an admitted
    /// [`SecurityManager::check_rate_limit`].
    ///
    /// Floored at zero; calling it more often than slots were taken is
    /// harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn release_rate_limit(&self, server_id: &str) -> Result<()> {
        if self.limiter.release(server_id) {
            Ok(())
        } else {
            Err(Error::UnregisteredServer(server_id.to_string()))
        }
    }

    /// Scoped variant of the rate-limit probe: `Some(slot)` on admission,
    /// `None` on denial (recorded as a violation). Dropping the slot returns
    /// it, on every exit path including panics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn try_acquire_slot(&self, server_id: &str) -> Result<Option<CallSlot<'_>>> {
        let decision = self.check_rate_limit(server_id)?;
        if decision.allowed {
            Ok(Some(CallSlot {
                manager: self,
                server_id: server_id.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    // ── Payload validation ────────────────────────────────────────────────────

    /// Check an input payload against the server's input ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn validate_input(&self, server_id: &str, tool_name: &str, payload: &Value) -> Result<Decision> {
        let entry = self.entry(server_id)?;
        let report = entry.validator.check_input(payload);
        if report.within_limit {
            Ok(Decision::allow())
        } else {
            Ok(self.deny_size(ViolationKind::InputTooLarge, server_id, tool_name, &report))
        }
    }

    /// Check an output payload against the server's output ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredServer`] when `server_id` was never
    /// registered.
    pub fn validate_output(&self, server_id: &str, tool_name: &str, payload: &Value) -> Result<Decision> {
        let entry = self.entry(server_id)?;
        let report = entry.validator.check_output(payload);
        if report.within_limit {
            Ok(Decision::allow())
        } else {
            Ok(self.deny_size(ViolationKind::OutputTooLarge, server_id, tool_name, &report))
        }
    }

    // ── Audit ─────────────────────────────────────────────────────────────────

    /// Retained violations in append order, optionally filtered.
    ///
    /// An unknown `server_id` filter yields an empty result rather than an
    /// error: ledger entries may outlive their server's registration.
    #[must_use]
    pub fn get_violations(
        &self,
        server_id: Option<&str>,
        kind: Option<ViolationKind>,
    ) -> Vec<SecurityViolation> {
        self.ledger.filtered(server_id, kind)
    }

    /// Point-in-time enforcement summary, derived on demand.
    #[must_use]
    pub fn get_security_metrics(&self) -> SecurityMetrics {
        SecurityMetrics {
            total_violations: self.ledger.len(),
            servers_monitored: self.servers.len(),
            violations_by_type: self.ledger.counts_by_kind(),
        }
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    fn entry(&self, server_id: &str) -> Result<Arc<ServerEntry>> {
        self.servers
            .get(server_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::UnregisteredServer(server_id.to_string()))
    }

    /// Record a violation and wrap it in a denying decision.
    fn deny(&self, violation: SecurityViolation) -> Decision {
        self.ledger.record(violation.clone());
        Decision::deny(violation)
    }

    fn deny_size(
        &self,
        kind: ViolationKind,
        server_id: &str,
        tool_name: &str,
        report: &SizeReport,
    ) -> Decision {
        let violation = SecurityViolation::new(kind, server_id, report.message.clone())
            .with_tool(tool_name)
            .with_detail(json!({
                "measured_bytes": report.measured_bytes,
                "limit_bytes": report.limit_bytes,
            }));
        self.deny(violation)
    }
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Call slots
// ============================================================================

/// RAII permit for one admitted call.
///
/// Dropping the slot returns it to the server's rate limiter, so release
/// happens on every exit path of the surrounding call. A leaked slot would
/// otherwise shrink the server's effective concurrency cap until restart.
#[derive(Debug)]
pub struct CallSlot<'a> {
    manager: &'a SecurityManager,
    server_id: String,
}

impl CallSlot<'_> {
    /// Server this slot was admitted for.
    #[must_use]
    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl Drop for CallSlot<'_> {
    fn drop(&mut self) {
        // Deregistration may have raced the call; nothing to return then.
        self.manager.limiter.release(&self.server_id);
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Point-in-time enforcement summary.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityMetrics {
    /// Violations currently retained by the ledger.
    pub total_violations: usize,
    /// Servers currently registered.
    pub servers_monitored: usize,
    /// Retained violations grouped by kind.
    pub violations_by_type: HashMap<ViolationKind, usize>,
}

// ============================================================================
// Tests
// ============================================================================
