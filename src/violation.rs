//! Security violations: typed records, check decisions, and the bounded ledger.
//!
//! Every denied operation produces a [`SecurityViolation`] that is appended to
//! the [`ViolationLedger`]. Violations are data, not errors: callers receive
//! them inside a [`Decision`] and choose how to react. The ledger is
//! size-bounded so a noisy or hostile server cannot grow process memory
//! without bound.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Default number of violations retained by the ledger.
pub const DEFAULT_LEDGER_CAPACITY: usize = 1000;

// ============================================================================
// Violation kinds
// ============================================================================

/// Closed set of enforcement outcomes.
///
/// Serialized in wire form (`BLOCKED_TOOL`, `TOOL_POISONING`, ...) so ledger
/// exports and logs use the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Tool is on the blocklist, or absent from a non-empty allowlist.
    BlockedTool,
    /// Tool metadata carries hidden-instruction indicators.
    ToolPoisoning,
    /// Call-rate or concurrency cap reached.
    RateLimitExceeded,
    /// Input payload exceeds the configured byte ceiling.
    InputTooLarge,
    /// Output payload exceeds the configured byte ceiling.
    OutputTooLarge,
}

impl ViolationKind {
    /// Wire-form name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedTool => "BLOCKED_TOOL",
            Self::ToolPoisoning => "TOOL_POISONING",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InputTooLarge => "INPUT_TOO_LARGE",
            Self::OutputTooLarge => "OUTPUT_TOO_LARGE",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Violation records
// ============================================================================

/// A single denied operation, immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    /// Unique id for audit correlation.
    pub id: Uuid,
    /// What was denied.
    pub kind: ViolationKind,
    /// Server the operation targeted.
    pub server_id: String,
    /// Tool involved, when the check was tool-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Human-readable reason.
    pub message: String,
    /// When the violation was detected.
    pub detected_at: DateTime<Utc>,
    /// Structured detail (matched categories, measured sizes). Matched text
    /// is truncated before it lands here; the ledger never replays payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_detail: Option<serde_json::Value>,
}

impl SecurityViolation {
    /// Create a violation for `server_id` with a fresh id and timestamp.
    #[must_use]
    pub fn new(kind: ViolationKind, server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            server_id: server_id.into(),
            tool_name: None,
            message: message.into(),
            detected_at: Utc::now(),
            raw_detail: None,
        }
    }

    /// Attach the tool name the check was scoped to.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool_name = Some(tool.into());
        self
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.raw_detail = Some(detail);
        self
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Outcome of a single security check.
///
/// A denying decision carries the violation that was recorded, so callers can
/// surface the reason without a second ledger query.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// The recorded violation when `allowed` is false.
    pub violation: Option<SecurityViolation>,
}

impl Decision {
    /// An allowing decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violation: None,
        }
    }

    /// A denying decision carrying its violation.
    #[must_use]
    pub fn deny(violation: SecurityViolation) -> Self {
        Self {
            allowed: false,
            violation: Some(violation),
        }
    }

    /// Convenience predicate mirroring the `allowed` field.
    #[must_use]
    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

// ============================================================================
// Bounded ledger
// ============================================================================

/// Append-only, size-bounded record of violations.
///
/// Append order is the documented contract: `snapshot` and `filtered` return
/// oldest-first, most-recent-last. Past `capacity`, the oldest entries are
/// evicted. Reads snapshot under the lock and return owned data so no lock is
/// held across caller code.
#[derive(Debug)]
pub struct ViolationLedger {
    entries: parking_lot::Mutex<VecDeque<SecurityViolation>>,
    capacity: usize,
}

impl ViolationLedger {
    /// Create a ledger retaining at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append a violation, evicting the oldest entries past capacity.
    ///
    /// Every recorded violation is also logged at `warn` with structured
    /// fields, so enforcement is visible even when nobody polls the ledger.
    pub fn record(&self, violation: SecurityViolation) {
        warn!(
            server = violation.server_id.as_str(),
            tool = violation.tool_name.as_deref().unwrap_or(""),
            kind = violation.kind.as_str(),
            reason = violation.message.as_str(),
            "Security violation recorded"
        );
        let mut entries = self.entries.lock();
        entries.push_back(violation);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// All retained violations in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SecurityViolation> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Retained violations matching the given filters, in append order.
    #[must_use]
    pub fn filtered(&self, server_id: Option<&str>, kind: Option<ViolationKind>) -> Vec<SecurityViolation> {
        self.entries
            .lock()
            .iter()
            .filter(|v| server_id.is_none_or(|s| v.server_id == s))
            .filter(|v| kind.is_none_or(|k| v.kind == k))
            .cloned()
            .collect()
    }

    /// Number of retained violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing has been recorded (or everything was evicted).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Retained violation counts grouped by kind.
    #[must_use]
    pub fn counts_by_kind(&self) -> HashMap<ViolationKind, usize> {
        let mut counts = HashMap::new();
        for v in self.entries.lock().iter() {
            *counts.entry(v.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for ViolationLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
