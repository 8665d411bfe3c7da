//! Payload size validation.
//!
//! Enforces the byte ceilings on tool inputs and outputs crossing the trust
//! boundary, and routes tool-description text through the content scanner.
//! Size is measured on the canonical JSON form (keys sorted), so identical
//! payloads always measure identically.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SecurityPolicy;
use crate::scanner::{ContentScanner, Finding};

// ============================================================================
// Reports
// ============================================================================

/// Outcome of a single size check.
#[derive(Debug, Clone, Serialize)]
pub struct SizeReport {
    /// True when the payload is at or under the limit.
    pub within_limit: bool,
    /// Canonical serialized size of the payload.
    pub measured_bytes: usize,
    /// The ceiling that was applied.
    pub limit_bytes: usize,
    /// Human-readable verdict; on failure states measured size vs. limit.
    pub message: String,
}

/// Outcome of a tool-description scan.
#[derive(Debug, Clone, Serialize)]
pub struct DescriptionReport {
    /// True when no indicator matched (or the scan was skipped).
    pub safe: bool,
    /// Everything the scanner matched.
    pub findings: Vec<Finding>,
    /// True when poisoning detection is disabled and the scan did not run.
    pub skipped: bool,
}

impl DescriptionReport {
    /// One human-readable line per finding.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.findings.iter().map(Finding::reason).collect()
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Size and description validator for one server's policy.
#[derive(Debug, Clone)]
pub struct PayloadValidator {
    max_input_bytes: usize,
    max_output_bytes: usize,
    detect_tool_poisoning: bool,
}

impl PayloadValidator {
    /// Create a validator with explicit ceilings.
    #[must_use]
    pub fn new(max_input_bytes: usize, max_output_bytes: usize, detect_tool_poisoning: bool) -> Self {
        Self {
            max_input_bytes,
            max_output_bytes,
            detect_tool_poisoning,
        }
    }

    /// Create a validator from a policy's limits.
    #[must_use]
    pub fn from_policy(policy: &SecurityPolicy) -> Self {
        Self::new(
            policy.max_input_size_bytes,
            policy.max_output_size_bytes,
            policy.detect_tool_poisoning,
        )
    }

    /// Check an input payload against the input ceiling.
    #[must_use]
    pub fn check_input(&self, payload: &Value) -> SizeReport {
        self.check(payload, self.max_input_bytes, "input")
    }

    /// Check an output payload against the output ceiling.
    #[must_use]
    pub fn check_output(&self, payload: &Value) -> SizeReport {
        self.check(payload, self.max_output_bytes, "output")
    }

    /// Strictly-greater-than comparison: a payload exactly at the limit
    /// passes.
    fn check(&self, payload: &Value, limit: usize, direction: &str) -> SizeReport {
        let measured = measure_canonical(payload);
        let within_limit = measured <= limit;
        let message = if within_limit {
            format!("{direction} payload of {measured} bytes within limit of {limit} bytes")
        } else {
            format!("{direction} payload of {measured} bytes exceeds limit of {limit} bytes")
        };
        SizeReport {
            within_limit,
            measured_bytes: measured,
            limit_bytes: limit,
            message,
        }
    }

    /// Scan a tool description through `scanner`.
    ///
    /// When poisoning detection is disabled by policy the scan is skipped,
    /// reported as such, and logged so the bypass stays observable.
    #[must_use]
    pub fn check_description(&self, scanner: &ContentScanner, text: &str) -> DescriptionReport {
        if !self.detect_tool_poisoning {
            debug!("Tool poisoning detection disabled by policy; description scan skipped");
            return DescriptionReport {
                safe: true,
                findings: Vec::new(),
                skipped: true,
            };
        }
        let findings = scanner.detect(text);
        DescriptionReport {
            safe: findings.is_empty(),
            findings,
            skipped: false,
        }
    }
}

/// Canonical serialized size in bytes (serde_json, keys sorted).
fn measure_canonical(payload: &Value) -> usize {
    serde_json::to_vec(payload).unwrap_or_default().len()
}

// ============================================================================
// Tests
// ============================================================================
