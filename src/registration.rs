//! Server registration records.

use serde::{Deserialize, Serialize};

use crate::config::SecurityPolicy;

/// Message-bus topic names associated with a server's call routing.
///
/// Carried for the runtime's benefit, never interpreted here; the bus itself
/// is an external collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusBindings {
    /// Topic for tool-call requests.
    pub tool_topic: String,
    /// Topic for memory-call requests.
    pub memory_topic: String,
    /// Topic for guidance-call requests.
    pub guidance_topic: String,
}

impl BusBindings {
    /// Conventional `{server_id}.{kind}.request` topics.
    #[must_use]
    pub fn for_server(server_id: &str) -> Self {
        Self {
            tool_topic: format!("{server_id}.tool.request"),
            memory_topic: format!("{server_id}.memory.request"),
            guidance_topic: format!("{server_id}.guidance.request"),
        }
    }
}

/// One server's registration with the security layer.
///
/// Lives for the lifetime of the upstream connection; removed on
/// deregistration. Ledger entries referencing the server survive removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRegistration {
    /// Unique server id.
    pub server_id: String,
    /// Bus bindings for this server's call routing.
    #[serde(default)]
    pub bindings: BusBindings,
    /// Inline policy override. `None` falls back to the configured
    /// per-server override, then the deployment default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<SecurityPolicy>,
}

impl ServerRegistration {
    /// Registration with conventional bindings and no inline policy.
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        let server_id = server_id.into();
        let bindings = BusBindings::for_server(&server_id);
        Self {
            server_id,
            bindings,
            policy: None,
        }
    }

    /// Replace the bus bindings.
    #[must_use]
    pub fn with_bindings(mut self, bindings: BusBindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Attach an inline policy override.
    #[must_use]
    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}
