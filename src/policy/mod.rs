//! Policy engine — a pure function from (manifest, request) to an
//! allow/deny decision carrying the rule that fired and a human-readable
//! reason. Stateless after a single `load`; every check is computed fresh
//! against the loaded manifest, immutable for the lifetime of the process.

use globset::Glob;

use crate::manifest::{Manifest, NetworkOutbound, PolicyMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub verdict: PolicyVerdict,
    pub rule: String,
    pub reason: String,
}

impl PolicyDecision {
    fn allow(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: PolicyVerdict::Allow,
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    fn deny(rule: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: PolicyVerdict::Deny,
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == PolicyVerdict::Allow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    Read,
    Write,
    VectorRead,
    VectorWrite,
}

/// Glob engine: shell-style patterns (`*`, `?`, `[...]`) matched against
/// the whole string, no implicit prefix matching.
fn glob_matches_any(value: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(value))
            .unwrap_or(false)
    })
}

/// `DomeKitPolicyEngine`-equivalent: the concrete engine driven by a
/// parsed manifest.
#[derive(Default)]
pub struct PolicyEngine {
    manifest: Option<Manifest>,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self { manifest: None }
    }

    pub fn load_manifest(&mut self, manifest: Manifest) {
        self.manifest = Some(manifest);
    }

    fn mode(&self) -> PolicyMode {
        self.manifest
            .as_ref()
            .map(|m| m.runtime.policy_mode)
            .unwrap_or(PolicyMode::LocalOnly)
    }

    pub fn check_tool(&self, tool_name: &str) -> PolicyDecision {
        let Some(manifest) = &self.manifest else {
            return PolicyDecision::deny("no_manifest", "No manifest loaded");
        };

        if self.mode() == PolicyMode::Developer {
            return PolicyDecision::allow("developer_mode", "Developer mode allows all tools");
        }

        if manifest
            .policy
            .tools
            .allow
            .iter()
            .any(|t| t == tool_name)
        {
            return PolicyDecision::allow(
                "tools.allow",
                format!("Tool '{tool_name}' is in the allow list"),
            );
        }

        PolicyDecision::deny(
            "tools.allow",
            format!("Tool '{tool_name}' is not in the allow list"),
        )
    }

    pub fn check_data(&self, path: &str, access: DataAccess) -> PolicyDecision {
        let Some(manifest) = &self.manifest else {
            return PolicyDecision::deny("no_manifest", "No manifest loaded");
        };

        if self.mode() == PolicyMode::Developer {
            return PolicyDecision::allow(
                "developer_mode",
                "Developer mode allows all data access",
            );
        }

        let data = &manifest.policy.data;
        match access {
            DataAccess::Read => {
                if data.sqlite.allow.iter().any(|a| a == path) {
                    return PolicyDecision::allow(
                        "data.sqlite.allow",
                        format!("SQLite path '{path}' is allowed"),
                    );
                }
                if let Some(pattern) = data
                    .filesystem
                    .allow_read
                    .iter()
                    .find(|p| glob_matches_any(path, std::slice::from_ref(p)))
                {
                    return PolicyDecision::allow(
                        "data.filesystem.allow_read",
                        format!("Path '{path}' matches read pattern '{pattern}'"),
                    );
                }
                PolicyDecision::deny(
                    "data.read",
                    format!("Path '{path}' is not in any read allow list"),
                )
            }
            DataAccess::Write => {
                if let Some(pattern) = data
                    .filesystem
                    .allow_write
                    .iter()
                    .find(|p| glob_matches_any(path, std::slice::from_ref(p)))
                {
                    return PolicyDecision::allow(
                        "data.filesystem.allow_write",
                        format!("Path '{path}' matches write pattern '{pattern}'"),
                    );
                }
                PolicyDecision::deny(
                    "data.write",
                    format!("Path '{path}' is not in the write allow list"),
                )
            }
            DataAccess::VectorRead => {
                if let Some(pattern) = data
                    .vector
                    .allow
                    .iter()
                    .find(|p| glob_matches_any(path, std::slice::from_ref(p)))
                {
                    return PolicyDecision::allow(
                        "data.vector.allow",
                        format!("Collection '{path}' matches vector read pattern '{pattern}'"),
                    );
                }
                PolicyDecision::deny(
                    "data.vector_read",
                    format!("Collection '{path}' is not in the vector allow list"),
                )
            }
            DataAccess::VectorWrite => {
                if let Some(pattern) = data
                    .vector
                    .allow_write
                    .iter()
                    .find(|p| glob_matches_any(path, std::slice::from_ref(p)))
                {
                    return PolicyDecision::allow(
                        "data.vector.allow_write",
                        format!("Collection '{path}' matches vector write pattern '{pattern}'"),
                    );
                }
                PolicyDecision::deny(
                    "data.vector_write",
                    format!("Collection '{path}' is not in the vector write allow list"),
                )
            }
        }
    }

    pub fn check_network(&self, host: &str) -> PolicyDecision {
        let Some(manifest) = &self.manifest else {
            return PolicyDecision::deny("no_manifest", "No manifest loaded");
        };

        if self.mode() == PolicyMode::Developer {
            return PolicyDecision::allow(
                "developer_mode",
                "Developer mode allows all network access",
            );
        }

        let network = &manifest.policy.network;
        if network.outbound == NetworkOutbound::Allow {
            return PolicyDecision::allow(
                "network.outbound",
                "Outbound network is globally allowed",
            );
        }

        if network.allow_domains.iter().any(|d| d == host) {
            return PolicyDecision::allow(
                "network.allow_domains",
                format!("Host '{host}' is in allow_domains"),
            );
        }

        PolicyDecision::deny(
            "network.outbound",
            format!("Outbound denied; host '{host}' is not in allow_domains"),
        )
    }
}
