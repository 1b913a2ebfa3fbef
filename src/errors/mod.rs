use thiserror::Error;

/// Typed error hierarchy for the runtime.
///
/// Mirrors the error kinds the core distinguishes: a manifest that fails to
/// parse is the only fatal error (startup only); everything else arising
/// during request handling is captured and surfaced either to the model
/// (as a tool-role error payload) or to the HTTP client, never left to
/// propagate as a panic.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("manifest has invalid shape: {0}")]
    ManifestInvalid(String),

    #[error("policy denied: {reason}")]
    PolicyDenied { rule: String, reason: String },

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("backend failure: {0}")]
    BackendFailure(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RuntimeError {
    /// Whether this error is transient and the caller might retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendFailure(_))
    }
}

#[cfg(test)]
mod tests;
