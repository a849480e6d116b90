use thiserror::Error;

/// Top-level error type for research operations.
#[derive(Debug, Error)]
pub enum ResearchError {
    // --- Degradable errors (handled in-node, session continues) ---
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // --- Normal stop conditions ---
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Cancelled")]
    Cancelled,

    // --- Errors that fail the session ---
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Store error: {0}")]
    Store(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl ResearchError {
    /// Stable machine-readable code carried on user-visible failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider_error",
            Self::Fetch(_) => "fetch_error",
            Self::Llm(_) => "llm_error",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Timeout(_) => "timeout",
            Self::Parse(_) => "parse_error",
            Self::BudgetExceeded(_) => "budget_exceeded",
            Self::Cancelled => "cancelled",
            Self::PolicyViolation(_) => "policy_violation",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this error must unwind to the orchestrator and fail the
    /// session. Everything else is degraded in-node and encoded in session
    /// counters.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation(_) | Self::Store(_) | Self::Config(_) | Self::Internal(_)
        )
    }
}

/// Result type alias for research operations.
pub type Result<T> = std::result::Result<T, ResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ResearchError::PolicyViolation("remote model in local-only".into()).is_fatal());
        assert!(!ResearchError::Provider("503".into()).is_fatal());
        assert!(!ResearchError::Cancelled.is_fatal());
    }

    #[test]
    fn test_machine_codes_are_stable() {
        assert_eq!(ResearchError::CircuitOpen("tavily".into()).code(), "circuit_open");
        assert_eq!(
            ResearchError::PolicyViolation("x".into()).code(),
            "policy_violation"
        );
    }
}
