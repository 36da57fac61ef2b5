//! Shared error type used across all CIRIS crates.
//!
//! The variants mirror the runtime's error taxonomy: gate rejections,
//! bus-boundary failures, pipeline outcomes, and invariant violations.
//! Recoverable pipeline errors are reified as values and flow into
//! FINALIZE_ACTION; only `Fatal` aborts processing.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQL: {0}")]
    Sql(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("signature: {0}")]
    Signature(String),

    /// Capability is in the denylist. Fatal at the call site; never retried.
    #[error("prohibited capability: {0}")]
    Prohibited(String),

    /// Gate rejection: the subject has no credit. No task is created.
    #[error("credit denied: {0}")]
    CreditDenied(String),

    /// Gate rejection: the subject's consent stream blocks the interaction.
    #[error("consent blocked: {0}")]
    ConsentBlocked(String),

    /// A bus call or DMA did not complete within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// No eligible provider for the capability (all circuits open).
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// Write attempted against a system-managed attribute.
    #[error("managed attribute: {0}")]
    ManagedAttribute(String),

    /// Schema rejection at a bus boundary. No side effect occurred.
    #[error("validation: {0}")]
    Validation(String),

    /// Handler-reported failure with a taxonomy code.
    #[error("handler {code}: {message}")]
    Handler { code: String, message: String },

    /// The task hit its seven-round cap.
    #[error("round budget exhausted")]
    BudgetExhausted,

    /// Invariant violation. Triggers orderly shutdown.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Wrap a database-layer error message.
    pub fn sql(e: impl std::fmt::Display) -> Self {
        Error::Sql(e.to_string())
    }

    /// Build a handler failure with a taxonomy code.
    pub fn handler(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Handler {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True for errors the pipeline absorbs into a DEFER rather than
    /// propagating (timeouts, open circuits, exhausted budgets).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::CircuitOpen(_)
                | Error::BudgetExhausted
                | Error::Handler { .. }
        )
    }

    /// Short machine-readable code for audit entries and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Sql(_) => "sql",
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::Signature(_) => "signature",
            Error::Prohibited(_) => "prohibited",
            Error::CreditDenied(_) => "credit_denied",
            Error::ConsentBlocked(_) => "consent_blocked",
            Error::Timeout(_) => "timeout",
            Error::CircuitOpen(_) => "circuit_open",
            Error::ManagedAttribute(_) => "managed_attribute",
            Error::Validation(_) => "validation",
            Error::Handler { .. } => "handler_failure",
            Error::BudgetExhausted => "budget_exhausted",
            Error::Fatal(_) => "fatal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(Error::Timeout("dma".into()).is_recoverable());
        assert!(Error::CircuitOpen("llm".into()).is_recoverable());
        assert!(Error::BudgetExhausted.is_recoverable());
        assert!(Error::handler("tool_crash", "boom").is_recoverable());

        assert!(!Error::Prohibited("medical_advice".into()).is_recoverable());
        assert!(!Error::Fatal("chain broken".into()).is_recoverable());
        assert!(!Error::Validation("bad node".into()).is_recoverable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::CreditDenied("u1".into()).code(), "credit_denied");
        assert_eq!(Error::BudgetExhausted.code(), "budget_exhausted");
        assert_eq!(Error::handler("x", "y").code(), "handler_failure");
    }
}
