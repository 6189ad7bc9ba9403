//! Error types for the LiveTemplate engine.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error types for LiveTemplate operations
#[derive(Error, Debug)]
pub enum Error {
    /// Syntactic or structural error in template text.
    #[error("template parse error: {0}")]
    TemplateParse(String),

    /// Failure to evaluate a pipeline against the given data.
    #[error("hydration error: {0}")]
    Hydration(String),

    /// Session id unknown to this application's registry.
    #[error("invalid or unknown session")]
    InvalidSession,

    /// Operation attempted on a page already closed.
    #[error("page is closed")]
    PageClosed,

    /// Page creation would exceed the application's page cap.
    #[error("page limit exceeded: {current} pages live, limit {limit}")]
    PageLimit { current: usize, limit: usize },

    /// Page creation would exceed the application's memory cap.
    #[error("memory limit exceeded: {current} bytes in use, {requested} requested, limit {limit}")]
    MemoryLimit {
        current: u64,
        requested: u64,
        limit: u64,
    },

    /// Malformed inbound action message.
    #[error("invalid action message: {0}")]
    InvalidActionMessage(String),

    /// Action name matched neither a named handler nor a model method.
    #[error("unknown action {0:?}")]
    UnknownAction(String),

    /// Action name matched methods on more than one registered model.
    #[error("ambiguous action \"{action}\": matches {}", candidates.join(", "))]
    AmbiguousAction {
        action: String,
        candidates: Vec<String>,
    },

    /// A user action handler returned an error.
    #[error("action handler failed: {0}")]
    ActionHandler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Action message carried a token that does not match the page's.
    #[error("action token does not match the page session")]
    InvalidToken,

    /// Operation canceled before the new baseline was committed.
    #[error("operation canceled")]
    Canceled,

    /// Invalid configuration value or file.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_action_enumerates_candidates() {
        let err = Error::AmbiguousAction {
            action: "increment".to_string(),
            candidates: vec![
                "modela.increment".to_string(),
                "modelb.increment".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("modela.increment, modelb.increment"));
    }

    #[test]
    fn memory_limit_reports_figures() {
        let err = Error::MemoryLimit {
            current: 900,
            requested: 200,
            limit: 1000,
        };
        let msg = err.to_string();
        assert!(msg.contains("900"));
        assert!(msg.contains("200"));
        assert!(msg.contains("1000"));
    }
}
