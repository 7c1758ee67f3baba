//! Error types for the tick kernel.
//!
//! Gate and committer outcomes are values, not errors. Only configuration
//! loading and candidate producers (LLM calls, tool calls) can fail.

/// Failure reported by an external candidate producer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    /// The backend (LLM server, tool) was unreachable or returned an error.
    #[error("producer backend error: {0}")]
    Backend(String),

    /// The producer did not answer before its deadline.
    #[error("producer timed out after {0}ms")]
    Timeout(u64),

    /// The producer answered with something it could not turn into a candidate.
    #[error("producer returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}
