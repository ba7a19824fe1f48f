//! Crate-wide error taxonomy.
//!
//! Errors split into three tiers: fatal at startup (`InvalidConfiguration`),
//! fatal for one index (`IndexCorrupt`), and recoverable per turn (the
//! provider-unavailability variants). Callers decide policy; nothing in the
//! library panics on an external fault.

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected configuration, e.g. `chunk_overlap >= chunk_size`. Fatal at
    /// load time; nothing is constructed from a bad config.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The on-disk index cannot be trusted: unknown format version,
    /// dimension mismatch, truncated or unreadable files. Fatal for that
    /// index; the caller must rebuild from source documents.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// The embedding backend cannot produce vectors right now (missing
    /// credentials, network failure, model not loadable).
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The web search provider failed or timed out. The orchestrator
    /// degrades to knowledge-base-only context when this occurs mid-turn.
    #[error("web search unavailable: {0}")]
    SearchUnavailable(String),

    /// The selected LLM backend is unknown, unreachable, or rejected the
    /// request for a non-quota reason.
    #[error("provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The selected LLM backend reported rate or quota exhaustion.
    #[error("provider '{provider}' quota exceeded: {reason}")]
    ProviderQuotaExceeded { provider: String, reason: String },

    /// Caller bug surfaced deliberately instead of being papered over,
    /// e.g. `top_k == 0`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem fault while persisting or loading index state.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for faults that end one turn but leave the session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_)
                | Error::SearchUnavailable(_)
                | Error::ProviderUnavailable { .. }
                | Error::ProviderQuotaExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_covers_provider_faults_only() {
        assert!(Error::EmbeddingUnavailable("offline".into()).is_recoverable());
        assert!(Error::SearchUnavailable("timeout".into()).is_recoverable());
        assert!(Error::ProviderUnavailable {
            provider: "groq".into(),
            reason: "connection refused".into()
        }
        .is_recoverable());
        assert!(!Error::InvalidConfiguration("overlap".into()).is_recoverable());
        assert!(!Error::IndexCorrupt("bad version".into()).is_recoverable());
        assert!(!Error::InvalidArgument("top_k == 0".into()).is_recoverable());
    }

    #[test]
    fn display_names_the_provider() {
        let err = Error::ProviderQuotaExceeded {
            provider: "openai".into(),
            reason: "429".into(),
        };
        assert!(err.to_string().contains("openai"));
        assert!(err.to_string().contains("quota"));
    }
}
