//! Core assembly error types (pure - no I/O variants).

use thiserror::Error;

/// Errors raised while assembling a response.
///
/// Every variant is a configuration or input problem detected before any
/// output is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Cannot use prerendering if config.kit.csp.mode === \"nonce\"")]
    NonceWithPrerender,

    #[error("Cannot use prerendering if page template contains %sveltekit.nonce%")]
    NoncePlaceholderWithPrerender,

    #[error("Missing +page component for route {route_id}")]
    MissingComponent { route_id: String },

    #[error("Cannot serialize value at {path}: {reason}")]
    Unserializable { path: String, reason: String },

    #[error(
        "`content-security-policy-report-only` must be specified with either the `report-to` or `report-uri` directives, or both"
    )]
    ReportOnlyWithoutReporting,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Unknown or already resolved deferred id {0}")]
    UnknownDeferred(u32),
}

impl CoreError {
    pub(crate) fn unserializable(keys: &[String], reason: impl Into<String>) -> Self {
        let path = if keys.is_empty() {
            "<root>".to_string()
        } else {
            keys.concat()
        };
        Self::Unserializable {
            path,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
