//! Error types.
//!
//! Only [`ScanError`] ever aborts a scan. [`ServiceCallError`] and
//! [`ScopeInitError`] are recovered inside the scanner and end up as
//! failure entries on the aggregate.

use std::path::PathBuf;

use crate::scan::ProviderKind;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scope discovery failed for {provider}: {reason}")]
    ScopeDiscovery { provider: ProviderKind, reason: String },

    #[error("unknown {provider} service '{tag}' (known: {known})")]
    UnknownService {
        provider: ProviderKind,
        tag: String,
        known: String,
    },
}

/// A single provider call failed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceCallError {
    #[error("{program}: failed to run command: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program}: not authenticated ({hint})")]
    Unauthenticated { program: String, hint: String },

    #[error("{program}: access denied: {detail}")]
    AccessDenied { program: String, detail: String },

    #[error("{program}: command failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("{program}: {operation} did not finish before the scope deadline")]
    TimedOut { program: String, operation: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A client could not be opened for a scope.
#[derive(Debug, thiserror::Error)]
pub enum ScopeInitError {
    #[error("invalid scope identifier '{0}'")]
    InvalidScope(String),

    #[error("{program} is not installed or not on PATH")]
    ToolUnavailable { program: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error("No {target} infrastructure data found. Please scan your {target} resources first.")]
    NoSnapshot { target: String },

    #[error("question is required")]
    EmptyQuestion,

    #[error("language model api key not set (export {var})")]
    MissingApiKey { var: String },

    #[error("language model request failed: {0}")]
    Upstream(String),

    #[error("unexpected language model response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode snapshot for the prompt: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}
