//! Provider failure taxonomy.
//!
//! Every variant carries the request path and the non-secret query
//! parameters so failures can be diagnosed at the request boundary.
//! Credential values are never part of `params`.

use thiserror::Error;

/// Query parameters as sent upstream, minus the credential.
pub type Params = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// No credentials were configured. Raised before any fetch.
    #[error("no provider credentials configured")]
    Configuration,

    /// Every credential was rejected on usage grounds for the same request.
    #[error("all {attempts} credentials exhausted for {path} (params: {})", fmt_params(.params))]
    QuotaExhausted {
        path: String,
        params: Params,
        attempts: usize,
    },

    /// Non-quota upstream error status. Not retried across credentials.
    #[error("provider error (status {status}) for {path}: {body}")]
    Upstream {
        status: u16,
        body: String,
        path: String,
        params: Params,
    },

    /// Network failure on every attempt.
    #[error("transport failure after {attempts} attempts for {path}: {message}")]
    Transport {
        path: String,
        params: Params,
        attempts: usize,
        message: String,
    },

    /// Successful status whose body is not JSON.
    #[error("invalid JSON from {path}: {message}")]
    Decode { path: String, message: String },
}

impl ProviderError {
    /// Usage allowance ran out; callers should back off or serve a snapshot.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::QuotaExhausted { .. })
    }

    /// Worth trying again later, as opposed to a permanent failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::QuotaExhausted { .. } | ProviderError::Transport { .. }
        )
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            ProviderError::Configuration => None,
            ProviderError::QuotaExhausted { path, .. }
            | ProviderError::Upstream { path, .. }
            | ProviderError::Transport { path, .. }
            | ProviderError::Decode { path, .. } => Some(path),
        }
    }
}

fn fmt_params(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
