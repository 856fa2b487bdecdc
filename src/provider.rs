//! Odds provider HTTP client with credential rotation.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::credentials::{Credential, CredentialRotator};
use crate::error::ProviderError;

/// Upper bound on how much of an upstream error body is kept for diagnostics.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Where the credential goes on each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// `?{name}={credential}` (The Odds API uses `apiKey`).
    Query { name: String },
    /// `{name}: {prefix}{credential}`, e.g. `Authorization: Bearer ...`.
    Header { name: String, prefix: String },
}

impl Default for CredentialPlacement {
    fn default() -> Self {
        CredentialPlacement::Query {
            name: "apiKey".to_string(),
        }
    }
}

/// Decides whether a non-2xx response means the credential ran out of quota.
///
/// A status code match, or a case-insensitive marker anywhere in the body,
/// is enough.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub status_codes: Vec<u16>,
    pub body_markers: Vec<String>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            status_codes: vec![429],
            body_markers: vec![
                "quota".to_string(),
                "usage limit".to_string(),
                "out of usage credits".to_string(),
                "requests remaining: 0".to_string(),
            ],
        }
    }
}

impl QuotaPolicy {
    pub fn new(status_codes: Vec<u16>, body_markers: Vec<String>) -> Self {
        Self {
            status_codes,
            body_markers: body_markers
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn is_quota_exhausted(&self, status: u16, body: &str) -> bool {
        if self.status_codes.contains(&status) {
            return true;
        }
        let body = body.to_lowercase();
        self.body_markers
            .iter()
            .any(|marker| body.contains(&marker.to_lowercase()))
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub placement: CredentialPlacement,
    pub quota: QuotaPolicy,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// 0 disables client-side rate limiting.
    pub requests_per_minute: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.the-odds-api.com".to_string(),
            placement: CredentialPlacement::default(),
            quota: QuotaPolicy::default(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            requests_per_minute: 45,
        }
    }
}

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Result of a single credential attempt.
enum Attempt {
    Success(Value),
    Quota(u16),
    Transport(String),
    Hard(ProviderError),
}

pub struct ProviderClient {
    http: reqwest::Client,
    rotator: CredentialRotator,
    config: ProviderConfig,
    rate_limiter: Option<DirectRateLimiter>,
}

impl ProviderClient {
    pub fn new(rotator: CredentialRotator, config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(5)
            .build()
            .map_err(|e| ProviderError::Transport {
                path: String::new(),
                params: Vec::new(),
                attempts: 0,
                message: format!("failed to create HTTP client: {}", e),
            })?;

        let rate_limiter = NonZeroU32::new(config.requests_per_minute)
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            http,
            rotator,
            config,
            rate_limiter,
        })
    }

    pub fn credential_count(&self) -> usize {
        self.rotator.len()
    }

    /// One logical fetch: at most one attempt per configured credential.
    ///
    /// Quota rejections and transport failures move on to the next
    /// credential; any other error status aborts immediately. The walk order
    /// is claimed once up front, so concurrent fetches cannot make this one
    /// skip or repeat a credential.
    pub async fn fetch(&self, path: &str, params: &[(String, String)]) -> Result<Value, ProviderError> {
        let attempts = self.rotator.len();
        let mut quota_hits = 0usize;
        let mut last_transport: Option<String> = None;

        for (attempt, credential) in (1..=attempts).zip(self.rotator.cycle()) {
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            match self.attempt(path, params, credential).await {
                Attempt::Success(payload) => {
                    debug!(path, attempt, "Provider fetch succeeded");
                    return Ok(payload);
                }
                Attempt::Quota(status) => {
                    quota_hits += 1;
                    warn!(
                        path,
                        attempt,
                        of = attempts,
                        status,
                        "Credential quota exhausted, rotating"
                    );
                }
                Attempt::Transport(message) => {
                    warn!(path, attempt, of = attempts, error = %message, "Transport failure, rotating");
                    last_transport = Some(message);
                }
                Attempt::Hard(err) => return Err(err),
            }
        }

        let params = params.to_vec();
        if quota_hits > 0 {
            warn!(path, attempts, "All credentials exhausted");
            Err(ProviderError::QuotaExhausted {
                path: path.to_string(),
                params,
                attempts,
            })
        } else {
            Err(ProviderError::Transport {
                path: path.to_string(),
                params,
                attempts,
                message: last_transport.unwrap_or_else(|| "no attempt completed".to_string()),
            })
        }
    }

    async fn attempt(&self, path: &str, params: &[(String, String)], credential: &Credential) -> Attempt {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let mut request = self.http.get(&url).query(params);
        request = match &self.config.placement {
            CredentialPlacement::Query { name } => request.query(&[(name.as_str(), credential.expose())]),
            CredentialPlacement::Header { name, prefix } => {
                request.header(name.as_str(), format!("{}{}", prefix, credential.expose()))
            }
        };

        let response = match request.send().await {
            Ok(r) => r,
            // The URL may carry the credential as a query parameter.
            Err(e) => return Attempt::Transport(e.without_url().to_string()),
        };

        if let Some(remaining) = response.headers().get("x-requests-remaining") {
            info!(
                "API requests remaining: {}",
                remaining.to_str().unwrap_or("?")
            );
        }

        let status = response.status();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return Attempt::Transport(e.without_url().to_string()),
        };

        if status.is_success() {
            return match serde_json::from_str::<Value>(&body) {
                Ok(payload) => Attempt::Success(payload),
                Err(e) => Attempt::Hard(ProviderError::Decode {
                    path: path.to_string(),
                    message: e.to_string(),
                }),
            };
        }

        if self.config.quota.is_quota_exhausted(status.as_u16(), &body) {
            return Attempt::Quota(status.as_u16());
        }

        Attempt::Hard(ProviderError::Upstream {
            status: status.as_u16(),
            body: truncate_body(&body),
            path: path.to_string(),
            params: params.to_vec(),
        })
    }
}

fn truncate_body(body: &str) -> String {
    body.trim()
        .replace(['\n', '\r'], " ")
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect()
}
