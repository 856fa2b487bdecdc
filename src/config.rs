//! Environment configuration.
//!
//! Secrets/config:
//! - Docker Compose: credentials may come from /run/secrets/*
//! - Everything else: environment variables (a local `.env` is honoured)

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::cache::{CacheStore, SnapshotStore};
use crate::credentials::CredentialRotator;
use crate::error::ProviderError;
use crate::orchestrator::{PropsService, ServiceConfig};
use crate::provider::{CredentialPlacement, ProviderClient, ProviderConfig, QuotaPolicy};

const CREDENTIALS_SECRET_FILE: &str = "/run/secrets/odds_api_keys";

/// Configuration
#[derive(Clone)]
pub struct Config {
    pub credentials: Vec<String>,
    pub base_url: String,
    pub sport: String,
    pub regions: String,
    pub odds_format: String,
    pub placement: CredentialPlacement,
    pub quota: QuotaPolicy,
    pub requests_per_minute: u32,
    pub http_timeout_seconds: u64,
    pub events_ttl_seconds: u64,
    pub odds_ttl_seconds: u64,
    /// `None` disables the durable tier.
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_max_bytes: usize,
    pub default_books: Vec<String>,
    pub default_markets: Vec<String>,
    pub poll_interval_seconds: u64,
    pub health_port: u16,
    /// If true, run once and exit (no polling loop)
    pub run_once: bool,
    pub redis_url: Option<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("credentials", &format!("<{} redacted>", self.credentials.len()))
            .field("base_url", &self.base_url)
            .field("sport", &self.sport)
            .field("placement", &self.placement)
            .field("snapshot_dir", &self.snapshot_dir)
            .field("default_books", &self.default_books)
            .field("default_markets", &self.default_markets)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let credentials = match var("ODDS_API_KEYS").or_else(|| var("ODDS_API_KEY")) {
            Some(v) => parse_list(&v),
            None => match read_secret_file(CREDENTIALS_SECRET_FILE) {
                Ok(v) => parse_list(&v.replace('\n', ",")),
                Err(_) => Vec::new(),
            },
        };
        if credentials.is_empty() {
            return Err(anyhow::Error::new(ProviderError::Configuration).context(format!(
                "set ODDS_API_KEYS (comma separated) or ODDS_API_KEY, or mount {}",
                CREDENTIALS_SECRET_FILE
            )));
        }

        // Prevent accidental use of sample/placeholder keys
        for key in &credentials {
            let key_lower = key.to_lowercase();
            if key_lower.contains("change_me")
                || key_lower.contains("your_")
                || key_lower.starts_with("sample")
            {
                return Err(anyhow!(
                    "an odds API key appears to be a placeholder value; replace it with a real key"
                ));
            }
        }

        let placement = match var("CREDENTIAL_PLACEMENT").as_deref().unwrap_or("query") {
            "query" => CredentialPlacement::Query {
                name: var("CREDENTIAL_NAME").unwrap_or_else(|| "apiKey".to_string()),
            },
            "header" => CredentialPlacement::Header {
                name: var("CREDENTIAL_NAME").unwrap_or_else(|| "Authorization".to_string()),
                // Not trimmed: "Bearer " needs its trailing space.
                prefix: lookup("CREDENTIAL_PREFIX").unwrap_or_default(),
            },
            other => return Err(anyhow!("CREDENTIAL_PLACEMENT must be 'query' or 'header', got '{}'", other)),
        };

        let default_quota = QuotaPolicy::default();
        let quota_codes = match var("QUOTA_STATUS_CODES") {
            Some(v) => parse_list(&v)
                .iter()
                .map(|c| c.parse::<u16>().with_context(|| format!("invalid QUOTA_STATUS_CODES entry '{}'", c)))
                .collect::<Result<Vec<_>>>()?,
            None => default_quota.status_codes,
        };
        let quota_markers = var("QUOTA_BODY_MARKERS")
            .map(|v| parse_list(&v))
            .unwrap_or(default_quota.body_markers);

        let snapshot_dir = match var("SNAPSHOT_DIR").as_deref() {
            Some("off") | Some("none") => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(PathBuf::from("/var/lib/props-ingestion/snapshots")),
        };

        let defaults = ServiceConfig::default();

        Ok(Self {
            credentials,
            base_url: var("ODDS_API_BASE_URL").unwrap_or_else(|| "https://api.the-odds-api.com".to_string()),
            sport: var("SPORT_KEY").unwrap_or(defaults.sport),
            regions: var("ODDS_REGIONS").unwrap_or(defaults.regions),
            odds_format: var("ODDS_FORMAT").unwrap_or(defaults.odds_format),
            placement,
            quota: QuotaPolicy::new(quota_codes, quota_markers),
            requests_per_minute: parse_or(var("REQUESTS_PER_MINUTE"), 45),
            http_timeout_seconds: parse_or(var("HTTP_TIMEOUT_SECONDS"), 30),
            events_ttl_seconds: parse_or(var("EVENTS_TTL_SECONDS"), defaults.events_ttl.as_secs()),
            odds_ttl_seconds: parse_or(var("ODDS_TTL_SECONDS"), defaults.odds_ttl.as_secs()),
            snapshot_dir,
            snapshot_max_bytes: parse_or(var("SNAPSHOT_MAX_BYTES"), 5 * 1024 * 1024),
            default_books: var("DEFAULT_BOOKS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.default_books),
            default_markets: var("DEFAULT_MARKETS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.default_markets),
            poll_interval_seconds: parse_or(var("POLL_INTERVAL_SECONDS"), 300),
            health_port: parse_or(var("HEALTH_PORT"), 8084),
            run_once: var("RUN_ONCE")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            redis_url: var("REDIS_URL"),
        })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.base_url.clone(),
            placement: self.placement.clone(),
            quota: self.quota.clone(),
            timeout: Duration::from_secs(self.http_timeout_seconds),
            connect_timeout: Duration::from_secs(self.http_timeout_seconds.min(10)),
            requests_per_minute: self.requests_per_minute,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            provider_name: "the-odds-api".to_string(),
            sport: self.sport.clone(),
            regions: self.regions.clone(),
            odds_format: self.odds_format.clone(),
            events_ttl: Duration::from_secs(self.events_ttl_seconds),
            odds_ttl: Duration::from_secs(self.odds_ttl_seconds),
            default_books: self.default_books.clone(),
            default_markets: self.default_markets.clone(),
        }
    }

    /// Wire rotator, client and cache into a ready service.
    pub fn build_service(&self) -> Result<PropsService> {
        let rotator = CredentialRotator::from_values(&self.credentials)
            .context("Failed to build credential rotation")?;
        let provider = ProviderClient::new(rotator, self.provider_config())
            .context("Failed to create provider client")?;
        let snapshots = self
            .snapshot_dir
            .as_ref()
            .map(|dir| SnapshotStore::new(dir, self.snapshot_max_bytes));
        Ok(PropsService::new(provider, CacheStore::new(snapshots), self.service_config()))
    }
}

/// Read a secret from a Docker secret file
fn read_secret_file(file_path: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!("Secret file not found at {}", file_path))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse().ok()).unwrap_or(default)
}
