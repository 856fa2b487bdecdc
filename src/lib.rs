//! Player-prop odds ingestion.
//!
//! Resilient access to a rate-limited odds provider: credentials rotate on
//! quota exhaustion, responses are cached in memory with a durable
//! last-known-good snapshot behind them, and every upstream shape is
//! normalized into canonical [`model::Prop`] records.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod health;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod priors;
pub mod provider;
pub mod publish;

pub use cache::{CacheEntry, CacheKey, CacheStore, SnapshotStore, SnapshotWrite};
pub use config::Config;
pub use credentials::{Credential, CredentialRotator};
pub use error::ProviderError;
pub use model::{Correlation, Event, Prop, Provenance, Side, Slate};
pub use orchestrator::{Fetched, PropsService, ServiceConfig, Source};
pub use provider::{CredentialPlacement, ProviderClient, ProviderConfig, QuotaPolicy};
