//! Slate assembly: events → per-event odds through the cache → normalizer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::try_join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStore};
use crate::decode::{decode_events, RawEvent};
use crate::error::ProviderError;
use crate::model::{Event, Prop, Provenance, Slate};
use crate::normalize::{normalize, normalize_player_markets};
use crate::priors;
use crate::provider::ProviderClient;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub provider_name: String,
    pub sport: String,
    pub regions: String,
    pub odds_format: String,
    pub events_ttl: Duration,
    pub odds_ttl: Duration,
    pub default_books: Vec<String>,
    pub default_markets: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider_name: "the-odds-api".to_string(),
            sport: "americanfootball_nfl".to_string(),
            regions: "us".to_string(),
            odds_format: "american".to_string(),
            events_ttl: Duration::from_secs(600),
            odds_ttl: Duration::from_secs(120),
            default_books: vec!["draftkings".to_string(), "fanduel".to_string()],
            default_markets: vec![
                "player_pass_yds".to_string(),
                "player_pass_tds".to_string(),
                "player_rush_yds".to_string(),
                "player_reception_yds".to_string(),
            ],
        }
    }
}

/// Where a cached fetch was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Memory,
    Upstream,
    /// Durable last-known-good copy, served because every credential is out
    /// of quota. May be arbitrarily old; see `fetched_at`.
    Snapshot,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub source: Source,
}

impl Fetched {
    fn new(payload: Value, fetched_at: DateTime<Utc>, source: Source) -> Self {
        Self {
            payload,
            fetched_at,
            source,
        }
    }
}

/// Entry point for downstream consumers.
pub struct PropsService {
    provider: ProviderClient,
    cache: CacheStore,
    config: ServiceConfig,
    /// One gate per cache key with a fetch in progress.
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl PropsService {
    pub fn new(provider: ProviderClient, cache: CacheStore, config: ServiceConfig) -> Self {
        Self {
            provider,
            cache,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Serve from memory while fresh, otherwise go upstream. When every
    /// credential is out of quota, fall back to the durable snapshot
    /// regardless of age. `refresh` skips the memory check only.
    ///
    /// Concurrent misses on the same key share one upstream call: later
    /// callers wait for the first and then read what it stored.
    pub async fn fetch_cached(
        &self,
        key: &CacheKey,
        path: &str,
        params: &[(String, String)],
        ttl: Duration,
        refresh: bool,
    ) -> Result<Fetched, ProviderError> {
        let requested_at = Utc::now();
        if !refresh {
            if let Some(fetched) = self.fresh(key, ttl, None).await {
                debug!(key = %key, "Cache hit");
                return Ok(fetched);
            }
        }

        let gate = self.gate(key).await;
        let result = {
            let _held = gate.lock().await;
            // Filled by another caller while this one waited.
            let since = refresh.then_some(requested_at);
            match self.fresh(key, ttl, since).await {
                Some(fetched) => {
                    debug!(key = %key, "Cache filled by concurrent fetch");
                    Ok(fetched)
                }
                None => self.fetch_upstream(key, path, params).await,
            }
        };
        self.release(key, gate).await;
        result
    }

    async fn fresh(&self, key: &CacheKey, ttl: Duration, since: Option<DateTime<Utc>>) -> Option<Fetched> {
        let entry = self.cache.get(key).await?;
        if !CacheStore::is_fresh(&entry, ttl) {
            return None;
        }
        if since.is_some_and(|since| entry.fetched_at < since) {
            return None;
        }
        Some(Fetched::new(entry.payload, entry.fetched_at, Source::Memory))
    }

    async fn fetch_upstream(
        &self,
        key: &CacheKey,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Fetched, ProviderError> {
        match self.provider.fetch(path, params).await {
            Ok(payload) => {
                let entry = self.cache.put(key, payload).await;
                Ok(Fetched::new(entry.payload, entry.fetched_at, Source::Upstream))
            }
            Err(err) if err.is_rate_limited() => match self.cache.snapshot(key).await {
                Some(entry) => {
                    warn!(
                        key = %key,
                        fetched_at = %entry.fetched_at,
                        "Quota exhausted, serving last-known-good snapshot"
                    );
                    Ok(Fetched::new(entry.payload, entry.fetched_at, Source::Snapshot))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn gate(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.in_flight.lock().await.entry(key.clone()).or_default().clone()
    }

    async fn release(&self, key: &CacheKey, gate: Arc<Mutex<()>>) {
        drop(gate);
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            in_flight.remove(key);
        }
    }

    /// Props for every requested market across the listed events.
    ///
    /// Events come from the events endpoint (narrowed to one UTC day when
    /// `date` is `YYYY-MM-DD`); odds come from the per-event endpoint, one
    /// cached fetch per event and market. Markets run concurrently and the
    /// first hard failure aborts the whole slate.
    pub async fn get_slate(
        &self,
        date: Option<&str>,
        books: &[String],
        markets: &[String],
    ) -> Result<Slate, ProviderError> {
        let books = or_defaults(books, &self.config.default_books);
        let markets = or_defaults(markets, &self.config.default_markets);

        let requested = date.map(str::trim).filter(|d| !d.is_empty());
        let window = requested
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(day_window);
        let date_label = requested
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().date_naive().to_string());

        let (events, events_source) = self.list_events(&books, window.as_ref(), false).await?;
        let event_ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();

        let per_market = try_join_all(
            markets
                .iter()
                .map(|market| self.market_props(market, &event_ids, &books)),
        )
        .await?;

        let mut stale = events_source == Source::Snapshot;
        let mut props: Vec<Prop> = Vec::new();
        for (market_props, market_stale) in per_market {
            stale |= market_stale;
            props.extend(market_props);
        }

        info!(
            date = %date_label,
            events = events.len(),
            markets = markets.len(),
            props = props.len(),
            stale,
            "Slate built"
        );

        Ok(Slate {
            id: Uuid::new_v4(),
            date: date_label,
            correlations: priors::for_markets(&markets),
            props,
            provenance: Provenance {
                provider: self.config.provider_name.clone(),
                books,
                markets,
                generated_at: Utc::now(),
                stale,
            },
        })
    }

    /// One market across every event, in event order. The flag is set when
    /// any event was answered from the snapshot.
    async fn market_props(
        &self,
        market: &str,
        event_ids: &[&str],
        books: &[String],
    ) -> Result<(Vec<Prop>, bool), ProviderError> {
        let markets = [market.to_string()];
        let per_event = try_join_all(
            event_ids
                .iter()
                .map(|id| self.event_odds(id, &markets, books, false)),
        )
        .await?;

        let mut stale = false;
        let mut props = Vec::new();
        for (events, source) in per_event {
            stale |= source == Source::Snapshot;
            for event in &events {
                props.extend(normalize(event, market, books));
            }
        }
        debug!(market, props = props.len(), stale, "Market normalized");
        Ok((props, stale))
    }

    /// Upcoming events. `refresh` bypasses the memory TTL but still falls
    /// back to the snapshot on quota exhaustion.
    pub async fn get_events(&self, books: &[String], refresh: bool) -> Result<Vec<Event>, ProviderError> {
        let books = or_defaults(books, &self.config.default_books);
        let (events, _) = self.list_events(&books, None, refresh).await?;
        Ok(events)
    }

    async fn list_events(
        &self,
        books: &[String],
        window: Option<&(String, String)>,
        refresh: bool,
    ) -> Result<(Vec<Event>, Source), ProviderError> {
        let path = format!("/v4/sports/{}/events", self.config.sport);
        let mut params = vec![
            ("bookmakers".to_string(), books.join(",")),
            ("dateFormat".to_string(), "iso".to_string()),
        ];
        let mut key = CacheKey::builder("events")
            .param("sport", &self.config.sport)
            .list("books", books);
        if let Some((from, to)) = window {
            params.push(("commenceTimeFrom".to_string(), from.clone()));
            params.push(("commenceTimeTo".to_string(), to.clone()));
            key = key.param("from", from).param("to", to);
        }

        let fetched = self
            .fetch_cached(&key.build(), &path, &params, self.config.events_ttl, refresh)
            .await?;

        let events = decode_events(&fetched.payload)
            .into_iter()
            .filter_map(|raw| {
                let game = raw.game_label();
                Some(Event {
                    id: raw.id?,
                    home: raw.home,
                    away: raw.away,
                    game,
                    commence_time: raw.commence_time,
                })
            })
            .collect();
        Ok((events, fetched.source))
    }

    /// Raw odds for one event, cached per event, market set and book set.
    async fn event_odds(
        &self,
        event_id: &str,
        markets: &[String],
        books: &[String],
        refresh: bool,
    ) -> Result<(Vec<RawEvent>, Source), ProviderError> {
        let path = format!("/v4/sports/{}/events/{}/odds", self.config.sport, event_id);
        let params = self.odds_params(&markets.join(","), books);
        let key = CacheKey::builder("event_odds")
            .param("sport", &self.config.sport)
            .param("event", event_id)
            .param("regions", &self.config.regions)
            .param("format", &self.config.odds_format)
            .list("markets", markets)
            .list("books", books)
            .build();

        let fetched = self
            .fetch_cached(&key, &path, &params, self.config.odds_ttl, refresh)
            .await?;
        Ok((decode_events(&fetched.payload), fetched.source))
    }

    /// Props for one event from the per-event odds endpoint.
    pub async fn get_event_props(
        &self,
        event_id: &str,
        books: &[String],
        markets: &[String],
        refresh: bool,
    ) -> Result<Vec<Prop>, ProviderError> {
        let books = or_defaults(books, &self.config.default_books);
        let markets = or_defaults(markets, &self.config.default_markets);
        let (events, _) = self.event_odds(event_id, &markets, &books, refresh).await?;

        let mut props = Vec::new();
        for market in &markets {
            for event in &events {
                props.extend(normalize(event, market, &books));
            }
        }
        Ok(props)
    }

    /// Every player market the feed carries for the default market list,
    /// across all listed events, using the loose player-market detector
    /// instead of exact keys.
    pub async fn get_all_player_props(&self, books: &[String], refresh: bool) -> Result<Vec<Prop>, ProviderError> {
        let books = or_defaults(books, &self.config.default_books);
        let markets = &self.config.default_markets;
        let (events, _) = self.list_events(&books, None, refresh).await?;

        let per_event = try_join_all(
            events
                .iter()
                .map(|event| self.event_odds(&event.id, markets, &books, refresh)),
        )
        .await?;

        Ok(per_event
            .iter()
            .flat_map(|(events, _)| events.iter())
            .flat_map(|event| normalize_player_markets(event, &books))
            .collect())
    }

    fn odds_params(&self, markets: &str, books: &[String]) -> Vec<(String, String)> {
        vec![
            ("regions".to_string(), self.config.regions.clone()),
            ("markets".to_string(), markets.to_string()),
            ("bookmakers".to_string(), books.join(",")),
            ("oddsFormat".to_string(), self.config.odds_format.clone()),
            ("dateFormat".to_string(), "iso".to_string()),
        ]
    }
}

/// Trimmed, de-duplicated request list, or the configured defaults if the
/// request names nothing.
fn or_defaults(requested: &[String], defaults: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in requested.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|o| o == item) {
            out.push(item.to_string());
        }
    }
    if out.is_empty() {
        defaults.to_vec()
    } else {
        out
    }
}

/// `[date 00:00Z, date+1 00:00Z)` in the provider's ISO format.
fn day_window(date: NaiveDate) -> Option<(String, String)> {
    let start = date.and_hms_opt(0, 0, 0)?;
    let end = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
    Some((
        start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_requests_fall_back_to_defaults() {
        let defaults = vec!["draftkings".to_string()];
        assert_eq!(or_defaults(&[], &defaults), defaults);
        assert_eq!(or_defaults(&["  ".to_string()], &defaults), defaults);
        assert_eq!(
            or_defaults(
                &["fanduel".to_string(), " fanduel".to_string(), "betmgm".to_string()],
                &defaults
            ),
            vec!["fanduel".to_string(), "betmgm".to_string()]
        );
    }

    #[test]
    fn day_window_spans_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(
            day_window(date),
            Some((
                "2025-12-31T00:00:00Z".to_string(),
                "2026-01-01T00:00:00Z".to_string()
            ))
        );
    }
}
