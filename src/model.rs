//! Canonical records handed to downstream parlay/projection tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Over/Under direction of a prop outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Over,
    Under,
}

impl Side {
    /// Only exactly "Over"/"Under" after title-casing are accepted.
    pub fn parse(raw: &str) -> Option<Side> {
        match title_case(raw.trim()).as_str() {
            "Over" => Some(Side::Over),
            "Under" => Some(Side::Under),
            _ => None,
        }
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// One player-proposition line from one book.
///
/// `odds` is always American (e.g. -135, +150).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prop {
    pub player: String,
    pub team: Option<String>,
    pub opponent: Option<String>,
    /// `AWAY@HOME`
    pub game: Option<String>,
    pub event_id: Option<String>,
    pub market: String,
    pub line: Option<f64>,
    pub alt: bool,
    pub side: Option<Side>,
    pub odds: i32,
    pub book: String,
    pub projection: Option<f64>,
    pub context: Option<String>,
}

/// Scheduled game as listed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub home: Option<String>,
    pub away: Option<String>,
    pub game: Option<String>,
    pub commence_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub leg_a: String,
    pub leg_b: String,
    pub coefficient: f64,
}

impl Correlation {
    pub fn new(leg_a: impl Into<String>, leg_b: impl Into<String>, coefficient: f64) -> Self {
        Self {
            leg_a: leg_a.into(),
            leg_b: leg_b.into(),
            coefficient: coefficient.clamp(-1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub books: Vec<String>,
    pub markets: Vec<String>,
    pub generated_at: DateTime<Utc>,
    /// At least one market was served from the durable snapshot.
    pub stale: bool,
}

/// Aggregated answer to one slate request. Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slate {
    pub id: Uuid,
    pub date: String,
    pub props: Vec<Prop>,
    pub correlations: Vec<Correlation>,
    pub provenance: Provenance,
}
