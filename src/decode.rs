//! Upstream JSON shapes.
//!
//! Providers disagree on envelopes and field names. All of that is settled
//! here, once, so the normalizer only ever sees typed records. Each logical
//! field has a fixed alias list; the first alias present wins.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub const EVENT_ID: &[&str] = &["id", "event_id", "eventId"];
pub const HOME_TEAM: &[&str] = &["home_team", "home", "homeTeam"];
pub const AWAY_TEAM: &[&str] = &["away_team", "away", "awayTeam"];
pub const COMMENCE_TIME: &[&str] = &["commence_time", "commenceTime", "start_time"];
pub const BOOKS: &[&str] = &["bookmakers", "books", "sportsbooks"];
pub const BOOK_ID: &[&str] = &["key", "book", "bookmaker"];
pub const MARKETS: &[&str] = &["markets"];
pub const MARKET_ID: &[&str] = &["key", "market", "market_key"];
pub const OUTCOMES: &[&str] = &["outcomes", "selections"];
pub const PRICE: &[&str] = &["price", "odds"];
pub const PRICE_AMERICAN: &[&str] = &["american", "americanOdds", "us"];
pub const PRICE_DECIMAL: &[&str] = &["decimal", "decimalOdds", "eu"];
pub const LINE: &[&str] = &["point", "total", "line", "handicap"];
pub const DIRECTION: &[&str] = &["side", "direction", "name", "label"];
pub const PLAYER: &[&str] = &["description", "name", "participant", "player"];
pub const TEAM: &[&str] = &["team", "team_name"];

/// Keys under which an object may wrap the event array, in priority order.
pub const ENVELOPE_KEYS: &[&str] = &["data", "results", "events"];

/// The accepted response envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Bare JSON array of events.
    List(Vec<Value>),
    /// Object wrapping the array under one of [`ENVELOPE_KEYS`].
    Wrapped { key: &'static str, events: Vec<Value> },
    /// A single event object (per-event endpoints).
    Single(Value),
    /// Nothing recognisable.
    Unknown,
}

impl Envelope {
    pub fn decode(payload: &Value) -> Envelope {
        match payload {
            Value::Array(items) => Envelope::List(items.clone()),
            Value::Object(obj) => {
                for &key in ENVELOPE_KEYS {
                    if let Some(Value::Array(items)) = obj.get(key) {
                        return Envelope::Wrapped {
                            key,
                            events: items.clone(),
                        };
                    }
                }
                if first_str(obj, EVENT_ID).is_some() || obj_array(obj, BOOKS).is_some() {
                    Envelope::Single(payload.clone())
                } else {
                    Envelope::Unknown
                }
            }
            _ => Envelope::Unknown,
        }
    }

    pub fn into_events(self) -> Vec<Value> {
        match self {
            Envelope::List(events) | Envelope::Wrapped { events, .. } => events,
            Envelope::Single(event) => vec![event],
            Envelope::Unknown => Vec::new(),
        }
    }
}

/// Decode any supported payload straight into typed events. Entries that are
/// not JSON objects are dropped.
pub fn decode_events(payload: &Value) -> Vec<RawEvent> {
    Envelope::decode(payload)
        .into_events()
        .iter()
        .filter_map(RawEvent::from_value)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: Option<String>,
    pub home: Option<String>,
    pub away: Option<String>,
    pub commence_time: Option<DateTime<Utc>>,
    pub books: Vec<RawBook>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBook {
    pub key: Option<String>,
    pub markets: Vec<RawMarket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMarket {
    pub key: Option<String>,
    pub outcomes: Vec<RawOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawOutcome {
    pub player: Option<String>,
    pub team: Option<String>,
    pub direction: Option<String>,
    pub line: Option<f64>,
    pub price: Option<RawPrice>,
}

/// Price as the provider encoded it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPrice {
    /// Bare number or numeric string, read as American odds.
    Bare(Value),
    /// Object carrying an explicit American field.
    American(Value),
    /// Object carrying a decimal field.
    Decimal(Value),
}

impl RawEvent {
    pub fn from_value(value: &Value) -> Option<RawEvent> {
        let obj = value.as_object()?;
        Some(RawEvent {
            id: first_str(obj, EVENT_ID),
            home: first_str(obj, HOME_TEAM),
            away: first_str(obj, AWAY_TEAM),
            commence_time: first_str(obj, COMMENCE_TIME)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            books: objects(obj, BOOKS).map(RawBook::from_object).collect(),
        })
    }

    /// `AWAY@HOME`, when both teams are known.
    pub fn game_label(&self) -> Option<String> {
        match (&self.away, &self.home) {
            (Some(away), Some(home)) => Some(format!("{}@{}", away, home)),
            _ => None,
        }
    }
}

impl RawBook {
    fn from_object(obj: &Map<String, Value>) -> RawBook {
        RawBook {
            key: first_str(obj, BOOK_ID),
            markets: objects(obj, MARKETS).map(RawMarket::from_object).collect(),
        }
    }
}

impl RawMarket {
    fn from_object(obj: &Map<String, Value>) -> RawMarket {
        RawMarket {
            key: first_str(obj, MARKET_ID),
            outcomes: objects(obj, OUTCOMES).map(RawOutcome::from_object).collect(),
        }
    }
}

impl RawOutcome {
    fn from_object(obj: &Map<String, Value>) -> RawOutcome {
        RawOutcome {
            player: first_str(obj, PLAYER),
            team: first_str(obj, TEAM),
            direction: first_str(obj, DIRECTION),
            line: first_present(obj, LINE).and_then(as_f64),
            price: first_present(obj, PRICE).and_then(RawPrice::from_value),
        }
    }
}

impl RawPrice {
    fn from_value(value: &Value) -> Option<RawPrice> {
        match value {
            Value::Number(_) | Value::String(_) => Some(RawPrice::Bare(value.clone())),
            Value::Object(obj) => {
                if let Some(v) = first_present(obj, PRICE_AMERICAN) {
                    Some(RawPrice::American(v.clone()))
                } else {
                    first_present(obj, PRICE_DECIMAL).map(|v| RawPrice::Decimal(v.clone()))
                }
            }
            _ => None,
        }
    }
}

/// First alias whose value is present and not null.
fn first_present<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| obj.get(*alias))
        .find(|v| !v.is_null())
}

/// First alias holding a non-blank string (numbers are stringified).
fn first_str(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match obj.get(*alias) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn obj_array<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Vec<Value>> {
    aliases.iter().find_map(|alias| obj.get(*alias).and_then(Value::as_array))
}

fn objects<'a>(
    obj: &'a Map<String, Value>,
    aliases: &[&str],
) -> impl Iterator<Item = &'a Map<String, Value>> {
    obj_array(obj, aliases)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

/// Number or numeric string as f64. Non-finite values are rejected.
pub fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
