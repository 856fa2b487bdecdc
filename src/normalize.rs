//! Upstream events → canonical [`Prop`] records.
//!
//! Anything that cannot be interpreted (unknown book, unpriced outcome,
//! missing market key) is skipped silently; it never fails the request.

use serde_json::Value;
use tracing::trace;

use crate::decode::{as_f64, decode_events, RawEvent, RawOutcome, RawPrice};
use crate::model::{Prop, Side};

pub const UNKNOWN_PLAYER: &str = "Unknown Player";

/// Player markets whose keys do not contain "player".
pub const KNOWN_PLAYER_MARKETS: &[&str] = &[
    "anytime_td",
    "first_td",
    "last_td",
    "pass_yds",
    "pass_tds",
    "pass_attempts",
    "pass_completions",
    "pass_interceptions",
    "rush_yds",
    "rush_attempts",
    "reception_yds",
    "receptions",
    "batter_hits",
    "batter_total_bases",
    "batter_home_runs",
    "pitcher_strikeouts",
    "points",
    "rebounds",
    "assists",
    "threes",
];

/// Loose detector used by the aggregate "all player markets" path only.
pub fn is_player_market(key: &str) -> bool {
    key.contains("player") || KNOWN_PLAYER_MARKETS.contains(&key)
}

/// Props for exactly `market` from books in `allowed_books`.
pub fn normalize(event: &RawEvent, market: &str, allowed_books: &[String]) -> Vec<Prop> {
    collect(event, allowed_books, |key| key == market)
}

/// Props for every player market carried by the event.
pub fn normalize_player_markets(event: &RawEvent, allowed_books: &[String]) -> Vec<Prop> {
    collect(event, allowed_books, is_player_market)
}

/// Decode a raw payload (any supported envelope) and normalize each event.
pub fn normalize_payload(payload: &Value, market: &str, allowed_books: &[String]) -> Vec<Prop> {
    decode_events(payload)
        .iter()
        .flat_map(|event| normalize(event, market, allowed_books))
        .collect()
}

fn collect<F>(event: &RawEvent, allowed_books: &[String], wants_market: F) -> Vec<Prop>
where
    F: Fn(&str) -> bool,
{
    let mut props = Vec::new();
    let game = event.game_label();

    for book in &event.books {
        let Some(book_key) = book.key.as_deref() else {
            continue;
        };
        if !allowed_books.iter().any(|b| b == book_key) {
            continue;
        }

        for market in &book.markets {
            let Some(market_key) = market.key.as_deref() else {
                continue;
            };
            if !wants_market(market_key) {
                continue;
            }

            for outcome in &market.outcomes {
                match to_prop(event, game.as_deref(), book_key, market_key, outcome) {
                    Some(prop) => props.push(prop),
                    None => trace!(
                        event = event.id.as_deref().unwrap_or("?"),
                        book = book_key,
                        market = market_key,
                        "Dropped unpriced outcome"
                    ),
                }
            }
        }
    }

    props
}

fn to_prop(
    event: &RawEvent,
    game: Option<&str>,
    book: &str,
    market: &str,
    outcome: &RawOutcome,
) -> Option<Prop> {
    let odds = normalize_price(outcome.price.as_ref()?)?;

    let opponent = outcome.team.as_deref().and_then(|team| {
        if event.home.as_deref() == Some(team) {
            event.away.clone()
        } else if event.away.as_deref() == Some(team) {
            event.home.clone()
        } else {
            None
        }
    });

    Some(Prop {
        player: outcome
            .player
            .clone()
            .unwrap_or_else(|| UNKNOWN_PLAYER.to_string()),
        team: outcome.team.clone(),
        opponent,
        game: game.map(str::to_string),
        event_id: event.id.clone(),
        market: market.to_string(),
        line: outcome.line,
        alt: market.ends_with("_alternate"),
        side: outcome.direction.as_deref().and_then(Side::parse),
        odds,
        book: book.to_string(),
        projection: None,
        context: None,
    })
}

/// Resolve any supported price encoding to American odds.
pub fn normalize_price(price: &RawPrice) -> Option<i32> {
    match price {
        RawPrice::Bare(v) | RawPrice::American(v) => american(v),
        RawPrice::Decimal(v) => as_f64(v).and_then(american_from_decimal),
    }
}

fn american(value: &Value) -> Option<i32> {
    if let Value::String(s) = value {
        let s = s.trim();
        if s.eq_ignore_ascii_case("even") || s.eq_ignore_ascii_case("ev") {
            return Some(100);
        }
    }
    let odds = as_f64(value)?.round();
    // |odds| < 100 is not a valid American price
    if odds.abs() < 100.0 || odds.abs() > i32::MAX as f64 {
        return None;
    }
    Some(odds as i32)
}

/// `d >= 2.0 ⇒ (d - 1)·100`, otherwise `-100 / (d - 1)`, rounded.
pub fn american_from_decimal(decimal: f64) -> Option<i32> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return None;
    }
    let american = if decimal >= 2.0 {
        ((decimal - 1.0) * 100.0).round()
    } else {
        (-100.0 / (decimal - 1.0)).round()
    };
    if american.abs() > i32::MAX as f64 {
        return None;
    }
    Some(american as i32)
}
