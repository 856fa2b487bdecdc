//! Static correlation priors between player markets.
//!
//! These are fixed seeds for parlay tooling, not a fitted model.

use crate::model::Correlation;

const PRIORS: &[(&str, &str, f64)] = &[
    ("player_pass_yds", "player_reception_yds", 0.55),
    ("player_pass_tds", "player_reception_tds", 0.48),
    ("player_pass_yds", "player_pass_tds", 0.62),
    ("player_pass_attempts", "player_receptions", 0.41),
    ("player_rush_yds", "player_pass_yds", -0.22),
    ("player_rush_attempts", "player_rush_yds", 0.71),
    ("player_receptions", "player_reception_yds", 0.78),
    ("player_pass_interceptions", "player_pass_tds", -0.18),
];

/// Priors whose legs are both among `markets`, in table order.
pub fn for_markets(markets: &[String]) -> Vec<Correlation> {
    let has = |m: &str| markets.iter().any(|x| x == m);
    PRIORS
        .iter()
        .filter(|(a, b, _)| has(a) && has(b))
        .map(|(a, b, c)| Correlation::new(*a, *b, *c))
        .collect()
}
