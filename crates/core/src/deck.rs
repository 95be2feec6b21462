//! The fixed estimation card deck
//!
//! One shared scale for every room. Cards are string tokens; the numeric
//! ones participate in averaging, `?` and `∞` are displayed but excluded.

use crate::error::{Error, Result};

/// All cards, in display order.
pub const CARDS: &[&str] = &[
    "0", "1/2", "1", "2", "3", "5", "8", "13", "20", "40", "100", "?", "∞",
];

/// Returns true if `token` is one of the deck's cards.
pub fn is_card(token: &str) -> bool {
    CARDS.contains(&token)
}

/// Validate a vote token against the deck.
pub fn validate(token: &str) -> Result<&str> {
    CARDS
        .iter()
        .find(|c| **c == token)
        .copied()
        .ok_or_else(|| Error::UnknownCard(token.to_string()))
}

/// Parse a card token as a number, if it has one.
///
/// `1/2` (and the glyph `½`) map to one half; a decimal comma is
/// normalized to a dot. `?` and `∞` have no numeric value.
pub fn numeric_value(token: &str) -> Option<f64> {
    let trimmed = token.trim();
    if trimmed == "1/2" || trimmed == "½" {
        return Some(0.5);
    }
    let normalized = trimmed.replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// The numeric denominations of the deck, ascending.
pub fn denominations() -> Vec<f64> {
    CARDS.iter().filter_map(|c| numeric_value(c)).collect()
}

/// Round an average to the nearest card denomination.
///
/// An exact tie between two denominations resolves to the larger one.
pub fn nearest_card(average: f64) -> Option<&'static str> {
    let mut best: Option<(&'static str, f64)> = None;
    for card in CARDS {
        if let Some(value) = numeric_value(card) {
            let diff = (value - average).abs();
            // <= keeps the later (larger) denomination on exact ties
            if best.map_or(true, |(_, d)| diff <= d) {
                best = Some((card, diff));
            }
        }
    }
    best.map(|(card, _)| card)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_membership() {
        assert!(is_card("5"));
        assert!(is_card("1/2"));
        assert!(is_card("?"));
        assert!(!is_card("7"));
    }

    #[test]
    fn test_validate_rejects_unknown() {
        assert!(validate("8").is_ok());
        assert!(matches!(validate("42"), Err(Error::UnknownCard(_))));
    }

    #[test]
    fn test_numeric_value_half() {
        assert_eq!(numeric_value("1/2"), Some(0.5));
        assert_eq!(numeric_value("½"), Some(0.5));
    }

    #[test]
    fn test_numeric_value_comma() {
        assert_eq!(numeric_value("0,5"), Some(0.5));
        assert_eq!(numeric_value("2,0"), Some(2.0));
    }

    #[test]
    fn test_numeric_value_specials() {
        assert_eq!(numeric_value("?"), None);
        assert_eq!(numeric_value("∞"), None);
    }

    #[test]
    fn test_denominations_ascending() {
        let denoms = denominations();
        assert_eq!(denoms.first(), Some(&0.0));
        assert_eq!(denoms.last(), Some(&100.0));
        assert!(denoms.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_nearest_card_exact() {
        assert_eq!(nearest_card(2.0), Some("2"));
        assert_eq!(nearest_card(1.0), Some("1"));
    }

    #[test]
    fn test_nearest_card_tie_resolves_larger() {
        // 4.0 is equidistant from 3 and 5
        assert_eq!(nearest_card(4.0), Some("5"));
        // 0.25 is equidistant from 0 and 1/2
        assert_eq!(nearest_card(0.25), Some("1/2"));
    }

    #[test]
    fn test_nearest_card_rounds() {
        assert_eq!(nearest_card(6.9), Some("8"));
        assert_eq!(nearest_card(14.0), Some("13"));
        assert_eq!(nearest_card(250.0), Some("100"));
    }
}
