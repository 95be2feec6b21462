//! Vote aggregation
//!
//! Pure computation over the current room snapshot; never writes back.

use crate::deck;
use crate::models::Room;

/// Consensus statistics for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteSummary {
    /// Arithmetic mean of the numeric votes, absent when none were cast.
    pub average: Option<f64>,
    /// The deck card nearest to the average (ties resolve to the larger).
    pub nearest: Option<&'static str>,
    /// How many votes entered the average.
    pub counted: usize,
    /// Non-numeric votes (`?`, `∞`), displayed but not averaged.
    pub excluded: usize,
}

/// Summarize an iterator of vote tokens.
pub fn summarize<'a, I>(votes: I) -> VoteSummary
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sum = 0.0;
    let mut counted = 0usize;
    let mut excluded = 0usize;

    for vote in votes {
        match deck::numeric_value(vote) {
            Some(value) => {
                sum += value;
                counted += 1;
            }
            None => excluded += 1,
        }
    }

    if counted == 0 {
        return VoteSummary {
            average: None,
            nearest: None,
            counted,
            excluded,
        };
    }

    let average = sum / counted as f64;
    VoteSummary {
        average: Some(average),
        nearest: deck::nearest_card(average),
        counted,
        excluded,
    }
}

/// Summarize the cast votes of a room snapshot. Participants hidden by an
/// explicit-leave marker do not contribute.
pub fn summarize_room(room: &Room) -> VoteSummary {
    summarize(
        room.participants
            .values()
            .filter(|p| !p.has_left())
            .filter_map(|p| p.vote.as_deref()),
    )
}
