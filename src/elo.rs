// Elo rating calculation for 1v1 character battles.
//
// Fixed K of 32, no rating floor, and no draws: every battle produces a
// definite winner, so scores are always 1/0.

use serde::{Deserialize, Serialize};

pub const STARTING_ELO: i32 = 1000;
pub const K_FACTOR: f64 = 32.0;

/// Battle outcome from the perspective of one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
        }
    }
}

/// Calculate expected score for player A against player B.
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// Calculate the new rating after a battle. Both participants must be fed
/// their PRE-battle ratings; the two updates are independent of each other.
pub fn calculate_new_rating(rating: i32, opponent_rating: i32, outcome: Outcome) -> i32 {
    let expected = expected_score(rating, opponent_rating);
    (rating as f64 + K_FACTOR * (outcome.score() - expected)).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_score_equal_ratings() {
        let e = expected_score(1000, 1000);
        assert!((e - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_expected_score_higher_rated() {
        let e = expected_score(1300, 1000);
        assert!(e > 0.8);
        assert!(e < 1.0);
    }

    #[test]
    fn test_expected_score_lower_rated() {
        let e = expected_score(700, 1000);
        assert!(e < 0.2);
        assert!(e > 0.0);
    }

    #[test]
    fn test_new_rating_win_equal() {
        // K=32, expected=0.5, 1000 + 32*(1-0.5) = 1016
        assert_eq!(calculate_new_rating(1000, 1000, Outcome::Win), 1016);
    }

    #[test]
    fn test_new_rating_loss_equal() {
        assert_eq!(calculate_new_rating(1000, 1000, Outcome::Loss), 984);
    }

    #[test]
    fn test_favored_winner_exact_values() {
        // E = 1/(1+10^((1000-1200)/400)), winner = round(1200 + 32*(1-E)),
        // loser = round(1000 - 32*(1-E)).
        assert_eq!(calculate_new_rating(1200, 1000, Outcome::Win), 1208);
        assert_eq!(calculate_new_rating(1000, 1200, Outcome::Loss), 992);
    }

    #[test]
    fn test_upset_moves_more_points() {
        let underdog = calculate_new_rating(1000, 1200, Outcome::Win);
        let favorite = calculate_new_rating(1200, 1000, Outcome::Loss);
        assert_eq!(underdog, 1024);
        assert_eq!(favorite, 1176);
        // An upset shifts more points than a win by the favorite would.
        assert!(underdog - 1000 > calculate_new_rating(1200, 1000, Outcome::Win) - 1200);
    }

    #[test]
    fn test_zero_sum() {
        for (r_a, r_b) in [(1000, 1000), (1200, 1000), (1534, 871), (1000, 2400)] {
            let new_a = calculate_new_rating(r_a, r_b, Outcome::Win);
            let new_b = calculate_new_rating(r_b, r_a, Outcome::Loss);
            // Both sides are computed from the same pre-battle expected
            // scores, so gains and losses cancel up to rounding.
            assert!(((new_a - r_a) + (new_b - r_b)).abs() <= 1);
        }
    }
}
