use serde::{Deserialize, Serialize};

use crate::settlement::market::{BttsSide, Direction, HandicapLine, Market, Side};
use crate::types::{MatchResult, Outcome1X2, SettlementStatus};

/// Outcome of evaluating one market against one result.
/// `payout` is `None` exactly when `outcome` is Pending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub outcome: SettlementStatus,
    pub payout: Option<f64>,
}

impl Settlement {
    pub fn pending() -> Self {
        Self { outcome: SettlementStatus::Pending, payout: None }
    }

    fn decided(won: bool, stake: f64, odds: f64) -> Self {
        let outcome = if won { SettlementStatus::Won } else { SettlementStatus::Lost };
        Self { outcome, payout: payout(outcome, stake, odds) }
    }
}

/// Net profit of a settled bet, rounded to cents. Won ⇒ `stake*(odds-1)`,
/// Lost ⇒ `-stake`, Pending ⇒ None.
pub fn payout(outcome: SettlementStatus, stake: f64, odds: f64) -> Option<f64> {
    match outcome {
        SettlementStatus::Won => Some(round_cents(stake * (odds - 1.0))),
        SettlementStatus::Lost => Some(round_cents(-stake)),
        SettlementStatus::Pending => None,
    }
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Decide a market against a result. Pure: same inputs, same output.
///
/// Anything that cannot be decided with certainty is Pending: an unknown market,
/// a result that is not final, or a corners/cards market whose statistic the feed
/// did not report. A late Pending is recoverable; a wrong Lost is not.
pub fn evaluate(market: &Market, result: &MatchResult, stake: f64, odds: f64) -> Settlement {
    if !result.is_complete() {
        return Settlement::pending();
    }

    let won = match *market {
        Market::Result1X2 { outcome } => result.outcome_1x2() == outcome,
        Market::BothTeamsScore { side } => {
            let both_scored = result.home_score > 0 && result.away_score > 0;
            both_scored == (side == BttsSide::Yes)
        }
        Market::TotalGoals { direction, threshold } => {
            compare(direction, result.total_goals(), threshold)
        }
        Market::TotalCorners { direction, threshold } => match result.total_corners() {
            Some(total) => compare(direction, total, threshold),
            None => return Settlement::pending(),
        },
        Market::TotalCards { direction, threshold } => match result.total_cards() {
            Some(total) => compare(direction, total, threshold),
            None => return Settlement::pending(),
        },
        Market::AsianHandicap { side, line } => {
            let side_outcome = match side {
                Side::Home => Outcome1X2::Home,
                Side::Away => Outcome1X2::Away,
            };
            let actual = result.outcome_1x2();
            match line {
                HandicapLine::MinusHalf => actual == side_outcome,
                HandicapLine::PlusHalf => actual == side_outcome || actual == Outcome1X2::Draw,
            }
        }
        Market::Unknown => return Settlement::pending(),
    };

    Settlement::decided(won, stake, odds)
}

fn compare(direction: Direction, total: u32, threshold: f64) -> bool {
    let total = f64::from(total);
    match direction {
        Direction::Over => total > threshold,
        Direction::Under => total < threshold,
    }
}
