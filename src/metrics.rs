//! Read-only performance metrics over the ledger.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::matcher::split_match_label;
use crate::settlement::{parse_market, parse_market_for};
use crate::types::{PredictionRecord, SettlementStatus};

/// Counts and money for one slice of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Breakdown {
    pub total: usize,
    pub resolved: usize,
    pub pending: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of resolved records that won.
    pub win_rate: f64,
    /// Sum of stakes on resolved records.
    pub total_stake: f64,
    /// Net profit over resolved records.
    pub total_payout: f64,
    /// Percent return on resolved stake.
    pub roi: f64,
    pub pending_stake: f64,
}

impl Breakdown {
    fn add(&mut self, rec: &PredictionRecord) {
        self.total += 1;
        match rec.status {
            SettlementStatus::Pending => {
                self.pending += 1;
                self.pending_stake += rec.stake;
                return;
            }
            SettlementStatus::Won => self.wins += 1,
            SettlementStatus::Lost => self.losses += 1,
        }
        self.resolved += 1;
        self.total_stake += rec.stake;
        self.total_payout += rec.payout.unwrap_or(0.0);
    }

    fn finish(&mut self) {
        self.win_rate = percent(self.wins as f64, self.resolved as f64);
        self.roi = percent(self.total_payout, self.total_stake);
        self.total_stake = round2(self.total_stake);
        self.total_payout = round2(self.total_payout);
        self.pending_stake = round2(self.pending_stake);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    #[serde(flatten)]
    pub overall: Breakdown,
    /// Keyed by market family ("total_corners", "1x2", ..., "unknown").
    pub per_market: BTreeMap<String, Breakdown>,
    /// Keyed by league; records without one fall under "".
    pub per_league: BTreeMap<String, Breakdown>,
}

/// Aggregate a snapshot of records. Pure; never touches storage.
pub fn aggregate(records: &[PredictionRecord]) -> Metrics {
    let mut metrics = Metrics::default();
    for rec in records {
        metrics.overall.add(rec);
        metrics
            .per_market
            .entry(market_kind(rec).to_string())
            .or_default()
            .add(rec);
        metrics
            .per_league
            .entry(rec.league.trim().to_string())
            .or_default()
            .add(rec);
    }

    metrics.overall.finish();
    metrics.per_market.values_mut().for_each(Breakdown::finish);
    metrics.per_league.values_mut().for_each(Breakdown::finish);
    metrics
}

/// Load the ledger and aggregate it.
pub async fn compute_metrics(store: &dyn LedgerStore) -> Result<Metrics> {
    let ledger = store.load().await?;
    Ok(aggregate(&ledger.records))
}

fn market_kind(rec: &PredictionRecord) -> &'static str {
    let market = match split_match_label(&rec.match_label) {
        Some((home, away)) => parse_market_for(&rec.market_text, &home, &away),
        None => parse_market(&rec.market_text),
    };
    market.kind()
}

fn percent(num: f64, den: f64) -> f64 {
    if den <= 0.0 {
        return 0.0;
    }
    round2(num / den * 100.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(market: &str, league: &str, status: SettlementStatus, stake: f64, odds: f64) -> PredictionRecord {
        let mut r = PredictionRecord::new(
            NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            "Arsenal vs Chelsea",
            league,
            market,
            stake,
            odds,
        );
        r.status = status;
        r.payout = crate::settlement::evaluator::payout(status, stake, odds);
        r
    }

    #[test]
    fn six_won_four_lost_five_pending() {
        let mut records = Vec::new();
        for _ in 0..6 {
            records.push(rec("Over 2.5 goals", "Premier League", SettlementStatus::Won, 10.0, 2.0));
        }
        for _ in 0..4 {
            records.push(rec("Draw", "Premier League", SettlementStatus::Lost, 10.0, 3.0));
        }
        for _ in 0..5 {
            records.push(rec("Over 9.5 corners", "Serie A", SettlementStatus::Pending, 10.0, 1.8));
        }

        let m = aggregate(&records);
        assert_eq!(m.overall.total, 15);
        assert_eq!(m.overall.resolved, 10);
        assert_eq!(m.overall.pending, 5);
        assert_eq!(m.overall.wins, 6);
        assert_eq!(m.overall.losses, 4);
        assert_eq!(m.overall.win_rate, 60.0);
        assert_eq!(m.overall.total_stake, 100.0);
        // 6 * 10 - 4 * 10
        assert_eq!(m.overall.total_payout, 20.0);
        assert_eq!(m.overall.roi, 20.0);
        assert_eq!(m.overall.pending_stake, 50.0);

        assert_eq!(m.per_market["total_goals"].wins, 6);
        assert_eq!(m.per_market["1x2"].losses, 4);
        assert_eq!(m.per_market["total_corners"].pending, 5);
        assert_eq!(m.per_league["Premier League"].resolved, 10);
        assert_eq!(m.per_league["Serie A"].win_rate, 0.0);
    }

    #[test]
    fn empty_or_all_pending_has_zero_rates() {
        let m = aggregate(&[]);
        assert_eq!(m.overall.total, 0);
        assert_eq!(m.overall.win_rate, 0.0);
        assert_eq!(m.overall.roi, 0.0);

        let m = aggregate(&[rec("Draw", "", SettlementStatus::Pending, 5.0, 3.0)]);
        assert_eq!(m.overall.resolved, 0);
        assert_eq!(m.overall.win_rate, 0.0);
        assert_eq!(m.overall.roi, 0.0);
        assert_eq!(m.overall.total_stake, 0.0);
    }

    #[test]
    fn unparseable_markets_are_bucketed_as_unknown() {
        let m = aggregate(&[rec("Correct score 2-1", "L", SettlementStatus::Pending, 5.0, 9.0)]);
        assert_eq!(m.per_market["unknown"].total, 1);
    }

    #[test]
    fn overall_fields_are_flattened_in_json() {
        let m = aggregate(&[rec("Draw", "L", SettlementStatus::Won, 10.0, 3.0)]);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["win_rate"], 100.0);
        assert_eq!(v["total_payout"], 20.0);
        assert!(v["per_market"]["1x2"].is_object());
    }
}
