use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VALID_COMPLETE_STATUSES;

// ---------------------------------------------------------------------------
// Settlement status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    #[default]
    #[serde(alias = "Pending", alias = "PENDING")]
    Pending,
    #[serde(alias = "Won", alias = "WON", alias = "win")]
    Won,
    #[serde(alias = "Lost", alias = "LOST", alias = "loss")]
    Lost,
}

impl SettlementStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, SettlementStatus::Pending)
    }
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Won => "won",
            SettlementStatus::Lost => "lost",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SettlementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(SettlementStatus::Pending),
            "won" | "win" => Ok(SettlementStatus::Won),
            "lost" | "loss" => Ok(SettlementStatus::Lost),
            other => Err(format!("unknown settlement status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Match result (as reported by the feed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome1X2 {
    Home,
    Draw,
    Away,
}

impl std::fmt::Display for Outcome1X2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome1X2::Home => write!(f, "home"),
            Outcome1X2::Draw => write!(f, "draw"),
            Outcome1X2::Away => write!(f, "away"),
        }
    }
}

/// Final (or in-progress) score of one fixture. Corner and card counts are only
/// meaningful when the matching `*_available` flag is set; a missing statistic is
/// not the same as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: String,
    pub status: String,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    #[serde(default)]
    pub corners_home: u32,
    #[serde(default)]
    pub corners_away: u32,
    #[serde(default)]
    pub corners_available: bool,
    #[serde(default)]
    pub cards_home: u32,
    #[serde(default)]
    pub cards_away: u32,
    #[serde(default)]
    pub cards_available: bool,
}

impl MatchResult {
    pub fn total_goals(&self) -> u32 {
        self.home_score.saturating_add(self.away_score)
    }

    /// `None` when the feed did not report corners for this fixture.
    pub fn total_corners(&self) -> Option<u32> {
        self.corners_available
            .then(|| self.corners_home.saturating_add(self.corners_away))
    }

    /// `None` when the feed did not report cards for this fixture.
    pub fn total_cards(&self) -> Option<u32> {
        self.cards_available
            .then(|| self.cards_home.saturating_add(self.cards_away))
    }

    pub fn outcome_1x2(&self) -> Outcome1X2 {
        match self.home_score.cmp(&self.away_score) {
            std::cmp::Ordering::Greater => Outcome1X2::Home,
            std::cmp::Ordering::Equal => Outcome1X2::Draw,
            std::cmp::Ordering::Less => Outcome1X2::Away,
        }
    }

    pub fn is_complete(&self) -> bool {
        is_complete_status(&self.status)
    }
}

/// True if a feed status string means the score is final.
pub fn is_complete_status(status: &str) -> bool {
    let s = status.trim().to_lowercase();
    VALID_COMPLETE_STATUSES.contains(&s.as_str())
}

// ---------------------------------------------------------------------------
// Prediction record (one ledger row)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Assigned on publish. Legacy files without ids get one on load.
    #[serde(default)]
    pub id: u64,
    pub event_date: NaiveDate,
    /// Free text, "Home vs Away".
    pub match_label: String,
    #[serde(default)]
    pub league: String,
    /// Source of truth for what was bet on.
    pub market_text: String,
    pub stake: f64,
    pub odds: f64,
    #[serde(default)]
    pub status: SettlementStatus,
    #[serde(default)]
    pub result: Option<MatchResult>,
    #[serde(default)]
    pub payout: Option<f64>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    /// Last time reconciliation looked this record's match up. Drives batch
    /// order so matches that never settle do not starve newer ones.
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl PredictionRecord {
    pub fn new(
        event_date: NaiveDate,
        match_label: impl Into<String>,
        league: impl Into<String>,
        market_text: impl Into<String>,
        stake: f64,
        odds: f64,
    ) -> Self {
        Self {
            id: 0,
            event_date,
            match_label: match_label.into(),
            league: league.into(),
            market_text: market_text.into(),
            stake,
            odds,
            status: SettlementStatus::Pending,
            result: None,
            payout: None,
            settled_at: None,
            last_checked_at: None,
        }
    }

    /// Checks the field-level constraints a record must satisfy to be settled.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stake > 0.0) {
            return Err(format!("stake must be > 0, got {}", self.stake));
        }
        if !(self.odds > 1.0) {
            return Err(format!("odds must be > 1, got {}", self.odds));
        }
        if self.match_label.trim().is_empty() {
            return Err("match_label is empty".to_string());
        }
        Ok(())
    }

    /// Key used to group predictions that refer to the same real match.
    pub fn match_key(&self) -> MatchKey {
        MatchKey {
            event_date: self.event_date,
            match_label: self.match_label.trim().to_string(),
        }
    }

    pub fn mark_settled(
        &mut self,
        status: SettlementStatus,
        result: MatchResult,
        payout: f64,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.result = Some(result);
        self.payout = Some(payout);
        self.settled_at = Some(at);
    }

    pub fn reset_to_pending(&mut self) {
        self.status = SettlementStatus::Pending;
        self.result = None;
        self.payout = None;
        self.settled_at = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchKey {
    pub event_date: NaiveDate,
    pub match_label: String,
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.event_date, self.match_label)
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Summary of one reconciliation invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Records moved from Pending to Won/Lost.
    pub updated: usize,
    pub errors: usize,
    /// Matches with no complete result yet (`not_found + not_ready`).
    pub incomplete: usize,
    pub timeouts: usize,
    pub unique_matches_processed: usize,
    pub unique_matches_remaining: usize,
    /// No fixture matched the team names on any tolerated date.
    pub not_found: usize,
    /// A fixture matched but its status is not final.
    pub not_ready: usize,
    /// Settled records reverted to Pending by the correction pass.
    pub reverted: usize,
    /// Predictions the evaluator could not decide on a complete result.
    pub left_pending: usize,
    pub flush_failures: usize,
    /// Pending matches skipped because none of their markets parse.
    pub unparseable: usize,
}
