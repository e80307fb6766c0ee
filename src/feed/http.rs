use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::api::latency::LatencyStats;
use crate::config::{Config, FEED_RETRY_BACKOFF_MS};
use crate::feed::{FeedError, ResultFeedClient};
use crate::matcher::{names_match, teams_match};
use crate::types::{is_complete_status, MatchResult};

const CORNERS_STAT: &str = "Corner Kicks";
const YELLOW_CARDS_STAT: &str = "Yellow Cards";
const RED_CARDS_STAT: &str = "Red Cards";

/// REST client for an API-Football style fixtures API.
///
/// `/fixtures?date=` gives scores and status for every fixture on a day;
/// `/fixtures/statistics?fixture=` gives corners and cards, fetched only once a
/// fixture is final. Transport errors, 429 and 5xx are retried with the
/// `FEED_RETRY_BACKOFF_MS` schedule.
pub struct HttpResultFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    latency: Option<Arc<LatencyStats>>,
}

impl HttpResultFeed {
    pub fn new(cfg: &Config) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.feed_http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.feed_api_url.trim_end_matches('/').to_string(),
            api_key: cfg.feed_api_key.clone(),
            latency: None,
        })
    }

    /// Record every HTTP round trip into `latency`.
    pub fn with_latency(mut self, latency: Arc<LatencyStats>) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, FeedError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0usize;
        loop {
            match self.get_json_once(&url, query).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < FEED_RETRY_BACKOFF_MS.len() => {
                    let delay_ms = FEED_RETRY_BACKOFF_MS[attempt];
                    attempt += 1;
                    warn!("[FEED] {path} failed ({e}), retry {attempt} in {delay_ms}ms");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json_once(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value, FeedError> {
        let started = Instant::now();
        let resp = self
            .client
            .get(url)
            .header("x-apisports-key", &self.api_key)
            .query(query)
            .send()
            .await;
        if let Some(latency) = &self.latency {
            latency.record(started.elapsed());
        }

        let resp = resp?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }
        let body: serde_json::Value = resp.json().await?;
        check_api_errors(&body)?;
        Ok(body)
    }

    async fn fetch_fixtures(&self, date: NaiveDate) -> Result<Vec<serde_json::Value>, FeedError> {
        let body = self
            .get_json("/fixtures", &[("date", date.format("%Y-%m-%d").to_string())])
            .await?;
        match body.get("response").and_then(|r| r.as_array()) {
            Some(items) => Ok(items.clone()),
            None => Err(FeedError::Malformed(
                "/fixtures response has no 'response' array".to_string(),
            )),
        }
    }

    /// Fill corner and card counts. Any failure leaves the availability flags
    /// false, which keeps those markets Pending rather than failing the match.
    async fn attach_statistics(&self, result: &mut MatchResult) {
        let body = match self
            .get_json("/fixtures/statistics", &[("fixture", result.match_id.clone())])
            .await
        {
            Ok(b) => b,
            Err(e) => {
                warn!(match_id = %result.match_id, "[FEED] statistics unavailable: {e}");
                return;
            }
        };
        let Some(teams) = body.get("response").and_then(|r| r.as_array()) else {
            warn!(match_id = %result.match_id, "[FEED] statistics response has no 'response' array");
            return;
        };
        apply_statistics(result, teams);
    }
}

#[async_trait]
impl ResultFeedClient for HttpResultFeed {
    async fn get_result(
        &self,
        date: NaiveDate,
        home_hint: &str,
        away_hint: &str,
    ) -> Result<Option<MatchResult>, FeedError> {
        let fixtures = self.fetch_fixtures(date).await?;
        debug!("[FEED] {} fixtures on {date}", fixtures.len());

        let mut candidates: Vec<MatchResult> = fixtures
            .iter()
            .filter_map(parse_fixture)
            .filter(|r| teams_match(home_hint, away_hint, &r.home_team, &r.away_team))
            .collect();
        if candidates.len() > 1 {
            debug!(
                "[FEED] {} fixtures on {date} match '{home_hint}' vs '{away_hint}', preferring a final one",
                candidates.len()
            );
        }
        if candidates.is_empty() {
            return Ok(None);
        }
        // Prefer a final score when the names are loose enough to hit more than one fixture.
        let idx = candidates.iter().position(|r| r.is_complete()).unwrap_or(0);
        let mut result = candidates.swap_remove(idx);

        if result.is_complete() {
            self.attach_statistics(&mut result).await;
        }
        Ok(Some(result))
    }
}

/// API-Football answers 200 with a non-empty `errors` field on auth or quota
/// problems. Rate limiting maps to 429 so it is retried.
fn check_api_errors(body: &serde_json::Value) -> Result<(), FeedError> {
    let Some(errors) = body.get("errors") else {
        return Ok(());
    };
    let empty = match errors {
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::Null => true,
        _ => false,
    };
    if empty {
        return Ok(());
    }
    if errors.get("rateLimit").is_some() || errors.get("requests").is_some() {
        return Err(FeedError::Status(429));
    }
    Err(FeedError::Malformed(format!("feed reported errors: {errors}")))
}

/// Parse one `/fixtures` item. Returns None if it is structurally unusable.
pub fn parse_fixture(v: &serde_json::Value) -> Option<MatchResult> {
    let fixture = v.get("fixture")?;
    let match_id = match fixture.get("id")? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => return None,
    };
    let status = fixture
        .get("status")
        .and_then(|s| s.get("short"))
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();

    let teams = v.get("teams")?;
    let home_team = teams.get("home")?.get("name")?.as_str()?.to_string();
    let away_team = teams.get("away")?.get("name")?.as_str()?.to_string();

    let goals = v.get("goals");
    let goal = |side: &str| {
        goals
            .and_then(|g| g.get(side))
            .and_then(|x| x.as_u64())
            .and_then(|n| u32::try_from(n).ok())
    };
    let (home_score, away_score) = match (goal("home"), goal("away")) {
        (Some(h), Some(a)) => (h, a),
        // A final status without a score is not a usable result.
        _ if is_complete_status(&status) => return None,
        _ => (0, 0),
    };

    Some(MatchResult {
        match_id,
        status,
        home_team,
        away_team,
        home_score,
        away_score,
        corners_home: 0,
        corners_away: 0,
        corners_available: false,
        cards_home: 0,
        cards_away: 0,
        cards_available: false,
    })
}

/// Apply a `/fixtures/statistics` payload (one entry per team) to `result`.
/// A statistic counts as available only when both teams report its type;
/// a reported `null` value means zero.
pub fn apply_statistics(result: &mut MatchResult, teams: &[serde_json::Value]) {
    if teams.len() != 2 {
        return;
    }
    let team_name = |t: &serde_json::Value| {
        t.get("team")
            .and_then(|x| x.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string()
    };
    // Entries are normally home first; swap if the names say otherwise.
    let (home, away) = if !names_match(&team_name(&teams[0]), &result.home_team)
        && names_match(&team_name(&teams[1]), &result.home_team)
    {
        (&teams[1], &teams[0])
    } else {
        (&teams[0], &teams[1])
    };

    if let (Some(h), Some(a)) = (stat(home, CORNERS_STAT), stat(away, CORNERS_STAT)) {
        result.corners_home = h;
        result.corners_away = a;
        result.corners_available = true;
    }
    if let (Some(hy), Some(ay)) = (stat(home, YELLOW_CARDS_STAT), stat(away, YELLOW_CARDS_STAT)) {
        result.cards_home = hy + stat(home, RED_CARDS_STAT).unwrap_or(0);
        result.cards_away = ay + stat(away, RED_CARDS_STAT).unwrap_or(0);
        result.cards_available = true;
    }
}

/// `None` if the type is absent; `Some(0)` if present with a null value.
fn stat(team: &serde_json::Value, kind: &str) -> Option<u32> {
    let entry = team
        .get("statistics")?
        .as_array()?
        .iter()
        .find(|s| s.get("type").and_then(|t| t.as_str()) == Some(kind))?;
    match entry.get("value") {
        None | Some(serde_json::Value::Null) => Some(0),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .and_then(|n| u32::try_from(n).ok()),
    }
}
