use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::ledger::LedgerStore;
use crate::metrics::{compute_metrics, Metrics};
use crate::reconcile::ReconciliationJob;
use crate::types::{PredictionRecord, RunStats, SettlementStatus};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn LedgerStore>,
    pub job: Arc<ReconciliationJob>,
    /// Single writer: runs and publishes take this before touching the ledger.
    pub write_lock: Arc<tokio::sync::Mutex<()>>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub default_max_matches: usize,
    pub default_timeout: Duration,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/predictions", get(get_predictions).post(post_prediction))
        .route("/reconcile", axum::routing::post(post_reconcile))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct PredictionsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ReconcileQuery {
    pub max_matches: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct NewPrediction {
    pub event_date: NaiveDate,
    pub match_label: String,
    #[serde(default)]
    pub league: String,
    pub market_text: String,
    pub stake: f64,
    pub odds: f64,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub reconcile_running: bool,
    pub last_run_at: Option<u64>,
    pub runs_total: u64,
    pub runs_failed: u64,
    pub last_run: Option<RunStats>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let h = &state.health;
    let last_run_at = h.last_run_at();
    Json(HealthResponse {
        status: "ok",
        reconcile_running: h.reconcile_running(),
        last_run_at: (last_run_at > 0).then_some(last_run_at),
        runs_total: h.runs_total(),
        runs_failed: h.runs_failed(),
        last_run: h.last_run_stats(),
    })
}

async fn get_metrics(State(state): State<ApiState>) -> Result<Json<Metrics>, AppError> {
    let metrics = compute_metrics(state.store.as_ref()).await?;
    Ok(Json(metrics))
}

async fn get_predictions(
    State(state): State<ApiState>,
    Query(params): Query<PredictionsQuery>,
) -> Result<Json<Vec<PredictionRecord>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(SettlementStatus::from_str)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let ledger = state.store.load().await?;
    let records = ledger
        .records
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .collect();
    Ok(Json(records))
}

async fn post_prediction(
    State(state): State<ApiState>,
    Json(body): Json<NewPrediction>,
) -> Result<Json<CreatedResponse>, AppError> {
    let record = PredictionRecord::new(
        body.event_date,
        body.match_label,
        body.league,
        body.market_text,
        body.stake,
        body.odds,
    );
    let _guard = state.write_lock.lock().await;
    let id = state.store.append(record).await?;
    info!(id, "[API] published tip");
    Ok(Json(CreatedResponse { id }))
}

async fn post_reconcile(
    State(state): State<ApiState>,
    Query(params): Query<ReconcileQuery>,
) -> Result<Json<RunStats>, AppError> {
    let max_matches = params.max_matches.unwrap_or(state.default_max_matches);
    let timeout = params
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_timeout);
    if timeout.is_zero() {
        return Err(AppError::BadRequest("timeout_secs must be > 0".to_string()));
    }

    let _guard = state.write_lock.lock().await;
    state.health.run_started();
    let outcome = state.job.run(max_matches, timeout).await;
    let now = Utc::now().timestamp().max(0) as u64;
    match outcome {
        Ok(stats) => {
            state.health.run_finished(Some(&stats), now);
            Ok(Json(stats))
        }
        Err(e) => {
            error!("[API] reconciliation run failed: {e}");
            state.health.run_finished(None, now);
            Err(e)
        }
    }
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::feed::{FeedError, ResultFeedClient};
    use crate::ledger::JsonFileLedger;
    use crate::types::MatchResult;

    struct FinalScoreFeed;

    #[async_trait]
    impl ResultFeedClient for FinalScoreFeed {
        async fn get_result(
            &self,
            _date: NaiveDate,
            home_hint: &str,
            away_hint: &str,
        ) -> Result<Option<MatchResult>, FeedError> {
            Ok(Some(MatchResult {
                match_id: "77".to_string(),
                status: "Finished".to_string(),
                home_team: home_hint.to_string(),
                away_team: away_hint.to_string(),
                home_score: 2,
                away_score: 1,
                corners_home: 0,
                corners_away: 0,
                corners_available: false,
                cards_home: 0,
                cards_away: 0,
                cards_available: false,
            }))
        }
    }

    fn state(dir: &tempfile::TempDir) -> ApiState {
        let store: Arc<dyn LedgerStore> = Arc::new(JsonFileLedger::new(dir.path().join("ledger.json")));
        let job = ReconciliationJob::new(store.clone(), Arc::new(FinalScoreFeed));
        ApiState {
            store,
            job: Arc::new(job),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            default_max_matches: 10,
            default_timeout: Duration::from_secs(5),
        }
    }

    fn tip(market: &str) -> NewPrediction {
        NewPrediction {
            event_date: NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            match_label: "Arsenal vs Chelsea".to_string(),
            league: "Premier League".to_string(),
            market_text: market.to_string(),
            stake: 10.0,
            odds: 1.8,
        }
    }

    #[tokio::test]
    async fn publish_reconcile_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);

        post_prediction(State(st.clone()), Json(tip("Over 1.5 goals"))).await.unwrap();
        post_prediction(State(st.clone()), Json(tip("Over 9.5 corners"))).await.unwrap();

        let Json(stats) = post_reconcile(State(st.clone()), Query(ReconcileQuery::default()))
            .await
            .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.left_pending, 1);

        let Json(pending) = get_predictions(
            State(st.clone()),
            Query(PredictionsQuery { status: Some("pending".to_string()) }),
        )
        .await
        .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].market_text, "Over 9.5 corners");

        let Json(metrics) = get_metrics(State(st.clone())).await.unwrap();
        assert_eq!(metrics.overall.wins, 1);
        assert_eq!(metrics.overall.total_payout, 8.0);

        let Json(health) = get_health(State(st)).await;
        assert_eq!(health.runs_total, 1);
        assert_eq!(health.last_run.unwrap().updated, 1);
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let st = state(&dir);

        let mut bad = tip("Draw");
        bad.stake = 0.0;
        assert!(matches!(
            post_prediction(State(st.clone()), Json(bad)).await,
            Err(AppError::BadRequest(_))
        ));

        assert!(matches!(
            get_predictions(
                State(st.clone()),
                Query(PredictionsQuery { status: Some("void".to_string()) })
            )
            .await,
            Err(AppError::BadRequest(_))
        ));

        let zero = ReconcileQuery { max_matches: None, timeout_secs: Some(0) };
        assert!(matches!(
            post_reconcile(State(st), Query(zero)).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
