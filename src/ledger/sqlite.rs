use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use crate::error::Result;
use crate::ledger::{Ledger, LedgerStore};
use crate::types::{MatchResult, PredictionRecord, SettlementStatus};

/// Row shape of the `predictions` table.
#[derive(Debug, sqlx::FromRow)]
pub struct PredictionRow {
    pub id: i64,
    pub event_date: String,
    pub match_label: String,
    pub league: String,
    pub market_text: String,
    pub stake: f64,
    pub odds: f64,
    pub status: String,
    pub result: Option<String>,
    pub payout: Option<f64>,
    pub settled_at: Option<String>,
    pub last_checked_at: Option<String>,
}

impl PredictionRow {
    fn into_record(self) -> std::result::Result<PredictionRecord, String> {
        let event_date = NaiveDate::parse_from_str(&self.event_date, "%Y-%m-%d")
            .map_err(|e| format!("bad event_date '{}': {e}", self.event_date))?;
        let status = SettlementStatus::from_str(&self.status)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<MatchResult>)
            .transpose()
            .map_err(|e| format!("bad result json: {e}"))?;
        let settled_at = self
            .settled_at
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| format!("bad settled_at: {e}"))?
            .map(|t| t.with_timezone(&Utc));
        let last_checked_at = self
            .last_checked_at
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| format!("bad last_checked_at: {e}"))?
            .map(|t| t.with_timezone(&Utc));

        let rec = PredictionRecord {
            id: self.id as u64,
            event_date,
            match_label: self.match_label,
            league: self.league,
            market_text: self.market_text,
            stake: self.stake,
            odds: self.odds,
            status,
            result,
            payout: self.payout,
            settled_at,
            last_checked_at,
        };
        rec.validate()?;
        Ok(rec)
    }
}

/// SQLite-backed ledger.
///
/// `save` upserts every record in one transaction, keeping the whole-ledger
/// contract; `append` is a single-row insert. Rows that fail to decode are
/// skipped on load and never touched by `save`.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub async fn connect(db_path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        let ledger = Self::from_pool(pool).await?;
        info!("Ledger database ready at {db_path}");
        Ok(ledger)
    }

    /// Wrap an existing pool and run migrations on it.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn load(&self) -> Result<Ledger> {
        let rows: Vec<PredictionRow> = sqlx::query_as(
            r#"
            SELECT id, event_date, match_label, league, market_text, stake, odds,
                   status, result, payout, settled_at, last_checked_at
            FROM predictions
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut quarantined = Vec::new();
        for row in rows {
            let id = row.id;
            match row.into_record() {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    warn!(id, "[LEDGER] skipping corrupt row: {e}");
                    quarantined.push(serde_json::json!({ "id": id, "error": e }));
                }
            }
        }
        Ok(Ledger { records, quarantined })
    }

    async fn save(&self, ledger: &Ledger) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for rec in &ledger.records {
            let result = rec.result.as_ref().map(serde_json::to_string).transpose()?;
            let settled_at = rec.settled_at.map(|t| t.to_rfc3339());
            let last_checked_at = rec.last_checked_at.map(|t| t.to_rfc3339());
            sqlx::query(
                r#"
                INSERT INTO predictions (
                    id, event_date, match_label, league, market_text, stake, odds,
                    status, result, payout, settled_at, last_checked_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    event_date = excluded.event_date,
                    match_label = excluded.match_label,
                    league = excluded.league,
                    market_text = excluded.market_text,
                    stake = excluded.stake,
                    odds = excluded.odds,
                    status = excluded.status,
                    result = excluded.result,
                    payout = excluded.payout,
                    settled_at = excluded.settled_at,
                    last_checked_at = excluded.last_checked_at
                "#,
            )
            .bind(rec.id as i64)
            .bind(rec.event_date.format("%Y-%m-%d").to_string())
            .bind(&rec.match_label)
            .bind(&rec.league)
            .bind(&rec.market_text)
            .bind(rec.stake)
            .bind(rec.odds)
            .bind(rec.status.to_string())
            .bind(result)
            .bind(rec.payout)
            .bind(settled_at)
            .bind(last_checked_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append(&self, record: PredictionRecord) -> Result<u64> {
        record
            .validate()
            .map_err(crate::error::AppError::BadRequest)?;
        let done = sqlx::query(
            r#"
            INSERT INTO predictions (event_date, match_label, league, market_text, stake, odds, status)
            VALUES (?, ?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(record.event_date.format("%Y-%m-%d").to_string())
        .bind(&record.match_label)
        .bind(&record.league)
        .bind(&record.market_text)
        .bind(record.stake)
        .bind(record.odds)
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_ledger() -> SqliteLedger {
        // One connection: every new connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteLedger::from_pool(pool).await.unwrap()
    }

    fn record(market: &str) -> PredictionRecord {
        PredictionRecord::new(
            NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            "Arsenal vs Chelsea",
            "Premier League",
            market,
            10.0,
            2.0,
        )
    }

    #[tokio::test]
    async fn append_and_load() {
        let store = memory_ledger().await;
        let a = store.append(record("Draw")).await.unwrap();
        let b = store.append(record("Over 2.5 goals")).await.unwrap();
        assert_ne!(a, b);
        let ledger = store.load().await.unwrap();
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.get(b).unwrap().market_text, "Over 2.5 goals");
    }

    #[tokio::test]
    async fn save_updates_settlement_in_place() {
        let store = memory_ledger().await;
        let id = store.append(record("Draw")).await.unwrap();
        let mut ledger = store.load().await.unwrap();

        let result = MatchResult {
            match_id: "9".to_string(),
            status: "FT".to_string(),
            home_team: "Arsenal".to_string(),
            away_team: "Chelsea".to_string(),
            home_score: 1,
            away_score: 1,
            corners_home: 0,
            corners_away: 0,
            corners_available: false,
            cards_home: 0,
            cards_away: 0,
            cards_available: false,
        };
        let rec = ledger.records.iter_mut().find(|r| r.id == id).unwrap();
        rec.mark_settled(SettlementStatus::Won, result.clone(), 10.0, Utc::now());
        store.save(&ledger).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded.records.len(), 1);
        let rec = reloaded.get(id).unwrap();
        assert_eq!(rec.status, SettlementStatus::Won);
        assert_eq!(rec.result.as_ref(), Some(&result));
        assert_eq!(rec.payout, Some(10.0));
        assert!(rec.settled_at.is_some());
    }

    #[tokio::test]
    async fn last_checked_at_survives_a_save() {
        let store = memory_ledger().await;
        let id = store.append(record("Over 9.5 corners")).await.unwrap();
        let mut ledger = store.load().await.unwrap();
        assert_eq!(ledger.get(id).unwrap().last_checked_at, None);

        let checked = Utc::now();
        ledger.records[0].last_checked_at = Some(checked);
        store.save(&ledger).await.unwrap();

        let reloaded = store.load().await.unwrap();
        let got = reloaded.get(id).unwrap().last_checked_at.unwrap();
        assert_eq!(got.timestamp_micros(), checked.timestamp_micros());
    }

    #[tokio::test]
    async fn corrupt_rows_are_skipped_and_left_alone() {
        let store = memory_ledger().await;
        store.append(record("Draw")).await.unwrap();
        sqlx::query(
            "INSERT INTO predictions (event_date, match_label, market_text, stake, odds, status) \
             VALUES ('bad-date', 'X vs Y', 'Draw', 5.0, 2.0, 'pending')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let ledger = store.load().await.unwrap();
        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.quarantined.len(), 1);

        store.save(&ledger).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
