//! Durable collection of prediction records.
//!
//! The store model is whole-ledger: load everything, mutate in memory, save
//! everything. Settlement logic only sees [`LedgerStore`], so a row-level store
//! can replace the file without touching it.

pub mod json_file;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PredictionRecord;

pub use json_file::JsonFileLedger;
pub use sqlite::SqliteLedger;

/// In-memory view of the ledger.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub records: Vec<PredictionRecord>,
    /// Entries that failed to decode or validate, kept verbatim so a save never
    /// drops them.
    pub quarantined: Vec<serde_json::Value>,
}

impl Ledger {
    pub fn new(records: Vec<PredictionRecord>) -> Self {
        let mut ledger = Self { records, quarantined: Vec::new() };
        ledger.assign_missing_ids();
        ledger
    }

    pub fn next_id(&self) -> u64 {
        self.records.iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    /// Give id-less (legacy) records an id, in ledger order.
    pub fn assign_missing_ids(&mut self) {
        let mut next = self.next_id();
        for rec in self.records.iter_mut().filter(|r| r.id == 0) {
            rec.id = next;
            next += 1;
        }
    }

    /// Add a freshly published tip as Pending and return its id.
    pub fn push(&mut self, mut record: PredictionRecord) -> u64 {
        record.id = self.next_id();
        record.reset_to_pending();
        let id = record.id;
        self.records.push(record);
        id
    }

    pub fn get(&self, id: u64) -> Option<&PredictionRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// Exclusive hold on a ledger across processes. Released on drop.
#[derive(Debug, Default)]
pub struct LedgerLock {
    _file: Option<std::fs::File>,
}

impl LedgerLock {
    /// For stores that need no external lock.
    pub fn none() -> Self {
        Self::default()
    }

    /// Wrap an open file that already holds an OS advisory lock.
    pub fn file(file: std::fs::File) -> Self {
        Self { _file: Some(file) }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Block until this caller is the only writer of the ledger, in this or
    /// any other process. A load-mutate-save cycle must happen under it.
    async fn lock(&self) -> Result<LedgerLock> {
        Ok(LedgerLock::none())
    }

    async fn load(&self) -> Result<Ledger>;

    /// Persist the whole ledger durably. Returns only once the data would
    /// survive a crash.
    async fn save(&self, ledger: &Ledger) -> Result<()>;

    /// Publish a new tip. Validates it, stores it as Pending, returns its id.
    async fn append(&self, record: PredictionRecord) -> Result<u64> {
        record
            .validate()
            .map_err(crate::error::AppError::BadRequest)?;
        let _lock = self.lock().await?;
        let mut ledger = self.load().await?;
        let id = ledger.push(record);
        self.save(&ledger).await?;
        Ok(id)
    }
}

/// Decode one raw ledger entry, validating field constraints.
pub(crate) fn decode_record(raw: &serde_json::Value) -> std::result::Result<PredictionRecord, String> {
    let rec: PredictionRecord = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    rec.validate()?;
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(id: u64) -> PredictionRecord {
        let mut r = PredictionRecord::new(
            NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            "A vs B",
            "L",
            "Draw",
            10.0,
            3.0,
        );
        r.id = id;
        r
    }

    #[test]
    fn legacy_records_get_ids_after_existing_max() {
        let ledger = Ledger::new(vec![rec(0), rec(7), rec(0)]);
        let ids: Vec<u64> = ledger.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![8, 7, 9]);
    }

    #[test]
    fn push_assigns_next_id_and_pending() {
        let mut ledger = Ledger::new(vec![rec(3)]);
        let mut fresh = rec(0);
        fresh.status = crate::types::SettlementStatus::Won;
        fresh.payout = Some(20.0);
        let id = ledger.push(fresh);
        assert_eq!(id, 4);
        let stored = ledger.get(4).unwrap();
        assert_eq!(stored.status, crate::types::SettlementStatus::Pending);
        assert_eq!(stored.payout, None);
    }

    #[test]
    fn decode_rejects_invalid_records() {
        let bad_odds = serde_json::json!({
            "event_date": "2025-08-04", "match_label": "A vs B", "market_text": "Draw",
            "stake": 10.0, "odds": 0.9
        });
        assert!(decode_record(&bad_odds).is_err());
        let bad_date = serde_json::json!({
            "event_date": "04/08/2025", "match_label": "A vs B", "market_text": "Draw",
            "stake": 10.0, "odds": 2.0
        });
        assert!(decode_record(&bad_date).is_err());
    }
}
