use std::path::PathBuf;

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::ledger::{decode_record, Ledger, LedgerLock, LedgerStore};

/// Flat JSON-array ledger file.
///
/// Saves go to a sibling temp file which is fsynced and renamed over the
/// original, so a crash leaves either the old or the new ledger, never a torn
/// one. A process-local mutex serialises load/save; [`LedgerStore::lock`]
/// takes an advisory lock on a sibling `.lock` file so a run and a publish in
/// different processes never interleave their load/save cycles.
pub struct JsonFileLedger {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), io_lock: Mutex::new(()) }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }
}

#[async_trait]
impl LedgerStore for JsonFileLedger {
    async fn lock(&self) -> Result<LedgerLock> {
        let path = self.lock_path();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| AppError::Ledger(format!("ledger lock task failed: {e}")))??;
        debug!("Ledger lock held on {}", self.lock_path().display());
        Ok(LedgerLock::file(file))
    }

    async fn load(&self) -> Result<Ledger> {
        let _guard = self.io_lock.lock().await;
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Ledger {} does not exist yet, starting empty", self.path.display());
                return Ok(Ledger::default());
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Ledger::default());
        }

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw)? {
            serde_json::Value::Array(a) => a,
            _ => {
                return Err(AppError::Ledger(format!(
                    "{} is not a JSON array",
                    self.path.display()
                )))
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        let mut quarantined = Vec::new();
        for (idx, entry) in entries.into_iter().enumerate() {
            match decode_record(&entry) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    warn!(index = idx, "[LEDGER] skipping corrupt entry: {e}");
                    quarantined.push(entry);
                }
            }
        }

        let mut ledger = Ledger::new(records);
        ledger.quarantined = quarantined;
        Ok(ledger)
    }

    async fn save(&self, ledger: &Ledger) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut entries = Vec::with_capacity(ledger.records.len() + ledger.quarantined.len());
        for rec in &ledger.records {
            entries.push(serde_json::to_value(rec)?);
        }
        entries.extend(ledger.quarantined.iter().cloned());
        let body = serde_json::to_vec_pretty(&entries)?;

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            records = ledger.records.len(),
            quarantined = ledger.quarantined.len(),
            "Ledger saved to {}",
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PredictionRecord, SettlementStatus};
    use chrono::NaiveDate;

    fn record(market: &str) -> PredictionRecord {
        PredictionRecord::new(
            NaiveDate::from_ymd_opt(2025, 8, 4).unwrap(),
            "Athletic Club vs Atlético GO",
            "Friendlies",
            market,
            10.0,
            1.4,
        )
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLedger::new(dir.path().join("nope.json"));
        let ledger = store.load().await.unwrap();
        assert!(ledger.records.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLedger::new(dir.path().join("ledger.json"));
        let id = store.append(record("Over 8.5 corners")).await.unwrap();
        store.append(record("Draw")).await.unwrap();

        let ledger = store.load().await.unwrap();
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.get(id).unwrap().market_text, "Over 8.5 corners");
        assert_eq!(ledger.get(id).unwrap().status, SettlementStatus::Pending);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn corrupt_entries_are_skipped_but_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let raw = serde_json::json!([
            {"event_date": "2025-08-04", "match_label": "A vs B", "league": "L",
             "market_text": "Draw", "stake": 10, "odds": 3.0, "status": "Pending",
             "result": null, "payout": null, "settled_at": null},
            {"event_date": "not a date", "match_label": "C vs D", "market_text": "Draw",
             "stake": 10, "odds": 3.0},
            "garbage"
        ]);
        tokio::fs::write(&path, raw.to_string()).await.unwrap();

        let store = JsonFileLedger::new(&path);
        let ledger = store.load().await.unwrap();
        assert_eq!(ledger.records.len(), 1);
        assert_eq!(ledger.quarantined.len(), 2);

        store.save(&ledger).await.unwrap();
        let written: Vec<serde_json::Value> =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written.len(), 3);
    }

    #[tokio::test]
    async fn non_array_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        tokio::fs::write(&path, r#"{"records": []}"#).await.unwrap();
        assert!(JsonFileLedger::new(&path).load().await.is_err());
    }

    #[tokio::test]
    async fn publish_from_another_handle_waits_for_the_lock_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let runner = JsonFileLedger::new(&path);
        let publisher = std::sync::Arc::new(JsonFileLedger::new(&path));
        runner.append(record("Draw")).await.unwrap();

        let lock = runner.lock().await.unwrap();
        let mut snapshot = runner.load().await.unwrap();

        let p = publisher.clone();
        let publish = tokio::spawn(async move { p.append(record("Over 8.5 corners")).await });
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert!(!publish.is_finished());

        // Write back the stale snapshot, as a reconciliation flush would.
        snapshot.records[0].status = SettlementStatus::Won;
        runner.save(&snapshot).await.unwrap();
        drop(lock);

        let id = publish.await.unwrap().unwrap();
        let ledger = runner.load().await.unwrap();
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.records[0].status, SettlementStatus::Won);
        assert_eq!(ledger.get(id).unwrap().market_text, "Over 8.5 corners");
    }

    #[tokio::test]
    async fn append_rejects_invalid_tip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileLedger::new(dir.path().join("ledger.json"));
        let mut bad = record("Draw");
        bad.odds = 1.0;
        assert!(matches!(store.append(bad).await, Err(AppError::BadRequest(_))));
    }
}
