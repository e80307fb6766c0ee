use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::RESULT_CACHE_TTL_SECS;
use crate::error::Result;
use crate::feed::{FeedError, ResultCache, ResultFeedClient};
use crate::ledger::{Ledger, LedgerStore};
use crate::matcher::{candidate_dates, split_match_label};
use crate::settlement::{evaluate, parse_market, parse_market_for, Market};
use crate::types::{MatchKey, MatchResult, PredictionRecord, RunStats};

/// What a date-tolerant lookup for one match produced.
#[derive(Debug)]
enum Lookup {
    Complete(MatchResult),
    /// A fixture matched but no tolerated date had a final score.
    NotReady,
    NotFound,
    Failed(FeedError),
    TimedOut,
    /// The match label could not be split into two team names.
    BadLabel,
}

/// Settles Pending ledger records against the result feed.
///
/// One `run` is one bounded unit of work: at most `max_matches` unique matches,
/// each lookup capped by `per_match_timeout`. Everything left over is picked up
/// by the next run. The ledger is flushed after every match that settled
/// something, so a crash mid-run loses at most the match in flight.
pub struct ReconciliationJob {
    store: Arc<dyn LedgerStore>,
    feed: Arc<dyn ResultFeedClient>,
    concurrency: usize,
}

impl ReconciliationJob {
    pub fn new(store: Arc<dyn LedgerStore>, feed: Arc<dyn ResultFeedClient>) -> Self {
        Self { store, feed, concurrency: 1 }
    }

    /// Number of feed lookups in flight at once. Settlement and flushing stay
    /// sequential, one match at a time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self, max_matches: usize, per_match_timeout: Duration) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let _lock = self.store.lock().await?;
        let mut ledger = self.store.load().await?;

        // --- Correction pass ---
        let corrected = correction_pass(&mut ledger.records, &mut stats);
        if corrected > 0 {
            if let Err(e) = self.store.save(&ledger).await {
                error!("[RECONCILE] flush after correction pass failed: {e}");
                stats.flush_failures += 1;
                stats.errors += 1;
            }
        }

        // --- Group pending records by match ---
        let (buckets, unparseable) = plan_batch(&ledger.records);
        stats.unparseable = unparseable;
        let total_matches = buckets.len();
        let batch: Vec<(MatchKey, Vec<usize>)> = buckets.into_iter().take(max_matches).collect();
        stats.unique_matches_processed = batch.len();
        stats.unique_matches_remaining = total_matches - batch.len();
        info!(
            pending_matches = total_matches,
            batch = batch.len(),
            "[RECONCILE] starting: {} of {} pending matches this run",
            batch.len(),
            total_matches
        );

        // --- Look up and settle, one match at a time ---
        let cache = ResultCache::new(Duration::from_secs(RESULT_CACHE_TTL_SECS));
        let feed = self.feed.as_ref();
        let cache_ref = &cache;
        let mut lookups = stream::iter(batch)
            .map(move |(key, idxs)| async move {
                let outcome = match split_match_label(&key.match_label) {
                    None => Lookup::BadLabel,
                    Some((home, away)) => {
                        match tokio::time::timeout(
                            per_match_timeout,
                            lookup(feed, cache_ref, key.event_date, &home, &away),
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => Lookup::TimedOut,
                        }
                    }
                };
                (key, idxs, outcome)
            })
            .buffer_unordered(self.concurrency);

        let checked_at = Utc::now();
        let mut unsaved_checks = false;
        while let Some((key, idxs, outcome)) = lookups.next().await {
            for &idx in &idxs {
                ledger.records[idx].last_checked_at = Some(checked_at);
            }
            unsaved_checks = true;
            match outcome {
                Lookup::Complete(result) => {
                    if self.settle_match(&mut ledger, &key, &idxs, &result, &mut stats).await {
                        unsaved_checks = false;
                    }
                }
                Lookup::NotReady => {
                    debug!(match_key = %key, "[RECONCILE] result not final yet");
                    stats.incomplete += 1;
                    stats.not_ready += 1;
                }
                Lookup::NotFound => {
                    debug!(match_key = %key, "[RECONCILE] no fixture found");
                    stats.incomplete += 1;
                    stats.not_found += 1;
                }
                Lookup::TimedOut | Lookup::Failed(FeedError::Timeout) => {
                    warn!(match_key = %key, "[RECONCILE] lookup timed out after {:?}", per_match_timeout);
                    stats.timeouts += 1;
                }
                Lookup::Failed(e) => {
                    warn!(match_key = %key, "[RECONCILE] feed error: {e}");
                    stats.errors += 1;
                }
                Lookup::BadLabel => {
                    warn!(match_key = %key, "[RECONCILE] cannot split match label into two teams");
                    stats.errors += 1;
                }
            }
        }

        if unsaved_checks {
            if let Err(e) = self.store.save(&ledger).await {
                error!("[RECONCILE] flush of check times failed: {e}");
                stats.flush_failures += 1;
                stats.errors += 1;
            }
        }

        info!(
            event = "RECONCILE_DONE",
            updated = stats.updated,
            errors = stats.errors,
            incomplete = stats.incomplete,
            timeouts = stats.timeouts,
            not_found = stats.not_found,
            not_ready = stats.not_ready,
            reverted = stats.reverted,
            left_pending = stats.left_pending,
            unparseable = stats.unparseable,
            processed = stats.unique_matches_processed,
            remaining = stats.unique_matches_remaining,
            "[RECONCILE] done: {} settled, {} matches left for next run",
            stats.updated,
            stats.unique_matches_remaining,
        );
        Ok(stats)
    }

    /// Settle every prediction on one match from the same fetched result and
    /// flush. On flush failure the in-memory changes are rolled back so later
    /// flushes in this run never persist a settlement that was reported as
    /// failed. Returns true if the ledger was flushed.
    async fn settle_match(
        &self,
        ledger: &mut Ledger,
        key: &MatchKey,
        idxs: &[usize],
        result: &MatchResult,
        stats: &mut RunStats,
    ) -> bool {
        let (home, away) = split_match_label(&key.match_label).unwrap_or_default();
        let now = Utc::now();
        let mut before: Vec<(usize, PredictionRecord)> = Vec::new();

        for &idx in idxs {
            let rec = &mut ledger.records[idx];
            if rec.status.is_settled() {
                continue;
            }
            let market = parse_market_for(&rec.market_text, &home, &away);
            let settlement = evaluate(&market, result, rec.stake, rec.odds);
            let Some(payout) = settlement.payout else {
                debug!(
                    id = rec.id,
                    market = %rec.market_text,
                    parsed = %market,
                    "[RECONCILE] cannot decide on final result, leaving pending"
                );
                stats.left_pending += 1;
                continue;
            };
            before.push((idx, rec.clone()));
            rec.mark_settled(settlement.outcome, result.clone(), payout, now);
            info!(
                id = rec.id,
                match_key = %key,
                market = %rec.market_text,
                outcome = %settlement.outcome,
                payout,
                home_score = result.home_score,
                away_score = result.away_score,
                "[RECONCILE] settled"
            );
        }

        if before.is_empty() {
            return false;
        }
        match self.store.save(ledger).await {
            Ok(()) => {
                stats.updated += before.len();
                true
            }
            Err(e) => {
                error!(match_key = %key, "[RECONCILE] flush failed, rolling back {} settlements: {e}", before.len());
                for (idx, original) in before {
                    ledger.records[idx] = original;
                }
                stats.flush_failures += 1;
                stats.errors += 1;
                false
            }
        }
    }
}

/// Revert settled records whose stored result is missing or not final, and
/// clear stale settlement fields from Pending records. Returns the number of
/// records changed.
fn correction_pass(records: &mut [PredictionRecord], stats: &mut RunStats) -> usize {
    let mut changed = 0;
    for rec in records.iter_mut() {
        if rec.status.is_settled() {
            let valid = rec.result.as_ref().is_some_and(|r| r.is_complete());
            if !valid {
                warn!(
                    id = rec.id,
                    status = %rec.status,
                    result_status = rec.result.as_ref().map(|r| r.status.as_str()).unwrap_or("none"),
                    "[RECONCILE] settled on a non-final result, reverting to pending"
                );
                rec.reset_to_pending();
                stats.reverted += 1;
                changed += 1;
            }
        } else if rec.result.is_some() || rec.payout.is_some() || rec.settled_at.is_some() {
            debug!(id = rec.id, "[RECONCILE] clearing stale settlement fields on pending record");
            rec.reset_to_pending();
            changed += 1;
        }
    }
    changed
}

/// Pending record indices bucketed by (date, label).
///
/// Buckets where no market parses are dropped: no result can settle them.
/// The rest are ordered least recently checked first (never checked before
/// anything), then oldest date first, so matches that keep coming back
/// unsettled rotate out instead of filling every batch. Returns the buckets and
/// the number dropped.
fn plan_batch(records: &[PredictionRecord]) -> (Vec<(MatchKey, Vec<usize>)>, usize) {
    let mut groups: BTreeMap<MatchKey, Vec<usize>> = BTreeMap::new();
    for (idx, rec) in records.iter().enumerate() {
        if !rec.status.is_settled() {
            groups.entry(rec.match_key()).or_default().push(idx);
        }
    }

    let (mut buckets, dropped): (Vec<_>, Vec<_>) = groups
        .into_iter()
        .partition(|(key, idxs)| has_parseable_market(records, key, idxs));
    for (key, idxs) in &dropped {
        debug!(match_key = %key, records = idxs.len(), "[RECONCILE] no parseable market, skipping lookup");
    }

    buckets.sort_by_cached_key(|(key, idxs)| {
        let checked = idxs.iter().map(|&i| records[i].last_checked_at).min().flatten();
        (checked, key.clone())
    });
    (buckets, dropped.len())
}

fn has_parseable_market(records: &[PredictionRecord], key: &MatchKey, idxs: &[usize]) -> bool {
    let teams = split_match_label(&key.match_label);
    idxs.iter().any(|&i| {
        let text = &records[i].market_text;
        let market = match &teams {
            Some((home, away)) => parse_market_for(text, home, away),
            None => parse_market(text),
        };
        market != Market::Unknown
    })
}

/// Try the requested date, then the day before, then the day after; stop at
/// the first final result.
async fn lookup(
    feed: &dyn ResultFeedClient,
    cache: &ResultCache,
    date: NaiveDate,
    home: &str,
    away: &str,
) -> Lookup {
    let mut seen_unfinished = false;
    let mut last_err = None;

    for day in candidate_dates(date) {
        let fetched = match cache.get(day, home, away) {
            Some(hit) => Ok(hit),
            None => {
                let fetched = feed.get_result(day, home, away).await;
                if let Ok(found) = &fetched {
                    cache.insert(day, home, away, found.clone());
                }
                fetched
            }
        };
        match fetched {
            Ok(Some(result)) if result.is_complete() => {
                if day != date {
                    debug!("[RECONCILE] '{home}' vs '{away}' found on {day} (requested {date})");
                }
                return Lookup::Complete(result);
            }
            Ok(Some(result)) => {
                debug!("[RECONCILE] '{home}' vs '{away}' on {day} has status '{}'", result.status);
                seen_unfinished = true;
            }
            Ok(None) => {}
            Err(e) => {
                debug!("[RECONCILE] '{home}' vs '{away}' on {day}: {e}");
                last_err = Some(e);
            }
        }
    }

    if seen_unfinished {
        Lookup::NotReady
    } else if let Some(e) = last_err {
        Lookup::Failed(e)
    } else {
        Lookup::NotFound
    }
}
