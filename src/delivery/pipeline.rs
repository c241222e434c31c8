use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::ai::Scorer;
use crate::db::{RecordStore, SubscriberStore};
use crate::error::{AppError, Result};
use crate::models::{CandidateItem, ScoredItem};

use super::{BroadcastReport, DeliveryDispatcher};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub relevance_threshold: u8,
    pub credibility_threshold: u8,
    pub max_items_per_cycle: usize,
    pub scoring_concurrency: usize,
}

/// What happened to the items of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub received: usize,
    pub duplicates: usize,
    pub scoring_skipped: usize,
    pub rejected: usize,
    pub claimed: usize,
    pub lost_claims: usize,
    pub broadcasts: Vec<BroadcastReport>,
    /// Claimed items whose subscriber snapshot could not be read, even on
    /// the second attempt.
    pub undelivered: Vec<String>,
    /// Set when storage failed part-way; items claimed before that point are
    /// still delivered.
    pub aborted: Option<String>,
}

pub struct DeliveryPipeline {
    records: Arc<dyn RecordStore>,
    subscribers: Arc<dyn SubscriberStore>,
    scorer: Arc<dyn Scorer>,
    dispatcher: DeliveryDispatcher,
    settings: PipelineSettings,
}

impl DeliveryPipeline {
    pub fn new(
        records: Arc<dyn RecordStore>,
        subscribers: Arc<dyn SubscriberStore>,
        scorer: Arc<dyn Scorer>,
        dispatcher: DeliveryDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            records,
            subscribers,
            scorer,
            dispatcher,
            settings,
        }
    }

    /// Filters, scores and claims `raw_items`, returning the ones this caller
    /// now owns for delivery, in input order.
    #[allow(dead_code)]
    pub async fn ingest(&self, raw_items: Vec<CandidateItem>) -> Result<Vec<ScoredItem>> {
        let mut report = CycleReport::default();
        let passing = self.screen(raw_items, &mut report).await?;
        self.claim_all(passing, &mut report).await
    }

    /// One full cycle: screen, claim, then broadcast every claimed item.
    ///
    /// Only screening is bounded by `deadline`. Once an item is claimed no
    /// later cycle will pick it up, so claiming and delivery always run to
    /// the end.
    pub async fn run_cycle(
        &self,
        raw_items: Vec<CandidateItem>,
        deadline: Instant,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let passing = timeout_at(deadline, self.screen(raw_items, &mut report))
            .await
            .map_err(|_| AppError::CycleTimeout)??;
        let accepted = self.claim_all(passing, &mut report).await?;
        self.deliver(accepted, &mut report).await;
        Ok(report)
    }

    /// Broadcasts claimed items in order. An item whose broadcast fails is
    /// retried once after the others; a failure never skips the rest.
    async fn deliver(&self, accepted: Vec<ScoredItem>, report: &mut CycleReport) {
        let mut deferred = Vec::new();
        for item in accepted {
            match self.dispatcher.broadcast(&item).await {
                Ok(broadcast) => report.broadcasts.push(broadcast),
                Err(e) => {
                    warn!(fingerprint = %item.fingerprint(), error = %e, "broadcast failed, retrying after the rest");
                    deferred.push(item);
                }
            }
        }

        for item in deferred {
            match self.dispatcher.broadcast(&item).await {
                Ok(broadcast) => report.broadcasts.push(broadcast),
                Err(e) => {
                    error!(fingerprint = %item.fingerprint(), error = %e, "claimed item could not be delivered");
                    report.undelivered.push(item.fingerprint().to_string());
                    report.aborted.get_or_insert_with(|| e.to_string());
                }
            }
        }
    }

    /// Drops known and repeated fingerprints, scores the rest and records
    /// rejections. Returns the items that passed both thresholds, unclaimed.
    async fn screen(
        &self,
        raw_items: Vec<CandidateItem>,
        report: &mut CycleReport,
    ) -> Result<Vec<ScoredItem>> {
        report.received = raw_items.len();

        if raw_items.len() > self.settings.max_items_per_cycle {
            debug!(
                received = raw_items.len(),
                limit = self.settings.max_items_per_cycle,
                "capping items for this cycle"
            );
        }

        let mut in_batch = HashSet::new();
        let mut fresh = Vec::new();
        for item in raw_items.into_iter().take(self.settings.max_items_per_cycle) {
            let item = item.with_valid_fingerprint();
            if !in_batch.insert(item.fingerprint.clone()) {
                report.duplicates += 1;
                continue;
            }
            if !self.records.is_new(&item.fingerprint).await? {
                report.duplicates += 1;
                continue;
            }
            fresh.push(item);
        }

        // Scoring is the slow part; run it concurrently but keep input order
        let scored: Vec<(CandidateItem, Result<_>)> = stream::iter(fresh)
            .map(|item| async move {
                let score = self.scorer.score(&item).await;
                (item, score)
            })
            .buffered(self.settings.scoring_concurrency.max(1))
            .collect()
            .await;

        let mut passing = Vec::new();
        for (item, score) in scored {
            let score = match score {
                Ok(score) => score,
                Err(e) => {
                    warn!(title = %item.title, error = %e, "scoring unavailable, will retry next cycle");
                    report.scoring_skipped += 1;
                    continue;
                }
            };

            let scored = ScoredItem::new(item, score);
            if scored.passes(
                self.settings.relevance_threshold,
                self.settings.credibility_threshold,
            ) {
                passing.push(scored);
            } else {
                self.reject(&scored, report).await?;
            }
        }
        Ok(passing)
    }

    /// Claims each passing item in order. Storage failure after the first
    /// successful claim stops claiming but keeps what is already owned.
    async fn claim_all(
        &self,
        passing: Vec<ScoredItem>,
        report: &mut CycleReport,
    ) -> Result<Vec<ScoredItem>> {
        let mut accepted = Vec::new();
        for scored in passing {
            if let Err(e) = self.claim(scored, &mut accepted, report).await {
                return abort(e, accepted, report);
            }
        }

        info!(
            received = report.received,
            duplicates = report.duplicates,
            skipped = report.scoring_skipped,
            rejected = report.rejected,
            claimed = report.claimed,
            lost_claims = report.lost_claims,
            "ingest finished"
        );
        Ok(accepted)
    }

    async fn reject(&self, scored: &ScoredItem, report: &mut CycleReport) -> Result<()> {
        debug!(
            title = %scored.item.title,
            relevance = scored.relevance_score,
            credibility = scored.credibility_score,
            "below threshold"
        );
        self.records
            .mark_rejected(
                scored.fingerprint(),
                scored.relevance_score,
                scored.credibility_score,
            )
            .await?;
        report.rejected += 1;
        Ok(())
    }

    async fn claim(
        &self,
        scored: ScoredItem,
        accepted: &mut Vec<ScoredItem>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let audience = self.subscribers.count_active().await?;
        match self.records.mark_sent(scored.fingerprint(), audience).await {
            Ok(_) => {
                info!(title = %scored.item.title, fingerprint = %scored.fingerprint(), "claimed item");
                report.claimed += 1;
                accepted.push(scored);
                Ok(())
            }
            Err(AppError::DuplicateFingerprint(fingerprint)) => {
                debug!(%fingerprint, "another cycle claimed this item first");
                report.lost_claims += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Storage failed while claiming. Anything already claimed must still be
/// handed to delivery, since no later cycle will pick it up again.
fn abort(
    err: AppError,
    accepted: Vec<ScoredItem>,
    report: &mut CycleReport,
) -> Result<Vec<ScoredItem>> {
    if accepted.is_empty() {
        return Err(err);
    }
    error!(error = %err, claimed = accepted.len(), "storage failed mid-cycle, delivering what was claimed");
    report.aborted = Some(err.to_string());
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Barrier;

    use super::*;
    use crate::config::DeliveryConfig;
    use crate::db::flaky::{FlakyRecords, FlakySubscribers};
    use crate::db::Database;
    use crate::error::SendError;
    use crate::models::Score;
    use crate::telegram::Sender;

    /// Scores by fingerprint; unknown fingerprints are unavailable.
    struct TableScorer {
        scores: HashMap<String, (u32, u32)>,
        calls: Mutex<Vec<String>>,
        barrier: Option<Barrier>,
    }

    impl TableScorer {
        fn new(scores: &[(&str, u32, u32)]) -> Self {
            Self {
                scores: scores
                    .iter()
                    .map(|(fp, r, c)| (fp.to_string(), (*r, *c)))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                barrier: None,
            }
        }

        /// Holds every scoring call until `parties` callers are waiting.
        fn synchronized(mut self, parties: usize) -> Self {
            self.barrier = Some(Barrier::new(parties));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Scorer for TableScorer {
        async fn score(&self, item: &CandidateItem) -> Result<Score> {
            self.calls.lock().unwrap().push(item.fingerprint.clone());
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            match self.scores.get(&item.fingerprint) {
                Some((relevance, credibility)) => {
                    Ok(Score::new(*relevance, *credibility, item.title.clone()))
                }
                None => Err(AppError::ScoringUnavailable("quota exceeded".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct CountingSender {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Sender for CountingSender {
        async fn send(&self, _chat_id: i64, _text: &str) -> std::result::Result<(), SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        pipeline: DeliveryPipeline,
        records: Arc<dyn RecordStore>,
        scorer: Arc<TableScorer>,
        sender: Arc<CountingSender>,
    }

    async fn harness_on(db: &Database, scorer: Arc<TableScorer>, subscribers: &[i64]) -> Harness {
        harness_with(
            Arc::new(db.records()),
            Arc::new(db.subscribers()),
            scorer,
            subscribers,
        )
        .await
    }

    async fn harness_with(
        records: Arc<dyn RecordStore>,
        subs: Arc<dyn SubscriberStore>,
        scorer: Arc<TableScorer>,
        subscribers: &[i64],
    ) -> Harness {
        for chat in subscribers {
            subs.add(*chat).await.unwrap();
        }
        let sender = Arc::new(CountingSender::default());
        let delivery = DeliveryConfig {
            max_send_attempts: 3,
            retry_backoff_ms: 1,
            send_concurrency: 4,
            scoring_concurrency: 2,
        };
        let dispatcher = DeliveryDispatcher::new(
            Arc::clone(&subs),
            Arc::clone(&records),
            sender.clone(),
            &delivery,
        );
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&records),
            subs,
            scorer.clone(),
            dispatcher,
            PipelineSettings {
                relevance_threshold: 85,
                credibility_threshold: 70,
                max_items_per_cycle: 500,
                scoring_concurrency: 2,
            },
        );
        Harness {
            pipeline,
            records,
            scorer,
            sender,
        }
    }

    async fn harness(scores: &[(&str, u32, u32)], subscribers: &[i64]) -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        harness_on(&db, Arc::new(TableScorer::new(scores)), subscribers).await
    }

    fn deadline() -> Instant {
        Instant::now() + std::time::Duration::from_secs(30)
    }

    fn candidate(fingerprint: &str) -> CandidateItem {
        let mut item = CandidateItem::new(
            "Lab Blog",
            format!("Story {}", fingerprint),
            "An AI model",
            Utc::now(),
            format!("https://example.com/{}", fingerprint),
        );
        item.fingerprint = fingerprint.to_string();
        item
    }

    #[tokio::test]
    async fn accepts_items_meeting_both_thresholds_in_order() {
        let h = harness(&[("a", 90, 80), ("b", 85, 70), ("c", 99, 99)], &[1]).await;

        let accepted = h
            .pipeline
            .ingest(vec![candidate("c"), candidate("a"), candidate("b")])
            .await
            .unwrap();

        let order: Vec<&str> = accepted.iter().map(|s| s.fingerprint()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(accepted[1].relevance_score, 90);
        assert_eq!(accepted[1].credibility_score, 80);
        assert_eq!(h.records.sent_record("a").await.unwrap().unwrap().subscriber_count, 1);
    }

    #[tokio::test]
    async fn known_fingerprints_never_reach_the_scorer() {
        let h = harness(&[("old", 90, 90), ("new", 90, 90)], &[]).await;
        h.records.mark_sent("old", 0).await.unwrap();

        let accepted = h
            .pipeline
            .ingest(vec![candidate("old"), candidate("new")])
            .await
            .unwrap();

        assert_eq!(accepted.len(), 1);
        assert_eq!(h.scorer.calls(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn below_threshold_is_rejected_and_never_rescored() {
        let h = harness(&[("low", 60, 95)], &[1, 2]).await;

        let report = h.pipeline.run_cycle(vec![candidate("low")], deadline()).await.unwrap();
        assert_eq!(report.rejected, 1);
        assert!(report.broadcasts.is_empty());
        assert!(h.records.sent_record("low").await.unwrap().is_none());

        let report = h.pipeline.run_cycle(vec![candidate("low")], deadline()).await.unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(h.scorer.calls().len(), 1);
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn low_credibility_alone_rejects() {
        let h = harness(&[("shaky", 95, 69)], &[1]).await;
        let accepted = h.pipeline.ingest(vec![candidate("shaky")]).await.unwrap();
        assert!(accepted.is_empty());
        assert!(!h.records.is_new("shaky").await.unwrap());
    }

    #[tokio::test]
    async fn scoring_failure_leaves_item_for_next_cycle() {
        let h = harness(&[], &[1]).await;

        let report = h.pipeline.run_cycle(vec![candidate("flaky")], deadline()).await.unwrap();
        assert_eq!(report.scoring_skipped, 1);
        assert!(h.records.is_new("flaky").await.unwrap());

        h.pipeline.run_cycle(vec![candidate("flaky")], deadline()).await.unwrap();
        assert_eq!(h.scorer.calls().len(), 2);
    }

    #[tokio::test]
    async fn repeated_fingerprint_in_one_batch_is_scored_once() {
        let h = harness(&[("dup", 90, 90)], &[1]).await;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("dup"), candidate("dup")], deadline())
            .await
            .unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(h.scorer.calls().len(), 1);
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_fingerprints_are_computed() {
        let h = harness(&[], &[]).await;
        let mut item = candidate("ignored");
        item.fingerprint = String::new();

        h.pipeline.ingest(vec![item]).await.unwrap();

        let seen = h.scorer.calls();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 64);
    }

    #[tokio::test]
    async fn cycle_respects_item_cap() {
        let db = Database::open_in_memory().await.unwrap();
        let mut h = harness_on(&db, Arc::new(TableScorer::new(&[])), &[]).await;
        h.pipeline.settings.max_items_per_cycle = 2;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("1"), candidate("2"), candidate("3")], deadline())
            .await
            .unwrap();

        assert_eq!(report.received, 3);
        assert_eq!(h.scorer.calls().len(), 2);
    }

    #[tokio::test]
    async fn overlapping_cycles_send_exactly_once() {
        let db = Database::open_in_memory().await.unwrap();
        let scorer = Arc::new(TableScorer::new(&[("abc123", 90, 80)]).synchronized(2));
        let first = harness_on(&db, Arc::clone(&scorer), &[1, 2, 3]).await;
        let second = harness_on(&db, Arc::clone(&scorer), &[]).await;

        // Both cycles pass the novelty check before either claims
        let (a, b) = tokio::join!(
            first.pipeline.run_cycle(vec![candidate("abc123")], deadline()),
            second.pipeline.run_cycle(vec![candidate("abc123")], deadline()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(scorer.calls().len(), 2);
        assert_eq!(a.claimed + b.claimed, 1);
        assert_eq!(a.lost_claims + b.lost_claims, 1);
        assert_eq!(a.broadcasts.len() + b.broadcasts.len(), 1);

        let sends = first.sender.sent.load(Ordering::SeqCst) + second.sender.sent.load(Ordering::SeqCst);
        assert_eq!(sends, 3);
        assert_eq!(first.records.stats().await.unwrap().sent, 1);
    }

    #[tokio::test]
    async fn end_to_end_cycle_broadcasts_to_all_subscribers() {
        let h = harness(&[("hit", 92, 88), ("miss", 20, 90)], &[10, 20]).await;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("hit"), candidate("miss")], deadline())
            .await
            .unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.broadcasts.len(), 1);
        assert_eq!(report.broadcasts[0].fingerprint, "hit");
        assert_eq!(report.broadcasts[0].delivered(), 2);
        assert!(report.aborted.is_none());
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn storage_failure_before_any_claim_fails_the_cycle() {
        let db = Database::open_in_memory().await.unwrap();
        let records = Arc::new(FlakyRecords::new(Arc::new(db.records())));
        records.is_new.arm(0, 1);
        let h = harness_with(
            records.clone(),
            Arc::new(db.subscribers()),
            Arc::new(TableScorer::new(&[("a", 90, 90)])),
            &[1],
        )
        .await;

        let err = h.pipeline.run_cycle(vec![candidate("a")], deadline()).await.unwrap_err();
        assert!(err.is_storage());
        assert!(h.records.is_new("a").await.unwrap());

        let report = h.pipeline.run_cycle(vec![candidate("a")], deadline()).await.unwrap();
        assert_eq!(report.broadcasts.len(), 1);
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn storage_failure_after_a_claim_still_delivers_it() {
        let db = Database::open_in_memory().await.unwrap();
        let records = Arc::new(FlakyRecords::new(Arc::new(db.records())));
        records.mark_sent.arm(1, 1);
        let h = harness_with(
            records.clone(),
            Arc::new(db.subscribers()),
            Arc::new(TableScorer::new(&[("a", 90, 90), ("b", 90, 90)])),
            &[1, 2],
        )
        .await;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("a"), candidate("b")], deadline())
            .await
            .unwrap();
        assert_eq!(report.claimed, 1);
        assert!(report.aborted.is_some());
        assert_eq!(report.broadcasts.len(), 1);
        assert_eq!(report.broadcasts[0].fingerprint, "a");
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 2);

        // The unclaimed item is picked up by the next cycle
        assert!(h.records.is_new("b").await.unwrap());
        let report = h
            .pipeline
            .run_cycle(vec![candidate("a"), candidate("b")], deadline())
            .await
            .unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.broadcasts.len(), 1);
        assert_eq!(report.broadcasts[0].fingerprint, "b");
    }

    #[tokio::test]
    async fn failed_snapshot_does_not_strand_later_items() {
        let db = Database::open_in_memory().await.unwrap();
        let subs = Arc::new(FlakySubscribers::new(Arc::new(db.subscribers())));
        subs.list.arm(0, 1);
        let h = harness_with(
            Arc::new(db.records()),
            subs.clone(),
            Arc::new(TableScorer::new(&[("a", 90, 90), ("b", 90, 90)])),
            &[1, 2],
        )
        .await;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("a"), candidate("b")], deadline())
            .await
            .unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(report.broadcasts.len(), 2);
        assert!(report.undelivered.is_empty());
        assert!(report.aborted.is_none());
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn persistent_snapshot_failure_is_reported() {
        let db = Database::open_in_memory().await.unwrap();
        let subs = Arc::new(FlakySubscribers::new(Arc::new(db.subscribers())));
        subs.list.arm(0, 3);
        let h = harness_with(
            Arc::new(db.records()),
            subs.clone(),
            Arc::new(TableScorer::new(&[("a", 90, 90), ("b", 90, 90)])),
            &[1],
        )
        .await;

        let report = h
            .pipeline
            .run_cycle(vec![candidate("a"), candidate("b")], deadline())
            .await
            .unwrap();

        // "a" fails both attempts; "b" goes out on its second one
        assert_eq!(report.undelivered, vec!["a".to_string()]);
        assert!(report.aborted.is_some());
        assert_eq!(report.broadcasts.len(), 1);
        assert_eq!(report.broadcasts[0].fingerprint, "b");
    }

    #[tokio::test]
    async fn scoring_past_the_deadline_claims_nothing() {
        // A two-party barrier with one item never releases
        let h = harness_on(
            &Database::open_in_memory().await.unwrap(),
            Arc::new(TableScorer::new(&[("slow", 90, 90)]).synchronized(2)),
            &[1],
        )
        .await;

        let deadline = Instant::now() + std::time::Duration::from_millis(50);
        let err = h
            .pipeline
            .run_cycle(vec![candidate("slow")], deadline)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CycleTimeout));
        assert!(h.records.is_new("slow").await.unwrap());
        assert_eq!(h.sender.sent.load(Ordering::SeqCst), 0);
    }
}
