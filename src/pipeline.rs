use anyhow::Result;
use chrono::NaiveDate;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::BatchClassifier;
use crate::config::Config;
use crate::db::Database;
use crate::filter::RuleFilter;
use crate::identity;
use crate::models::{DiscardStage, Posting, PostingId, RawPosting, Status};
use crate::source::PostingSource;

/// Politeness delays between requests.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub fetch_min: Duration,
    pub fetch_max: Duration,
    pub batch_pause: Duration,
}

impl Pacing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_min: Duration::from_secs_f64(config.delay_min_secs),
            fetch_max: Duration::from_secs_f64(config.delay_max_secs),
            batch_pause: Duration::from_secs_f64(config.classifier.batch_pause_secs),
        }
    }

    pub fn none() -> Self {
        Self {
            fetch_min: Duration::ZERO,
            fetch_max: Duration::ZERO,
            batch_pause: Duration::ZERO,
        }
    }

    fn fetch_delay(&self) -> Duration {
        if self.fetch_max <= self.fetch_min {
            return self.fetch_min;
        }
        let secs = rand::thread_rng()
            .gen_range(self.fetch_min.as_secs_f64()..=self.fetch_max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub queries: usize,
    pub listed: usize,
    pub already_known: usize,
    pub fetched: usize,
    pub failed: usize,
    pub discarded_basic: usize,
    pub discarded_ai: usize,
    pub approved: usize,
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub stats: RunStats,
    /// Postings stored as not searched during this run, for the digest.
    pub approved: Vec<Posting>,
}

/// One scrape pass: search, skip known ids, fetch, rule filter, classify,
/// store. Failures on single postings are logged and skipped; only store
/// reads that the whole run depends on abort it.
pub struct Pipeline<'a> {
    db: &'a Database,
    source: &'a dyn PostingSource,
    filter: RuleFilter,
    classifier: Option<BatchClassifier>,
    batch_size: usize,
    pacing: Pacing,
    today: NaiveDate,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        db: &'a Database,
        source: &'a dyn PostingSource,
        filter: RuleFilter,
        classifier: Option<BatchClassifier>,
        batch_size: usize,
        pacing: Pacing,
        today: NaiveDate,
    ) -> Self {
        Self {
            db,
            source,
            filter,
            classifier,
            batch_size: batch_size.max(1),
            pacing,
            today,
        }
    }

    pub fn run(&self, queries: &[String]) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        let mut known: HashSet<PostingId> = self.db.all_ids()?;
        info!(known = known.len(), "store loaded");

        let mut candidates: Vec<(PostingId, RawPosting)> = Vec::new();
        for query in queries {
            outcome.stats.queries += 1;
            let locators = match self.source.search(query) {
                Ok(locators) => locators,
                Err(e) => {
                    warn!(%query, error = %format!("{e:#}"), "search failed");
                    continue;
                }
            };
            outcome.stats.listed += locators.len();

            let mut fresh = Vec::new();
            for locator in locators {
                match identity::resolve(&locator) {
                    Ok(id) if known.contains(&id) => outcome.stats.already_known += 1,
                    Ok(id) => {
                        // Claim the id now so an overlapping query does not fetch it again.
                        known.insert(id);
                        fresh.push((id, locator));
                    }
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "skipping posting");
                        outcome.stats.failed += 1;
                    }
                }
            }
            info!(%query, new = fresh.len(), "search done");

            for (id, locator) in fresh {
                pause(self.pacing.fetch_delay());
                let raw = match self.source.fetch(&locator) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(%id, error = %format!("{e:#}"), "fetch failed");
                        outcome.stats.failed += 1;
                        continue;
                    }
                };
                outcome.stats.fetched += 1;

                let verdict = self.filter.is_relevant(&raw.title, &raw.description);
                if verdict.accepted {
                    debug!(%id, title = %raw.title, "passed basic filter");
                    candidates.push((id, raw));
                } else {
                    info!(%id, title = %raw.title, reason = %verdict.reason, "discarded by basic filter");
                    let posting = self.posting(id, raw, Status::Discarded(DiscardStage::Basic));
                    if self.store(&posting) {
                        outcome.stats.discarded_basic += 1;
                    }
                }
            }
        }

        match &self.classifier {
            Some(classifier) => self.classify(classifier, candidates, &mut outcome),
            None => {
                if !candidates.is_empty() {
                    info!(count = candidates.len(), "classifier disabled, approving all");
                }
                for (id, raw) in candidates {
                    let posting = self.posting(id, raw, Status::NotSearched);
                    self.approve(posting, &mut outcome);
                }
            }
        }

        Ok(outcome)
    }

    fn classify(
        &self,
        classifier: &BatchClassifier,
        candidates: Vec<(PostingId, RawPosting)>,
        outcome: &mut RunOutcome,
    ) {
        if candidates.is_empty() {
            return;
        }
        info!(count = candidates.len(), model = classifier.model_name(), "classifying");

        let mut remaining = candidates.into_iter().peekable();
        let mut batch_no = 0;
        while remaining.peek().is_some() {
            let batch: Vec<(PostingId, RawPosting)> = remaining.by_ref().take(self.batch_size).collect();
            batch_no += 1;
            if batch_no > 1 {
                pause(self.pacing.batch_pause);
            }

            let inputs: Vec<_> = batch
                .iter()
                .map(|(id, raw)| classifier.prepare(*id, &raw.title, &raw.description))
                .collect();
            let mut judgements = classifier.evaluate(&inputs);
            debug!(batch = batch_no, size = batch.len(), "batch classified");

            for (id, raw) in batch {
                // `evaluate` answers for every id it was given.
                let judgement = judgements.remove(&id);
                let is_match = judgement.as_ref().is_none_or(|j| j.is_match);
                if is_match {
                    let posting = self.posting(id, raw, Status::NotSearched);
                    self.approve(posting, outcome);
                } else {
                    let reason = judgement.map(|j| j.reason).unwrap_or_default();
                    info!(%id, title = %raw.title, %reason, "discarded by classifier");
                    let posting = self.posting(id, raw, Status::Discarded(DiscardStage::Ai));
                    if self.store(&posting) {
                        outcome.stats.discarded_ai += 1;
                    }
                }
            }
        }
    }

    fn approve(&self, posting: Posting, outcome: &mut RunOutcome) {
        if self.store(&posting) {
            info!(id = %posting.id, title = %posting.title, "approved");
            outcome.stats.approved += 1;
            outcome.approved.push(posting);
        }
    }

    fn posting(&self, id: PostingId, raw: RawPosting, status: Status) -> Posting {
        Posting::from_raw(id, raw, self.today.format("%Y-%m-%d").to_string(), status)
    }

    /// True when the row was written.
    fn store(&self, posting: &Posting) -> bool {
        match self.db.insert_if_absent(posting) {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(id = %posting.id, error = %format!("{e:#}"), "failed to store posting");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AIProvider;
    use crate::models::StatusCategory;
    use crate::reconcile::Reconciler;
    use crate::tracker;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource {
        results: HashMap<String, Vec<String>>,
        pages: HashMap<String, RawPosting>,
        fetched: RefCell<Vec<String>>,
    }

    impl FakeSource {
        fn list(mut self, query: &str, locators: &[&str]) -> Self {
            self.results.insert(
                query.to_string(),
                locators.iter().map(|l| l.to_string()).collect(),
            );
            self
        }

        /// Serves a detail page under exactly the locator the search lists.
        fn page(mut self, locator: &str, title: &str, description: &str) -> Self {
            self.pages.insert(
                locator.to_string(),
                RawPosting {
                    locator: locator.to_string(),
                    title: title.to_string(),
                    employer: "Acme AS".to_string(),
                    deadline: "Se annonse".to_string(),
                    location: "Oslo".to_string(),
                    description: description.to_string(),
                    ..Default::default()
                },
            );
            self
        }
    }

    impl PostingSource for FakeSource {
        fn search(&self, query: &str) -> Result<Vec<String>> {
            self.results
                .get(query)
                .cloned()
                .ok_or_else(|| anyhow!("search for {query} failed"))
        }

        fn fetch(&self, locator: &str) -> Result<RawPosting> {
            self.fetched.borrow_mut().push(locator.to_string());
            self.pages
                .get(locator)
                .cloned()
                .ok_or_else(|| anyhow!("404 {locator}"))
        }
    }

    struct DownProvider;

    impl AIProvider for DownProvider {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Err(anyhow!("503 Service Unavailable"))
        }

        fn model_name(&self) -> &str {
            "down"
        }
    }

    /// Rejects every posting whose id is listed.
    struct PickyProvider(Vec<i64>);

    impl AIProvider for PickyProvider {
        fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            let verdicts: Vec<String> = [1, 2, 3, 4, 5]
                .iter()
                .filter(|id| prompt.contains(&format!("\"{id}\"")))
                .map(|id| {
                    let is_match = !self.0.contains(id);
                    format!("\"{id}\": {{\"match\": {is_match}, \"reason\": \"test\"}}")
                })
                .collect();
            Ok(format!("```json\n{{{}}}\n```", verdicts.join(", ")))
        }

        fn model_name(&self) -> &str {
            "picky"
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.setup().unwrap();
        db
    }

    fn filter() -> RuleFilter {
        RuleFilter::new(
            &["senior".to_string()],
            &["python".to_string(), "sql".to_string()],
        )
    }

    fn pipeline<'a>(
        db: &'a Database,
        source: &'a FakeSource,
        provider: Option<Box<dyn AIProvider>>,
    ) -> Pipeline<'a> {
        let classifier = provider.map(|p| BatchClassifier::new(p, "Python dev", 2000));
        Pipeline::new(db, source, filter(), classifier, 2, Pacing::none(), today())
    }

    fn three_postings() -> FakeSource {
        FakeSource::default()
            .list(
                "data",
                &[
                    "https://www.finn.no/job/ad/1",
                    "https://www.finn.no/job/ad/2?utm=x",
                    "https://www.finn.no/job/ad/3/",
                ],
            )
            .page("https://www.finn.no/job/ad/1", "Senior Data Engineer", "Python")
            .page("https://www.finn.no/job/ad/2?utm=x", "Data Engineer", "Python and SQL")
            .page("https://www.finn.no/job/ad/3/", "Backend Developer", "SQL pipelines")
    }

    fn queries(list: &[&str]) -> Vec<String> {
        list.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn test_end_to_end_with_classifier_down() {
        let dir = tempfile::tempdir().unwrap();
        let tracker_path = dir.path().join("tracker.xlsx");
        let db = setup();
        let source = three_postings();

        let outcome = pipeline(&db, &source, Some(Box::new(DownProvider)))
            .run(&queries(&["data"]))
            .unwrap();

        assert_eq!(outcome.stats.fetched, 3);
        assert_eq!(outcome.stats.failed, 0);
        assert_eq!(outcome.stats.discarded_basic, 1);
        assert_eq!(outcome.stats.approved, 2);
        assert!(source
            .fetched
            .borrow()
            .iter()
            .any(|l| l == "https://www.finn.no/job/ad/2?utm=x"));
        assert_eq!(
            db.get(PostingId::new(1)).unwrap().unwrap().status,
            Status::Discarded(DiscardStage::Basic)
        );
        for id in [2, 3] {
            let posting = db.get(PostingId::new(id)).unwrap().unwrap();
            assert_eq!(posting.status, Status::NotSearched);
            assert_eq!(posting.date_added, "2026-03-01");
        }

        let written = Reconciler::new(&db, today()).export(&tracker_path).unwrap();
        assert_eq!(written, 3);
        let rows = tracker::read_tracker(&tracker_path).unwrap();
        let mut ids: Vec<i64> = rows.iter().filter_map(|r| r.id).map(PostingId::get).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
        for row in &rows {
            let status: Status = row.status.parse().unwrap();
            let expected = if row.id == Some(PostingId::new(1)) {
                None
            } else {
                Some(StatusCategory::Pending)
            };
            assert_eq!(status.category(), expected);
        }
    }

    #[test]
    fn test_second_run_adds_nothing() {
        let db = setup();
        let source = three_postings();
        let pipeline = pipeline(&db, &source, None);

        let first = pipeline.run(&queries(&["data"])).unwrap();
        assert_eq!(first.stats.fetched, 3);
        let fetches = source.fetched.borrow().len();

        let second = pipeline.run(&queries(&["data"])).unwrap();
        assert_eq!(second.stats.already_known, 3);
        assert_eq!(second.stats.fetched, 0);
        assert!(second.approved.is_empty());
        assert_eq!(source.fetched.borrow().len(), fetches);
        assert_eq!(db.count().unwrap(), 3);
    }

    #[test]
    fn test_overlapping_queries_fetch_once() {
        let db = setup();
        let source = three_postings().list("backend", &["https://www.finn.no/job/ad/3"]);

        let outcome = pipeline(&db, &source, None)
            .run(&queries(&["data", "backend"]))
            .unwrap();

        assert_eq!(outcome.stats.already_known, 1);
        assert_eq!(source.fetched.borrow().len(), 3);
    }

    #[test]
    fn test_classifier_rejections_are_stored_as_discarded() {
        let db = setup();
        let source = three_postings();

        let outcome = pipeline(&db, &source, Some(Box::new(PickyProvider(vec![3]))))
            .run(&queries(&["data"]))
            .unwrap();

        assert_eq!(outcome.stats.discarded_ai, 1);
        assert_eq!(outcome.approved.len(), 1);
        assert_eq!(outcome.approved[0].id, PostingId::new(2));
        assert_eq!(
            db.get(PostingId::new(3)).unwrap().unwrap().status,
            Status::Discarded(DiscardStage::Ai)
        );
    }

    #[test]
    fn test_bad_items_are_skipped_not_fatal() {
        let db = setup();
        let source = FakeSource::default()
            .list(
                "data",
                &[
                    "https://www.finn.no/job/search",
                    "https://www.finn.no/job/ad/404",
                    "https://www.finn.no/job/ad/2",
                ],
            )
            .page("https://www.finn.no/job/ad/2", "Data Engineer", "Python");

        let outcome = pipeline(&db, &source, None)
            .run(&queries(&["data", "query that fails"]))
            .unwrap();

        assert_eq!(outcome.stats.queries, 2);
        assert_eq!(outcome.stats.failed, 2);
        assert_eq!(outcome.stats.approved, 1);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_human_status_survives_rediscovery() {
        let db = setup();
        let source = three_postings();
        pipeline(&db, &source, None).run(&queries(&["data"])).unwrap();
        db.update_status(PostingId::new(2), Status::SecondInterview).unwrap();

        pipeline(&db, &source, None).run(&queries(&["data"])).unwrap();
        assert_eq!(
            db.get(PostingId::new(2)).unwrap().unwrap().status,
            Status::SecondInterview
        );
    }

    #[test]
    fn test_fetch_delay_stays_in_range() {
        let pacing = Pacing {
            fetch_min: Duration::from_millis(10),
            fetch_max: Duration::from_millis(20),
            batch_pause: Duration::ZERO,
        };
        for _ in 0..50 {
            let delay = pacing.fetch_delay();
            assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(20));
        }
        assert_eq!(Pacing::none().fetch_delay(), Duration::ZERO);
    }
}
