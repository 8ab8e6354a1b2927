//! Crawl orchestration.
//!
//! The orchestrator walks period sitemaps one at a time. For each period it
//! lists the article URLs, drops the ones already seen in this run, and runs
//! up to `concurrency` article pipelines at once:
//!
//! ```text
//! Pending -> Fetching -> Parsed -> Persisted
//!                     \-> SkippedNonArticle
//!                     \-> PermanentFailure
//! ```
//!
//! Only the dedup set and [`CrawlState`] are shared between article tasks.
//! While in-flight fetches could still fill the cap, further tasks wait for
//! them to settle rather than give up. Once the article cap is reached (or the
//! run is cancelled) no new fetch is started; fetches already running finish
//! and persist.

use crate::builder::{BuildOutcome, build_article};
use crate::config::CrawlConfig;
use crate::errors::FailureKind;
use crate::extract::{MetadataExtractor, extract_page};
use crate::fetcher::PageFetch;
use crate::models::{FailureRecord, Period, RunReport, SitemapReference};
use crate::outputs::json::JsonSink;
use crate::sitemaps::fetcher::fetch_article_urls;
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, instrument, warn};

/// Counters for one run. Created fresh by every run.
#[derive(Debug, Clone)]
pub struct CrawlState {
    pub processed_count: usize,
    pub failure_count: usize,
    pub cap: usize,
    pub cap_reached: bool,
    pub breakdown: BTreeMap<FailureKind, usize>,
    pub failures: Vec<FailureRecord>,
    in_flight: usize,
}

/// Answer to a request for an article slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Granted,
    /// In-flight articles could still fill the cap; ask again once one settles.
    Wait,
    /// The cap has been reached.
    Closed,
}

impl CrawlState {
    /// Fresh counters for a run.
    ///
    /// # Arguments
    ///
    /// * `cap` - Number of persisted articles after which dispatch stops.
    ///   A cap of zero is reached from the start.
    pub fn new(cap: usize) -> Self {
        Self {
            processed_count: 0,
            failure_count: 0,
            cap,
            cap_reached: cap == 0,
            breakdown: BTreeMap::new(),
            failures: Vec::new(),
            in_flight: 0,
        }
    }

    /// Claim a slot for one article fetch.
    ///
    /// # Returns
    ///
    /// * [`Reservation::Granted`] if persisted plus in-flight articles stay
    ///   below the cap. The caller must later call [`complete`](Self::complete).
    /// * [`Reservation::Wait`] if only the in-flight articles stand between
    ///   the run and its cap. Their outcome decides whether a slot frees up.
    /// * [`Reservation::Closed`] once the cap is reached.
    pub fn try_reserve(&mut self) -> Reservation {
        if self.cap_reached {
            return Reservation::Closed;
        }
        if self.processed_count + self.in_flight >= self.cap {
            return Reservation::Wait;
        }
        self.in_flight += 1;
        Reservation::Granted
    }

    /// Release a slot claimed by [`try_reserve`](Self::try_reserve) and
    /// account for its outcome.
    pub fn complete(&mut self, period: Period, url: &str, outcome: &ArticleOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            ArticleOutcome::Persisted(_) => {
                self.processed_count += 1;
                if self.processed_count >= self.cap {
                    self.cap_reached = true;
                }
            }
            ArticleOutcome::Failed(kind, reason) => {
                self.record_failure(FailureRecord {
                    period,
                    url: url.to_string(),
                    kind: *kind,
                    reason: reason.clone(),
                });
            }
            ArticleOutcome::NotDispatched => {}
        }
    }

    /// Count `failure` under its kind and keep it for the run report.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failure_count += 1;
        *self.breakdown.entry(failure.kind).or_default() += 1;
        self.failures.push(failure);
    }

    /// Number of failures recorded under `kind`.
    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.breakdown.get(&kind).copied().unwrap_or(0)
    }
}

/// Terminal state of one article task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleOutcome {
    Persisted(PathBuf),
    Failed(FailureKind, String),
    /// Cap reached or run cancelled before the fetch started.
    NotDispatched,
}

/// Cooperative stop signal shared with the Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Knobs the orchestrator takes from [`CrawlConfig`].
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Article pipelines running at once within a period. Zero is treated as one.
    pub concurrency: usize,
    /// Stop dispatching after this many persisted articles.
    pub cap: usize,
    /// Keep the seen-URL set across period boundaries.
    pub cross_period_dedup: bool,
}

impl From<&CrawlConfig> for DispatchSettings {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            cap: config.max_articles,
            cross_period_dedup: config.cross_period_dedup,
        }
    }
}

/// Everything a finished run knows about itself.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: CrawlState,
    pub periods_visited: Vec<Period>,
    pub periods_skipped: Vec<Period>,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
}

impl RunOutcome {
    pub fn log_summary(&self) {
        info!(
            processed = self.state.processed_count,
            failures = self.state.failure_count,
            permanent_failures = self.state.failures_of(FailureKind::PermanentFailure),
            skipped_non_article = self.state.failures_of(FailureKind::SkippedNonArticle),
            persistence_errors = self.state.failures_of(FailureKind::PersistenceError),
            sitemap_errors = self.state.failures_of(FailureKind::SitemapError),
            periods_visited = self.periods_visited.len(),
            periods_skipped = self.periods_skipped.len(),
            cap_reached = self.state.cap_reached,
            cancelled = self.cancelled,
            "Crawl run summary"
        );
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            started_at: self.started_at,
            finished_at: self.finished_at,
            processed_count: self.state.processed_count,
            failure_count: self.state.failure_count,
            cap: self.state.cap,
            cap_reached: self.state.cap_reached,
            cancelled: self.cancelled,
            breakdown: self.state.breakdown,
            periods_visited: self.periods_visited,
            periods_skipped: self.periods_skipped,
            failures: self.state.failures,
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Per-run bookkeeping threaded through the period loop.
struct RunContext {
    state: Mutex<CrawlState>,
    /// Signalled whenever an in-flight article settles.
    slot_freed: Notify,
    seen: Mutex<HashSet<String>>,
    periods_visited: Vec<Period>,
    periods_skipped: Vec<Period>,
    started_at: String,
}

impl RunContext {
    fn new(cap: usize) -> Self {
        Self {
            state: Mutex::new(CrawlState::new(cap)),
            slot_freed: Notify::new(),
            seen: Mutex::new(HashSet::new()),
            periods_visited: Vec::new(),
            periods_skipped: Vec::new(),
            started_at: now_rfc3339(),
        }
    }

    fn finish(self, cancelled: bool) -> RunOutcome {
        RunOutcome {
            state: self.state.into_inner(),
            periods_visited: self.periods_visited,
            periods_skipped: self.periods_skipped,
            cancelled,
            started_at: self.started_at,
            finished_at: now_rfc3339(),
        }
    }
}

/// Drives sitemap listing, article dispatch and persistence for a run.
pub struct CrawlOrchestrator<F> {
    fetcher: F,
    sink: JsonSink,
    extractor: MetadataExtractor,
    settings: DispatchSettings,
    cancel: CancelFlag,
}

impl<F: PageFetch> CrawlOrchestrator<F> {
    /// Build an orchestrator with the standard metadata cascade.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Used for both period sitemaps and articles
    /// * `sink` - Destination for article records
    /// * `settings` - Concurrency, cap and dedup behaviour
    pub fn new(fetcher: F, sink: JsonSink, settings: DispatchSettings) -> Self {
        Self {
            fetcher,
            sink,
            extractor: MetadataExtractor::standard(),
            settings: DispatchSettings {
                concurrency: settings.concurrency.max(1),
                ..settings
            },
            cancel: CancelFlag::default(),
        }
    }

    /// Share `cancel` with whoever may stop the run, e.g. a Ctrl-C handler.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn should_stop(&self, state: &CrawlState) -> bool {
        state.cap_reached || self.cancel.is_cancelled()
    }

    /// Crawl every period sitemap in order.
    #[instrument(
        level = "info",
        skip_all,
        fields(periods = periods.len(), cap = self.settings.cap)
    )]
    pub async fn run(&self, periods: Vec<SitemapReference>) -> RunOutcome {
        let mut ctx = RunContext::new(self.settings.cap);

        for mut reference in periods {
            if self.should_stop(&*ctx.state.lock().await) {
                info!(next_period = %reference.period, "Stopping before next period");
                break;
            }

            let period = reference.period;
            match fetch_article_urls(&self.fetcher, &mut reference).await {
                Ok(urls) if urls.is_empty() => {
                    info!(%period, "Period sitemap lists no articles; skipping");
                    ctx.periods_skipped.push(period);
                }
                Ok(urls) => {
                    ctx.periods_visited.push(period);
                    self.dispatch_period(period, urls, &ctx).await;
                }
                Err(e) => {
                    warn!(%period, error = %e, "Skipping period");
                    ctx.periods_skipped.push(period);
                    ctx.state.lock().await.record_failure(FailureRecord {
                        period,
                        url: reference.url.clone(),
                        kind: FailureKind::SitemapError,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let outcome = ctx.finish(self.cancel.is_cancelled());
        outcome.log_summary();
        outcome
    }

    /// Dispatch explicit URL lists, e.g. the failures of an earlier run.
    #[instrument(
        level = "info",
        skip_all,
        fields(batches = batches.len(), cap = self.settings.cap)
    )]
    pub async fn run_batches(&self, batches: Vec<(Period, Vec<String>)>) -> RunOutcome {
        let mut ctx = RunContext::new(self.settings.cap);

        for (period, urls) in batches {
            if self.should_stop(&*ctx.state.lock().await) {
                break;
            }
            ctx.periods_visited.push(period);
            self.dispatch_period(period, urls, &ctx).await;
        }

        let outcome = ctx.finish(self.cancel.is_cancelled());
        outcome.log_summary();
        outcome
    }

    #[instrument(level = "info", skip_all, fields(%period, listed = urls.len()))]
    async fn dispatch_period(&self, period: Period, urls: Vec<String>, ctx: &RunContext) {
        let listed = urls.len();
        let fresh: Vec<String> = {
            let mut seen = ctx.seen.lock().await;
            if !self.settings.cross_period_dedup {
                seen.clear();
            }
            urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
        };
        if fresh.len() < listed {
            debug!(duplicates = listed - fresh.len(), "Dropped already-seen URLs");
        }

        let outcomes: Vec<ArticleOutcome> = stream::iter(fresh)
            .map(|url| self.process_article(period, url, ctx))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let persisted = outcomes
            .iter()
            .filter(|o| matches!(o, ArticleOutcome::Persisted(_)))
            .count();
        let not_dispatched = outcomes
            .iter()
            .filter(|o| matches!(o, ArticleOutcome::NotDispatched))
            .count();
        info!(
            persisted,
            failed = outcomes.len() - persisted - not_dispatched,
            not_dispatched,
            "Finished period"
        );
    }

    /// Wait for an article slot.
    ///
    /// Returns `false` when the cap is reached or the run is cancelled.
    async fn acquire_slot(&self, ctx: &RunContext) -> bool {
        loop {
            // Register before checking so a release between the check and
            // the await still wakes this task.
            let notified = ctx.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = ctx.state.lock().await;
                if self.cancel.is_cancelled() {
                    return false;
                }
                match state.try_reserve() {
                    Reservation::Granted => return true,
                    Reservation::Closed => return false,
                    Reservation::Wait => {}
                }
            }

            notified.await;
        }
    }

    /// Fetch, extract, build and persist one article.
    async fn process_article(
        &self,
        period: Period,
        url: String,
        ctx: &RunContext,
    ) -> ArticleOutcome {
        if !self.acquire_slot(ctx).await {
            return ArticleOutcome::NotDispatched;
        }

        let outcome = match self.fetcher.fetch(&url).await {
            Err(e) => {
                warn!(
                    url = %e.url(),
                    transient = e.is_transient(),
                    error = %e,
                    "Article fetch failed"
                );
                ArticleOutcome::Failed(FailureKind::PermanentFailure, e.to_string())
            }
            Ok(body) => {
                let page = extract_page(&self.extractor, &body);
                let strategy = page.metadata.as_ref().map(|(name, _)| *name);
                match build_article(&url, period, page) {
                    BuildOutcome::NonArticle => {
                        info!(%url, "Page has no paragraphs or metadata; skipping as non-article");
                        ArticleOutcome::Failed(
                            FailureKind::SkippedNonArticle,
                            "no paragraphs and no metadata".to_string(),
                        )
                    }
                    BuildOutcome::Article(article) => {
                        match self.sink.persist_with_retry(&article).await {
                            Ok(path) => {
                                debug!(
                                    %url,
                                    post_id = %article.post_id(),
                                    words = article.word_count(),
                                    classes = article.classes().len(),
                                    thumbnail = %article.thumbnail_url(),
                                    updated = %article.last_updated_date(),
                                    metadata = strategy.unwrap_or("none"),
                                    "Article persisted"
                                );
                                ArticleOutcome::Persisted(path)
                            }
                            Err(e) => {
                                error!(%url, error = %e, "Article could not be persisted");
                                ArticleOutcome::Failed(
                                    FailureKind::PersistenceError,
                                    e.to_string(),
                                )
                            }
                        }
                    }
                }
            }
        };

        ctx.state.lock().await.complete(period, &url, &outcome);
        ctx.slot_freed.notify_waiters();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{HttpFetcher, RetryFetch};
    use crate::models::Article;
    use crate::ratelimit::HostRateLimiter;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn period(month: u32) -> Period {
        Period::new(2024, month).unwrap()
    }

    fn fetcher(timeout: Duration) -> RetryFetch<HttpFetcher> {
        let limiter = HostRateLimiter::per_second(1000);
        let http = HttpFetcher::new("test-agent", timeout, limiter).unwrap();
        RetryFetch::new(http, 3, Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(Duration::ZERO)
    }

    fn orchestrator(
        root: &std::path::Path,
        cap: usize,
        concurrency: usize,
        cross_period_dedup: bool,
    ) -> CrawlOrchestrator<RetryFetch<HttpFetcher>> {
        CrawlOrchestrator::new(
            fetcher(Duration::from_millis(200)),
            JsonSink::new(root),
            DispatchSettings {
                concurrency,
                cap,
                cross_period_dedup,
            },
        )
    }

    fn urlset(urls: &[String]) -> String {
        let entries: String = urls
            .iter()
            .map(|u| format!("<url><loc>{u}</loc></url>"))
            .collect();
        format!(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#)
    }

    fn article_page(title: &str, body: &str) -> String {
        format!(
            r#"<html><head><meta property="og:title" content="{title}">
<meta name="author" content="Staff"><meta name="keywords" content="a, b"></head>
<body><p>{body}</p></body></html>"#
        )
    }

    async fn mount_page(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn sitemap_ref(server: &MockServer, p: Period) -> SitemapReference {
        SitemapReference::pending(
            p,
            format!("{}/sitemaps/all/sitemap-{}-{:02}.xml", server.uri(), p.year, p.month),
        )
    }

    fn stored_files(root: &std::path::Path, p: Period) -> Vec<PathBuf> {
        match std::fs::read_dir(root.join(p.dir_name())) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    #[test]
    fn test_state_reservation_respects_cap() {
        let mut s = CrawlState::new(2);
        assert_eq!(s.try_reserve(), Reservation::Granted);
        assert_eq!(s.try_reserve(), Reservation::Granted);
        assert_eq!(s.try_reserve(), Reservation::Wait, "in-flight work may still fail");

        let failed = ArticleOutcome::Failed(FailureKind::PermanentFailure, "x".into());
        s.complete(period(1), "u1", &failed);
        assert_eq!(s.try_reserve(), Reservation::Granted, "a failed slot is released");

        s.complete(period(1), "u2", &ArticleOutcome::Persisted(PathBuf::from("a")));
        assert!(!s.cap_reached);
        assert_eq!(s.try_reserve(), Reservation::Wait);

        s.complete(period(1), "u3", &ArticleOutcome::Persisted(PathBuf::from("b")));
        assert!(s.cap_reached);
        assert_eq!(s.processed_count, 2);
        assert_eq!(s.failure_count, 1);
        assert_eq!(s.try_reserve(), Reservation::Closed);
    }

    #[test]
    fn test_zero_cap_dispatches_nothing() {
        let mut s = CrawlState::new(0);
        assert!(s.cap_reached);
        assert_eq!(s.try_reserve(), Reservation::Closed);
    }

    #[tokio::test]
    async fn test_end_to_end_timeout_non_article_and_success() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();

        let urls = vec![
            format!("{uri}/news/slow-story-1"),
            format!("{uri}/news/landing-page-2"),
            format!("{uri}/news/good-story-3"),
        ];
        mount_page(&server, "/sitemaps/all/sitemap-2024-02.xml", urlset(&urls)).await;
        mount_page(&server, "/sitemaps/all/sitemap-2024-01.xml", urlset(&[])).await;

        // A: times out on every attempt
        Mock::given(method("GET"))
            .and(path("/news/slow-story-1"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .expect(3)
            .mount(&server)
            .await;
        // B: no paragraphs, no metadata
        mount_page(
            &server,
            "/news/landing-page-2",
            "<html><body><div>menu</div></body></html>".to_string(),
        )
        .await;
        // C: a real article
        mount_page(&server, "/news/good-story-3", article_page("Good", "Full body text")).await;

        let orch = orchestrator(tmp.path(), 100, 4, true);
        let outcome = orch
            .run(vec![sitemap_ref(&server, period(2)), sitemap_ref(&server, period(1))])
            .await;

        assert_eq!(outcome.state.processed_count, 1);
        assert_eq!(outcome.state.failure_count, 2);
        assert_eq!(outcome.state.failures_of(FailureKind::PermanentFailure), 1);
        assert_eq!(outcome.state.failures_of(FailureKind::SkippedNonArticle), 1);
        assert_eq!(outcome.periods_visited, vec![period(2)]);
        assert_eq!(outcome.periods_skipped, vec![period(1)], "run continued to the next period");

        let files = stored_files(tmp.path(), period(2));
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("article_3.json"));

        let stored: Article = serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
        assert_eq!(stored.title(), "Good");
        assert_eq!(stored.author(), "Staff");
        assert_eq!(stored.keywords(), ["a", "b"]);
        assert_eq!(stored.word_count(), 3);
    }

    #[tokio::test]
    async fn test_sitemap_error_skips_period_and_is_counted() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/sitemaps/all/sitemap-2024-03.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_page(
            &server,
            "/sitemaps/all/sitemap-2024-04.xml",
            urlset(&[format!("{uri}/news/ok-10")]),
        )
        .await;
        mount_page(&server, "/news/ok-10", article_page("Ok", "words here")).await;

        let outcome = orchestrator(tmp.path(), 100, 2, true)
            .run(vec![sitemap_ref(&server, period(3)), sitemap_ref(&server, period(4))])
            .await;

        assert_eq!(outcome.state.failures_of(FailureKind::SitemapError), 1);
        assert_eq!(outcome.state.processed_count, 1);
        assert_eq!(outcome.periods_skipped, vec![period(3)]);
        assert_eq!(outcome.periods_visited, vec![period(4)]);
    }

    #[tokio::test]
    async fn test_cap_stops_dispatch_and_later_periods() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();

        let urls: Vec<String> = (1..=5).map(|i| format!("{uri}/news/item-{i}")).collect();
        mount_page(&server, "/sitemaps/all/sitemap-2024-05.xml", urlset(&urls)).await;
        for i in 1..=5 {
            mount_page(&server, &format!("/news/item-{i}"), article_page("T", "x y")).await;
        }
        Mock::given(method("GET"))
            .and(path("/sitemaps/all/sitemap-2024-06.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[])))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = orchestrator(tmp.path(), 2, 1, true)
            .run(vec![sitemap_ref(&server, period(5)), sitemap_ref(&server, period(6))])
            .await;

        assert!(outcome.state.cap_reached);
        assert_eq!(outcome.state.processed_count, 2);
        assert_eq!(stored_files(tmp.path(), period(5)).len(), 2);
        assert_eq!(outcome.periods_visited, vec![period(5)]);
    }

    #[tokio::test]
    async fn test_cap_is_never_exceeded_under_concurrency() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();

        let urls: Vec<String> = (1..=20).map(|i| format!("{uri}/news/n-{i}")).collect();
        mount_page(&server, "/sitemaps/all/sitemap-2024-07.xml", urlset(&urls)).await;
        for i in 1..=20 {
            mount_page(&server, &format!("/news/n-{i}"), article_page("T", "body")).await;
        }

        let outcome = orchestrator(tmp.path(), 5, 8, true)
            .run(vec![sitemap_ref(&server, period(7))])
            .await;

        assert_eq!(outcome.state.processed_count, 5);
        assert_eq!(stored_files(tmp.path(), period(7)).len(), 5);
    }

    #[tokio::test]
    async fn test_failed_in_flight_fetches_free_slots_below_cap() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();

        let urls = vec![
            format!("{uri}/news/bad-1"),
            format!("{uri}/news/bad-2"),
            format!("{uri}/news/good-3"),
            format!("{uri}/news/good-4"),
        ];
        mount_page(&server, "/sitemaps/all/sitemap-2024-06.xml", urlset(&urls)).await;
        for route in ["/news/bad-1", "/news/bad-2"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;
        }
        for route in ["/news/good-3", "/news/good-4"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(article_page("G", "ok")))
                .expect(1)
                .mount(&server)
                .await;
        }

        let outcome = orchestrator(tmp.path(), 2, 4, true)
            .run(vec![sitemap_ref(&server, period(6))])
            .await;

        assert_eq!(outcome.state.processed_count, 2);
        assert!(outcome.state.cap_reached);
        assert_eq!(outcome.state.failure_count, 2);
        assert_eq!(outcome.state.failures_of(FailureKind::PermanentFailure), 2);
        assert_eq!(stored_files(tmp.path(), period(6)).len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_sink_counts_persistence_errors_and_continues() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let uri = server.uri();
        // A regular file where the output root should be
        let blocker = tmp.path().join("data");
        std::fs::write(&blocker, b"not a dir").unwrap();

        let urls = vec![format!("{uri}/news/first-31"), format!("{uri}/news/second-32")];
        mount_page(&server, "/sitemaps/all/sitemap-2024-02.xml", urlset(&urls[..1])).await;
        mount_page(&server, "/sitemaps/all/sitemap-2024-03.xml", urlset(&urls[1..])).await;
        for route in ["/news/first-31", "/news/second-32"] {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(200).set_body_string(article_page("P", "text")))
                .expect(1)
                .mount(&server)
                .await;
        }

        let report = orchestrator(&blocker, 100, 1, true)
            .run(vec![sitemap_ref(&server, period(2)), sitemap_ref(&server, period(3))])
            .await
            .into_report();

        assert_eq!(report.processed_count, 0);
        assert_eq!(report.failure_count, 2);
        assert_eq!(report.breakdown.get(&FailureKind::PersistenceError), Some(&2));
        assert_eq!(report.periods_visited, vec![period(2), period(3)]);

        let failed: Vec<(&str, FailureKind)> =
            report.failures.iter().map(|f| (f.url.as_str(), f.kind)).collect();
        assert_eq!(
            failed,
            vec![
                (urls[0].as_str(), FailureKind::PersistenceError),
                (urls[1].as_str(), FailureKind::PersistenceError),
            ]
        );
    }

    #[tokio::test]
    async fn test_cross_period_dedup_fetches_once() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let shared = format!("{}/news/shared-77", server.uri());

        let twice = urlset(&[shared.clone(), shared.clone()]);
        mount_page(&server, "/sitemaps/all/sitemap-2024-08.xml", twice).await;
        mount_page(&server, "/sitemaps/all/sitemap-2024-09.xml", urlset(&[shared.clone()])).await;
        Mock::given(method("GET"))
            .and(path("/news/shared-77"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_page("S", "one")))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = orchestrator(tmp.path(), 100, 2, true)
            .run(vec![sitemap_ref(&server, period(8)), sitemap_ref(&server, period(9))])
            .await;

        assert_eq!(outcome.state.processed_count, 1);
        assert_eq!(stored_files(tmp.path(), period(9)).len(), 0);
    }

    #[tokio::test]
    async fn test_within_period_dedup_only_when_cross_period_disabled() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let shared = format!("{}/news/shared-78", server.uri());

        let twice = urlset(&[shared.clone(), shared.clone()]);
        mount_page(&server, "/sitemaps/all/sitemap-2024-10.xml", twice).await;
        mount_page(&server, "/sitemaps/all/sitemap-2024-11.xml", urlset(&[shared.clone()])).await;
        Mock::given(method("GET"))
            .and(path("/news/shared-78"))
            .respond_with(ResponseTemplate::new(200).set_body_string(article_page("S", "one")))
            .expect(2)
            .mount(&server)
            .await;

        let outcome = orchestrator(tmp.path(), 100, 2, false)
            .run(vec![sitemap_ref(&server, period(10)), sitemap_ref(&server, period(11))])
            .await;

        assert_eq!(outcome.state.processed_count, 2);
        assert_eq!(stored_files(tmp.path(), period(10)).len(), 1);
        assert_eq!(stored_files(tmp.path(), period(11)).len(), 1);
    }

    #[tokio::test]
    async fn test_recrawl_replaces_previous_record() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let url = format!("{}/news/changing-story-500", server.uri());

        let first_page = article_page("First", "old body text");
        mount_page(&server, "/news/changing-story-500", first_page).await;
        let first = orchestrator(tmp.path(), 100, 1, true)
            .run_batches(vec![(period(12), vec![url.clone()])])
            .await;
        assert_eq!(first.state.processed_count, 1);

        server.reset().await;
        mount_page(&server, "/news/changing-story-500", article_page("Second", "new")).await;
        let second = orchestrator(tmp.path(), 100, 1, true)
            .run_batches(vec![(period(12), vec![url.clone()])])
            .await;
        assert_eq!(second.state.processed_count, 1);

        let files = stored_files(tmp.path(), period(12));
        assert_eq!(files.len(), 1);
        let stored: Article = serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
        assert_eq!(stored.post_id(), "500");
        assert_eq!(stored.title(), "Second");
        assert_eq!(stored.content(), "new");
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(urlset(&[])))
            .expect(0)
            .mount(&server)
            .await;

        let cancel = CancelFlag::default();
        let orch = orchestrator(tmp.path(), 100, 2, true).with_cancel_flag(cancel.clone());
        cancel.cancel();
        let outcome = orch
            .run(vec![sitemap_ref(&server, period(1)), sitemap_ref(&server, period(2))])
            .await;

        assert!(outcome.cancelled);
        assert!(outcome.periods_visited.is_empty());
        assert_eq!(outcome.state.processed_count, 0);
    }

    #[tokio::test]
    async fn test_report_carries_failures_for_recrawl() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let gone = format!("{}/news/gone-404", server.uri());
        Mock::given(method("GET"))
            .and(path("/news/gone-404"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let report = orchestrator(tmp.path(), 100, 1, true)
            .run_batches(vec![(period(3), vec![gone.clone()])])
            .await
            .into_report();

        assert_eq!(report.failure_count, 1);
        assert_eq!(report.failures[0].url, gone);
        assert_eq!(report.failures[0].kind, FailureKind::PermanentFailure);
        assert_eq!(report.breakdown.get(&FailureKind::PermanentFailure), Some(&1));
    }
}
