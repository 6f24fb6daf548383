//! End-to-end runs of the crawl pipeline against both stores.

mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::{FakeFeed, FakeScraper, FakeSearch, at, post};
use trawl_core::app::stages::{EnrichStage, FetchStage, PostScrapeStage, ProfileScrapeStage};
use trawl_core::app::{App, AppBuilder, CrawlTracker, Enricher, Scheduler, update_scores};
use trawl_core::domain::crawl::midnight;
use trawl_core::domain::{Channel, Profile, ProviderError, TaskStatus, TaskType};
use trawl_core::impls::{InMemoryStore, SqliteStore};
use trawl_core::ports::{CrawlStateStore, FixedClock, RecordStore, TaskStore, WatermarkStore};
use trawl_core::queue::{StagePolicies, TaskQueue};
use trawl_core::typed::{EnrichPerson, FetchPosts, ScrapePost, ScrapeProfile};

const SOURCE: &str = "product_hunt";

struct Harness<S> {
    store: Arc<S>,
    clock: Arc<FixedClock>,
    feed: Arc<FakeFeed>,
    scraper: Arc<FakeScraper>,
    search: Arc<FakeSearch>,
    scheduler: Scheduler,
    app: App,
}

fn harness<S>(store: Arc<S>, policies: StagePolicies) -> Harness<S>
where
    S: TaskStore + CrawlStateStore + WatermarkStore + RecordStore + 'static,
{
    let clock = Arc::new(FixedClock::new(at(10, 12)));
    let feed = Arc::new(FakeFeed::default());
    let scraper = Arc::new(FakeScraper::default());
    let search = Arc::new(FakeSearch::new(at(9, 0)));
    let queue = TaskQueue::new(store.clone(), clock.clone(), policies);

    let tracker = Arc::new(CrawlTracker::new(store.clone(), store.clone(), feed.clone(), queue.clone()));
    let enricher = Arc::new(Enricher::new(store.clone(), store.clone(), search.clone(), clock.clone()));
    let app = AppBuilder::new(queue.clone())
        .register::<FetchPosts, _>(FetchStage::new(tracker))
        .unwrap()
        .register::<ScrapePost, _>(PostScrapeStage::new(scraper.clone(), store.clone()))
        .unwrap()
        .register::<ScrapeProfile, _>(ProfileScrapeStage::new(scraper.clone(), store.clone()))
        .unwrap()
        .register::<EnrichPerson, _>(EnrichStage::new(enricher))
        .unwrap()
        .expect_stages(&TaskType::ALL)
        .build()
        .unwrap();
    let scheduler = Scheduler::new(queue, store.clone(), store.clone());

    Harness { store, clock, feed, scraper, search, scheduler, app }
}

fn seed_discovery<S>(h: &Harness<S>) {
    h.feed.push(
        midnight(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()),
        vec![post("alpha", 300), post("beta", 40), post("gamma", 10)],
        None,
    );
    h.scraper.makers("alpha", &["ada", "bob"]);
    h.scraper.makers("beta", &["ada"]);
    h.scraper.profile(Profile {
        username: "ada".into(),
        name: Some("Ada Lovelace".into()),
        links: vec!["https://github.com/ada".into(), "https://x.com/ada_l".into()],
        ..Profile::default()
    });
}

#[tokio::test]
async fn stage_by_stage_discovery_and_enrichment() {
    let mut h = harness(Arc::new(InMemoryStore::new()), StagePolicies::new());
    seed_discovery(&h);

    assert!(h.scheduler.schedule_backfill(SOURCE, 1, None).await.unwrap());

    let fetch = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!((fetch.completed, fetch.fanned_out), (1, 3));
    assert_eq!(h.app.queue().stats(TaskType::ScrapePost).await.unwrap().pending, 3);
    let state = h.store.load_crawl_state(SOURCE).await.unwrap().unwrap();
    assert_eq!(state.oldest_date, NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());

    // gamma's page is gone: an empty success, not a retry.
    let posts = h.app.run_stage(TaskType::ScrapePost, 10).await.unwrap();
    assert_eq!((posts.completed, posts.failed, posts.fanned_out), (3, 0, 2));

    // bob has no profile page.
    let profiles = h.app.run_stage(TaskType::ScrapeProfile, 10).await.unwrap();
    assert_eq!(profiles.completed, 2);
    assert_eq!(h.scraper.sessions(), (2, 2));

    let ada = h.store.person("ada").await.unwrap().unwrap();
    assert_eq!((ada.github.as_deref(), ada.twitter.as_deref()), (Some("ada"), Some("ada_l")));

    update_scores(h.store.as_ref()).await.unwrap();
    let ada = h.store.person("ada").await.unwrap().unwrap();
    assert_eq!(ada.importance_score, 20 + 34 + 10);

    assert_eq!(h.scheduler.queue_top_persons(0, 10, true).await.unwrap(), 1);
    let enrich = h.app.run_stage(TaskType::EnrichPerson, 10).await.unwrap();
    assert_eq!(enrich.completed, 1);
    assert_eq!(h.store.knowledge_for("ada").await.len(), Channel::ALL.len());
    for channel in Channel::ALL {
        assert_eq!(h.store.cutoff("ada", channel).await.unwrap(), Some(at(10, 12)));
    }
}

#[tokio::test]
async fn next_day_incremental_enrichment_uses_watermarks() {
    let mut h = harness(Arc::new(InMemoryStore::new()), StagePolicies::new());
    seed_discovery(&h);
    h.scheduler.schedule_backfill(SOURCE, 1, None).await.unwrap();
    h.app.run_pipeline(10).await.unwrap();
    h.scheduler
        .enqueue_enrichment("ada", vec![Channel::Github, Channel::Arxiv], true, 0)
        .await
        .unwrap();
    h.app.run_stage(TaskType::EnrichPerson, 10).await.unwrap();
    let first_pass = h.store.knowledge_for("ada").await.len();

    // Next day the provider returns only stale content for github.
    h.clock.advance(chrono::Duration::days(1));
    h.search.failing.lock().unwrap().push(Channel::Arxiv);
    h.scheduler
        .enqueue_enrichment("ada", vec![Channel::Github, Channel::Arxiv], true, 0)
        .await
        .unwrap();
    let report = h.app.run_stage(TaskType::EnrichPerson, 10).await.unwrap();
    assert_eq!(report.completed, 1);

    let cutoffs = h.search.cutoffs.lock().unwrap().clone();
    let last_two = &cutoffs[cutoffs.len() - 2..];
    assert_eq!(last_two[0], ("ada".to_string(), Channel::Github, Some(at(10, 12))));
    assert_eq!(last_two[1], ("ada".to_string(), Channel::Arxiv, Some(at(10, 12))));

    // The 9th-dated item is older than the cutoff and dropped.
    assert_eq!(h.store.knowledge_for("ada").await.len(), first_pass);
    assert_eq!(h.store.cutoff("ada", Channel::Github).await.unwrap(), Some(at(11, 12)));
    assert_eq!(h.store.cutoff("ada", Channel::Arxiv).await.unwrap(), Some(at(10, 12)));
}

#[tokio::test]
async fn one_pipeline_pass_reaches_every_stage() {
    let mut h = harness(Arc::new(SqliteStore::open_in_memory().unwrap()), StagePolicies::new());
    seed_discovery(&h);
    h.scheduler.schedule_backfill(SOURCE, 1, None).await.unwrap();

    let reports = h.app.run_pipeline(10).await.unwrap();
    let completed: Vec<_> = reports.iter().map(|r| (r.task_type, r.completed)).collect();
    assert_eq!(
        completed,
        [
            (TaskType::FetchPosts, 1),
            (TaskType::ScrapePost, 3),
            (TaskType::ScrapeProfile, 2),
            (TaskType::EnrichPerson, 0),
        ]
    );
    let counts = h.store.counts().await.unwrap();
    assert_eq!((counts.posts, counts.post_people, counts.profiles, counts.persons), (3, 3, 1, 1));
}

#[tokio::test(start_paused = true)]
async fn blocked_scraper_trips_the_breaker_and_closes_the_session() {
    let mut h = harness(Arc::new(SqliteStore::open_in_memory().unwrap()), StagePolicies::new());
    for i in 0..10 {
        let slug = format!("p{i}");
        h.app.queue().enqueue_task(&ScrapePost { slug: slug.clone() }, 0).await.unwrap();
        h.scraper
            .makers
            .lock()
            .unwrap()
            .insert(slug, Err(ProviderError::Blocked("just a moment".into())));
    }

    let report = h.app.run_stage(TaskType::ScrapePost, 10).await.unwrap();
    assert!(report.circuit_broken);
    assert_eq!((report.attempted(), report.retried, report.released), (5, 5, 5));
    assert_eq!(h.scraper.sessions(), (1, 1));

    let counts = h.app.queue().stats(TaskType::ScrapePost).await.unwrap();
    assert_eq!((counts.pending, counts.processing), (10, 0));
    let untouched = h.app.queue().get(TaskType::ScrapePost, "p9").await.unwrap().unwrap();
    assert_eq!((untouched.status, untouched.attempts), (TaskStatus::Pending, 0));
}

#[tokio::test]
async fn feed_outage_retries_the_crawl_then_resumes_mid_day() {
    let mut h = harness(
        Arc::new(InMemoryStore::new()),
        StagePolicies::new().map_all(|p| p.backoff.enabled = false),
    );
    let day = midnight(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
    h.feed.push(day, vec![post("alpha", 1)], Some("cur-1"));
    h.feed.push_err(day, ProviderError::Unavailable("502".into()));
    h.feed.push(day, vec![post("beta", 1)], None);

    h.scheduler.schedule_backfill(SOURCE, 1, None).await.unwrap();
    let first = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!(first.retried, 1);
    let state = h.store.load_crawl_state(SOURCE).await.unwrap().unwrap();
    assert_eq!(state.last_cursor.as_deref(), Some("cur-1"));

    let second = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!(second.completed, 1);
    let calls = h.feed.calls.lock().unwrap().clone();
    assert_eq!(calls.last().unwrap().1.as_deref(), Some("cur-1"));
    assert_eq!(h.app.queue().stats(TaskType::ScrapePost).await.unwrap().pending, 2);
    let state = h.store.load_crawl_state(SOURCE).await.unwrap().unwrap();
    assert_eq!((state.oldest_date, state.last_cursor), (NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(), None));
}

#[tokio::test]
async fn retried_backfill_stops_at_the_scheduled_day() {
    let mut h = harness(
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        StagePolicies::new().map_all(|p| p.backoff.enabled = false),
    );
    let date = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();
    h.feed.push(midnight(date(9)), vec![post("alpha", 1)], None);
    h.feed.push_err(midnight(date(8)), ProviderError::Unavailable("502".into()));

    h.scheduler.schedule_backfill(SOURCE, 2, None).await.unwrap();
    let first = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!(first.retried, 1);
    let state = h.store.load_crawl_state(SOURCE).await.unwrap().unwrap();
    assert_eq!(state.oldest_date, date(9));

    let second = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!(second.completed, 1);
    let state = h.store.load_crawl_state(SOURCE).await.unwrap().unwrap();
    assert_eq!(state.oldest_date, date(8));
    let starts: Vec<_> = h.feed.calls.lock().unwrap().iter().map(|(w, _)| w.start).collect();
    assert_eq!(starts, [midnight(date(9)), midnight(date(8)), midnight(date(8))]);
}

#[tokio::test]
async fn incremental_crawl_is_a_no_op_on_the_same_day() {
    let mut h = harness(Arc::new(InMemoryStore::new()), StagePolicies::new());
    h.scheduler.schedule_incremental(SOURCE).await.unwrap();
    let report = h.app.run_stage(TaskType::FetchPosts, 10).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.feed.call_count(), 0);
}
