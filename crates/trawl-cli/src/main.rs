//! `trawl`: operator commands over the crawl pipeline.
//!
//! Every command is a thin wrapper over trawl-core; state lives in the
//! SQLite file named by `TRAWL_DB_PATH` (or in memory with `--memory`).

mod providers;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use trawl_core::app::stages::{EnrichStage, FetchStage, PostScrapeStage, ProfileScrapeStage};
use trawl_core::app::{
    App, AppBuilder, CrawlTracker, Enricher, Scheduler, StatusReport, person_line, update_scores,
};
use trawl_core::config::Config;
use trawl_core::domain::{Channel, PersonFilter, SourceStatus, TaskType};
use trawl_core::impls::{InMemoryStore, SqliteStore};
use trawl_core::ports::{CrawlStateStore, RecordStore, SystemClock, TaskStore, WatermarkStore};
use trawl_core::queue::TaskQueue;
use trawl_core::typed::{EnrichPerson, FetchPosts, ScrapePost, ScrapeProfile};

use providers::{ArxivClient, GithubClient, GraphQlFeed, HttpScraper, HttpSearch, SerpClient};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "Discover makers from a launch platform and enrich their profiles")]
struct Cli {
    /// Keep all state in memory (nothing is persisted)
    #[arg(long, global = true)]
    memory: bool,

    /// Source to crawl (defaults to TRAWL_SOURCE)
    #[arg(long, global = true)]
    source: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a crawl task for today
    Schedule {
        #[command(subcommand)]
        mode: ModeCommand,
    },

    /// Run a crawl directly, without the queue
    Crawl {
        #[command(subcommand)]
        mode: ModeCommand,
    },

    /// Drain one stage (or every stage in pipeline order)
    Run {
        /// fetch_posts, scrape_post, scrape_profile, enrich_person or all
        #[arg(value_parser = parse_stage)]
        stage: StageArg,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Queue counts, crawl state and record counts
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Move failed tasks back to pending
    RetryFailed {
        #[arg(long, value_parser = parse_task_type)]
        stage: Option<TaskType>,
    },

    /// Delete every task, record, crawl state and watermark
    Reset {
        #[arg(long)]
        yes: bool,
    },

    /// Pause or resume crawling of the source
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Queue one person for enrichment
    Enrich {
        #[arg(long)]
        person: String,
        /// Limit to these channels (repeatable); default is all
        #[arg(long = "channel", value_parser = parse_channel)]
        channels: Vec<Channel>,
        #[arg(long)]
        incremental: bool,
        /// Enrich right away instead of queueing
        #[arg(long)]
        now: bool,
    },

    /// List persons by importance score
    Persons {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only persons with an email address
        #[arg(long)]
        with_email: bool,
        /// Only persons with a twitter handle
        #[arg(long)]
        with_twitter: bool,
        #[arg(long, default_value_t = 0)]
        min_score: i64,
        #[arg(long)]
        json: bool,
    },

    /// Queue the highest-scoring persons for enrichment
    QueuePersons {
        #[arg(long, default_value_t = 0)]
        min_score: i64,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        incremental: bool,
    },

    /// Recompute importance scores
    UpdateScores,
}

#[derive(Subcommand)]
enum ModeCommand {
    /// Walk backward from the oldest crawled day
    Backfill {
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long)]
        max_posts: Option<usize>,
    },
    /// Catch up from the newest crawled day to now
    Incremental,
}

#[derive(Subcommand)]
enum SourceAction {
    Pause,
    Resume,
}

#[derive(Clone, Copy)]
enum StageArg {
    All,
    One(TaskType),
}

fn parse_stage(s: &str) -> Result<StageArg, String> {
    if s == "all" {
        Ok(StageArg::All)
    } else {
        parse_task_type(s).map(StageArg::One)
    }
}

fn parse_task_type(s: &str) -> Result<TaskType, String> {
    TaskType::from_str(s)
}

fn parse_channel(s: &str) -> Result<Channel, String> {
    Channel::from_str(s)
}

/// Storage handles behind the ports, all backed by one store.
struct Stores {
    tasks: Arc<dyn TaskStore>,
    states: Arc<dyn CrawlStateStore>,
    watermarks: Arc<dyn WatermarkStore>,
    records: Arc<dyn RecordStore>,
}

impl Stores {
    fn backed_by<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + CrawlStateStore + WatermarkStore + RecordStore + 'static,
    {
        Self {
            tasks: store.clone(),
            states: store.clone(),
            watermarks: store.clone(),
            records: store,
        }
    }
}

struct Services {
    source: String,
    stores: Stores,
    queue: TaskQueue,
    tracker: Arc<CrawlTracker>,
    enricher: Arc<Enricher>,
    scheduler: Scheduler,
    scraper: Arc<HttpScraper>,
}

impl Services {
    fn build(config: &Config, memory: bool, source: Option<String>) -> Result<Self> {
        let stores = if memory {
            Stores::backed_by(Arc::new(InMemoryStore::new()))
        } else {
            let store = SqliteStore::open(&config.db_path)
                .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
            Stores::backed_by(Arc::new(store))
        };

        let client = providers::http_client().context("Failed to create HTTP client")?;
        let clock = Arc::new(SystemClock);
        let queue = TaskQueue::new(stores.tasks.clone(), clock.clone(), config.policies());

        let feed = Arc::new(GraphQlFeed::new(
            client.clone(),
            config.product_hunt_api_url.clone(),
            config.product_hunt_token.clone(),
        ));
        let tracker = Arc::new(
            CrawlTracker::new(stores.states.clone(), stores.records.clone(), feed, queue.clone())
                .with_page_delay(config.page_delay()),
        );

        let search = Arc::new(HttpSearch {
            github: GithubClient::new(client.clone(), config.github_api_url.clone(), config.github_token.clone()),
            serp: SerpClient::new(client.clone(), config.serp_api_url.clone(), config.serp_api_key.clone()),
            arxiv: ArxivClient::new(client.clone(), config.arxiv_api_url.clone()),
        });
        let enricher = Arc::new(
            Enricher::new(stores.records.clone(), stores.watermarks.clone(), search, clock)
                .with_channel_delay(config.channel_delay),
        );

        let scheduler = Scheduler::new(queue.clone(), stores.states.clone(), stores.records.clone());
        let scraper = Arc::new(HttpScraper::new(client, config.product_hunt_web_url.clone()));

        Ok(Self {
            source: source.unwrap_or_else(|| config.source.clone()),
            stores,
            queue,
            tracker,
            enricher,
            scheduler,
            scraper,
        })
    }

    fn app(&self) -> Result<App> {
        let app = AppBuilder::new(self.queue.clone())
            .register::<FetchPosts, _>(FetchStage::new(self.tracker.clone()))?
            .register::<ScrapePost, _>(PostScrapeStage::new(self.scraper.clone(), self.stores.records.clone()))?
            .register::<ScrapeProfile, _>(ProfileScrapeStage::new(
                self.scraper.clone(),
                self.stores.records.clone(),
            ))?
            .register::<EnrichPerson, _>(EnrichStage::new(self.enricher.clone()))?
            .expect_stages(&TaskType::ALL)
            .build()?;
        Ok(app)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "trawl=info,trawl_core=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let services = Services::build(&config, cli.memory, cli.source)?;
    let source = services.source.as_str();

    match cli.command {
        Commands::Schedule { mode } => {
            let created = match mode {
                ModeCommand::Backfill { days, max_posts } => {
                    services.scheduler.schedule_backfill(source, days, max_posts).await?
                }
                ModeCommand::Incremental => services.scheduler.schedule_incremental(source).await?,
            };
            if created {
                println!("scheduled crawl for {source}");
            } else {
                println!("crawl for {source} already scheduled today");
            }
        }

        Commands::Crawl { mode } => {
            services.tracker.ensure_state(source).await?;
            let report = match mode {
                ModeCommand::Backfill { days, max_posts } => {
                    services.tracker.backfill(source, days, max_posts).await?
                }
                ModeCommand::Incremental => services.tracker.incremental(source).await?,
            };
            print_json(&report)?;
        }

        Commands::Run { stage, limit } => {
            let mut app = services.app()?;
            let reports = match stage {
                StageArg::All => app.run_pipeline(limit).await?,
                StageArg::One(task_type) => vec![app.run_stage(task_type, limit).await?],
            };
            print_json(&reports)?;
        }

        Commands::Status { json } => {
            let report = StatusReport::collect(
                &services.queue,
                services.stores.states.as_ref(),
                services.stores.records.as_ref(),
                &[source],
            )
            .await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{report}");
            }
        }

        Commands::RetryFailed { stage } => {
            let retried = services.queue.retry_failed(stage).await?;
            println!("{retried} failed tasks moved back to pending");
        }

        Commands::Reset { yes } => {
            if !yes {
                bail!("reset deletes all tasks and records; pass --yes to confirm");
            }
            let tasks = services.queue.purge().await?;
            services.stores.records.purge_records().await?;
            println!("deleted {tasks} tasks and all records");
        }

        Commands::Source { action } => {
            let status = match action {
                SourceAction::Pause => SourceStatus::Paused,
                SourceAction::Resume => SourceStatus::Active,
            };
            let state = services.tracker.set_status(source, status).await?;
            println!("{} is {}", state.source, state.status);
        }

        Commands::Enrich { person, channels, incremental, now } => {
            if now {
                let channels = if channels.is_empty() { Channel::ALL.to_vec() } else { channels };
                let report = services.enricher.enrich(&person, &channels, incremental).await?;
                print_json(&report)?;
            } else {
                let created = services
                    .scheduler
                    .enqueue_enrichment(&person, channels, incremental, 0)
                    .await?;
                println!("{}", if created { "queued" } else { "already queued today" });
            }
        }

        Commands::Persons { limit, with_email, with_twitter, min_score, json } => {
            let filter = PersonFilter::new(min_score, limit)
                .with_email(with_email)
                .with_twitter(with_twitter);
            let persons = services.stores.records.top_persons(&filter).await?;
            if json {
                print_json(&persons)?;
            } else if persons.is_empty() {
                println!("no persons match");
            } else {
                for p in &persons {
                    println!("{:>5}  {}", p.importance_score, person_line(p));
                }
            }
        }

        Commands::QueuePersons { min_score, limit, incremental } => {
            let created = services.scheduler.queue_top_persons(min_score, limit, incremental).await?;
            println!("queued {created} persons");
        }

        Commands::UpdateScores => {
            let report = update_scores(services.stores.records.as_ref()).await?;
            print_json(&report)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_stage_and_channel_arguments() {
        let cli = Cli::try_parse_from(["trawl", "run", "scrape_post", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { stage: StageArg::One(TaskType::ScrapePost), limit: 5 }
        ));

        let cli = Cli::try_parse_from([
            "trawl", "--memory", "enrich", "--person", "p1", "--channel", "github", "--channel", "arxiv",
        ])
        .unwrap();
        assert!(cli.memory);
        match cli.command {
            Commands::Enrich { person, channels, incremental, now } => {
                assert_eq!(person, "p1");
                assert_eq!(channels, [Channel::Github, Channel::Arxiv]);
                assert!(!incremental && !now);
            }
            _ => panic!("expected enrich"),
        }

        assert!(Cli::try_parse_from(["trawl", "run", "scrape_everything"]).is_err());
    }

    #[test]
    fn parses_person_filters() {
        let cli = Cli::try_parse_from([
            "trawl", "persons", "--limit", "5", "--with-email", "--min-score", "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Persons { limit, with_email, with_twitter, min_score, json } => {
                assert_eq!((limit, min_score), (5, 30));
                assert!(with_email && !with_twitter && !json);
            }
            _ => panic!("expected persons"),
        }

        let cli = Cli::try_parse_from(["trawl", "persons", "--with-twitter"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Persons { limit: 20, with_email: false, with_twitter: true, min_score: 0, json: false }
        ));
    }
}
