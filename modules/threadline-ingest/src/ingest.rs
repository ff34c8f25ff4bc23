//! The polling loop.
//!
//! One cycle gathers candidates from self-mentions and tracked authors,
//! merges them into ascending id order, and handles them one at a time:
//! watermark check, idempotence check, thread resolution, responder, intents,
//! then the watermark advances and is persisted before the next item starts.
//!
//! Only authentication failures leave a cycle as errors. Everything else is
//! logged, ends the cycle early, and waits for the next tick.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use threadline_common::{
    memory_id, AccountId, Config, Item, KvStore, MemoryStore, ThreadlineError,
};

use crate::cache::ItemCache;
use crate::candidates::merge_candidates;
use crate::context::conversation_context;
use crate::fetcher::ItemFetcher;
use crate::registry::AccountLane;
use crate::respond::{Poster, ResponseContext, Responder};
use crate::thread::ThreadBuilder;
use crate::watermark::WatermarkStore;

#[derive(Debug, Clone, TypedBuilder)]
pub struct IngestConfig {
    #[builder(setter(into))]
    pub account: AccountId,
    #[builder(setter(into))]
    pub username: String,
    /// Numeric id of the account. Enables the direct mentions endpoint and
    /// id-based self filtering.
    #[builder(default)]
    pub user_id: Option<String>,
    #[builder(default = Duration::from_secs(120))]
    pub poll_interval: Duration,
    #[builder(default)]
    pub tracked_authors: Vec<String>,
    #[builder(default = 10)]
    pub max_thread_depth: usize,
    #[builder(default = 20)]
    pub search_max: u32,
    #[builder(default = 1)]
    pub max_search_pages: u32,
    #[builder(default)]
    pub dry_run: bool,
}

impl IngestConfig {
    pub fn from_config(config: &Config) -> Self {
        Self::builder()
            .account(config.account.as_str())
            .username(config.username.clone())
            .user_id(config.user_id.clone())
            .poll_interval(Duration::from_secs(config.poll_interval_secs))
            .tracked_authors(config.tracked_authors.clone())
            .max_thread_depth(config.max_thread_depth)
            .search_max(config.search_max)
            .max_search_pages(config.max_search_pages)
            .dry_run(config.dry_run)
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
}

/// Counters for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    pub fetched: u32,
    pub source_failures: u32,
    pub candidates: u32,
    pub skipped_watermark: u32,
    pub skipped_invalid: u32,
    pub skipped_recorded: u32,
    pub skipped_self: u32,
    pub processed: u32,
    pub responder_failures: u32,
    pub intents_executed: u32,
    pub intents_failed: u32,
    /// False when the cycle ended early on an error.
    pub completed: bool,
}

impl fmt::Display for CycleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Ingestion Cycle ===")?;
        writeln!(f, "Fetched:            {}", self.fetched)?;
        writeln!(f, "Source failures:    {}", self.source_failures)?;
        writeln!(f, "Candidates:         {}", self.candidates)?;
        writeln!(f, "Below watermark:    {}", self.skipped_watermark)?;
        writeln!(f, "Invalid ids:        {}", self.skipped_invalid)?;
        writeln!(f, "Already recorded:   {}", self.skipped_recorded)?;
        writeln!(f, "Own items:          {}", self.skipped_self)?;
        writeln!(f, "Processed:          {}", self.processed)?;
        writeln!(f, "Responder failures: {}", self.responder_failures)?;
        writeln!(f, "Intents executed:   {}", self.intents_executed)?;
        writeln!(f, "Intents failed:     {}", self.intents_failed)?;
        write!(
            f,
            "Status:             {}",
            if self.completed { "complete" } else { "ended early" }
        )
    }
}

pub struct IngestionLoop {
    config: IngestConfig,
    fetcher: Arc<ItemFetcher>,
    threads: ThreadBuilder,
    memory: Arc<dyn MemoryStore>,
    responder: Arc<dyn Responder>,
    poster: Poster,
    watermark: WatermarkStore,
    state: watch::Sender<LoopState>,
}

impl IngestionLoop {
    /// `lane` must come from the process's `ClientRegistry` so every
    /// component acting for this account shares it.
    pub fn new(
        config: IngestConfig,
        lane: Arc<AccountLane>,
        kv: Arc<dyn KvStore>,
        memory: Arc<dyn MemoryStore>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        let cache = ItemCache::new(kv, lane.account());
        let fetcher = Arc::new(ItemFetcher::new(lane.clone(), cache.clone()));
        let threads = ThreadBuilder::new(fetcher.clone(), memory.clone());
        let poster = Poster::new(lane, cache.clone(), memory.clone(), config.dry_run);
        let (state, _) = watch::channel(LoopState::Idle);

        Self {
            config,
            fetcher,
            threads,
            memory,
            responder,
            poster,
            watermark: WatermarkStore::new(cache),
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Follow state transitions from outside the loop, e.g. from a
    /// supervisor or a responder running inside a cycle.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn watermark(&self) -> &WatermarkStore {
        &self.watermark
    }

    fn account(&self) -> &AccountId {
        self.fetcher.lane().account()
    }

    /// Poll forever. Returns only on a fatal (auth) failure.
    pub async fn run(&mut self) -> Result<(), ThreadlineError> {
        info!(
            account = %self.account(),
            interval_secs = self.config.poll_interval.as_secs(),
            tracked_authors = self.config.tracked_authors.len(),
            "Ingestion loop starting"
        );
        loop {
            self.run_cycle().await?;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One full cycle. Non-fatal errors are logged and reflected in
    /// `CycleStats::completed`; only fatal errors are returned.
    pub async fn run_cycle(&mut self) -> Result<CycleStats, ThreadlineError> {
        self.state.send_replace(LoopState::Polling);
        let mut stats = CycleStats::default();
        let outcome = self.cycle(&mut stats).await;
        self.state.send_replace(LoopState::Idle);

        match outcome {
            Ok(()) => {
                stats.completed = true;
                info!(account = %self.account(), "{stats}");
                Ok(stats)
            }
            Err(e) if e.is_fatal() => {
                error!(account = %self.account(), error = %e, "Authentication rejected, stopping");
                Err(e)
            }
            Err(e) => {
                warn!(account = %self.account(), error = %e, "Cycle ended early");
                info!(account = %self.account(), "{stats}");
                Ok(stats)
            }
        }
    }

    async fn cycle(&mut self, stats: &mut CycleStats) -> Result<(), ThreadlineError> {
        self.watermark.load().await?;

        let candidates = self.gather(stats).await?;
        stats.candidates = candidates.len() as u32;
        info!(
            account = %self.account(),
            candidates = candidates.len(),
            watermark = ?self.watermark.current().map(|id| id.as_str()),
            "Candidates gathered"
        );

        for item in &candidates {
            self.handle(item, stats).await?;
        }

        self.watermark.save().await?;
        Ok(())
    }

    /// Fetch every source. A failing source contributes nothing; only a
    /// fatal error stops gathering.
    async fn gather(&self, stats: &mut CycleStats) -> Result<Vec<Item>, ThreadlineError> {
        let mut sources: Vec<Vec<Item>> = Vec::new();
        let max = self.config.search_max;
        let pages = self.config.max_search_pages;

        let mentions = self
            .fetcher
            .mentions(&self.config.username, max, pages)
            .await;
        collect_source(&mut sources, stats, "mentions", mentions)?;

        if let Some(user_id) = &self.config.user_id {
            let direct = self.fetcher.direct_mentions(user_id, max).await;
            collect_source(&mut sources, stats, "direct_mentions", direct)?;
        }

        for author in &self.config.tracked_authors {
            let query = format!("from:{author}");
            let found = self.fetcher.search(&query, max, pages).await;
            collect_source(&mut sources, stats, &query, found)?;
        }

        Ok(merge_candidates(sources))
    }

    fn is_self(&self, item: &Item) -> bool {
        item.author_username
            .eq_ignore_ascii_case(&self.config.username)
            || self
                .config
                .user_id
                .as_deref()
                .is_some_and(|id| id == item.author_id)
    }

    async fn handle(&mut self, item: &Item, stats: &mut CycleStats) -> Result<(), ThreadlineError> {
        // A non-numeric id would order above every real id and stall the
        // watermark for good.
        if !item.id.is_numeric() {
            warn!(
                id = %item.id,
                author = %item.author_username,
                "Skipping candidate with non-numeric id"
            );
            stats.skipped_invalid += 1;
            return Ok(());
        }

        if self.watermark.is_processed(&item.id) {
            stats.skipped_watermark += 1;
            return Ok(());
        }

        if self.is_self(item) {
            stats.skipped_self += 1;
            self.watermark.advance(&item.id).await?;
            return Ok(());
        }

        let record = memory_id(&item.id, self.account());
        if self.memory.get_by_id(record).await?.is_some() {
            stats.skipped_recorded += 1;
            self.watermark.advance(&item.id).await?;
            return Ok(());
        }

        let thread = self
            .threads
            .build(item, self.config.max_thread_depth)
            .await?;
        let conversation_context =
            conversation_context(self.memory.as_ref(), self.account(), &thread).await;
        let ctx = ResponseContext {
            item: item.clone(),
            conversation_context,
            thread,
        };

        match self.responder.respond(&ctx).await {
            Ok(intents) => {
                for intent in &intents {
                    match self.poster.execute(intent).await {
                        Ok(_) => stats.intents_executed += 1,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(id = %item.id, kind = intent.kind(), error = %e, "Intent failed");
                            stats.intents_failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(id = %item.id, error = %e, "Responder failed");
                stats.responder_failures += 1;
            }
        }

        self.watermark.advance(&item.id).await?;
        stats.processed += 1;
        Ok(())
    }
}

fn collect_source(
    sources: &mut Vec<Vec<Item>>,
    stats: &mut CycleStats,
    source: &str,
    fetched: Result<Vec<Item>, ThreadlineError>,
) -> Result<(), ThreadlineError> {
    match fetched {
        Ok(items) => {
            stats.fetched += items.len() as u32;
            sources.push(items);
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(source, error = %e, "Candidate source failed, skipping");
            stats.source_failures += 1;
            Ok(())
        }
    }
}
