//! Bounded-concurrency refresh of every symbol in a plan.
//!
//! Workers pull symbols off a pre-filled queue and report `(symbol, outcome)`
//! messages to the calling task, which is the only place outcomes are
//! collected. The first hard error cancels the remaining work.

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::config::UpdateConfig;
use crate::corporate_action::has_corporate_action;
use crate::errors::{Result, UpdateError};
use crate::models::quote::{FileVariant, RawRow};
use crate::planner::UpdatePlan;
use crate::providers::base::QuoteFetcher;
use crate::services::pacer::RequestPacer;

/// Fresh lines for one symbol and the boundary they replace from.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRefresh {
    pub cutoff: NaiveDateTime,
    pub lines: Vec<String>,
    /// Set when a corporate action forced a fetch from the earliest date.
    pub full_redownload: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Refreshed(SymbolRefresh),
    /// Soft failure: the symbol keeps its existing rows.
    NotFound,
    Failed(String),
}

impl FetchOutcome {
    fn from_error(symbol: &str, err: UpdateError) -> Self {
        if err.is_not_found() {
            info!("symbol '{}' not found, skipping", symbol);
            FetchOutcome::NotFound
        } else {
            warn!("fetch failed for {}: {}", symbol, err);
            FetchOutcome::Failed(err.to_string())
        }
    }
}

/// Outcomes of a batch with no hard errors.
#[derive(Debug, Default)]
pub struct RefreshSet {
    pub refreshed: HashMap<String, SymbolRefresh>,
    /// In plan order.
    pub not_found: Vec<String>,
}

/// Split outcomes into refreshes and not-found symbols, or fail with every
/// hard error in plan order.
pub fn collect_refreshes(
    order: &[String],
    mut outcomes: HashMap<String, FetchOutcome>,
) -> Result<RefreshSet> {
    let mut set = RefreshSet::default();
    let mut details = Vec::new();

    for symbol in order {
        match outcomes.remove(symbol) {
            Some(FetchOutcome::Refreshed(refresh)) => {
                set.refreshed.insert(symbol.clone(), refresh);
            }
            Some(FetchOutcome::NotFound) => set.not_found.push(symbol.clone()),
            Some(FetchOutcome::Failed(err)) => details.push(format!("{}: {}", symbol, err)),
            // cancelled before it ran
            None => {}
        }
    }

    if !details.is_empty() {
        return Err(UpdateError::FetchErrors {
            count: details.len(),
            details,
        });
    }
    Ok(set)
}

#[derive(Debug, Clone)]
struct SymbolJob {
    symbol: String,
    earliest: NaiveDateTime,
    cutoff: NaiveDateTime,
}

struct WorkerContext {
    fetcher: Arc<dyn QuoteFetcher + Send + Sync>,
    pacer: Arc<RequestPacer>,
    variant: FileVariant,
    token: String,
    full_redownload: bool,
    end: NaiveDateTime,
}

impl WorkerContext {
    async fn fetch(&self, symbol: &str, from: NaiveDateTime) -> Result<Vec<RawRow>> {
        self.pacer.wait().await;
        self.fetcher
            .fetch_daily(symbol, from, self.end, &self.token)
            .await
    }

    async fn refresh_symbol(&self, job: &SymbolJob) -> FetchOutcome {
        let mut cutoff = job.cutoff;
        let mut raws = match self.fetch(&job.symbol, cutoff).await {
            Ok(raws) => raws,
            Err(e) => return FetchOutcome::from_error(&job.symbol, e),
        };

        let mut full_redownload = false;
        if self.full_redownload && has_corporate_action(&raws) {
            if cutoff > job.earliest {
                info!(
                    "corporate action detected for {}; redownloading full history from {}",
                    job.symbol,
                    job.earliest.format("%Y-%m-%d")
                );
                cutoff = job.earliest;
                raws = match self.fetch(&job.symbol, cutoff).await {
                    Ok(raws) => raws,
                    Err(e) => return FetchOutcome::from_error(&job.symbol, e),
                };
                full_redownload = true;
            } else {
                debug!(
                    "corporate action detected for {}; window already covers full history",
                    job.symbol
                );
            }
        }

        let lines =
            codec::format_fetched_rows(&job.symbol, &raws, self.variant, cutoff, self.end);
        debug!("{}: {} fresh row(s) from {}", job.symbol, lines.len(), cutoff);
        FetchOutcome::Refreshed(SymbolRefresh {
            cutoff,
            lines,
            full_redownload,
        })
    }
}

async fn run_worker(
    ctx: Arc<WorkerContext>,
    jobs: Arc<Mutex<mpsc::Receiver<SymbolJob>>>,
    results: mpsc::Sender<(String, FetchOutcome)>,
    cancel: CancellationToken,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("update cancelled; dropping {}", job.symbol);
                break;
            }
            outcome = ctx.refresh_symbol(&job) => outcome,
        };

        if results.send((job.symbol, outcome)).await.is_err() {
            break;
        }
    }
}

/// Runs the per-symbol fetches for one update call.
pub struct FetchOrchestrator {
    fetcher: Arc<dyn QuoteFetcher + Send + Sync>,
    pacer: Arc<RequestPacer>,
    token: String,
    backfill_days: u32,
    full_redownload: bool,
    concurrency: usize,
}

impl FetchOrchestrator {
    pub fn new(fetcher: Arc<dyn QuoteFetcher + Send + Sync>, config: &UpdateConfig) -> Self {
        Self {
            fetcher,
            pacer: Arc::new(RequestPacer::new(config.request_interval)),
            token: config.token.clone(),
            backfill_days: config.backfill_days,
            full_redownload: config.full_redownload,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Fetch every symbol of `plan` up to `end`. The returned map holds one
    /// outcome per symbol that ran; after a hard error, symbols still queued
    /// or in flight are cancelled and absent.
    pub async fn refresh(
        &self,
        plan: &UpdatePlan,
        end: NaiveDateTime,
    ) -> Result<HashMap<String, FetchOutcome>> {
        let jobs: Vec<SymbolJob> = plan
            .symbols()
            .iter()
            .filter_map(|symbol| {
                plan.range(symbol).map(|range| SymbolJob {
                    symbol: symbol.clone(),
                    earliest: range.earliest,
                    cutoff: range.cutoff(self.backfill_days),
                })
            })
            .collect();
        if jobs.is_empty() {
            return Ok(HashMap::new());
        }

        let capacity = jobs.len();
        let workers = self.concurrency.min(capacity);
        info!(
            "Fetching {} symbol(s) from {} with {} worker(s)",
            capacity,
            self.fetcher.provider_name(),
            workers
        );

        let (job_tx, job_rx) = mpsc::channel(capacity);
        for job in jobs {
            job_tx
                .send(job)
                .await
                .map_err(|e| UpdateError::TaskError(e.to_string()))?;
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            pacer: Arc::clone(&self.pacer),
            variant: plan.variant,
            token: self.token.clone(),
            full_redownload: self.full_redownload,
            end,
        });

        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(run_worker(
                Arc::clone(&ctx),
                Arc::clone(&job_rx),
                result_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(result_tx);

        let mut outcomes = HashMap::with_capacity(capacity);
        while let Some((symbol, outcome)) = result_rx.recv().await {
            if matches!(outcome, FetchOutcome::Failed(_)) && !cancel.is_cancelled() {
                warn!("hard fetch error on {}; cancelling remaining fetches", symbol);
                cancel.cancel();
            }
            outcomes.insert(symbol, outcome);
        }

        while let Some(joined) = set.join_next().await {
            joined.map_err(|e| UpdateError::TaskError(e.to_string()))?;
        }

        Ok(outcomes)
    }
}
