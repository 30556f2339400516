use crate::config::UpdateConfig;
use crate::errors::Result;
use crate::models::quote::FileVariant;
use crate::planner;
use crate::providers::base::QuoteFetcher;
use crate::services::orchestrator::{collect_refreshes, FetchOrchestrator};
use crate::services::rewriter::{rewrite_file, RewriteStats};
use crate::util;
use log::{info, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle of one update call; only `Rewriting` touches the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Scanning,
    Fetching,
    Rewriting,
    Committed,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Scanning => "scanning",
            UpdatePhase::Fetching => "fetching",
            UpdatePhase::Rewriting => "rewriting",
            UpdatePhase::Committed => "committed",
        };
        f.write_str(name)
    }
}

/// What a successful update call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub path: PathBuf,
    pub variant: FileVariant,
    /// Last phase reached; `Fetching` means there was nothing to write.
    pub phase: UpdatePhase,
    pub refreshed: Vec<String>,
    pub not_found: Vec<String>,
    /// Symbols re-fetched from their earliest date after a corporate action.
    pub full_redownloads: Vec<String>,
    pub rows: RewriteStats,
}

/// 增量更新服务，负责扫描、抓取、合并和原子替换
pub struct UpdateService {
    config: UpdateConfig,
    fetcher: Arc<dyn QuoteFetcher + Send + Sync>,
}

impl UpdateService {
    pub fn new(config: UpdateConfig, fetcher: Arc<dyn QuoteFetcher + Send + Sync>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Refresh `path` in place. On error the file is left byte-for-byte as it was.
    pub async fn update_file(&self, path: impl AsRef<Path>) -> Result<UpdateSummary> {
        let path = path.as_ref();

        info!("{}: {}", path.display(), UpdatePhase::Scanning);
        let plan = planner::plan_file(path)?;
        let mut summary = UpdateSummary {
            path: path.to_path_buf(),
            variant: plan.variant,
            phase: UpdatePhase::Scanning,
            refreshed: Vec::new(),
            not_found: Vec::new(),
            full_redownloads: Vec::new(),
            rows: RewriteStats::default(),
        };
        if plan.is_empty() {
            warn!("{}: no data rows, nothing to update", path.display());
            return Ok(summary);
        }

        let end = self.config.end.unwrap_or_else(util::now);
        info!(
            "{}: {} {} symbol(s) up to {}",
            path.display(),
            UpdatePhase::Fetching,
            plan.symbols().len(),
            util::format_datetime(&end)
        );
        summary.phase = UpdatePhase::Fetching;
        let orchestrator = FetchOrchestrator::new(Arc::clone(&self.fetcher), &self.config);
        let outcomes = orchestrator.refresh(&plan, end).await?;
        let set = collect_refreshes(plan.symbols(), outcomes)?;

        summary.not_found = set.not_found;
        for symbol in plan.symbols() {
            if let Some(refresh) = set.refreshed.get(symbol) {
                summary.refreshed.push(symbol.clone());
                if refresh.full_redownload {
                    summary.full_redownloads.push(symbol.clone());
                }
            }
        }
        if set.refreshed.is_empty() {
            info!("{}: no symbol could be refreshed, file unchanged", path.display());
            return Ok(summary);
        }

        info!("{}: {}", path.display(), UpdatePhase::Rewriting);
        summary.phase = UpdatePhase::Rewriting;
        summary.rows = rewrite_file(&plan, &set.refreshed)?;

        summary.phase = UpdatePhase::Committed;
        info!(
            "{}: {} ({} refreshed, {} not found)",
            path.display(),
            UpdatePhase::Committed,
            summary.refreshed.len(),
            summary.not_found.len()
        );
        Ok(summary)
    }
}

/// One-shot form of [`UpdateService::update_file`].
pub async fn update_file(
    path: impl AsRef<Path>,
    fetcher: Arc<dyn QuoteFetcher + Send + Sync>,
    config: UpdateConfig,
) -> Result<UpdateSummary> {
    UpdateService::new(config, fetcher).update_file(path).await
}
