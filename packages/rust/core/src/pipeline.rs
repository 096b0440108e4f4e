//! Candidate selection pipeline: tags → strategies → score → select → verify.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, instrument, warn};

use pixivbot_search::{PixivClient, SearchMode};
use pixivbot_shared::{
    AppConfig, ArtworkDetail, PixivBotError, Result, ResultRecord, ScoringConfig,
    SelectionConfig, StrategyConfig, is_restricted_request,
};

use crate::ProgressReporter;
use crate::recency::RecencyCache;
use crate::rewrite::UrlRewriter;
use crate::scoring::{self, ScoredCandidate};
use crate::selection;
use crate::strategy::SearchStrategy;

/// How one strategy ended.
#[derive(Debug)]
pub enum StrategyOutcome {
    /// A candidate passed every check.
    Selected(ResultRecord),
    /// The search itself produced nothing usable.
    Retry(PixivBotError),
    /// Candidates were tried but the detail budget or the pool ran out.
    Exhausted(PixivBotError),
}

/// Runs searches for one process, sharing a recency cache across invocations.
pub struct Pipeline {
    client: PixivClient,
    cache: Arc<dyn RecencyCache>,
    strategies: Vec<StrategyConfig>,
    selection: SelectionConfig,
    scoring: ScoringConfig,
    rewriter: UrlRewriter,
}

impl Pipeline {
    pub fn new(client: PixivClient, cache: Arc<dyn RecencyCache>, config: &AppConfig) -> Self {
        Self {
            client,
            cache,
            strategies: config.strategies.clone(),
            selection: config.selection.clone(),
            scoring: config.scoring.clone(),
            rewriter: UrlRewriter::from_config(&config.proxy),
        }
    }

    pub fn cache(&self) -> &dyn RecencyCache {
        self.cache.as_ref()
    }

    /// Pick one artwork for `tags`.
    pub async fn run(&self, tags: &[String], progress: &dyn ProgressReporter) -> Result<ResultRecord> {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        self.run_with(tags, Utc::now(), &mut rng, progress).await
    }

    /// [`Pipeline::run`] with an explicit clock and random source.
    ///
    /// Only `AllStrategiesExhausted` escapes; every other failure is logged
    /// and moves the search along.
    #[instrument(skip_all, fields(tags = ?tags))]
    pub async fn run_with<R: Rng + Send>(
        &self,
        tags: &[String],
        now: DateTime<Utc>,
        rng: &mut R,
        progress: &dyn ProgressReporter,
    ) -> Result<ResultRecord> {
        let allow_restricted = is_restricted_request(tags);
        let mode = if allow_restricted {
            SearchMode::All
        } else {
            SearchMode::Safe
        };
        info!(allow_restricted, strategies = self.strategies.len(), "starting selection");

        let mut attempts = 0;
        let mut last_error: Option<PixivBotError> = None;

        for config in &self.strategies {
            attempts += 1;
            let strategy = SearchStrategy::resolve(config, now.date_naive());
            progress.strategy(&strategy.name, attempts, self.strategies.len());

            match self
                .run_strategy(tags, &strategy, mode, allow_restricted, now, rng)
                .await
            {
                StrategyOutcome::Selected(record) => {
                    info!(id = %record.id, strategy = %record.strategy, "artwork selected");
                    progress.selected(&record);
                    return Ok(record);
                }
                StrategyOutcome::Retry(e) => {
                    warn!(strategy = %strategy.name, error = %e, "search failed, loosening strategy");
                    last_error = Some(e);
                }
                StrategyOutcome::Exhausted(e) => {
                    warn!(strategy = %strategy.name, error = %e, "no candidate survived, loosening strategy");
                    last_error = Some(e);
                }
            }
        }

        Err(PixivBotError::AllStrategiesExhausted {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no strategies configured".into()),
        })
    }

    async fn run_strategy<R: Rng + Send>(
        &self,
        tags: &[String],
        strategy: &SearchStrategy,
        mode: SearchMode,
        allow_restricted: bool,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> StrategyOutcome {
        let query = strategy.query(mode, rng);
        let items = match self.client.search(tags, &query).await {
            Ok(items) => items,
            Err(e) => return StrategyOutcome::Retry(e),
        };

        let found = items.len();
        let items: Vec<_> = if allow_restricted {
            items
        } else {
            items.into_iter().filter(|item| !item.is_restricted()).collect()
        };
        debug!(found, kept = items.len(), "filtered restricted works");
        if items.is_empty() {
            return StrategyOutcome::Retry(PixivBotError::ContentPolicyViolation { id: None });
        }

        let mut pool = scoring::rank(items, now.date_naive(), &self.scoring, self.selection.top_k);
        let mut last_error = None;

        for attempt in 1..=self.selection.max_detail_attempts {
            let pruned = self.cache.prune(now);
            if pruned > 0 {
                debug!(pruned, "expired recency entries");
            }

            let Some(index) = selection::select(
                &pool,
                self.cache.as_ref(),
                now,
                self.selection.top_quality,
                rng,
            ) else {
                break;
            };
            let candidate = pool.remove(index);

            match self.client.artwork_detail(&candidate.item.id).await {
                Ok(detail) if detail.is_restricted() && !allow_restricted => {
                    warn!(id = %detail.id, attempt, "detail tags are restricted, dropping candidate");
                    last_error = Some(PixivBotError::ContentPolicyViolation {
                        id: Some(detail.id),
                    });
                }
                Ok(detail) => {
                    self.cache.record(&candidate.item.id, now);
                    return StrategyOutcome::Selected(self.build_record(candidate, detail, &strategy.name));
                }
                Err(e) => {
                    warn!(id = %candidate.item.id, attempt, error = %e, "detail fetch failed");
                    last_error = Some(e);
                }
            }
        }

        StrategyOutcome::Exhausted(last_error.unwrap_or_else(|| PixivBotError::EmptyResult {
            strategy: strategy.name.clone(),
        }))
    }

    fn build_record(&self, candidate: ScoredCandidate, detail: ArtworkDetail, strategy: &str) -> ResultRecord {
        let item = candidate.item;
        let pick = |detail: String, fallback: String| if detail.is_empty() { fallback } else { detail };

        ResultRecord {
            work_url: self.client.work_url(&item.id),
            image_url: self.rewriter.rewrite(&detail.original_url),
            preview_url: self.rewriter.rewrite(&detail.regular_url),
            original_url: detail.original_url,
            title: pick(detail.title, item.title),
            author: pick(detail.author, item.author),
            author_id: pick(detail.author_id, item.author_id),
            id: item.id,
            stats: item.engagement,
            strategy: strategy.to_string(),
        }
    }
}
