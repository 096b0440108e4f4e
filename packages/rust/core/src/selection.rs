//! Repeat-avoiding pick from a ranked pool.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::debug;

use crate::recency::RecencyCache;
use crate::scoring::ScoredCandidate;

/// Choose the index of the candidate to show next.
///
/// 1. random among the first `top_quality` candidates not shown recently
/// 2. random among any candidate not shown recently
/// 3. the candidate shown longest ago, or the best one if none has an entry
///
/// Returns `None` only for an empty pool.
pub fn select<R: Rng + ?Sized>(
    pool: &[ScoredCandidate],
    cache: &dyn RecencyCache,
    now: DateTime<Utc>,
    top_quality: usize,
    rng: &mut R,
) -> Option<usize> {
    if pool.is_empty() {
        return None;
    }

    let shown: Vec<Option<DateTime<Utc>>> = pool
        .iter()
        .map(|c| cache.last_shown(&c.item.id, now))
        .collect();
    let unused: Vec<usize> = (0..pool.len()).filter(|&i| shown[i].is_none()).collect();

    let top: Vec<usize> = unused.iter().copied().filter(|&i| i < top_quality).collect();
    if let Some(&index) = top.choose(rng) {
        debug!(index, candidates = top.len(), "picked from top-quality subset");
        return Some(index);
    }

    if let Some(&index) = unused.choose(rng) {
        debug!(index, candidates = unused.len(), "picked from remaining pool");
        return Some(index);
    }

    let stalest = shown
        .iter()
        .enumerate()
        .filter_map(|(i, at)| at.map(|at| (i, at)))
        .min_by_key(|&(_, at)| at)
        .map(|(i, _)| i)
        .unwrap_or(0);
    debug!(index = stalest, "every candidate shown recently, reusing the stalest");
    Some(stalest)
}
