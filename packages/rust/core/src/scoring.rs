//! Engagement and freshness scoring.

use chrono::NaiveDate;
use pixivbot_shared::{CandidateItem, Engagement, ScoringConfig};

/// A candidate with its computed score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub score: f64,
    pub item: CandidateItem,
}

/// Weighted sum of bookmarks, likes and views.
pub fn engagement_score(engagement: &Engagement, config: &ScoringConfig) -> f64 {
    engagement.bookmarks as f64 * config.bookmark_weight
        + engagement.likes as f64 * config.like_weight
        + engagement.views as f64 * config.view_weight
}

/// Freshness factor applied on top of the engagement score.
///
/// Unknown dates are neutral. Dates in the future count as brand new.
pub fn recency_multiplier(created: Option<NaiveDate>, today: NaiveDate, config: &ScoringConfig) -> f64 {
    let Some(created) = created else {
        return 1.0;
    };
    let age = (today - created).num_days().max(0);

    if age <= config.fresh_days {
        config.fresh_boost
    } else if age <= config.decay_after_days {
        1.0
    } else {
        let horizon = config.decay_horizon_days.max(1) as f64;
        (1.0 - age as f64 / horizon).max(config.min_multiplier)
    }
}

pub fn score(item: &CandidateItem, today: NaiveDate, config: &ScoringConfig) -> f64 {
    engagement_score(&item.engagement, config) * recency_multiplier(item.created, today, config)
}

/// Score, sort best-first and keep the top `top_k`. Ties keep their search order.
pub fn rank(
    items: Vec<CandidateItem>,
    today: NaiveDate,
    config: &ScoringConfig,
    top_k: usize,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = items
        .into_iter()
        .map(|item| ScoredCandidate {
            score: score(&item, today, config),
            item,
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(id: &str, bookmarks: u64, created: Option<NaiveDate>) -> CandidateItem {
        CandidateItem {
            id: id.into(),
            title: String::new(),
            author: String::new(),
            author_id: String::new(),
            engagement: Engagement {
                bookmarks,
                likes: 0,
                views: 0,
            },
            created,
            tags: Vec::new(),
        }
    }

    #[test]
    fn engagement_weights() {
        let config = ScoringConfig::default();
        let e = Engagement {
            bookmarks: 10,
            likes: 5,
            views: 100,
        };
        assert!((engagement_score(&e, &config) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn multiplier_bands() {
        let config = ScoringConfig::default();
        let today = day(2024, 12, 31);

        assert_eq!(recency_multiplier(None, today, &config), 1.0);
        assert_eq!(recency_multiplier(Some(day(2024, 12, 20)), today, &config), 1.5);
        assert_eq!(recency_multiplier(Some(day(2024, 12, 1)), today, &config), 1.5);
        assert_eq!(recency_multiplier(Some(day(2024, 11, 1)), today, &config), 1.0);

        let old = recency_multiplier(Some(day(2024, 7, 4)), today, &config);
        assert!((old - (1.0 - 180.0 / 365.0)).abs() < 1e-9);

        // Floor for very old works
        assert_eq!(recency_multiplier(Some(day(2015, 1, 1)), today, &config), 0.3);
    }

    #[test]
    fn future_dates_count_as_fresh() {
        let config = ScoringConfig::default();
        let today = day(2024, 1, 1);
        assert_eq!(recency_multiplier(Some(day(2024, 3, 1)), today, &config), 1.5);
    }

    #[test]
    fn monotonic_in_each_counter() {
        let config = ScoringConfig::default();
        let today = day(2024, 6, 1);
        let base = Engagement {
            bookmarks: 10,
            likes: 10,
            views: 10,
        };
        let mut candidate = item("1", 0, Some(day(2024, 1, 1)));
        candidate.engagement = base;
        let s0 = score(&candidate, today, &config);

        for bump in [
            Engagement { bookmarks: 11, ..base },
            Engagement { likes: 11, ..base },
            Engagement { views: 11, ..base },
        ] {
            candidate.engagement = bump;
            assert!(score(&candidate, today, &config) >= s0);
        }
    }

    #[test]
    fn rank_sorts_truncates_and_keeps_ties_stable() {
        let config = ScoringConfig::default();
        let today = day(2024, 6, 1);
        let items = vec![
            item("low", 1, None),
            item("tie-a", 50, None),
            item("high", 100, None),
            item("tie-b", 50, None),
        ];

        let ranked = rank(items, today, &config, 3);
        let ids: Vec<_> = ranked.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, ["high", "tie-a", "tie-b"]);
    }

    #[test]
    fn freshness_can_reorder() {
        let config = ScoringConfig::default();
        let today = day(2024, 6, 1);
        let items = vec![
            item("old", 100, Some(day(2020, 1, 1))),
            item("fresh", 60, Some(day(2024, 5, 20))),
        ];
        let ranked = rank(items, today, &config, 10);
        assert_eq!(ranked[0].item.id, "fresh");
    }
}
