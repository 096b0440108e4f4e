//! Search strategies resolved against the current date.

use chrono::{Days, NaiveDate};
use pixivbot_search::{SearchMode, SearchQuery};
use pixivbot_shared::{PageSelection, StrategyConfig};
use rand::Rng;

/// A strategy with its date window pinned to a concrete day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub name: String,
    /// Inclusive creation-date window, `None` for all time.
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub min_bookmarks: u32,
    pub page: PageSelection,
}

impl SearchStrategy {
    /// Pin `config` to `today`: a 90-day window becomes `today - 90 ..= today`.
    pub fn resolve(config: &StrategyConfig, today: NaiveDate) -> Self {
        let window = config.window_days.map(|days| {
            let start = today
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN);
            (start, today)
        });

        Self {
            name: config.name.clone(),
            window,
            min_bookmarks: config.min_bookmarks,
            page: config.page,
        }
    }

    /// Page to request for this attempt.
    pub fn pick_page<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        match self.page {
            PageSelection::Fixed(page) => page.max(1),
            PageSelection::Random(lo, hi) if lo < hi => rng.random_range(lo..=hi).max(1),
            PageSelection::Random(lo, _) => lo.max(1),
        }
    }

    /// Build the request parameters for one search under this strategy.
    pub fn query<R: Rng + ?Sized>(&self, mode: SearchMode, rng: &mut R) -> SearchQuery {
        SearchQuery {
            strategy: self.name.clone(),
            page: self.pick_page(rng),
            window: self.window,
            min_bookmarks: self.min_bookmarks,
            mode,
        }
    }
}
