// ============================================
// Popularity Recommender (熱門度推薦)
// ============================================
//
// Stage 1 of the disclosure loop. Items are tiered by how many ratings they
// received relative to the most-rated item:
//
//   Popular      popularity >  popular · max         → recommend pool
//   SemiPopular  popularity in (semi · max, popular · max] → promote pool
//   Unpopular    everything else

use crate::models::{DisclosureState, ItemId, Quota, StageSelection};
use crate::services::rating_store::RatingStore;
use crate::utils::sample_stage;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PopularityTier {
    Popular,
    SemiPopular,
    Unpopular,
}

#[derive(Debug, Clone)]
pub struct PopularityRecommender {
    tiers: Vec<PopularityTier>,
    popular_items: Vec<ItemId>,
    semi_popular_items: Vec<ItemId>,
    max_popularity: u32,
    thresholds: [f64; 2],
    quota: Quota,
}

impl PopularityRecommender {
    /// Tiers are fixed at construction from the store's popularity counts.
    pub fn new(store: &RatingStore, thresholds: [f64; 2], quota: Quota) -> Self {
        let max_popularity = store.max_item_popularity();
        let max = max_popularity as f64;
        let [semi_popular, popular] = thresholds;

        let tiers: Vec<PopularityTier> = (0..store.num_items())
            .map(|item| {
                let popularity = store.item_popularity(item) as f64;
                if popularity > popular * max {
                    PopularityTier::Popular
                } else if popularity > semi_popular * max {
                    PopularityTier::SemiPopular
                } else {
                    PopularityTier::Unpopular
                }
            })
            .collect();

        let items_in = |tier: PopularityTier| -> Vec<ItemId> {
            tiers
                .iter()
                .enumerate()
                .filter(|(_, t)| **t == tier)
                .map(|(item, _)| item)
                .collect()
        };
        let popular_items = items_in(PopularityTier::Popular);
        let semi_popular_items = items_in(PopularityTier::SemiPopular);

        debug!(
            max_popularity,
            popular = popular_items.len(),
            semi_popular = semi_popular_items.len(),
            "Built popularity tiers"
        );

        Self {
            tiers,
            popular_items,
            semi_popular_items,
            max_popularity,
            thresholds,
            quota,
        }
    }

    pub fn classify(&self, item: ItemId) -> PopularityTier {
        self.tiers
            .get(item)
            .copied()
            .unwrap_or(PopularityTier::Unpopular)
    }

    pub fn popular_items(&self) -> &[ItemId] {
        &self.popular_items
    }

    pub fn semi_popular_items(&self) -> &[ItemId] {
        &self.semi_popular_items
    }

    pub fn max_popularity(&self) -> u32 {
        self.max_popularity
    }

    pub fn thresholds(&self) -> [f64; 2] {
        self.thresholds
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Samples undisclosed popular items to recommend and semi-popular items
    /// to promote, adds them to `state` and returns them.
    ///
    /// `None` means a pool ran dry; `state` is left untouched.
    pub fn three_way_recommend(
        &self,
        state: &mut DisclosureState,
        rng: &mut StdRng,
    ) -> Option<StageSelection> {
        let recommend_pool: Vec<ItemId> = self
            .popular_items
            .iter()
            .copied()
            .filter(|item| !state.is_disclosed(*item))
            .collect();
        let promote_pool: Vec<ItemId> = self
            .semi_popular_items
            .iter()
            .copied()
            .filter(|item| !state.is_disclosed(*item))
            .collect();

        let selection = sample_stage(&recommend_pool, &promote_pool, self.quota, rng)?;
        Some(state.apply(selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rating_store::RatingBounds;
    use rand::SeedableRng;

    /// Popularity: item0 = 4, item1 = 3, item2 = 2, item3 = 1, item4 = 0.
    fn store() -> RatingStore {
        RatingStore::from_user_ratings(
            vec![
                vec![(0, 1.0), (1, 1.0), (2, 1.0), (3, 1.0)],
                vec![(0, 1.0), (1, 1.0), (2, 1.0)],
                vec![(0, 1.0), (1, 1.0)],
                vec![(0, 1.0)],
            ],
            5,
            RatingBounds::new(-10.0, 10.0),
        )
        .unwrap()
    }

    fn quota(num_recommend: usize, num_promote: usize) -> Quota {
        Quota {
            num_recommend,
            num_promote,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        // popular: > 2.0, semi-popular: (1.0, 2.0]
        let recommender = PopularityRecommender::new(&store(), [0.25, 0.5], quota(1, 1));
        assert_eq!(recommender.max_popularity(), 4);
        assert_eq!(recommender.classify(0), PopularityTier::Popular);
        assert_eq!(recommender.classify(1), PopularityTier::Popular);
        assert_eq!(recommender.classify(2), PopularityTier::SemiPopular);
        assert_eq!(recommender.classify(3), PopularityTier::Unpopular);
        assert_eq!(recommender.classify(4), PopularityTier::Unpopular);
        assert_eq!(recommender.classify(42), PopularityTier::Unpopular);
    }

    #[test]
    fn test_zero_thresholds_make_rated_items_popular() {
        let recommender = PopularityRecommender::new(&store(), [0.0, 0.0], quota(1, 1));
        assert_eq!(recommender.popular_items(), &[0, 1, 2, 3]);
        assert!(recommender.semi_popular_items().is_empty());
        assert_eq!(recommender.classify(4), PopularityTier::Unpopular);
    }

    #[test]
    fn test_recommend_fills_quota_and_excludes_disclosed() {
        let recommender = PopularityRecommender::new(&store(), [0.25, 0.5], quota(1, 1));
        let mut state = DisclosureState::new();
        let mut rng = StdRng::seed_from_u64(3);

        let first = recommender.three_way_recommend(&mut state, &mut rng).unwrap();
        assert_eq!(first.recommended.len(), 1);
        assert_eq!(first.promoted, vec![2]);

        let second = recommender.three_way_recommend(&mut state, &mut rng);
        // semi-popular pool is now empty
        assert!(second.is_none());
        assert_eq!(state.recommended().len(), 1);
        assert_eq!(state.promoted().len(), 1);
        assert!(state.recommended().is_disjoint(state.promoted()));
    }

    #[test]
    fn test_exhaustion_leaves_state_untouched() {
        let recommender = PopularityRecommender::new(&store(), [0.25, 0.5], quota(3, 0));
        let mut state = DisclosureState::new();
        let mut rng = StdRng::seed_from_u64(3);

        assert!(recommender.three_way_recommend(&mut state, &mut rng).is_none());
        assert_eq!(state, DisclosureState::new());
    }
}
