// ============================================
// Cost Evaluator (代價評估)
// ============================================
//
// Scores a user's final disclosure sets against their ground-truth ratings.
// Every rated item costs `cost_matrix[behavior][like]`, where behavior comes
// from set membership and like from comparing the rating with the
// (centered) like threshold.

mod runner;

pub use runner::{CostSummary, EvaluationReport, LeaveUserOutRunner, RunSummary};

use crate::config::CostConfig;
use crate::models::{Behavior, BehaviorStatistics, CostMatrix, ItemId, Like};
use crate::services::rating_store::UserRow;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct CostEvaluator {
    cost_matrix: CostMatrix,
    like_threshold: f64,
    mean_rating: f64,
}

impl CostEvaluator {
    /// `mean_rating` is the mean removed by centering, so the raw-scale like
    /// threshold can be compared with centered ratings.
    pub fn new(config: &CostConfig, mean_rating: f64) -> Self {
        Self {
            cost_matrix: config.cost_matrix,
            like_threshold: config.like_threshold,
            mean_rating,
        }
    }

    pub fn cost_matrix(&self) -> &CostMatrix {
        &self.cost_matrix
    }

    pub fn like_of(&self, rating: f64) -> Like {
        if rating > self.like_threshold - self.mean_rating {
            Like::Like
        } else {
            Like::Dislike
        }
    }

    fn behavior_of(
        item: ItemId,
        recommended: &BTreeSet<ItemId>,
        promoted: &BTreeSet<ItemId>,
    ) -> Behavior {
        if recommended.contains(&item) {
            Behavior::Recommend
        } else if promoted.contains(&item) {
            Behavior::Promote
        } else {
            Behavior::NonRecommend
        }
    }

    /// Sum of costs over every ground-truth rating of the row's user.
    pub fn compute_total_cost_for_user(
        &self,
        row: &UserRow,
        recommended: &BTreeSet<ItemId>,
        promoted: &BTreeSet<ItemId>,
    ) -> f64 {
        row.triples()
            .iter()
            .map(|t| {
                let behavior = Self::behavior_of(t.item, recommended, promoted);
                self.cost_matrix.cost(behavior, self.like_of(t.rating))
            })
            .sum()
    }

    /// Behavior × like counts over the row's ground-truth ratings.
    pub fn compute_user_statistics(
        &self,
        row: &UserRow,
        recommended: &BTreeSet<ItemId>,
        promoted: &BTreeSet<ItemId>,
    ) -> BehaviorStatistics {
        let mut statistics = BehaviorStatistics::default();
        for t in row.triples() {
            statistics.record(
                Self::behavior_of(t.item, recommended, promoted),
                self.like_of(t.rating),
            );
        }
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rating_store::{RatingBounds, RatingStore};

    fn store() -> RatingStore {
        RatingStore::from_user_ratings(
            vec![vec![(0, 3.0), (1, -1.0), (2, 0.5), (3, -4.0), (4, 2.0)]],
            6,
            RatingBounds::new(-10.0, 10.0),
        )
        .unwrap()
    }

    fn evaluator(like_threshold: f64, mean_rating: f64) -> CostEvaluator {
        CostEvaluator::new(
            &CostConfig {
                cost_matrix: CostMatrix::default(),
                like_threshold,
            },
            mean_rating,
        )
    }

    #[test]
    fn test_total_cost() {
        let store = store();
        let row = store.user_row(0).unwrap();
        let evaluator = evaluator(0.0, 0.0);

        let recommended = BTreeSet::from([0, 1]);
        let promoted = BTreeSet::from([2, 5]);
        // item0 R/like 6, item1 R/dislike 50, item2 P/like 10,
        // item3 N/dislike 2, item4 N/like 40; item5 is unrated
        assert_eq!(
            evaluator.compute_total_cost_for_user(row, &recommended, &promoted),
            108.0
        );

        let statistics = evaluator.compute_user_statistics(row, &recommended, &promoted);
        assert_eq!(statistics.count(Behavior::Recommend, Like::Like), 1);
        assert_eq!(statistics.count(Behavior::Recommend, Like::Dislike), 1);
        assert_eq!(statistics.count(Behavior::Promote, Like::Like), 1);
        assert_eq!(statistics.count(Behavior::NonRecommend, Like::Dislike), 1);
        assert_eq!(statistics.count(Behavior::NonRecommend, Like::Like), 1);
        assert_eq!(statistics.total(), 5);
    }

    #[test]
    fn test_cost_ignores_insertion_order() {
        let store = store();
        let row = store.user_row(0).unwrap();
        let evaluator = evaluator(0.0, 0.0);

        let mut forward = BTreeSet::new();
        for item in [0, 2, 4] {
            forward.insert(item);
        }
        let mut backward = BTreeSet::new();
        for item in [4, 2, 0] {
            backward.insert(item);
        }
        let promoted = BTreeSet::from([3, 1]);

        assert_eq!(
            evaluator.compute_total_cost_for_user(row, &forward, &promoted),
            evaluator.compute_total_cost_for_user(row, &backward, &promoted)
        );
    }

    #[test]
    fn test_like_threshold_shifted_by_mean() {
        // raw threshold 1.5 with mean 1.0 → centered ratings above 0.5 are liked
        let evaluator = evaluator(1.5, 1.0);
        assert_eq!(evaluator.like_of(0.6), Like::Like);
        assert_eq!(evaluator.like_of(0.5), Like::Dislike);
    }

    #[test]
    fn test_nothing_disclosed() {
        let store = store();
        let row = store.user_row(0).unwrap();
        let evaluator = evaluator(0.0, 0.0);
        // likes: 0, 2, 4 → 3 × 40; dislikes: 1, 3 → 2 × 2
        assert_eq!(
            evaluator.compute_total_cost_for_user(row, &BTreeSet::new(), &BTreeSet::new()),
            124.0
        );
    }
}
