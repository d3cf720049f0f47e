// ============================================
// Three-Way Decision Controller (三支決策控制器)
// ============================================
//
// Drives the maturity-gated disclosure loop for one user:
//
//   Init ─→ Iterating ─┬─→ Mature (maturity >= threshold)
//                      └─→ Stuck  (neither stage fills its quota)
//
// Each iteration first asks the popularity recommender. Once its pools run
// dry, the factor model is refit on what has been disclosed so far and its
// predictions split undisclosed items into recommend / promote candidates.

mod maturity;

pub use maturity::{MaturityPolicy, MaturityValues};

use crate::config::DecisionConfig;
use crate::models::{DisclosureState, ItemId, Quota, StageSelection, TerminalState, UserId};
use crate::services::factorization::{ItemSpace, Result};
use crate::services::popularity::PopularityRecommender;
use crate::services::rating_store::UserRow;
use crate::utils::sample_stage;
use ndarray::ArrayViewMut1;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::debug;

/// Which stage produced a disclosure round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Popularity,
    Model,
}

/// Result of running the loop for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserOutcome {
    pub user: UserId,
    pub state: DisclosureState,
    pub terminal: TerminalState,
    pub popularity_rounds: usize,
    pub model_rounds: usize,
    /// Maturity after each successful round.
    pub maturity_trace: Vec<f64>,
}

pub struct ThreeWayController<'a> {
    popularity: &'a PopularityRecommender,
    items: &'a ItemSpace,
    favorite_thresholds: [f64; 2],
    maturity: MaturityPolicy,
    quota: Quota,
}

impl<'a> ThreeWayController<'a> {
    pub fn new(
        popularity: &'a PopularityRecommender,
        items: &'a ItemSpace,
        config: &DecisionConfig,
    ) -> Self {
        Self {
            popularity,
            items,
            favorite_thresholds: config.favorite_thresholds,
            maturity: MaturityPolicy::new(
                config.maturity_threshold,
                MaturityValues::from(config.maturity_values),
            ),
            quota: config.quota(),
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Runs the disclosure loop for `row`'s user until it matures or gets stuck.
    ///
    /// `user_vector` is that user's row of U; it is refit in place by the
    /// model stage. The row's disclosure flags end up matching the final
    /// disclosed set of the last model round.
    pub fn recommend_for_user(
        &self,
        row: &mut UserRow,
        mut user_vector: ArrayViewMut1<f64>,
        rng: &mut StdRng,
    ) -> Result<UserOutcome> {
        let mut state = DisclosureState::new();
        let mut popularity_rounds = 0;
        let mut model_rounds = 0;
        let mut maturity_trace = Vec::new();
        let mut popularity_exhausted = false;

        let terminal = loop {
            if self.maturity.is_mature(state.maturity()) {
                break TerminalState::Mature;
            }

            let mut stage = None;
            if !popularity_exhausted {
                match self.popularity.three_way_recommend(&mut state, rng) {
                    Some(added) => stage = Some((Stage::Popularity, added)),
                    None => popularity_exhausted = true,
                }
            }
            if stage.is_none() {
                stage = self
                    .model_stage(row, user_vector.view_mut(), &mut state, rng)?
                    .map(|added| (Stage::Model, added));
            }

            let Some((stage, added)) = stage else {
                break TerminalState::Stuck;
            };
            match stage {
                Stage::Popularity => popularity_rounds += 1,
                Stage::Model => model_rounds += 1,
            }

            state.add_maturity(self.maturity.gain(&added, row));
            maturity_trace.push(state.maturity());
        };

        debug!(
            user = row.user(),
            terminal = terminal.as_str(),
            maturity = state.maturity(),
            recommended = state.recommended().len(),
            promoted = state.promoted().len(),
            popularity_rounds,
            model_rounds,
            "User disclosure loop finished"
        );

        Ok(UserOutcome {
            user: row.user(),
            state,
            terminal,
            popularity_rounds,
            model_rounds,
            maturity_trace,
        })
    }

    /// Refits the user on every disclosed item, then samples recommend
    /// candidates (prediction >= favorite) and promote candidates
    /// (semi-favorite <= prediction < favorite) among undisclosed items.
    pub fn model_stage(
        &self,
        row: &mut UserRow,
        mut user_vector: ArrayViewMut1<f64>,
        state: &mut DisclosureState,
        rng: &mut StdRng,
    ) -> Result<Option<StageSelection>> {
        row.set_training(&state.disclosed_items());
        self.items
            .train_user_vector(user_vector.view_mut(), row, rng)?;
        let predictions = self.items.predict_all_with(user_vector.view())?;

        let [semi_favorite, favorite] = self.favorite_thresholds;
        let mut recommend_pool: Vec<ItemId> = Vec::new();
        let mut promote_pool: Vec<ItemId> = Vec::new();
        for (item, prediction) in predictions.into_iter().enumerate() {
            if state.is_disclosed(item) {
                continue;
            }
            if prediction >= favorite {
                recommend_pool.push(item);
            } else if prediction >= semi_favorite {
                promote_pool.push(item);
            }
        }

        Ok(sample_stage(&recommend_pool, &promote_pool, self.quota, rng)
            .map(|selection| state.apply(selection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FactorizationConfig;
    use crate::services::factorization::FactorModel;
    use crate::services::rating_store::{RatingBounds, RatingStore};
    use rand::SeedableRng;

    fn store() -> RatingStore {
        let mut store = RatingStore::from_user_ratings(
            vec![
                vec![(0, 6.0), (1, 4.0), (2, -3.0), (3, 1.0), (4, 7.0)],
                vec![(0, 5.0), (1, 3.0), (3, -2.0), (5, 2.0)],
                vec![(0, 4.0), (2, -5.0), (4, 8.0), (5, 0.0)],
                vec![(1, 2.0), (2, -1.0), (4, 6.0)],
            ],
            8,
            RatingBounds::new(-10.0, 10.0),
        )
        .unwrap();
        store.set_all_training();
        store
    }

    fn decision(length: usize, threshold: f64) -> DecisionConfig {
        DecisionConfig {
            recommendation_length: length,
            recommendation_ratio: 0.5,
            popularity_thresholds: [0.5, 0.8],
            favorite_thresholds: [-2.0, 0.5],
            maturity_threshold: threshold,
            ..DecisionConfig::default()
        }
    }

    fn model(store: &RatingStore) -> FactorModel {
        let config = FactorizationConfig {
            rank: 2,
            learning_rate: 0.01,
            pretrain_rounds: 50,
            incremental_rounds: 5,
            ..FactorizationConfig::default()
        };
        FactorModel::pretrain(store, &config, &mut StdRng::seed_from_u64(1))
    }

    fn run(config: &DecisionConfig, user: UserId, seed: u64) -> UserOutcome {
        let mut store = store();
        let mut model = model(&store);
        let popularity =
            PopularityRecommender::new(&store, config.popularity_thresholds, config.quota());
        let (items, users) = model.split_mut();
        let controller = ThreeWayController::new(&popularity, items, config);
        let row = store.user_row_mut(user).unwrap();
        controller
            .recommend_for_user(row, users.row_mut(user), &mut StdRng::seed_from_u64(seed))
            .unwrap()
    }

    #[test]
    fn test_zero_threshold_is_mature_immediately() {
        let outcome = run(&decision(2, 0.0), 0, 1);
        assert_eq!(outcome.terminal, TerminalState::Mature);
        assert_eq!(outcome.popularity_rounds + outcome.model_rounds, 0);
        assert!(outcome.state.disclosed_items().is_empty());
    }

    #[test]
    fn test_unreachable_threshold_ends_stuck() {
        let outcome = run(&decision(2, 1.0e9), 1, 7);
        assert_eq!(outcome.terminal, TerminalState::Stuck);
        // popular: 0, 1, 2, 4; semi-popular: 3, 5
        assert_eq!(outcome.popularity_rounds, 2);
        assert!(outcome
            .state
            .recommended()
            .is_disjoint(outcome.state.promoted()));
    }

    #[test]
    fn test_maturity_trace_non_decreasing() {
        for seed in 0..5 {
            let outcome = run(&decision(2, 1.0e9), 2, seed);
            assert!(outcome.maturity_trace.windows(2).all(|w| w[0] <= w[1]));
            if let Some(last) = outcome.maturity_trace.last() {
                assert_eq!(*last, outcome.state.maturity());
            }
        }
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let a = run(&decision(2, 1.0e9), 3, 11);
        let b = run(&decision(2, 1.0e9), 3, 11);
        assert_eq!(a.state, b.state);
        assert_eq!(a.terminal, b.terminal);
    }

    #[test]
    fn test_model_stage_respects_disclosed_items() {
        let mut store = store();
        let mut model = model(&store);
        let config = decision(2, 1.0e9);
        let popularity =
            PopularityRecommender::new(&store, config.popularity_thresholds, config.quota());
        let (items, users) = model.split_mut();
        let controller = ThreeWayController::new(&popularity, items, &config);

        let mut state = DisclosureState::new();
        state.apply(StageSelection {
            recommended: vec![0],
            promoted: vec![1, 6],
        });
        let row = store.user_row_mut(0).unwrap();
        let added = controller
            .model_stage(row, users.row_mut(0), &mut state, &mut StdRng::seed_from_u64(2))
            .unwrap();

        // items 0 and 1 are rated by user 0 and now flagged as training; 6 is not rated
        assert_eq!(row.num_disclosed(), 2);
        if let Some(added) = added {
            assert!(!added.recommended.contains(&0));
            assert!(!added.promoted.contains(&6));
            assert!(state.recommended().is_disjoint(state.promoted()));
        }
    }
}
