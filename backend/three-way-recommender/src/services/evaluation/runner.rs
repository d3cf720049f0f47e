use super::CostEvaluator;
use crate::config::DecisionConfig;
use crate::models::{BehaviorStatistics, TerminalState};
use crate::services::decision::{ThreeWayController, UserOutcome};
use crate::services::factorization::{FactorModel, FactorizationError, Result};
use crate::services::popularity::PopularityRecommender;
use crate::services::rating_store::RatingStore;
use crate::utils::{mean_and_std_dev, user_rng};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// One leave-user-out pass over every user.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run: usize,
    pub seed: u64,
    pub total_cost: f64,
    pub statistics: BehaviorStatistics,
    pub users: usize,
    pub mature_users: usize,
    pub stuck_users: usize,
    pub popularity_rounds: usize,
    pub model_rounds: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl CostSummary {
    pub fn from_costs(costs: &[f64]) -> Self {
        if costs.is_empty() {
            return Self::default();
        }
        let (mean, std_dev) = mean_and_std_dev(costs);
        let min = costs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = costs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            mean,
            std_dev,
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub users: usize,
    pub items: usize,
    pub ratings: usize,
    pub mean_rating: f64,
    pub runs: Vec<RunSummary>,
    pub cost: CostSummary,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

struct UserResult {
    outcome: UserOutcome,
    cost: f64,
    statistics: BehaviorStatistics,
}

/// Runs the controller for every user and scores the outcome.
pub struct LeaveUserOutRunner<'a> {
    popularity: &'a PopularityRecommender,
    decision: &'a DecisionConfig,
    evaluator: &'a CostEvaluator,
}

impl<'a> LeaveUserOutRunner<'a> {
    pub fn new(
        popularity: &'a PopularityRecommender,
        decision: &'a DecisionConfig,
        evaluator: &'a CostEvaluator,
    ) -> Self {
        Self {
            popularity,
            decision,
            evaluator,
        }
    }

    /// One pass over all users on the rayon pool. Each task owns its user's
    /// row of U, its rating row and an RNG derived from `(seed, user)`, so
    /// the result does not depend on the thread count.
    pub fn leave_user_out_recommend(
        &self,
        store: &mut RatingStore,
        model: &mut FactorModel,
        run: usize,
        seed: u64,
    ) -> Result<RunSummary> {
        if model.num_users() != store.num_users() {
            return Err(FactorizationError::DimensionMismatch {
                expected: store.num_users(),
                actual: model.num_users(),
            });
        }

        let started = Instant::now();
        let (items, user_factors) = model.split_mut();
        let controller = ThreeWayController::new(self.popularity, items, self.decision);
        let evaluator = self.evaluator;

        let results: Vec<UserResult> = user_factors
            .outer_iter_mut()
            .collect::<Vec<_>>()
            .into_par_iter()
            .zip(store.rows_mut().par_iter_mut())
            .map(|(user_vector, row)| -> Result<UserResult> {
                let mut rng = user_rng(seed, row.user());
                let outcome = controller.recommend_for_user(row, user_vector, &mut rng)?;
                row.set_all_training();

                let recommended = outcome.state.recommended();
                let promoted = outcome.state.promoted();
                Ok(UserResult {
                    cost: evaluator.compute_total_cost_for_user(row, recommended, promoted),
                    statistics: evaluator.compute_user_statistics(row, recommended, promoted),
                    outcome,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut summary = RunSummary {
            run,
            seed,
            total_cost: 0.0,
            statistics: BehaviorStatistics::default(),
            users: results.len(),
            mature_users: 0,
            stuck_users: 0,
            popularity_rounds: 0,
            model_rounds: 0,
            elapsed_ms: 0,
        };
        for result in &results {
            summary.total_cost += result.cost;
            summary.statistics.merge(&result.statistics);
            summary.popularity_rounds += result.outcome.popularity_rounds;
            summary.model_rounds += result.outcome.model_rounds;
            match result.outcome.terminal {
                TerminalState::Mature => summary.mature_users += 1,
                TerminalState::Stuck => summary.stuck_users += 1,
            }
        }
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            run,
            seed,
            total_cost = summary.total_cost,
            mature_users = summary.mature_users,
            stuck_users = summary.stuck_users,
            elapsed_ms = summary.elapsed_ms,
            "Leave-user-out run finished"
        );
        Ok(summary)
    }

    /// `times` runs seeded `base_seed`, `base_seed + 1`, ...; U carries over
    /// from one run to the next.
    pub fn repeated_runs(
        &self,
        store: &mut RatingStore,
        model: &mut FactorModel,
        base_seed: u64,
        times: usize,
    ) -> Result<EvaluationReport> {
        let started_at = Utc::now();
        let mut runs = Vec::with_capacity(times);
        for run in 0..times {
            let seed = base_seed.wrapping_add(run as u64);
            runs.push(self.leave_user_out_recommend(store, model, run, seed)?);
        }

        let costs: Vec<f64> = runs.iter().map(|r| r.total_cost).collect();
        let cost = CostSummary::from_costs(&costs);

        info!(
            runs = runs.len(),
            mean_cost = cost.mean,
            std_dev = cost.std_dev,
            min_cost = cost.min,
            max_cost = cost.max,
            "Repeated evaluation finished"
        );

        Ok(EvaluationReport {
            users: store.num_users(),
            items: store.num_items(),
            ratings: store.num_ratings(),
            mean_rating: store.mean_rating(),
            runs,
            cost,
            started_at,
            completed_at: Utc::now(),
        })
    }
}
