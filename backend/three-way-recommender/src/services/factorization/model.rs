use super::{FactorizationError, RatingTransform, Result};
use crate::config::FactorizationConfig;
use crate::models::{ItemId, UserId};
use crate::services::rating_store::{RatingBounds, RatingStore, UserRow};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Log pretraining progress every this many rounds.
const PROGRESS_INTERVAL: usize = 50;

/// The frozen half of the model: item factors plus everything needed to
/// refit and score one user vector. Shared read-only across user tasks.
#[derive(Debug)]
pub struct ItemSpace {
    config: FactorizationConfig,
    bounds: RatingBounds,
    transform: Box<dyn RatingTransform>,
    /// [num_items x rank]
    item_factors: Array2<f64>,
}

impl ItemSpace {
    pub fn rank(&self) -> usize {
        self.item_factors.ncols()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn bounds(&self) -> RatingBounds {
        self.bounds
    }

    pub fn transform(&self) -> &dyn RatingTransform {
        self.transform.as_ref()
    }

    pub fn item_factors(&self) -> &Array2<f64> {
        &self.item_factors
    }

    /// Adds uniform noise in `[-init_range, init_range]` to every component.
    pub fn perturb(&self, mut user_vector: ArrayViewMut1<f64>, rng: &mut StdRng) {
        let range = self.config.init_range;
        for value in user_vector.iter_mut() {
            *value += rng.gen_range(-range..=range);
        }
    }

    /// Perturbs `user_vector`, then runs `incremental_rounds` SGD passes over
    /// the row's disclosed ratings. Item factors stay untouched.
    pub fn train_user_vector(
        &self,
        mut user_vector: ArrayViewMut1<f64>,
        row: &UserRow,
        rng: &mut StdRng,
    ) -> Result<()> {
        self.check_rank(user_vector.len())?;
        self.perturb(user_vector.view_mut(), rng);

        let targets: Vec<(ItemId, f64)> = row
            .disclosed_triples()
            .map(|t| (t.item, self.transform.forward(t.rating)))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        for &(item, _) in &targets {
            self.check_item(item)?;
        }

        let alpha = self.config.learning_rate;
        let penalty = self
            .config
            .regularization_scheme
            .weight(self.config.regularization_weight);

        for _ in 0..self.config.incremental_rounds {
            for &(item, target) in &targets {
                let item_vector = self.item_factors.row(item);
                let residual = target - user_vector.dot(&item_vector);
                for (u, v) in user_vector.iter_mut().zip(item_vector.iter()) {
                    *u += alpha * (2.0 * residual * v - penalty * *u);
                }
            }
        }
        Ok(())
    }

    /// Clamped prediction in rating space for one user vector.
    pub fn predict_with(&self, user_vector: ArrayView1<f64>, item: ItemId) -> Result<f64> {
        self.check_rank(user_vector.len())?;
        self.check_item(item)?;
        Ok(self.score(user_vector, item))
    }

    /// Predictions for every item, indexed by item id.
    pub fn predict_all_with(&self, user_vector: ArrayView1<f64>) -> Result<Vec<f64>> {
        self.check_rank(user_vector.len())?;
        Ok((0..self.num_items())
            .map(|item| self.score(user_vector, item))
            .collect())
    }

    fn score(&self, user_vector: ArrayView1<f64>, item: ItemId) -> f64 {
        let raw = self
            .transform
            .inverse(user_vector.dot(&self.item_factors.row(item)));
        if raw.is_finite() {
            self.bounds.clamp(raw)
        } else {
            self.bounds.midpoint()
        }
    }

    fn check_item(&self, item: ItemId) -> Result<()> {
        if item < self.num_items() {
            Ok(())
        } else {
            Err(FactorizationError::UnknownItem(item))
        }
    }

    fn check_rank(&self, len: usize) -> Result<()> {
        if len == self.rank() {
            Ok(())
        } else {
            Err(FactorizationError::DimensionMismatch {
                expected: self.rank(),
                actual: len,
            })
        }
    }
}

/// U and V together.
#[derive(Debug)]
pub struct FactorModel {
    items: ItemSpace,
    /// [num_users x rank]
    user_factors: Array2<f64>,
}

impl FactorModel {
    /// Initializes U and V uniformly in `[-init_range, init_range]` and fits
    /// them on every disclosed rating of `store` for `pretrain_rounds` passes.
    pub fn pretrain(store: &RatingStore, config: &FactorizationConfig, rng: &mut StdRng) -> Self {
        let bounds = store.bounds();
        let transform = config.model_kind.build_transform(bounds, config);
        let rank = config.rank;
        let range = config.init_range;

        let mut user_factors =
            Array2::from_shape_fn((store.num_users(), rank), |_| rng.gen_range(-range..=range));
        let mut item_factors =
            Array2::from_shape_fn((store.num_items(), rank), |_| rng.gen_range(-range..=range));

        let samples: Vec<(UserId, ItemId, f64)> = store
            .rows()
            .iter()
            .flat_map(|row| row.disclosed_triples())
            .map(|t| (t.user, t.item, transform.forward(t.rating)))
            .collect();

        info!(
            users = store.num_users(),
            items = store.num_items(),
            training_ratings = samples.len(),
            rank,
            rounds = config.pretrain_rounds,
            transform = transform.name(),
            "Pretraining factor model"
        );

        let alpha = config.learning_rate;
        let penalty = config
            .regularization_scheme
            .weight(config.regularization_weight);

        for round in 0..config.pretrain_rounds {
            let mut abs_residual = 0.0;
            for &(user, item, target) in &samples {
                let residual = target - user_factors.row(user).dot(&item_factors.row(item));
                abs_residual += residual.abs();

                let mut user_vector = user_factors.row_mut(user);
                let mut item_vector = item_factors.row_mut(item);
                for (u, v) in user_vector.iter_mut().zip(item_vector.iter_mut()) {
                    // 兩邊都用更新前的值
                    let (u_k, v_k) = (*u, *v);
                    *u += alpha * (2.0 * residual * v_k - penalty * u_k);
                    *v += alpha * (2.0 * residual * u_k - penalty * v_k);
                }
            }

            if (round + 1) % PROGRESS_INTERVAL == 0 || round + 1 == config.pretrain_rounds {
                let mean_abs_residual = if samples.is_empty() {
                    0.0
                } else {
                    abs_residual / samples.len() as f64
                };
                info!(round = round + 1, mean_abs_residual, "Pretraining progress");
            }
        }

        Self {
            items: ItemSpace {
                config: config.clone(),
                bounds,
                transform,
                item_factors,
            },
            user_factors,
        }
    }

    pub fn items(&self) -> &ItemSpace {
        &self.items
    }

    pub fn rank(&self) -> usize {
        self.items.rank()
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.items.num_items()
    }

    pub fn user_factors(&self) -> &Array2<f64> {
        &self.user_factors
    }

    pub fn user_vector(&self, user: UserId) -> Result<ArrayView1<'_, f64>> {
        self.check_user(user)?;
        Ok(self.user_factors.row(user))
    }

    /// Read-only item space next to mutable user factors, for handing
    /// disjoint user rows to parallel tasks.
    pub fn split_mut(&mut self) -> (&ItemSpace, &mut Array2<f64>) {
        (&self.items, &mut self.user_factors)
    }

    /// Incremental retraining of the row's user.
    pub fn train_user(&mut self, row: &UserRow, rng: &mut StdRng) -> Result<()> {
        let user = row.user();
        self.check_user(user)?;
        self.items
            .train_user_vector(self.user_factors.row_mut(user), row, rng)
    }

    pub fn predict(&self, user: UserId, item: ItemId) -> Result<f64> {
        self.check_user(user)?;
        self.items.predict_with(self.user_factors.row(user), item)
    }

    pub fn predict_for_user(&self, user: UserId) -> Result<Vec<f64>> {
        self.check_user(user)?;
        self.items.predict_all_with(self.user_factors.row(user))
    }

    /// Mean absolute error over the non-disclosed ratings; `None` when
    /// every rating is disclosed.
    pub fn mae(&self, store: &RatingStore) -> Result<Option<f64>> {
        let errors = self.hidden_errors(store)?;
        if errors.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            errors.iter().map(|e| e.abs()).sum::<f64>() / errors.len() as f64,
        ))
    }

    /// Root mean squared error over the non-disclosed ratings.
    pub fn rmse(&self, store: &RatingStore) -> Result<Option<f64>> {
        let errors = self.hidden_errors(store)?;
        if errors.is_empty() {
            return Ok(None);
        }
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64;
        Ok(Some(mse.sqrt()))
    }

    fn hidden_errors(&self, store: &RatingStore) -> Result<Vec<f64>> {
        let mut errors = Vec::new();
        let mean = store.mean_rating();
        for row in store.rows() {
            for triple in row.hidden_triples_centered(mean) {
                let predicted = self.predict(triple.user, triple.item)?;
                errors.push(predicted - triple.rating);
            }
        }
        Ok(errors)
    }

    /// For every user: disclose every other rated item, retrain the user
    /// incrementally and measure absolute error on the other half. Each
    /// row's disclosure flags are restored afterwards.
    pub fn incremental_holdout_mae(
        &mut self,
        store: &mut RatingStore,
        rng: &mut StdRng,
    ) -> Result<Option<f64>> {
        let mut total_error = 0.0;
        let mut count = 0usize;

        for row in store.rows_mut() {
            if row.is_empty() {
                continue;
            }
            let previous: BTreeSet<ItemId> = row.disclosed_triples().map(|t| t.item).collect();
            let half: BTreeSet<ItemId> = row.rated_items().step_by(2).collect();

            row.set_training(&half);
            self.train_user(row, rng)?;
            for triple in row.hidden_triples() {
                let predicted = self.predict(triple.user, triple.item)?;
                total_error += (predicted - triple.rating).abs();
                count += 1;
            }
            row.set_training(&previous);
        }

        let mae = if count == 0 {
            None
        } else {
            Some(total_error / count as f64)
        };
        debug!(tested = count, mae = ?mae, "Incremental holdout finished");
        Ok(mae)
    }

    fn check_user(&self, user: UserId) -> Result<()> {
        if user < self.num_users() {
            Ok(())
        } else {
            Err(FactorizationError::UnknownUser(user))
        }
    }
}
