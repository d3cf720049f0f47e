// ============================================
// Rating Store (評分資料)
// ============================================
//
// Per-user rating rows with a parallel disclosed/training flag, plus the
// item popularity aggregates computed once at load time.
//
// Lifecycle:
// 1. load (dense tab-separated or CSV triples)
// 2. set_all_training + adjust_using_mean_rating (one-time centering)
// 3. per-user set_user_training during the disclosure loop

mod loader;

pub use loader::{load, parse_dense, parse_triples, RatingFormat, MISSING_RATING};

use crate::models::{ItemId, Triple, UserId};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Added to popularity counts so unrated items average to 0 instead of NaN.
const AVERAGE_EPSILON: f64 = 0.01;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to load dataset {path}: {source}")]
    DataLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset at line {line}: {reason}")]
    DataFormat { line: usize, reason: String },

    #[error("I/O error while reading dataset: {0}")]
    Read(#[from] std::io::Error),

    #[error("Dataset contains no ratings")]
    Empty,

    #[error("Ratings are already centered around mean {mean}")]
    AlreadyCentered { mean: f64 },

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Training fraction must be within [0, 1], got {0}")]
    InvalidFraction(f64),
}

pub type Result<T> = std::result::Result<T, DatasetError>;

/// Inclusive rating range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingBounds {
    pub lower: f64,
    pub upper: f64,
}

impl RatingBounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    fn shifted(&self, delta: f64) -> Self {
        Self {
            lower: self.lower - delta,
            upper: self.upper - delta,
        }
    }
}

/// Recorded once by [`RatingStore::adjust_using_mean_rating`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub mean: f64,
    /// Centered lower bound.
    pub lower: f64,
    /// Centered upper bound.
    pub upper: f64,
}

/// All ratings of one user, ordered by item, with a disclosed flag per rating.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    user: UserId,
    triples: Vec<Triple>,
    disclosed: Vec<bool>,
    /// Ratings already moved onto the centered scale.
    shifted: Vec<bool>,
}

impl UserRow {
    fn new(user: UserId, mut triples: Vec<Triple>) -> Self {
        triples.sort_by_key(|t| t.item);
        let disclosed = vec![false; triples.len()];
        let shifted = vec![false; triples.len()];
        Self {
            user,
            triples,
            disclosed,
            shifted,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn is_disclosed(&self, index: usize) -> bool {
        self.disclosed.get(index).copied().unwrap_or(false)
    }

    /// Triples currently flagged as disclosed (training).
    pub fn disclosed_triples(&self) -> impl Iterator<Item = &Triple> + '_ {
        self.triples
            .iter()
            .zip(self.disclosed.iter())
            .filter(|(_, flag)| **flag)
            .map(|(triple, _)| triple)
    }

    /// Triples currently not disclosed (testing).
    pub fn hidden_triples(&self) -> impl Iterator<Item = &Triple> + '_ {
        self.triples
            .iter()
            .zip(self.disclosed.iter())
            .filter(|(_, flag)| !**flag)
            .map(|(triple, _)| triple)
    }

    /// Hidden triples on the centered scale. Ratings that were not
    /// disclosed when the store was centered are shifted by `mean` here.
    pub fn hidden_triples_centered(&self, mean: f64) -> impl Iterator<Item = Triple> + '_ {
        self.triples
            .iter()
            .zip(self.disclosed.iter().zip(self.shifted.iter()))
            .filter(|(_, (disclosed, _))| !**disclosed)
            .map(move |(triple, (_, shifted))| {
                if *shifted {
                    *triple
                } else {
                    Triple {
                        rating: triple.rating - mean,
                        ..*triple
                    }
                }
            })
    }

    pub fn num_disclosed(&self) -> usize {
        self.disclosed.iter().filter(|flag| **flag).count()
    }

    /// Full overwrite: exactly the triples whose item is in `items` become disclosed.
    pub fn set_training(&mut self, items: &BTreeSet<ItemId>) {
        for (triple, flag) in self.triples.iter().zip(self.disclosed.iter_mut()) {
            *flag = items.contains(&triple.item);
        }
    }

    pub fn set_all_training(&mut self) {
        self.disclosed.iter_mut().for_each(|flag| *flag = true);
    }

    pub fn rated_items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.triples.iter().map(|t| t.item)
    }

    pub fn rating_for(&self, item: ItemId) -> Option<f64> {
        self.triples
            .binary_search_by_key(&item, |t| t.item)
            .ok()
            .map(|idx| self.triples[idx].rating)
    }

    /// Whether the user has a ground-truth rating for `item`.
    pub fn knows(&self, item: ItemId) -> bool {
        self.rating_for(item).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RatingStore {
    rows: Vec<UserRow>,
    num_items: usize,
    num_ratings: usize,
    item_popularity: Vec<u32>,
    item_rating_sums: Vec<f64>,
    bounds: RatingBounds,
    scale: Option<RatingScale>,
}

impl RatingStore {
    /// Builds a store from per-user `(item, rating)` lists; user ids are the
    /// list positions. Nothing is disclosed initially.
    pub fn from_user_ratings(
        ratings: Vec<Vec<(ItemId, f64)>>,
        num_items: usize,
        bounds: RatingBounds,
    ) -> Result<Self> {
        let mut item_popularity = vec![0u32; num_items];
        let mut item_rating_sums = vec![0.0f64; num_items];
        let mut num_ratings = 0usize;
        let mut rows = Vec::with_capacity(ratings.len());

        for (user, user_ratings) in ratings.into_iter().enumerate() {
            let mut seen = BTreeSet::new();
            let mut triples = Vec::with_capacity(user_ratings.len());
            for (item, rating) in user_ratings {
                if item >= num_items {
                    return Err(DatasetError::DataFormat {
                        line: user + 1,
                        reason: format!("item {} outside 0..{}", item, num_items),
                    });
                }
                if !seen.insert(item) {
                    return Err(DatasetError::DataFormat {
                        line: user + 1,
                        reason: format!("user {} rates item {} twice", user, item),
                    });
                }
                item_popularity[item] += 1;
                item_rating_sums[item] += rating;
                triples.push(Triple::new(user, item, rating));
            }
            num_ratings += triples.len();
            rows.push(UserRow::new(user, triples));
        }

        if num_ratings == 0 {
            return Err(DatasetError::Empty);
        }

        Ok(Self {
            rows,
            num_items,
            num_ratings,
            item_popularity,
            item_rating_sums,
            bounds,
            scale: None,
        })
    }

    pub fn num_users(&self) -> usize {
        self.rows.len()
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn num_ratings(&self) -> usize {
        self.num_ratings
    }

    /// Current bounds; centered once [`Self::adjust_using_mean_rating`] ran.
    pub fn bounds(&self) -> RatingBounds {
        self.bounds
    }

    pub fn scale(&self) -> Option<RatingScale> {
        self.scale
    }

    /// Mean subtracted by centering, 0 before centering.
    pub fn mean_rating(&self) -> f64 {
        self.scale.map(|s| s.mean).unwrap_or(0.0)
    }

    pub fn rows(&self) -> &[UserRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [UserRow] {
        &mut self.rows
    }

    pub fn user_row(&self, user: UserId) -> Result<&UserRow> {
        self.rows.get(user).ok_or(DatasetError::UnknownUser(user))
    }

    pub fn user_row_mut(&mut self, user: UserId) -> Result<&mut UserRow> {
        self.rows.get_mut(user).ok_or(DatasetError::UnknownUser(user))
    }

    pub fn user_rated_items(&self, user: UserId) -> Result<Vec<ItemId>> {
        Ok(self.user_row(user)?.rated_items().collect())
    }

    /// The `index`-th triple of `user`, in item order.
    pub fn triple(&self, user: UserId, index: usize) -> Option<Triple> {
        self.rows
            .get(user)
            .and_then(|row| row.triples.get(index))
            .copied()
    }

    pub fn item_popularity(&self, item: ItemId) -> u32 {
        self.item_popularity.get(item).copied().unwrap_or(0)
    }

    pub fn max_item_popularity(&self) -> u32 {
        self.item_popularity.iter().copied().max().unwrap_or(0)
    }

    /// Raw-scale average, `sum / (count + 0.01)`.
    pub fn item_average_rating(&self, item: ItemId) -> f64 {
        match (
            self.item_rating_sums.get(item),
            self.item_popularity.get(item),
        ) {
            (Some(sum), Some(count)) => sum / (*count as f64 + AVERAGE_EPSILON),
            _ => 0.0,
        }
    }

    pub fn set_user_training(&mut self, user: UserId, items: &BTreeSet<ItemId>) -> Result<()> {
        self.user_row_mut(user)?.set_training(items);
        Ok(())
    }

    pub fn set_user_all_training(&mut self, user: UserId) -> Result<()> {
        self.user_row_mut(user)?.set_all_training();
        Ok(())
    }

    pub fn set_all_training(&mut self) {
        self.rows.iter_mut().for_each(UserRow::set_all_training);
    }

    pub fn num_disclosed(&self) -> usize {
        self.rows.iter().map(UserRow::num_disclosed).sum()
    }

    /// Random train/test split keeping the training share at
    /// `floor(num_ratings * fraction)`.
    pub fn split_training(&mut self, fraction: f64, rng: &mut StdRng) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(DatasetError::InvalidFraction(fraction));
        }

        let target_training = (self.num_ratings as f64 * fraction) as usize;
        let target_testing = self.num_ratings - target_training;
        let mut training = 0usize;
        let mut testing = 0usize;

        for row in &mut self.rows {
            for flag in &mut row.disclosed {
                let wants_training = rng.gen::<f64>() <= fraction;
                *flag = if wants_training {
                    training < target_training || testing >= target_testing
                } else {
                    testing >= target_testing
                };
                if *flag {
                    training += 1;
                } else {
                    testing += 1;
                }
            }
        }

        debug!(training, testing, "Split ratings into training and testing");
        Ok(())
    }

    /// Subtracts the mean of the disclosed ratings from every disclosed
    /// rating and from the bounds. Only one centering is allowed.
    pub fn adjust_using_mean_rating(&mut self) -> Result<RatingScale> {
        if let Some(scale) = self.scale {
            return Err(DatasetError::AlreadyCentered { mean: scale.mean });
        }

        let (sum, count) = self
            .rows
            .iter()
            .flat_map(|row| row.disclosed_triples())
            .fold((0.0f64, 0usize), |(sum, count), t| (sum + t.rating, count + 1));
        // 沒有訓練資料時均值視為 0
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };

        for row in &mut self.rows {
            let flags = row.disclosed.iter().zip(row.shifted.iter_mut());
            for (triple, (disclosed, shifted)) in row.triples.iter_mut().zip(flags) {
                if *disclosed {
                    triple.rating -= mean;
                    *shifted = true;
                }
            }
        }

        self.bounds = self.bounds.shifted(mean);
        let scale = RatingScale {
            mean,
            lower: self.bounds.lower,
            upper: self.bounds.upper,
        };
        self.scale = Some(scale);

        info!(
            mean_rating = mean,
            lower = scale.lower,
            upper = scale.upper,
            "Centered ratings around mean"
        );
        Ok(scale)
    }
}
