// ============================================
// Incremental Factor Model (增量矩陣分解)
// ============================================
//
// rating(user, item) ≈ U[user] · V[item], fit by SGD.
//
// - pretrain: U and V over every disclosed rating
// - train_user: perturb U[user], then refit it on the user's disclosed
//   ratings with V frozen
// - predict: inverse transform of the dot product, clamped to the bounds

mod model;
mod transform;

pub use model::{FactorModel, ItemSpace};
pub use transform::{GeneralizedLogistic, Identity, RatingTransform, BOUNDARY_VARIATION};

use crate::config::FactorizationConfig;
use crate::models::{ItemId, UserId};
use crate::services::rating_store::RatingBounds;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactorizationError {
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Factor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, FactorizationError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegularizationScheme {
    #[default]
    None,
    /// λ-weighted penalty on both P (users) and Q (items).
    PqRegularized,
}

impl RegularizationScheme {
    /// Penalty weight applied in the update rule.
    pub fn weight(&self, lambda: f64) -> f64 {
        match self {
            RegularizationScheme::None => 0.0,
            RegularizationScheme::PqRegularized => lambda,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorModelKind {
    #[default]
    Plain,
    GlJournal,
    GlConference,
}

impl FactorModelKind {
    pub fn build_transform(
        &self,
        bounds: RatingBounds,
        config: &FactorizationConfig,
    ) -> Box<dyn RatingTransform> {
        match self {
            FactorModelKind::Plain => Box::new(Identity),
            FactorModelKind::GlJournal => {
                Box::new(GeneralizedLogistic::journal(bounds, config.gl_shape))
            }
            FactorModelKind::GlConference => Box::new(GeneralizedLogistic::conference(
                bounds,
                config.gl_steepness,
                config.gl_shape,
            )),
        }
    }
}
