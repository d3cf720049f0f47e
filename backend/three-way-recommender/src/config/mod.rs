use crate::models::{CostMatrix, Quota};
use crate::services::factorization::{FactorModelKind, RegularizationScheme};
use crate::services::rating_store::RatingFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Environment prefix for every setting, e.g. `TCR_RANK=10`.
pub const ENV_PREFIX: &str = "TCR_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub dataset: DatasetConfig,
    pub factorization: FactorizationConfig,
    pub decision: DecisionConfig,
    pub cost: CostConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub path: PathBuf,
    pub format: RatingFormat,
    pub rating_lower_bound: f64,
    pub rating_upper_bound: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorizationConfig {
    pub rank: usize,
    /// alpha
    pub learning_rate: f64,
    /// lambda
    pub regularization_weight: f64,
    pub regularization_scheme: RegularizationScheme,
    pub model_kind: FactorModelKind,
    pub pretrain_rounds: usize,
    pub incremental_rounds: usize,
    /// Initial factors and exploration noise are drawn from [-init_range, init_range].
    pub init_range: f64,
    /// Shape `v` of the generalized-logistic transform.
    pub gl_shape: f64,
    /// Steepness `B` of the conference generalized-logistic transform.
    pub gl_steepness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub recommendation_length: usize,
    pub recommendation_ratio: f64,
    /// (semi-popular, popular) as fractions of the maximum item popularity.
    pub popularity_thresholds: [f64; 2],
    /// (promote, recommend) lower bounds on the predicted rating.
    pub favorite_thresholds: [f64; 2],
    pub maturity_threshold: f64,
    /// recommend∧known, recommend∧unknown, promote∧known, promote∧unknown
    pub maturity_values: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub cost_matrix: CostMatrix,
    pub like_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub seed: u64,
    pub repeat_times: usize,
    pub report_path: Option<PathBuf>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/jester-data-1/jester-data-1.txt"),
            format: RatingFormat::Dense,
            rating_lower_bound: -10.0,
            rating_upper_bound: 10.0,
        }
    }
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            rank: 10,
            learning_rate: 0.0001,
            regularization_weight: 0.005,
            regularization_scheme: RegularizationScheme::None,
            model_kind: FactorModelKind::Plain,
            pretrain_rounds: 200,
            incremental_rounds: 20,
            init_range: 0.5,
            gl_shape: 1.5,
            gl_steepness: 1000.0,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            recommendation_length: 10,
            recommendation_ratio: 0.3,
            popularity_thresholds: [0.3, 0.5],
            favorite_thresholds: [-2.0, 0.5],
            maturity_threshold: 1000.0,
            maturity_values: [5.0, 2.5, 4.0, 2.0],
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            cost_matrix: CostMatrix::default(),
            like_threshold: 1.5,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            repeat_times: 1,
            report_path: None,
        }
    }
}

impl DecisionConfig {
    pub fn quota(&self) -> Quota {
        Quota::from_length_ratio(self.recommendation_length, self.recommendation_ratio)
    }
}

/// Flat view of the environment, one field per variable.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    dataset_path: Option<PathBuf>,
    dataset_format: Option<RatingFormat>,
    rating_lower_bound: Option<f64>,
    rating_upper_bound: Option<f64>,

    rank: Option<usize>,
    alpha: Option<f64>,
    lambda: Option<f64>,
    regularization_scheme: Option<RegularizationScheme>,
    mf_algorithm: Option<FactorModelKind>,
    pretrain_rounds: Option<usize>,
    incremental_train_rounds: Option<usize>,
    init_range: Option<f64>,
    gl_shape: Option<f64>,
    gl_steepness: Option<f64>,

    recommendation_length: Option<usize>,
    recommendation_ratio: Option<f64>,
    semi_popular_threshold: Option<f64>,
    popular_threshold: Option<f64>,
    semi_favorite_threshold: Option<f64>,
    favorite_threshold: Option<f64>,
    maturity_threshold: Option<f64>,
    maturity_values: Option<Vec<f64>>,

    cost_nn: Option<f64>,
    cost_np: Option<f64>,
    cost_bn: Option<f64>,
    cost_bp: Option<f64>,
    cost_pn: Option<f64>,
    cost_pp: Option<f64>,
    like_threshold: Option<f64>,

    seed: Option<u64>,
    repeat_times: Option<usize>,
    report_path: Option<PathBuf>,
}

impl EvaluationConfig {
    /// Loads settings from `TCR_*` environment variables (and `.env`),
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings: EnvSettings = envy::prefixed(ENV_PREFIX).from_env()?;
        let config = Self::from_settings(settings)?;
        config.validate()?;
        Ok(config)
    }

    fn from_settings(env: EnvSettings) -> Result<Self> {
        let defaults = Self::default();

        let maturity_values = match env.maturity_values {
            Some(values) => <[f64; 4]>::try_from(values.as_slice()).map_err(|_| {
                ConfigError::Invalid {
                    field: "maturity_values",
                    reason: format!("expected 4 comma-separated values, got {}", values.len()),
                }
            })?,
            None => defaults.decision.maturity_values,
        };

        let costs = defaults.cost.cost_matrix.0;

        Ok(Self {
            dataset: DatasetConfig {
                path: env.dataset_path.unwrap_or(defaults.dataset.path),
                format: env.dataset_format.unwrap_or(defaults.dataset.format),
                rating_lower_bound: env
                    .rating_lower_bound
                    .unwrap_or(defaults.dataset.rating_lower_bound),
                rating_upper_bound: env
                    .rating_upper_bound
                    .unwrap_or(defaults.dataset.rating_upper_bound),
            },
            factorization: FactorizationConfig {
                rank: env.rank.unwrap_or(defaults.factorization.rank),
                learning_rate: env.alpha.unwrap_or(defaults.factorization.learning_rate),
                regularization_weight: env
                    .lambda
                    .unwrap_or(defaults.factorization.regularization_weight),
                regularization_scheme: env
                    .regularization_scheme
                    .unwrap_or(defaults.factorization.regularization_scheme),
                model_kind: env.mf_algorithm.unwrap_or(defaults.factorization.model_kind),
                pretrain_rounds: env
                    .pretrain_rounds
                    .unwrap_or(defaults.factorization.pretrain_rounds),
                incremental_rounds: env
                    .incremental_train_rounds
                    .unwrap_or(defaults.factorization.incremental_rounds),
                init_range: env.init_range.unwrap_or(defaults.factorization.init_range),
                gl_shape: env.gl_shape.unwrap_or(defaults.factorization.gl_shape),
                gl_steepness: env.gl_steepness.unwrap_or(defaults.factorization.gl_steepness),
            },
            decision: DecisionConfig {
                recommendation_length: env
                    .recommendation_length
                    .unwrap_or(defaults.decision.recommendation_length),
                recommendation_ratio: env
                    .recommendation_ratio
                    .unwrap_or(defaults.decision.recommendation_ratio),
                popularity_thresholds: [
                    env.semi_popular_threshold
                        .unwrap_or(defaults.decision.popularity_thresholds[0]),
                    env.popular_threshold
                        .unwrap_or(defaults.decision.popularity_thresholds[1]),
                ],
                favorite_thresholds: [
                    env.semi_favorite_threshold
                        .unwrap_or(defaults.decision.favorite_thresholds[0]),
                    env.favorite_threshold
                        .unwrap_or(defaults.decision.favorite_thresholds[1]),
                ],
                maturity_threshold: env
                    .maturity_threshold
                    .unwrap_or(defaults.decision.maturity_threshold),
                maturity_values,
            },
            cost: CostConfig {
                cost_matrix: CostMatrix([
                    [
                        env.cost_nn.unwrap_or(costs[0][0]),
                        env.cost_np.unwrap_or(costs[0][1]),
                    ],
                    [
                        env.cost_bn.unwrap_or(costs[1][0]),
                        env.cost_bp.unwrap_or(costs[1][1]),
                    ],
                    [
                        env.cost_pn.unwrap_or(costs[2][0]),
                        env.cost_pp.unwrap_or(costs[2][1]),
                    ],
                ]),
                like_threshold: env.like_threshold.unwrap_or(defaults.cost.like_threshold),
            },
            run: RunConfig {
                seed: env.seed.unwrap_or(defaults.run.seed),
                repeat_times: env.repeat_times.unwrap_or(defaults.run.repeat_times),
                report_path: env.report_path,
            },
        })
    }

    /// Rejects out-of-range values before any data is loaded.
    pub fn validate(&self) -> Result<()> {
        let dataset = &self.dataset;
        ensure(
            dataset.rating_lower_bound.is_finite()
                && dataset.rating_upper_bound.is_finite()
                && dataset.rating_lower_bound < dataset.rating_upper_bound,
            "rating_bounds",
            || {
                format!(
                    "lower bound {} must be below upper bound {}",
                    dataset.rating_lower_bound, dataset.rating_upper_bound
                )
            },
        )?;

        let mf = &self.factorization;
        ensure(mf.rank > 0, "rank", || "must be at least 1".to_string())?;
        ensure(
            mf.learning_rate.is_finite() && mf.learning_rate > 0.0,
            "learning_rate",
            || format!("must be positive, got {}", mf.learning_rate),
        )?;
        ensure(
            mf.regularization_weight.is_finite() && mf.regularization_weight >= 0.0,
            "regularization_weight",
            || format!("must be non-negative, got {}", mf.regularization_weight),
        )?;
        ensure(
            mf.init_range.is_finite() && mf.init_range >= 0.0,
            "init_range",
            || format!("must be non-negative, got {}", mf.init_range),
        )?;
        ensure(
            mf.gl_shape.is_finite() && mf.gl_shape > 0.0,
            "gl_shape",
            || format!("must be positive, got {}", mf.gl_shape),
        )?;
        ensure(
            mf.gl_steepness.is_finite() && mf.gl_steepness > 0.0,
            "gl_steepness",
            || format!("must be positive, got {}", mf.gl_steepness),
        )?;

        let decision = &self.decision;
        ensure(
            decision.recommendation_length > 0,
            "recommendation_length",
            || "must be at least 1".to_string(),
        )?;
        ensure(
            (0.0..=1.0).contains(&decision.recommendation_ratio),
            "recommendation_ratio",
            || format!("must be within [0, 1], got {}", decision.recommendation_ratio),
        )?;
        let [semi_popular, popular] = decision.popularity_thresholds;
        ensure(
            (0.0..=1.0).contains(&semi_popular)
                && (0.0..=1.0).contains(&popular)
                && semi_popular <= popular,
            "popularity_thresholds",
            || {
                format!(
                    "expected 0 <= semi-popular ({}) <= popular ({}) <= 1",
                    semi_popular, popular
                )
            },
        )?;
        let [semi_favorite, favorite] = decision.favorite_thresholds;
        ensure(
            semi_favorite.is_finite() && favorite.is_finite() && semi_favorite <= favorite,
            "favorite_thresholds",
            || {
                format!(
                    "expected semi-favorite ({}) <= favorite ({})",
                    semi_favorite, favorite
                )
            },
        )?;
        ensure(
            decision.maturity_threshold.is_finite() && decision.maturity_threshold >= 0.0,
            "maturity_threshold",
            || format!("must be non-negative, got {}", decision.maturity_threshold),
        )?;
        ensure(
            decision
                .maturity_values
                .iter()
                .all(|v| v.is_finite() && *v >= 0.0),
            "maturity_values",
            || format!("must be non-negative, got {:?}", decision.maturity_values),
        )?;

        ensure(
            self.cost
                .cost_matrix
                .0
                .iter()
                .flatten()
                .all(|c| c.is_finite() && *c >= 0.0),
            "cost_matrix",
            || format!("entries must be non-negative, got {:?}", self.cost.cost_matrix.0),
        )?;
        ensure(
            self.cost.like_threshold.is_finite(),
            "like_threshold",
            || "must be finite".to_string(),
        )?;

        ensure(self.run.repeat_times > 0, "repeat_times", || {
            "must be at least 1".to_string()
        })?;

        Ok(())
    }
}

fn ensure(condition: bool, field: &'static str, reason: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: reason(),
        })
    }
}
