pub mod config;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use config::EvaluationConfig;
pub use services::{
    CostEvaluator, FactorModel, LeaveUserOutRunner, PopularityRecommender, RatingStore,
    ThreeWayController,
};
