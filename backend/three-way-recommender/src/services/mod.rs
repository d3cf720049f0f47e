pub mod decision;
pub mod evaluation;
pub mod factorization;
pub mod popularity;
pub mod rating_store;

pub use decision::ThreeWayController;
pub use evaluation::{CostEvaluator, LeaveUserOutRunner};
pub use factorization::FactorModel;
pub use popularity::PopularityRecommender;
pub use rating_store::RatingStore;
