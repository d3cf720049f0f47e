use crate::models::StageSelection;
use crate::services::rating_store::UserRow;
use serde::{Deserialize, Serialize};

/// Maturity credited per newly disclosed item. "Known" means the user has a
/// ground-truth rating for the item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaturityValues {
    pub recommend_known: f64,
    pub recommend_unknown: f64,
    pub promote_known: f64,
    pub promote_unknown: f64,
}

impl Default for MaturityValues {
    fn default() -> Self {
        Self::from([5.0, 2.5, 4.0, 2.0])
    }
}

impl From<[f64; 4]> for MaturityValues {
    fn from(values: [f64; 4]) -> Self {
        Self {
            recommend_known: values[0],
            recommend_unknown: values[1],
            promote_known: values[2],
            promote_unknown: values[3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaturityPolicy {
    pub threshold: f64,
    pub values: MaturityValues,
}

impl MaturityPolicy {
    pub fn new(threshold: f64, values: MaturityValues) -> Self {
        Self { threshold, values }
    }

    /// Maturity gained from the items a stage just added.
    pub fn gain(&self, added: &StageSelection, row: &UserRow) -> f64 {
        let recommended: f64 = added
            .recommended
            .iter()
            .map(|item| {
                if row.knows(*item) {
                    self.values.recommend_known
                } else {
                    self.values.recommend_unknown
                }
            })
            .sum();
        let promoted: f64 = added
            .promoted
            .iter()
            .map(|item| {
                if row.knows(*item) {
                    self.values.promote_known
                } else {
                    self.values.promote_unknown
                }
            })
            .sum();
        recommended + promoted
    }

    pub fn is_mature(&self, maturity: f64) -> bool {
        maturity >= self.threshold
    }
}
