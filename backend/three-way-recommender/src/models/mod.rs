use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type UserId = usize;
pub type ItemId = usize;

/// One (user, item, rating) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub user: UserId,
    pub item: ItemId,
    pub rating: f64,
}

impl Triple {
    pub fn new(user: UserId, item: ItemId, rating: f64) -> Self {
        Self { user, item, rating }
    }
}

/// Disclosure action taken for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    NonRecommend, // 不推薦
    Promote,      // 促銷（部分披露）
    Recommend,    // 推薦
}

impl Behavior {
    pub const ALL: [Behavior; 3] = [Behavior::NonRecommend, Behavior::Promote, Behavior::Recommend];

    pub fn index(self) -> usize {
        match self {
            Behavior::NonRecommend => 0,
            Behavior::Promote => 1,
            Behavior::Recommend => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::NonRecommend => "non_recommend",
            Behavior::Promote => "promote",
            Behavior::Recommend => "recommend",
        }
    }
}

/// Whether the user actually likes an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Like {
    Dislike,
    Like,
}

impl Like {
    pub fn index(self) -> usize {
        match self {
            Like::Dislike => 0,
            Like::Like => 1,
        }
    }
}

/// Cost of each (behavior, like) combination.
///
/// Rows are indexed by [`Behavior::index`], columns by [`Like::index`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostMatrix(pub [[f64; 2]; 3]);

impl Default for CostMatrix {
    fn default() -> Self {
        // NN, NP / BN, BP / PN, PP
        Self([[2.0, 40.0], [20.0, 10.0], [50.0, 6.0]])
    }
}

impl CostMatrix {
    pub fn cost(&self, behavior: Behavior, like: Like) -> f64 {
        self.0[behavior.index()][like.index()]
    }
}

/// Behavior × like counts for one user or a whole population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorStatistics(pub [[u64; 2]; 3]);

impl BehaviorStatistics {
    pub fn record(&mut self, behavior: Behavior, like: Like) {
        self.0[behavior.index()][like.index()] += 1;
    }

    pub fn merge(&mut self, other: &BehaviorStatistics) {
        for (row, other_row) in self.0.iter_mut().zip(other.0.iter()) {
            for (cell, other_cell) in row.iter_mut().zip(other_row.iter()) {
                *cell += *other_cell;
            }
        }
    }

    pub fn count(&self, behavior: Behavior, like: Like) -> u64 {
        self.0[behavior.index()][like.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().flatten().sum()
    }
}

/// How many items to recommend and to promote in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub num_recommend: usize,
    pub num_promote: usize,
}

impl Quota {
    /// Splits a recommendation list into its recommend and promote parts.
    /// The recommend part is `floor(ratio * length)`.
    pub fn from_length_ratio(length: usize, ratio: f64) -> Self {
        let num_recommend = ((ratio * length as f64).floor() as usize).min(length);
        Self {
            num_recommend,
            num_promote: length - num_recommend,
        }
    }
}

/// Items newly disclosed by one successful stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSelection {
    pub recommended: Vec<ItemId>,
    pub promoted: Vec<ItemId>,
}

impl StageSelection {
    pub fn len(&self) -> usize {
        self.recommended.len() + self.promoted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-user, per-run disclosure state.
///
/// `recommended` and `promoted` never share an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisclosureState {
    recommended: BTreeSet<ItemId>,
    promoted: BTreeSet<ItemId>,
    maturity: f64,
}

impl DisclosureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recommended(&self) -> &BTreeSet<ItemId> {
        &self.recommended
    }

    pub fn promoted(&self) -> &BTreeSet<ItemId> {
        &self.promoted
    }

    pub fn maturity(&self) -> f64 {
        self.maturity
    }

    pub fn is_disclosed(&self, item: ItemId) -> bool {
        self.recommended.contains(&item) || self.promoted.contains(&item)
    }

    /// Union of recommended and promoted items, ascending.
    pub fn disclosed_items(&self) -> BTreeSet<ItemId> {
        self.recommended.union(&self.promoted).copied().collect()
    }

    pub fn behavior_of(&self, item: ItemId) -> Behavior {
        if self.recommended.contains(&item) {
            Behavior::Recommend
        } else if self.promoted.contains(&item) {
            Behavior::Promote
        } else {
            Behavior::NonRecommend
        }
    }

    /// Applies a stage selection. Items already disclosed are skipped so the
    /// two sets stay disjoint; returns what was actually added.
    pub fn apply(&mut self, selection: StageSelection) -> StageSelection {
        let mut added = StageSelection::default();
        for item in selection.recommended {
            if !self.is_disclosed(item) {
                self.recommended.insert(item);
                added.recommended.push(item);
            }
        }
        for item in selection.promoted {
            if !self.is_disclosed(item) {
                self.promoted.insert(item);
                added.promoted.push(item);
            }
        }
        added
    }

    /// Maturity only ever grows; negative deltas are ignored.
    pub fn add_maturity(&mut self, delta: f64) {
        if delta.is_finite() && delta > 0.0 {
            self.maturity += delta;
        }
    }
}

/// Terminal state of the disclosure loop for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalState {
    /// Maturity reached the threshold.
    Mature,
    /// Neither stage could fill its quota.
    Stuck,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Mature => "mature",
            TerminalState::Stuck => "stuck",
        }
    }
}
