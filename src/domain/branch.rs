use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Money;

/// A tracked business branch. The ledger identifies branches by sparse
/// numeric ids, so callers must never assume the ids are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BranchId {
    A = 1,
    B = 3,
    C = 4,
}

impl BranchId {
    pub const ALL: [BranchId; 3] = [BranchId::A, BranchId::B, BranchId::C];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn default_name(self) -> &'static str {
        match self {
            BranchId::A => "Branch A",
            BranchId::B => "Branch B",
            BranchId::C => "Branch C",
        }
    }
}

impl From<BranchId> for u8 {
    fn from(branch: BranchId) -> Self {
        branch.id()
    }
}

impl TryFrom<u8> for BranchId {
    type Error = UnknownBranchError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BranchId::A),
            3 => Ok(BranchId::B),
            4 => Ok(BranchId::C),
            other => Err(UnknownBranchError(other.to_string())),
        }
    }
}

impl TryFrom<i64> for BranchId {
    type Error = UnknownBranchError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| UnknownBranchError(value.to_string()))
            .and_then(BranchId::try_from)
    }
}

impl FromStr for BranchId {
    type Err = UnknownBranchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        s.parse::<u8>()
            .map_err(|_| UnknownBranchError(s.to_string()))
            .and_then(BranchId::try_from)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBranchError(pub String);

impl fmt::Display for UnknownBranchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown branch id '{}' (expected 1, 3 or 4)", self.0)
    }
}

impl std::error::Error for UnknownBranchError {}

/// An ordered, de-duplicated set of branches to aggregate over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchSet(Vec<BranchId>);

impl BranchSet {
    pub fn all() -> Self {
        Self(BranchId::ALL.to_vec())
    }

    pub fn new(branches: impl IntoIterator<Item = BranchId>) -> Self {
        let mut branches: Vec<BranchId> = branches.into_iter().collect();
        branches.sort();
        branches.dedup();
        Self(branches)
    }

    /// Parse a comma separated list such as "1,3".
    pub fn parse(input: &str) -> Result<Self, UnknownBranchError> {
        let branches = input
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(BranchId::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if branches.is_empty() {
            return Err(UnknownBranchError(input.to_string()));
        }
        Ok(Self::new(branches))
    }

    pub fn contains(&self, branch: BranchId) -> bool {
        self.0.contains(&branch)
    }

    pub fn iter(&self) -> impl Iterator<Item = BranchId> + '_ {
        self.0.iter().copied()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.0.iter().map(|b| i64::from(b.id())).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for BranchSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-branch totals for one category and period. Every branch of the
/// requested set is present; missing data reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchAmounts(BTreeMap<BranchId, Money>);

impl BranchAmounts {
    pub fn zeroed(branches: &BranchSet) -> Self {
        Self(branches.iter().map(|b| (b, Money::ZERO)).collect())
    }

    pub fn get(&self, branch: BranchId) -> Money {
        self.0.get(&branch).copied().unwrap_or(Money::ZERO)
    }

    pub fn set(&mut self, branch: BranchId, amount: Money) {
        self.0.insert(branch, amount);
    }

    pub fn add(&mut self, branch: BranchId, amount: Money) {
        *self.0.entry(branch).or_insert(Money::ZERO) += amount;
    }

    pub fn total(&self) -> Money {
        self.0.values().copied().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BranchId, Money)> + '_ {
        self.0.iter().map(|(b, m)| (*b, *m))
    }

    pub fn map(&self, f: impl Fn(Money) -> Money) -> Self {
        Self(self.0.iter().map(|(b, m)| (*b, f(*m))).collect())
    }
}
