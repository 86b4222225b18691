use serde::{Deserialize, Serialize};

use super::{BranchId, ExpenseCategory, Money, YearMonth};

/// A manual correction applied to one category's monthly value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OverrideAction {
    Zero,
    Negate,
    Replace { amount: Money },
}

impl OverrideAction {
    pub fn apply(&self, value: Money) -> Money {
        match self {
            OverrideAction::Zero => Money::ZERO,
            OverrideAction::Negate => -value,
            OverrideAction::Replace { amount } => *amount,
        }
    }
}

/// `(branch, category, month) -> action`. A rule without a branch covers
/// every branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    #[serde(default)]
    pub branch: Option<BranchId>,
    pub category: ExpenseCategory,
    pub month: YearMonth,
    #[serde(flatten)]
    pub action: OverrideAction,
}

impl OverrideRule {
    fn matches(&self, branch: BranchId, category: ExpenseCategory, month: YearMonth) -> bool {
        self.category == category
            && self.month == month
            && self.branch.is_none_or(|b| b == branch)
    }
}

/// An overridden (or untouched) cell value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjusted {
    pub value: Money,
    pub overridden: bool,
}

/// Date-scoped corrections for known ledger anomalies. Consulted while
/// monthly category values are assembled; the first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideTable(Vec<OverrideRule>);

impl OverrideTable {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self(rules)
    }

    pub fn rules(&self) -> &[OverrideRule] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(
        &self,
        branch: BranchId,
        category: ExpenseCategory,
        month: YearMonth,
        value: Money,
    ) -> Adjusted {
        match self.0.iter().find(|r| r.matches(branch, category, month)) {
            Some(rule) => Adjusted {
                value: rule.action.apply(value),
                overridden: true,
            },
            None => Adjusted {
                value,
                overridden: false,
            },
        }
    }
}
