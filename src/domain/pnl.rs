use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    BranchId, ExpenseCategory, Money, OverrideTable, RawMaterialConsumption, SpecialtyPurchase,
    YearMonth,
};

/// Everything the P&L reads from the ledger for one branch in one month.
/// Values are signed exactly as aggregated; sign handling happens in
/// [`derive_row`]. Expense 780 is absent since the P&L uses the configured
/// overhead instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchMonthFigures {
    pub turnover: Money,
    pub expense720: Money,
    pub expense730: Money,
    pub expense760: Money,
    pub expense770: Money,
    pub raw_material: RawMaterialConsumption,
    pub direct_raw_material: Money,
    pub tray_purchases: Money,
    pub roll_purchases: Money,
    pub pad_purchases: Money,
}

impl BranchMonthFigures {
    pub fn purchase(&self, kind: SpecialtyPurchase) -> Money {
        match kind {
            SpecialtyPurchase::Tray => self.tray_purchases,
            SpecialtyPurchase::Roll => self.roll_purchases,
            SpecialtyPurchase::Pad => self.pad_purchases,
        }
    }
}

/// How a branch's raw-material cost is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RawMaterialRule {
    /// Cost of consumed raw material times a markup factor.
    Markup { factor: Decimal },
    /// The branch's direct raw-material ledger accounts, as booked.
    DirectLedger,
}

impl RawMaterialRule {
    pub fn cost(&self, figures: &BranchMonthFigures) -> Money {
        match self {
            RawMaterialRule::Markup { factor } => figures.raw_material.cost_of_consumed * factor,
            RawMaterialRule::DirectLedger => figures.direct_raw_material.abs(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            RawMaterialRule::Markup { factor } => {
                let pct = ((factor - Decimal::ONE) * Decimal::ONE_HUNDRED).normalize();
                format!("Raw Mat. (+{}%)", pct)
            }
            RawMaterialRule::DirectLedger => "Raw Mat.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchRules {
    pub raw_material: RawMaterialRule,
    /// Whether tray/roll/pad purchases are part of this branch's expenses.
    #[serde(default)]
    pub specialty_purchases: bool,
}

impl BranchRules {
    pub fn default_for(branch: BranchId) -> Self {
        match branch {
            BranchId::A => BranchRules {
                raw_material: RawMaterialRule::Markup {
                    factor: Decimal::new(140, 2),
                },
                specialty_purchases: true,
            },
            BranchId::B => BranchRules {
                raw_material: RawMaterialRule::Markup {
                    factor: Decimal::new(120, 2),
                },
                specialty_purchases: false,
            },
            BranchId::C => BranchRules {
                raw_material: RawMaterialRule::DirectLedger,
                specialty_purchases: false,
            },
        }
    }
}

/// The business rules the P&L is derived with.
#[derive(Debug, Clone, PartialEq)]
pub struct PnlRules {
    /// Fixed monthly overhead reported as expense 780.
    pub overhead: Money,
    pub branches: BTreeMap<BranchId, BranchRules>,
    pub overrides: OverrideTable,
}

impl PnlRules {
    pub fn branch(&self, branch: BranchId) -> BranchRules {
        self.branches
            .get(&branch)
            .copied()
            .unwrap_or_else(|| BranchRules::default_for(branch))
    }
}

impl Default for PnlRules {
    fn default() -> Self {
        Self {
            overhead: Decimal::new(350_000, 0),
            branches: BranchId::ALL
                .into_iter()
                .map(|b| (b, BranchRules::default_for(b)))
                .collect(),
            overrides: OverrideTable::default(),
        }
    }
}

/// Tray/roll/pad purchase amounts of a branch that tracks them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecialtyPurchases {
    pub tray: Money,
    pub roll: Money,
    pub pad: Money,
}

/// One expense component of a P&L row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlComponent {
    Expense720,
    Expense730,
    Expense760,
    Expense770,
    Expense780,
    RawMaterial,
    TrayPurchases,
    RollPurchases,
    PadPurchases,
}

impl PnlComponent {
    pub fn header(&self) -> &'static str {
        match self {
            PnlComponent::Expense720 => "720",
            PnlComponent::Expense730 => "730",
            PnlComponent::Expense760 => "760",
            PnlComponent::Expense770 => "770",
            PnlComponent::Expense780 => "780",
            PnlComponent::RawMaterial => "RAW MAT.",
            PnlComponent::TrayPurchases => "TRAY",
            PnlComponent::RollPurchases => "ROLL",
            PnlComponent::PadPurchases => "PAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPnlRow {
    pub branch: BranchId,
    pub month: YearMonth,
    pub turnover: Money,
    pub expense720: Money,
    pub expense730: Money,
    pub expense760: Money,
    pub expense770: Money,
    pub expense780: Money,
    pub raw_material_cost: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty_purchases: Option<SpecialtyPurchases>,
    pub total_expenses: Money,
    pub pnl: Money,
}

impl MonthlyPnlRow {
    /// The row's expense components in display order. `total_expenses` is
    /// exactly the sum of these.
    pub fn components(&self) -> Vec<(PnlComponent, Money)> {
        let mut components = vec![
            (PnlComponent::Expense720, self.expense720),
            (PnlComponent::Expense730, self.expense730),
            (PnlComponent::Expense760, self.expense760),
            (PnlComponent::Expense770, self.expense770),
            (PnlComponent::Expense780, self.expense780),
            (PnlComponent::RawMaterial, self.raw_material_cost),
        ];
        if let Some(extra) = &self.specialty_purchases {
            components.push((PnlComponent::TrayPurchases, extra.tray));
            components.push((PnlComponent::RollPurchases, extra.roll));
            components.push((PnlComponent::PadPurchases, extra.pad));
        }
        components
    }

    pub fn component(&self, component: PnlComponent) -> Option<Money> {
        self.components()
            .into_iter()
            .find(|(c, _)| *c == component)
            .map(|(_, v)| v)
    }
}

/// Derive a branch's P&L row for one month.
///
/// Ledger expenses enter as absolute amounts after date-scoped overrides;
/// expense 780 is the configured overhead rather than the ledger balance.
pub fn derive_row(
    branch: BranchId,
    month: YearMonth,
    figures: &BranchMonthFigures,
    rules: &PnlRules,
) -> MonthlyPnlRow {
    let branch_rules = rules.branch(branch);
    let expense = |category: ExpenseCategory, amount: Money| {
        rules
            .overrides
            .apply(branch, category, month, amount.abs())
            .value
    };

    let expense720 = expense(ExpenseCategory::E720, figures.expense720);
    let expense730 = expense(ExpenseCategory::E730, figures.expense730);
    let expense760 = expense(ExpenseCategory::E760, figures.expense760);
    let expense770 = expense(ExpenseCategory::E770, figures.expense770);
    let expense780 = rules.overhead;
    let raw_material_cost = branch_rules.raw_material.cost(figures);

    let specialty_purchases = branch_rules
        .specialty_purchases
        .then(|| SpecialtyPurchases {
            tray: figures.purchase(SpecialtyPurchase::Tray).abs(),
            roll: figures.purchase(SpecialtyPurchase::Roll).abs(),
            pad: figures.purchase(SpecialtyPurchase::Pad).abs(),
        });

    let mut row = MonthlyPnlRow {
        branch,
        month,
        turnover: figures.turnover,
        expense720,
        expense730,
        expense760,
        expense770,
        expense780,
        raw_material_cost,
        specialty_purchases,
        total_expenses: Money::ZERO,
        pnl: Money::ZERO,
    };
    row.total_expenses = row.components().iter().map(|(_, v)| *v).sum();
    row.pnl = row.turnover - row.total_expenses;
    row
}

/// Months skipped before a trailing window starts. The most recent closed
/// month is still being booked, so windows start at month -2.
pub const TRAILING_SKIP: usize = 2;

/// Mean of `window` months starting at month -2. `values[0]` is the
/// selected month and `values[i]` is month `-i`. A series too short to
/// fill the window averages to zero.
pub fn trailing_average(values: &[Money], window: usize) -> Money {
    if window == 0 || values.len() < TRAILING_SKIP + window {
        return Money::ZERO;
    }
    let sum: Money = values[TRAILING_SKIP..TRAILING_SKIP + window].iter().copied().sum();
    sum / Decimal::from(window as u64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailingAverages {
    pub last_3m: Money,
    pub last_6m: Money,
}

impl TrailingAverages {
    pub fn of(values: &[Money]) -> Self {
        Self {
            last_3m: trailing_average(values, 3),
            last_6m: trailing_average(values, 6),
        }
    }
}
