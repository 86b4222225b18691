use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    highlight_series, trailing_average, Adjusted, BranchAmounts, BranchId, ExpenseCategory, Money,
    MonthlyPnlRow, PnlComponent, RawMaterialConsumption, SpecialtyPurchase, TrailingAverages,
    UnknownCategoryError, Variance, YearMonth, MIN_MONTHS_FOR_HIGHLIGHT, TRAILING_SKIP,
};

/// Months fetched behind every report so both trailing averages can fill.
pub const AVERAGE_HISTORY: usize = TRAILING_SKIP + 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchHeader {
    pub id: BranchId,
    pub name: String,
}

/// A displayed value with its variance flag and override marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub value: Money,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub variance: Option<Variance>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthLine {
    pub month: YearMonth,
    /// One cell per branch, in header order.
    pub cells: Vec<Cell>,
    pub total: Cell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageLine {
    pub label: String,
    pub cells: Vec<Money>,
    pub total: Money,
}

/// Months down, branches across, a total column and trailing averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTable {
    pub branches: Vec<BranchHeader>,
    /// Most recent month first.
    pub months: Vec<MonthLine>,
    pub averages: Vec<AverageLine>,
}

impl BranchTable {
    /// `values[m][b]` is branch `b`'s value in `months[m]`. The full series
    /// feeds averages and highlighting; only the first `displayed` months
    /// are kept as lines.
    pub fn build(
        branches: Vec<BranchHeader>,
        months: &[YearMonth],
        values: &[Vec<Adjusted>],
        displayed: usize,
        windows: &[usize],
    ) -> Self {
        let displayed = displayed.min(months.len());
        let columns: Vec<Vec<Money>> = (0..branches.len())
            .map(|b| values.iter().map(|row| row[b].value).collect())
            .collect();
        let totals: Vec<Money> = values
            .iter()
            .map(|row| row.iter().map(|a| a.value).sum())
            .collect();

        let column_flags: Vec<Vec<Option<Variance>>> = columns
            .iter()
            .map(|series| display_flags(series, displayed))
            .collect();
        let total_flags = display_flags(&totals, displayed);

        let lines = (0..displayed)
            .map(|m| MonthLine {
                month: months[m],
                cells: (0..branches.len())
                    .map(|b| Cell {
                        value: values[m][b].value,
                        variance: column_flags[b][m],
                        overridden: values[m][b].overridden,
                    })
                    .collect(),
                total: Cell {
                    value: totals[m],
                    variance: total_flags[m],
                    overridden: values[m].iter().any(|a| a.overridden),
                },
            })
            .collect();

        let averages = windows
            .iter()
            .map(|&window| AverageLine {
                label: average_label(window),
                cells: columns
                    .iter()
                    .map(|series| trailing_average(series, window))
                    .collect(),
                total: trailing_average(&totals, window),
            })
            .collect();

        Self {
            branches,
            months: lines,
            averages,
        }
    }
}

pub fn average_label(window: usize) -> String {
    format!("L{}MA", window)
}

/// Flags for the displayed prefix of a series. Fewer than four displayed
/// months never highlight, however long the fetched history is.
pub fn display_flags(series: &[Money], displayed: usize) -> Vec<Option<Variance>> {
    let displayed = displayed.min(series.len());
    if displayed < MIN_MONTHS_FOR_HIGHLIGHT {
        return vec![None; displayed];
    }
    highlight_series(series).into_iter().take(displayed).collect()
}

// ========================
// P&L
// ========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlDetailLine {
    pub row: MonthlyPnlRow,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub flags: BTreeMap<PnlComponent, Variance>,
}

/// One branch's component breakdown, month by month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPnlDetail {
    pub branch: BranchHeader,
    pub raw_material_label: String,
    pub lines: Vec<PnlDetailLine>,
    pub averages: BTreeMap<PnlComponent, TrailingAverages>,
    pub turnover_averages: TrailingAverages,
    pub pnl_averages: TrailingAverages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlReport {
    pub month: YearMonth,
    pub overhead: Money,
    /// P&L per branch and month.
    pub table: BranchTable,
    pub details: Vec<BranchPnlDetail>,
}

// ========================
// Categories
// ========================

/// A ledger category shown in the category report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Income,
    Expense(ExpenseCategory),
}

impl CategoryKind {
    pub fn title(&self) -> String {
        match self {
            CategoryKind::Income => "Income".to_string(),
            CategoryKind::Expense(category) => format!("Expense {}", category),
        }
    }
}

impl FromStr for CategoryKind {
    type Err = UnknownCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("income") {
            return Ok(CategoryKind::Income);
        }
        s.parse().map(CategoryKind::Expense)
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryKind::Income => write!(f, "income"),
            CategoryKind::Expense(category) => write!(f, "{}", category),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: CategoryKind,
    pub month: YearMonth,
    pub table: BranchTable,
}

// ========================
// Raw materials
// ========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaterialMonth {
    pub month: YearMonth,
    pub branch_a: RawMaterialConsumption,
    pub branch_b: RawMaterialConsumption,
    pub fx_rate: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub manual_price: Option<Decimal>,
    pub total_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaterialsReport {
    pub month: YearMonth,
    pub fx_currency: String,
    pub months: Vec<RawMaterialMonth>,
    pub l3ma_kg_a: Decimal,
    pub l3ma_kg_b: Decimal,
    pub l3ma_branch_a: Money,
    pub l3ma_branch_b: Money,
    /// Months without a rate count as zero.
    pub l3ma_fx_rate: Decimal,
    pub l3ma_total: Money,
}

// ========================
// Live snapshot
// ========================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveFigures {
    pub current: Money,
    pub last_3m: Money,
    pub last_6m: Money,
}

impl LiveFigures {
    /// `series[0]` is the current month to date.
    pub fn of(series: &[Money]) -> Self {
        let averages = TrailingAverages::of(series);
        Self {
            current: series.first().copied().unwrap_or_default(),
            last_3m: averages.last_3m,
            last_6m: averages.last_6m,
        }
    }
}

impl std::ops::Add for LiveFigures {
    type Output = LiveFigures;

    fn add(self, rhs: LiveFigures) -> LiveFigures {
        LiveFigures {
            current: self.current + rhs.current,
            last_3m: self.last_3m + rhs.last_3m,
            last_6m: self.last_6m + rhs.last_6m,
        }
    }
}

impl std::ops::Sub for LiveFigures {
    type Output = LiveFigures;

    fn sub(self, rhs: LiveFigures) -> LiveFigures {
        LiveFigures {
            current: self.current - rhs.current,
            last_3m: self.last_3m - rhs.last_3m,
            last_6m: self.last_6m - rhs.last_6m,
        }
    }
}

impl std::iter::Sum for LiveFigures {
    fn sum<I: Iterator<Item = LiveFigures>>(iter: I) -> Self {
        iter.fold(LiveFigures::default(), |acc, f| acc + f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveLine {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    pub label: String,
    pub figures: LiveFigures,
    /// Consumed kg, for raw-material lines.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub quantity: Option<Decimal>,
}

/// Accounts sharing a three-digit prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveGroup {
    pub group: String,
    pub lines: Vec<LiveLine>,
    pub subtotal: LiveFigures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub branch: BranchHeader,
    pub as_of: NaiveDate,
    pub month: YearMonth,
    pub expense_groups: Vec<LiveGroup>,
    pub expense_total: LiveFigures,
    pub purchase_lines: Vec<LiveLine>,
    /// The six-month expense average, used in place of the month's
    /// still-incomplete bookings.
    pub expense_estimate: Money,
    pub turnover: LiveFigures,
    pub total: LiveFigures,
    /// Turnover minus total, column by column.
    pub profit: LiveFigures,
}

// ========================
// FX rates
// ========================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLine {
    pub month: YearMonth,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRates {
    pub currency: String,
    pub since: NaiveDate,
    /// Most recent month first.
    pub months: Vec<RateLine>,
}

impl FxRates {
    pub fn rate(&self, month: YearMonth) -> Option<Decimal> {
        self.months.iter().find(|l| l.month == month).map(|l| l.rate)
    }

    /// Keyed by `YYYY-MM`.
    pub fn by_month(&self) -> BTreeMap<String, Decimal> {
        self.months
            .iter()
            .map(|l| (l.month.to_string(), l.rate))
            .collect()
    }
}

// ========================
// Aggregate queries
// ========================

/// The raw aggregate queries exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Income,
    Expense(ExpenseCategory),
    RawMaterials,
    Purchases(SpecialtyPurchase),
    DirectRawMaterial,
}

impl QueryKind {
    pub fn all() -> Vec<QueryKind> {
        let mut kinds = vec![QueryKind::Income];
        kinds.extend(ExpenseCategory::ALL.into_iter().map(QueryKind::Expense));
        kinds.push(QueryKind::RawMaterials);
        kinds.extend(SpecialtyPurchase::ALL.into_iter().map(QueryKind::Purchases));
        kinds.push(QueryKind::DirectRawMaterial);
        kinds
    }

    pub fn name(&self) -> String {
        match self {
            QueryKind::Income => "income".to_string(),
            QueryKind::Expense(category) => format!("expense-{}", category),
            QueryKind::RawMaterials => "raw-materials".to_string(),
            QueryKind::Purchases(kind) => match kind {
                SpecialtyPurchase::Tray => "tray-purchases".to_string(),
                SpecialtyPurchase::Roll => "roll-purchases".to_string(),
                SpecialtyPurchase::Pad => "pad-purchases".to_string(),
            },
            QueryKind::DirectRawMaterial => "direct-raw-material".to_string(),
        }
    }
}

impl FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        QueryKind::all()
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of an aggregate query, keyed by branch id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Amounts(BranchAmounts),
    Consumption(BTreeMap<BranchId, RawMaterialConsumption>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adjusted(value: Money) -> Adjusted {
        Adjusted {
            value,
            overridden: false,
        }
    }

    fn headers() -> Vec<BranchHeader> {
        vec![
            BranchHeader {
                id: BranchId::A,
                name: "Branch A".into(),
            },
            BranchHeader {
                id: BranchId::B,
                name: "Branch B".into(),
            },
        ]
    }

    #[test]
    fn test_table_totals_averages_and_flags() {
        let months = "2025-08".parse::<YearMonth>().unwrap().trailing(5);
        let values: Vec<Vec<Adjusted>> = [
            (dec!(500), dec!(10)),
            (dec!(130), dec!(10)),
            (dec!(100), dec!(10)),
            (dec!(100), dec!(10)),
            (dec!(100), dec!(10)),
        ]
        .iter()
        .map(|(a, b)| vec![adjusted(*a), adjusted(*b)])
        .collect();

        let table = BranchTable::build(headers(), &months, &values, 5, &[3, 6]);

        assert_eq!(table.months.len(), 5);
        assert_eq!(table.months[0].total.value, dec!(510));
        assert_eq!(table.months[0].cells[0].variance, None);
        assert_eq!(table.months[1].cells[0].variance, Some(Variance::High));
        assert_eq!(table.months[1].cells[1].variance, None);

        assert_eq!(table.averages[0].label, "L3MA");
        assert_eq!(table.averages[0].cells, vec![dec!(100), dec!(10)]);
        assert_eq!(table.averages[0].total, dec!(110));
        // five months cannot fill a six-month window
        assert_eq!(table.averages[1].total, Money::ZERO);
    }

    #[test]
    fn test_short_display_never_flags() {
        let series = [dec!(500), dec!(300), dec!(100), dec!(100), dec!(100)];
        assert!(display_flags(&series, 3).iter().all(Option::is_none));
        assert_eq!(display_flags(&series, 4)[1], Some(Variance::High));
    }

    #[test]
    fn test_override_marks_total() {
        let months = "2025-06".parse::<YearMonth>().unwrap().trailing(1);
        let values = vec![vec![
            Adjusted {
                value: dec!(-5),
                overridden: true,
            },
            adjusted(dec!(7)),
        ]];
        let table = BranchTable::build(headers(), &months, &values, 1, &[3]);
        assert!(table.months[0].cells[0].overridden);
        assert!(!table.months[0].cells[1].overridden);
        assert!(table.months[0].total.overridden);
        assert_eq!(table.months[0].total.value, dec!(2));
    }

    #[test]
    fn test_query_kind_names() {
        assert_eq!("income".parse::<QueryKind>(), Ok(QueryKind::Income));
        assert_eq!(
            "expense-730".parse::<QueryKind>(),
            Ok(QueryKind::Expense(ExpenseCategory::E730))
        );
        assert_eq!(
            "roll-purchases".parse::<QueryKind>(),
            Ok(QueryKind::Purchases(SpecialtyPurchase::Roll))
        );
        assert!("expense-740".parse::<QueryKind>().is_err());
        assert_eq!(QueryKind::all().len(), 11);
    }

    #[test]
    fn test_category_kind_parsing() {
        assert_eq!("income".parse::<CategoryKind>(), Ok(CategoryKind::Income));
        assert_eq!(
            "770".parse::<CategoryKind>(),
            Ok(CategoryKind::Expense(ExpenseCategory::E770))
        );
        assert!("600".parse::<CategoryKind>().is_err());
    }

    #[test]
    fn test_live_figures_sum() {
        let series = [
            dec!(10),
            dec!(0),
            dec!(30),
            dec!(30),
            dec!(30),
            dec!(60),
            dec!(60),
            dec!(60),
        ];
        let figures = LiveFigures::of(&series);
        assert_eq!(figures.current, dec!(10));
        assert_eq!(figures.last_3m, dec!(30));
        assert_eq!(figures.last_6m, dec!(45));

        let total: LiveFigures = [figures, figures].into_iter().sum();
        assert_eq!(total.last_6m, dec!(90));
    }
}
