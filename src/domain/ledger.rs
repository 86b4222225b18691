use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BranchId, Money, YearMonth};

/// Journal transaction type used for voided documents.
pub const VOIDED_TRANS_TYPE: i64 = -3;

/// Source line marker carried by reversal lines.
pub const REVERSAL_SOURCE_LINE: i64 = -8;

/// Ledger accounts holding Branch C's raw-material cost.
pub const DIRECT_RAW_MATERIAL_PREFIXES: [&str; 2] = ["620-01", "895-01"];

/// Inventory item group of raw materials.
pub const RAW_MATERIAL_ITEM_GROUP: i64 = 111;

/// Stock movement type for goods issued to production.
pub const CONSUMPTION_TRANS_TYPE: i64 = 60;

/// Roll and pad purchases are booked gross of 20% VAT.
pub const PURCHASE_VAT_DIVISOR: Decimal = Decimal::from_parts(120, 0, 0, false, 2);

/// A journal line from the ERP ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub trans_id: i64,
    pub account: String,
    pub short_name: Option<String>,
    pub contra_account: Option<String>,
    /// Raw branch id as recorded; lines for untracked branches are kept
    /// but never aggregated.
    pub branch_id: Option<i64>,
    pub debit: Money,
    pub credit: Money,
    pub ref_date: NaiveDate,
    pub trans_type: i64,
    pub source_line: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub code: String,
    pub name: String,
}

/// An inventory movement. Raw-material consumption is derived from these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub item_code: String,
    pub item_group: i64,
    pub branch_id: Option<i64>,
    pub trans_type: i64,
    pub doc_date: NaiveDate,
    pub out_qty: Decimal,
    pub price: Decimal,
    pub currency: String,
    pub rate: Option<Decimal>,
}

impl StockMovement {
    /// Quantity issued valued in local currency.
    pub fn local_cost(&self, local_currency: &str) -> Money {
        lot_cost(
            self.out_qty,
            self.price,
            &self.currency,
            self.rate,
            local_currency,
        )
    }
}

/// Value `quantity` units priced at `price`. Foreign-currency prices are
/// converted with the rate recorded on the movement; a missing or zero rate
/// values the lot at zero rather than at the unconverted price.
pub fn lot_cost(
    quantity: Decimal,
    price: Decimal,
    currency: &str,
    rate: Option<Decimal>,
    local_currency: &str,
) -> Money {
    if currency.eq_ignore_ascii_case(local_currency) {
        return quantity * price;
    }
    match rate {
        Some(rate) if !rate.is_zero() => quantity * price * rate,
        _ => Money::ZERO,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMaterialConsumption {
    /// Quantity consumed (kg).
    pub consumed: Decimal,
    /// Cost of the consumed quantity in local currency, before markup.
    pub cost_of_consumed: Money,
}

/// Fold raw-material movements into per-branch consumption. Movements that
/// are not raw-material consumption, or that belong to branches outside
/// the tracked set, are ignored.
pub fn aggregate_consumption(
    movements: &[StockMovement],
    local_currency: &str,
) -> BTreeMap<BranchId, RawMaterialConsumption> {
    let mut totals: BTreeMap<BranchId, RawMaterialConsumption> = BTreeMap::new();

    for movement in movements {
        if movement.item_group != RAW_MATERIAL_ITEM_GROUP
            || movement.trans_type != CONSUMPTION_TRANS_TYPE
        {
            continue;
        }
        let Some(branch) = movement
            .branch_id
            .and_then(|id| BranchId::try_from(id).ok())
        else {
            continue;
        };

        let entry = totals.entry(branch).or_default();
        entry.consumed += movement.out_qty;
        entry.cost_of_consumed += movement.local_cost(local_currency);
    }

    totals
}

/// One account's expense activity within one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMonthTotal {
    pub account: String,
    pub account_name: String,
    pub month: YearMonth,
    pub amount: Money,
}

impl AccountMonthTotal {
    /// Leading three digits of the account code, e.g. "720".
    pub fn group(&self) -> &str {
        self.account.get(..3).unwrap_or(&self.account)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub currency: String,
    pub rate_date: NaiveDate,
    pub rate: Decimal,
}

/// Average daily rates per calendar month.
pub fn monthly_average_rates(rates: &[ExchangeRate]) -> BTreeMap<YearMonth, Decimal> {
    let mut buckets: BTreeMap<YearMonth, (Decimal, u32)> = BTreeMap::new();
    for rate in rates {
        let bucket = buckets
            .entry(YearMonth::of(rate.rate_date))
            .or_insert((Decimal::ZERO, 0));
        bucket.0 += rate.rate;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(month, (sum, count))| (month, (sum / Decimal::from(count)).round_dp(6)))
        .collect()
}

/// Expense buckets keyed by the leading account segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExpenseCategory {
    #[serde(rename = "720")]
    E720,
    #[serde(rename = "730")]
    E730,
    #[serde(rename = "760")]
    E760,
    #[serde(rename = "770")]
    E770,
    #[serde(rename = "780")]
    E780,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 5] = [
        ExpenseCategory::E720,
        ExpenseCategory::E730,
        ExpenseCategory::E760,
        ExpenseCategory::E770,
        ExpenseCategory::E780,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ExpenseCategory::E720 => "720",
            ExpenseCategory::E730 => "730",
            ExpenseCategory::E760 => "760",
            ExpenseCategory::E770 => "770",
            ExpenseCategory::E780 => "780",
        }
    }

    /// SQL `LIKE` pattern selecting the category's accounts.
    pub fn like_pattern(&self) -> String {
        format!("{}-%", self.code())
    }
}

impl FromStr for ExpenseCategory {
    type Err = UnknownCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().trim_start_matches("expense-").trim_end_matches('-');
        ExpenseCategory::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| UnknownCategoryError(s.to_string()))
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategoryError(pub String);

impl fmt::Display for UnknownCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown category '{}'", self.0)
    }
}

impl std::error::Error for UnknownCategoryError {}

/// Purchase categories tracked separately for Branch A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialtyPurchase {
    Tray,
    Roll,
    Pad,
}

impl SpecialtyPurchase {
    pub const ALL: [SpecialtyPurchase; 3] = [
        SpecialtyPurchase::Tray,
        SpecialtyPurchase::Roll,
        SpecialtyPurchase::Pad,
    ];

    /// The only branch these purchases are attributed to.
    pub const BRANCH: BranchId = BranchId::A;

    pub fn label(&self) -> &'static str {
        match self {
            SpecialtyPurchase::Tray => "Tray purchases",
            SpecialtyPurchase::Roll => "Roll purchases",
            SpecialtyPurchase::Pad => "Pad purchases",
        }
    }

    /// Convert the raw ledger sum into the purchase amount. Tray purchases
    /// are booked net; roll and pad supplier postings are gross of VAT.
    pub fn net_amount(&self, ledger_sum: Money) -> Money {
        match self {
            SpecialtyPurchase::Tray => ledger_sum,
            SpecialtyPurchase::Roll | SpecialtyPurchase::Pad => ledger_sum / PURCHASE_VAT_DIVISOR,
        }
    }
}
