use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::{
    AccountMonthTotal, BranchAmounts, BranchId, BranchSet, DateRange, ExpenseCategory,
    RawMaterialConsumption, SpecialtyPurchase, YearMonth,
};

/// The fixed aggregation queries reports are built from. Every call is a
/// full recomputation over the ledger; nothing is cached.
///
/// Per-branch results always contain every requested branch, zero when the
/// ledger has no matching lines.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    /// Income net of sales discounts.
    async fn net_income(&self, branches: &BranchSet, range: DateRange) -> Result<BranchAmounts>;

    /// Signed sum(debit - credit) over one expense category's accounts.
    async fn expense_total(
        &self,
        category: ExpenseCategory,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts>;

    async fn raw_material_consumption(
        &self,
        branches: &BranchSet,
        range: DateRange,
        local_currency: &str,
    ) -> Result<BTreeMap<BranchId, RawMaterialConsumption>>;

    /// Purchases of one specialty kind, attributed to Branch A only.
    async fn specialty_purchases(
        &self,
        kind: SpecialtyPurchase,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts>;

    /// Branch C's raw material as booked on its ledger accounts.
    async fn direct_raw_material(
        &self,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts>;

    /// Per-account, per-month activity on accounts 720..770 of one branch.
    async fn expense_accounts_by_month(
        &self,
        branch: BranchId,
        range: DateRange,
    ) -> Result<Vec<AccountMonthTotal>>;

    /// Monthly average rate of `currency` for months starting at `since`.
    async fn average_rates(
        &self,
        currency: &str,
        since: NaiveDate,
    ) -> Result<BTreeMap<YearMonth, Decimal>>;
}
