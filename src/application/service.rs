use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    derive_row, trailing_average, Adjusted, BranchAmounts, BranchId, BranchMonthFigures,
    BranchSet, DateRange, ExpenseCategory, Money, MonthlyPnlRow, PnlComponent, PnlRules,
    RawMaterialRule, SpecialtyPurchase, TrailingAverages, YearMonth,
};
use crate::storage::Repository;

use super::{
    display_flags, AggregateSource, AppError, BranchHeader, BranchPnlDetail, BranchTable,
    CategoryKind, CategoryReport, FxRates, LiveFigures, LiveGroup, LiveLine, LiveSnapshot,
    PnlDetailLine, PnlReport, QueryKind, QueryResult, RateLine, RawMaterialMonth,
    RawMaterialsReport, AVERAGE_HISTORY,
};

/// Settings that shape reports without changing P&L arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    /// Currency stock prices need no conversion in.
    pub local_currency: String,
    /// Currency of the FX rate table and of manual raw-material prices.
    pub fx_currency: String,
    pub fx_lookback_months: usize,
    /// Months shown by default in monthly reports.
    pub history_months: usize,
    pub branch_names: BTreeMap<BranchId, String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            local_currency: "TRY".to_string(),
            fx_currency: "USD".to_string(),
            fx_lookback_months: 9,
            history_months: AVERAGE_HISTORY,
            branch_names: BTreeMap::new(),
        }
    }
}

impl ReportSettings {
    pub fn branch_name(&self, branch: BranchId) -> String {
        self.branch_names
            .get(&branch)
            .cloned()
            .unwrap_or_else(|| branch.default_name().to_string())
    }
}

/// Builds every report from an [`AggregateSource`]. This is the interface
/// the CLI and the dashboard session render from.
#[derive(Clone)]
pub struct ReportingService {
    source: Arc<dyn AggregateSource>,
    rules: PnlRules,
    settings: ReportSettings,
}

impl ReportingService {
    pub fn new(source: Arc<dyn AggregateSource>, rules: PnlRules, settings: ReportSettings) -> Self {
        Self {
            source,
            rules,
            settings,
        }
    }

    /// Connect to an existing snapshot database.
    pub async fn connect(
        database_path: &str,
        rules: PnlRules,
        settings: ReportSettings,
    ) -> Result<Self, AppError> {
        let repo = Repository::open(database_path).await?;
        Ok(Self::new(Arc::new(repo), rules, settings))
    }

    pub fn rules(&self) -> &PnlRules {
        &self.rules
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    pub fn branch_headers(&self, branches: &BranchSet) -> Vec<BranchHeader> {
        branches
            .iter()
            .map(|id| BranchHeader {
                id,
                name: self.settings.branch_name(id),
            })
            .collect()
    }

    /// The selected month and enough history behind it for both averages.
    fn history(&self, month: YearMonth, displayed: usize) -> Vec<YearMonth> {
        month.trailing(displayed.max(AVERAGE_HISTORY))
    }

    // ========================
    // Figures
    // ========================

    /// Everything the P&L needs for the given branches and range, fetched
    /// concurrently. The ledger's 780 total is not fetched here.
    pub async fn figures_for(
        &self,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BTreeMap<BranchId, BranchMonthFigures>, AppError> {
        let source = self.source.as_ref();
        let local_currency = self.settings.local_currency.as_str();

        let (income, e720, e730, e760, e770, consumption, tray, roll, pad, direct) = tokio::try_join!(
            source.net_income(branches, range),
            source.expense_total(ExpenseCategory::E720, branches, range),
            source.expense_total(ExpenseCategory::E730, branches, range),
            source.expense_total(ExpenseCategory::E760, branches, range),
            source.expense_total(ExpenseCategory::E770, branches, range),
            source.raw_material_consumption(branches, range, local_currency),
            source.specialty_purchases(SpecialtyPurchase::Tray, branches, range),
            source.specialty_purchases(SpecialtyPurchase::Roll, branches, range),
            source.specialty_purchases(SpecialtyPurchase::Pad, branches, range),
            source.direct_raw_material(branches, range),
        )?;

        Ok(branches
            .iter()
            .map(|branch| {
                let figures = BranchMonthFigures {
                    turnover: income.get(branch),
                    expense720: e720.get(branch),
                    expense730: e730.get(branch),
                    expense760: e760.get(branch),
                    expense770: e770.get(branch),
                    raw_material: consumption.get(&branch).copied().unwrap_or_default(),
                    direct_raw_material: direct.get(branch),
                    tray_purchases: tray.get(branch),
                    roll_purchases: roll.get(branch),
                    pad_purchases: pad.get(branch),
                };
                (branch, figures)
            })
            .collect())
    }

    async fn month_figures(
        &self,
        month: YearMonth,
    ) -> Result<BTreeMap<BranchId, BranchMonthFigures>, AppError> {
        debug!(%month, "Fetching month figures");
        self.figures_for(&BranchSet::all(), month.range()).await
    }

    /// P&L rows of every branch for one month.
    #[instrument(skip(self))]
    pub async fn monthly_rows(&self, month: YearMonth) -> Result<Vec<MonthlyPnlRow>, AppError> {
        let figures = self.month_figures(month).await?;
        Ok(BranchSet::all()
            .iter()
            .map(|branch| {
                let f = figures.get(&branch).copied().unwrap_or_default();
                derive_row(branch, month, &f, &self.rules)
            })
            .collect())
    }

    // ========================
    // Reports
    // ========================

    /// Monthly P&L per branch, most recent month first, with per-branch
    /// component detail.
    #[instrument(skip(self))]
    pub async fn pnl_report(&self, month: YearMonth, months: usize) -> Result<PnlReport, AppError> {
        let displayed = months.max(1);
        let series = self.history(month, displayed);
        let branches = BranchSet::all();

        let figures = try_join_all(series.iter().map(|m| self.month_figures(*m))).await?;
        let rows: Vec<Vec<MonthlyPnlRow>> = series
            .iter()
            .zip(&figures)
            .map(|(m, by_branch)| {
                branches
                    .iter()
                    .map(|branch| {
                        let f = by_branch.get(&branch).copied().unwrap_or_default();
                        derive_row(branch, *m, &f, &self.rules)
                    })
                    .collect()
            })
            .collect();

        let values: Vec<Vec<Adjusted>> = rows
            .iter()
            .map(|month_rows| {
                month_rows
                    .iter()
                    .map(|row| Adjusted {
                        value: row.pnl,
                        overridden: false,
                    })
                    .collect()
            })
            .collect();

        let headers = self.branch_headers(&branches);
        let table = BranchTable::build(headers.clone(), &series, &values, displayed, &[3, 6]);

        let details = headers
            .into_iter()
            .enumerate()
            .map(|(b, header)| {
                let branch_rows: Vec<MonthlyPnlRow> =
                    rows.iter().map(|month_rows| month_rows[b].clone()).collect();
                self.branch_detail(header, branch_rows, displayed)
            })
            .collect();

        info!(%month, months = displayed, "Built P&L report");
        Ok(PnlReport {
            month,
            overhead: self.rules.overhead,
            table,
            details,
        })
    }

    fn branch_detail(
        &self,
        branch: BranchHeader,
        rows: Vec<MonthlyPnlRow>,
        displayed: usize,
    ) -> BranchPnlDetail {
        let components: Vec<PnlComponent> = rows
            .first()
            .map(|row| row.components().into_iter().map(|(c, _)| c).collect())
            .unwrap_or_default();

        let mut flags = vec![BTreeMap::new(); displayed.min(rows.len())];
        let mut averages = BTreeMap::new();
        for component in components {
            let series: Vec<Money> = rows
                .iter()
                .map(|row| row.component(component).unwrap_or_default())
                .collect();
            for (i, flag) in display_flags(&series, displayed).into_iter().enumerate() {
                if let Some(variance) = flag {
                    flags[i].insert(component, variance);
                }
            }
            averages.insert(component, TrailingAverages::of(&series));
        }

        let turnover: Vec<Money> = rows.iter().map(|r| r.turnover).collect();
        let pnl: Vec<Money> = rows.iter().map(|r| r.pnl).collect();

        BranchPnlDetail {
            raw_material_label: self.rules.branch(branch.id).raw_material.label(),
            branch,
            lines: rows
                .into_iter()
                .zip(flags)
                .map(|(row, flags)| PnlDetailLine { row, flags })
                .collect(),
            averages,
            turnover_averages: TrailingAverages::of(&turnover),
            pnl_averages: TrailingAverages::of(&pnl),
        }
    }

    async fn category_amounts(
        &self,
        kind: CategoryKind,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts, AppError> {
        let amounts = match kind {
            CategoryKind::Income => self.source.net_income(branches, range).await?,
            CategoryKind::Expense(category) => {
                self.source.expense_total(category, branches, range).await?
            }
        };
        Ok(amounts)
    }

    /// One ledger category per branch and month, with overrides applied.
    #[instrument(skip(self))]
    pub async fn category_report(
        &self,
        kind: CategoryKind,
        month: YearMonth,
        months: usize,
    ) -> Result<CategoryReport, AppError> {
        let displayed = months.max(1);
        let series = self.history(month, displayed);
        let branches = BranchSet::all();

        let amounts = try_join_all(
            series
                .iter()
                .map(|m| self.category_amounts(kind, &branches, m.range())),
        )
        .await?;

        let values: Vec<Vec<Adjusted>> = series
            .iter()
            .zip(&amounts)
            .map(|(m, by_branch)| {
                branches
                    .iter()
                    .map(|branch| {
                        let value = by_branch.get(branch).abs();
                        match kind {
                            CategoryKind::Income => Adjusted {
                                value,
                                overridden: false,
                            },
                            CategoryKind::Expense(category) => {
                                self.rules.overrides.apply(branch, category, *m, value)
                            }
                        }
                    })
                    .collect()
            })
            .collect();

        let table = BranchTable::build(
            self.branch_headers(&branches),
            &series,
            &values,
            displayed,
            &[3],
        );

        info!(%month, category = %kind, "Built category report");
        Ok(CategoryReport {
            category: kind,
            month,
            table,
        })
    }

    /// Raw-material consumption of Branch A and Branch B. A manual price
    /// (in the FX currency per kg) revalues a month's consumption at that
    /// month's average rate.
    #[instrument(skip(self, manual_prices))]
    pub async fn raw_materials_report(
        &self,
        month: YearMonth,
        months: usize,
        manual_prices: &BTreeMap<YearMonth, Decimal>,
    ) -> Result<RawMaterialsReport, AppError> {
        let displayed = months.max(1);
        let series = self.history(month, displayed);
        let branches = BranchSet::new([BranchId::A, BranchId::B]);
        let since = series.last().copied().unwrap_or(month).first_day();
        let local_currency = self.settings.local_currency.as_str();
        let fx_currency = self.settings.fx_currency.as_str();

        let (consumption, rates) = tokio::try_join!(
            try_join_all(series.iter().map(|m| {
                self.source
                    .raw_material_consumption(&branches, m.range(), local_currency)
            })),
            self.source.average_rates(fx_currency, since),
        )?;

        let lines: Vec<RawMaterialMonth> = series
            .iter()
            .zip(&consumption)
            .map(|(m, by_branch)| {
                let mut branch_a = by_branch.get(&BranchId::A).copied().unwrap_or_default();
                let mut branch_b = by_branch.get(&BranchId::B).copied().unwrap_or_default();
                let fx_rate = rates.get(m).copied();
                let manual_price = manual_prices.get(m).copied();

                if let Some(price) = manual_price {
                    match fx_rate {
                        Some(rate) => {
                            branch_a.cost_of_consumed = branch_a.consumed * price * rate;
                            branch_b.cost_of_consumed = branch_b.consumed * price * rate;
                        }
                        None => warn!(
                            month = %m,
                            currency = fx_currency,
                            "No average rate for manual price, keeping recorded cost"
                        ),
                    }
                }

                RawMaterialMonth {
                    month: *m,
                    branch_a,
                    branch_b,
                    fx_rate,
                    manual_price,
                    total_cost: branch_a.cost_of_consumed + branch_b.cost_of_consumed,
                }
            })
            .collect();

        let l3ma = |value: fn(&RawMaterialMonth) -> Decimal| {
            trailing_average(&lines.iter().map(value).collect::<Vec<_>>(), 3)
        };

        Ok(RawMaterialsReport {
            month,
            fx_currency: fx_currency.to_string(),
            l3ma_kg_a: l3ma(|l| l.branch_a.consumed),
            l3ma_kg_b: l3ma(|l| l.branch_b.consumed),
            l3ma_branch_a: l3ma(|l| l.branch_a.cost_of_consumed),
            l3ma_branch_b: l3ma(|l| l.branch_b.cost_of_consumed),
            l3ma_fx_rate: l3ma(|l| l.fx_rate.unwrap_or_default()),
            l3ma_total: l3ma(|l| l.total_cost),
            months: lines.into_iter().take(displayed).collect(),
        })
    }

    /// Month-to-date expense and purchase detail for one branch against its
    /// trailing averages.
    #[instrument(skip(self))]
    pub async fn live_snapshot(
        &self,
        branch: BranchId,
        as_of: NaiveDate,
    ) -> Result<LiveSnapshot, AppError> {
        let month = YearMonth::of(as_of);
        let series = month.trailing(AVERAGE_HISTORY);
        let oldest = series.last().copied().unwrap_or(month);
        let window = DateRange::new(oldest.first_day(), as_of)?;
        let ranges = series
            .iter()
            .map(|m| {
                if *m == month {
                    DateRange::new(m.first_day(), as_of)
                } else {
                    Ok(m.range())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let branches = BranchSet::new([branch]);

        let (accounts, figures) = tokio::try_join!(
            async {
                let totals = self.source.expense_accounts_by_month(branch, window).await?;
                Ok::<_, AppError>(totals)
            },
            try_join_all(ranges.iter().map(|r| self.figures_for(&branches, *r))),
        )?;

        // (group, account) -> (name, series)
        let position: BTreeMap<YearMonth, usize> =
            series.iter().enumerate().map(|(i, m)| (*m, i)).collect();
        let mut per_account: BTreeMap<(String, String), (String, Vec<Money>)> = BTreeMap::new();
        for total in &accounts {
            let Some(&i) = position.get(&total.month) else {
                continue;
            };
            let entry = per_account
                .entry((total.group().to_string(), total.account.clone()))
                .or_insert_with(|| (total.account_name.clone(), vec![Money::ZERO; series.len()]));
            entry.1[i] += total.amount;
        }

        let mut expense_groups: Vec<LiveGroup> = Vec::new();
        for ((group, code), (name, values)) in per_account {
            let line = LiveLine {
                code: Some(code),
                label: name,
                figures: LiveFigures::of(&values),
                quantity: None,
            };
            match expense_groups.last_mut() {
                Some(last) if last.group == group => last.lines.push(line),
                _ => expense_groups.push(LiveGroup {
                    group,
                    lines: vec![line],
                    subtotal: LiveFigures::default(),
                }),
            }
        }
        for group in &mut expense_groups {
            group.subtotal = group.lines.iter().map(|l| l.figures).sum();
        }
        let expense_total: LiveFigures = expense_groups.iter().map(|g| g.subtotal).sum();

        let rules = self.rules.branch(branch);
        let monthly: Vec<BranchMonthFigures> = figures
            .iter()
            .map(|by_branch| by_branch.get(&branch).copied().unwrap_or_default())
            .collect();

        let mut purchase_lines = Vec::new();
        if rules.specialty_purchases {
            for kind in SpecialtyPurchase::ALL {
                let values: Vec<Money> = monthly.iter().map(|f| f.purchase(kind).abs()).collect();
                purchase_lines.push(LiveLine {
                    code: None,
                    label: kind.label().to_string(),
                    figures: LiveFigures::of(&values),
                    quantity: None,
                });
            }
        }
        let raw_material: Vec<Money> = monthly.iter().map(|f| rules.raw_material.cost(f)).collect();
        let quantity = match rules.raw_material {
            RawMaterialRule::Markup { .. } => monthly.first().map(|f| f.raw_material.consumed),
            RawMaterialRule::DirectLedger => None,
        };
        purchase_lines.push(LiveLine {
            code: None,
            label: rules.raw_material.label(),
            figures: LiveFigures::of(&raw_material),
            quantity,
        });

        let turnover = LiveFigures::of(&monthly.iter().map(|f| f.turnover).collect::<Vec<_>>());
        let expense_estimate = expense_total.last_6m;
        let purchases: LiveFigures = purchase_lines.iter().map(|l| l.figures).sum();
        let total = purchases
            + LiveFigures {
                current: expense_estimate,
                last_3m: expense_total.last_3m,
                last_6m: expense_total.last_6m,
            };

        info!(%branch, %as_of, accounts = accounts.len(), "Built live snapshot");
        Ok(LiveSnapshot {
            branch: BranchHeader {
                id: branch,
                name: self.settings.branch_name(branch),
            },
            as_of,
            month,
            expense_groups,
            expense_total,
            purchase_lines,
            expense_estimate,
            turnover,
            total,
            profit: turnover - total,
        })
    }

    /// Monthly average FX rates over the configured lookback, ending with
    /// the month of `as_of`.
    #[instrument(skip(self))]
    pub async fn fx_rates(&self, as_of: NaiveDate) -> Result<FxRates, AppError> {
        let month = YearMonth::of(as_of);
        let lookback = self.settings.fx_lookback_months.max(1);
        let since = month.minus((lookback - 1) as u32).first_day();
        let currency = self.settings.fx_currency.clone();

        let rates = self.source.average_rates(&currency, since).await?;
        let months = rates
            .into_iter()
            .rev()
            .filter(|(m, _)| *m <= month)
            .map(|(month, rate)| RateLine { month, rate })
            .collect();

        Ok(FxRates {
            currency,
            since,
            months,
        })
    }

    /// Run one raw aggregate query.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        kind: QueryKind,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<QueryResult, AppError> {
        let source = self.source.as_ref();
        let result = match kind {
            QueryKind::Income => QueryResult::Amounts(source.net_income(branches, range).await?),
            QueryKind::Expense(category) => {
                QueryResult::Amounts(source.expense_total(category, branches, range).await?)
            }
            QueryKind::RawMaterials => QueryResult::Consumption(
                source
                    .raw_material_consumption(branches, range, &self.settings.local_currency)
                    .await?,
            ),
            QueryKind::Purchases(purchase) => {
                QueryResult::Amounts(source.specialty_purchases(purchase, branches, range).await?)
            }
            QueryKind::DirectRawMaterial => {
                QueryResult::Amounts(source.direct_raw_material(branches, range).await?)
            }
        };
        Ok(result)
    }
}
