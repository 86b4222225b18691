use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{BranchId, ExpenseCategory, YearMonth};

use super::{
    AppError, CategoryKind, CategoryReport, FxRates, LiveSnapshot, PnlReport,
    RawMaterialsReport, ReportingService,
};

/// One dashboard panel. A failed panel carries its error message while the
/// others still render.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Panel<T> {
    Ready { data: T },
    Failed { message: String },
}

impl<T> Panel<T> {
    fn from_result(name: &str, result: Result<T, AppError>) -> Self {
        match result {
            Ok(data) => Panel::Ready { data },
            Err(e) => {
                warn!(panel = name, error = %e, "Panel failed to load");
                Panel::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Panel::Ready { data } => Some(data),
            Panel::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Panel::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub month: YearMonth,
    pub pnl: Panel<PnlReport>,
    pub income: Panel<CategoryReport>,
    pub expenses: BTreeMap<ExpenseCategory, Panel<CategoryReport>>,
    pub raw_materials: Panel<RawMaterialsReport>,
    pub fx_rates: Panel<FxRates>,
}

impl Dashboard {
    pub fn failed_panels(&self) -> usize {
        [
            self.pnl.is_failed(),
            self.income.is_failed(),
            self.raw_materials.is_failed(),
            self.fx_rates.is_failed(),
        ]
        .into_iter()
        .chain(self.expenses.values().map(Panel::is_failed))
        .filter(|failed| *failed)
        .count()
    }
}

/// Load every panel for `month` concurrently. Panels fail independently.
pub async fn load_dashboard(
    service: &ReportingService,
    month: YearMonth,
    today: NaiveDate,
) -> Dashboard {
    let months = service.settings().history_months;
    let no_prices = BTreeMap::new();
    let fx_as_of = if YearMonth::of(today) == month {
        today
    } else {
        month.last_day()
    };

    let expense_panels = join_all(ExpenseCategory::ALL.into_iter().map(|category| async move {
        let result = service
            .category_report(CategoryKind::Expense(category), month, months)
            .await;
        (category, Panel::from_result(category.code(), result))
    }));

    let (pnl, income, expenses, raw_materials, fx_rates) = tokio::join!(
        service.pnl_report(month, months),
        service.category_report(CategoryKind::Income, month, months),
        expense_panels,
        service.raw_materials_report(month, months, &no_prices),
        service.fx_rates(fx_as_of),
    );

    Dashboard {
        month,
        pnl: Panel::from_result("pnl", pnl),
        income: Panel::from_result("income", income),
        expenses: expenses.into_iter().collect(),
        raw_materials: Panel::from_result("raw-materials", raw_materials),
        fx_rates: Panel::from_result("fx-rates", fx_rates),
    }
}

/// Live snapshots of every branch, loaded concurrently. A branch whose
/// queries fail shows its error while the others still render.
pub async fn live_overview(
    service: &ReportingService,
    as_of: NaiveDate,
) -> BTreeMap<BranchId, Panel<LiveSnapshot>> {
    let panels = join_all(BranchId::ALL.into_iter().map(|branch| async move {
        let result = service.live_snapshot(branch, as_of).await;
        (branch, Panel::from_result(branch.default_name(), result))
    }))
    .await;

    let failed = panels.iter().filter(|(_, p)| p.is_failed()).count();
    info!(%as_of, failed_branches = failed, "Loaded live overview");
    panels.into_iter().collect()
}

/// Identifies one dashboard load. Only the latest token's result is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodToken {
    pub generation: u64,
    pub month: YearMonth,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Current(Dashboard),
    /// A newer load started while this one was in flight.
    Stale(PeriodToken),
}

impl LoadOutcome {
    pub fn into_current(self) -> Option<Dashboard> {
        match self {
            LoadOutcome::Current(dashboard) => Some(dashboard),
            LoadOutcome::Stale(_) => None,
        }
    }
}

/// Month navigation over a [`ReportingService`]. Loads are tagged with a
/// [`PeriodToken`]; a result whose token has been superseded is discarded
/// instead of replacing a newer one. In-flight loads are not cancelled.
pub struct DashboardSession {
    service: Arc<ReportingService>,
    generation: AtomicU64,
    selected: YearMonth,
    today: NaiveDate,
}

impl DashboardSession {
    /// Start at the current month of `today`.
    pub fn new(service: Arc<ReportingService>, today: NaiveDate) -> Self {
        Self {
            service,
            generation: AtomicU64::new(0),
            selected: YearMonth::of(today),
            today,
        }
    }

    pub fn selected(&self) -> YearMonth {
        self.selected
    }

    pub fn current_month(&self) -> YearMonth {
        YearMonth::of(self.today)
    }

    /// Select a month, capped at the current month.
    pub fn select(&mut self, month: YearMonth) -> YearMonth {
        self.selected = month.min(self.current_month());
        self.selected
    }

    pub fn previous(&mut self) -> YearMonth {
        self.select(self.selected.previous())
    }

    /// Advance one month. Never goes past the current month.
    pub fn next(&mut self) -> YearMonth {
        self.select(self.selected.next())
    }

    /// Issue a token for a new load, superseding every earlier one.
    pub fn begin(&self, month: YearMonth) -> PeriodToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        PeriodToken { generation, month }
    }

    pub fn is_current(&self, token: PeriodToken) -> bool {
        self.generation.load(Ordering::SeqCst) == token.generation
    }

    /// Load the dashboard for `month`.
    pub async fn load(&self, month: YearMonth) -> LoadOutcome {
        let token = self.begin(month);
        debug!(generation = token.generation, %month, "Loading dashboard");

        let dashboard = load_dashboard(&self.service, month, self.today).await;

        if self.is_current(token) {
            info!(
                generation = token.generation,
                %month,
                failed_panels = dashboard.failed_panels(),
                "Dashboard loaded"
            );
            LoadOutcome::Current(dashboard)
        } else {
            debug!(
                generation = token.generation,
                %month,
                "Discarding stale dashboard load"
            );
            LoadOutcome::Stale(token)
        }
    }

    pub async fn load_selected(&self) -> LoadOutcome {
        self.load(self.selected).await
    }
}
