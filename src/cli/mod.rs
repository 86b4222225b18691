use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::application::{
    average_label, live_overview, AppError, BranchTable, CategoryKind, CategoryReport, Cell,
    Dashboard, DashboardSession, FxRates, LiveFigures, LiveSnapshot, Panel, PnlReport,
    QueryKind, RawMaterialsReport, ReportingService,
};
use crate::config::Config;
use crate::domain::{
    format_money, parse_iso_date, BranchId, BranchSet, DateRange, TrailingAverages, YearMonth,
};
use crate::io::{
    write_branch_table_csv, write_live_snapshot_csv, write_pnl_detail_csv,
    write_raw_materials_csv, ImportKind, ImportOptions, Importer,
};
use crate::storage::Repository;

/// pnlboard - multi-branch P&L reporting over an ERP ledger snapshot
#[derive(Parser)]
#[command(name = "pnlboard")]
#[command(about = "Monthly P&L, expense and raw-material reports across branches")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "PNLBOARD_DATABASE", default_value = "pnlboard.db")]
    pub database: String,

    /// TOML file with business rules and overrides
    #[arg(short, long, env = "PNLBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Show what the snapshot database holds
    Status,

    /// Import an ERP export from CSV
    Import {
        /// What to import: ledger, accounts, stock, rates
        import_type: String,

        /// Input file (stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Validate without importing
        #[arg(long)]
        dry_run: bool,
    },

    /// Run one aggregate query and print it as JSON keyed by branch id
    Query {
        /// income, expense-720, expense-730, expense-760, expense-770,
        /// expense-780, raw-materials, tray-purchases, roll-purchases,
        /// pad-purchases, direct-raw-material
        kind: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// End date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Comma separated branch ids
        #[arg(short, long, default_value = "1,3,4")]
        branches: String,
    },

    /// Monthly P&L per branch
    Pnl {
        /// Selected month (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Number of months to show
        #[arg(long)]
        months: Option<usize>,

        /// Format: table, json, csv
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// One ledger category per branch and month
    Category {
        /// income, 720, 730, 760, 770 or 780
        category: String,

        /// Selected month (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Number of months to show
        #[arg(long)]
        months: Option<usize>,

        /// Format: table, json, csv
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Raw-material consumption of Branch A and Branch B
    RawMaterials {
        /// Selected month (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Number of months to show
        #[arg(long)]
        months: Option<usize>,

        /// Manual price per kg for a month, e.g. 2025-03=2.45 (repeatable)
        #[arg(long = "manual-price")]
        manual_prices: Vec<String>,

        /// Format: table, json, csv
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Month-to-date expenses and purchases, for one branch or all of them
    Live {
        /// Branch id (every branch if omitted)
        #[arg(short, long)]
        branch: Option<String>,

        /// As-of date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Format: table, json, csv
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Every panel for one month
    Dashboard {
        /// Selected month (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,

        /// Format: table, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Monthly average exchange rates
    Rates {
        /// As-of date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Format: table, json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                Repository::create(&self.database).await?;
                println!("Initialized database: {}", self.database);
            }

            Commands::Status => {
                let repo = Repository::open(&self.database).await?;
                let stats = repo.snapshot_stats().await?;
                println!("Database: {}", self.database);
                println!("  Ledger lines:    {}", stats.ledger_lines);
                println!("  Accounts:        {}", stats.accounts);
                println!("  Stock movements: {}", stats.stock_movements);
                println!("  Exchange rates:  {}", stats.exchange_rates);
                if let (Some(first), Some(last)) = (stats.first_ref_date, stats.last_ref_date) {
                    println!("  Ledger period:   {} to {}", first, last);
                }
            }

            Commands::Import {
                import_type,
                input,
                dry_run,
            } => {
                let repo = Repository::open(&self.database).await?;
                run_import_command(&repo, &import_type, input.as_deref(), dry_run).await?;
            }

            command => {
                let config = Config::load(self.config.as_deref())?;
                let service = ReportingService::connect(
                    &self.database,
                    config.to_pnl_rules(),
                    config.to_report_settings(),
                )
                .await?;
                run_report_command(service, command).await?;
            }
        }

        Ok(())
    }
}

async fn run_import_command(
    repo: &Repository,
    import_type: &str,
    input: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    use std::fs::File;
    use std::io::{stdin, Read};

    let kind: ImportKind = import_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;

    let reader: Box<dyn Read> = match input {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("Failed to open input file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdin()),
    };

    let result = Importer::new(repo)
        .import_csv(kind, reader, ImportOptions { dry_run })
        .await?;

    if dry_run {
        println!("Validation complete (nothing written)");
    } else {
        println!("Import complete");
    }
    println!("  Imported: {}", result.imported);
    println!("  Skipped:  {}", result.skipped);
    println!("  Errors:   {}", result.errors.len());

    if !result.errors.is_empty() {
        println!("\nErrors:");
        for error in result.errors.iter().take(10) {
            println!(
                "  Line {}: {}",
                error.line,
                error
                    .field
                    .as_ref()
                    .map(|f| format!("{}: ", f))
                    .unwrap_or_default()
                    + &error.error
            );
        }
        if result.errors.len() > 10 {
            println!("  ... and {} more errors", result.errors.len() - 10);
        }
    }

    Ok(())
}

async fn run_report_command(service: ReportingService, command: Commands) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    let default_months = service.settings().history_months;

    match command {
        Commands::Query {
            kind,
            start,
            end,
            branches,
        } => {
            let kind = QueryKind::from_str(&kind).map_err(AppError::UnknownQuery)?;
            let range = DateRange::parse(&start, &end).map_err(AppError::from)?;
            let branches = BranchSet::parse(&branches).map_err(AppError::from)?;

            let result = service.query(kind, &branches, range).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Pnl {
            month,
            months,
            format,
        } => {
            let month = parse_month(month.as_deref(), today)?;
            let report = service
                .pnl_report(month, months.unwrap_or(default_months))
                .await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                "csv" => {
                    write_pnl_detail_csv(&report, std::io::stdout())?;
                }
                _ => print_pnl_report(&report),
            }
        }

        Commands::Category {
            category,
            month,
            months,
            format,
        } => {
            let kind: CategoryKind = category.parse().map_err(AppError::from)?;
            let month = parse_month(month.as_deref(), today)?;
            let report = service
                .category_report(kind, month, months.unwrap_or(default_months))
                .await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                "csv" => {
                    write_branch_table_csv(&report.table, std::io::stdout())?;
                }
                _ => print_category_report(&report),
            }
        }

        Commands::RawMaterials {
            month,
            months,
            manual_prices,
            format,
        } => {
            let month = parse_month(month.as_deref(), today)?;
            let prices = parse_manual_prices(&manual_prices)?;
            let report = service
                .raw_materials_report(month, months.unwrap_or(default_months), &prices)
                .await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                "csv" => {
                    write_raw_materials_csv(&report, std::io::stdout())?;
                }
                _ => print_raw_materials_report(&report),
            }
        }

        Commands::Live {
            branch,
            date,
            format,
        } => {
            let branch = branch
                .as_deref()
                .map(BranchId::from_str)
                .transpose()
                .map_err(AppError::from)?;
            let as_of = parse_date_or(date.as_deref(), today)?;

            let Some(branch) = branch else {
                let overview = live_overview(&service, as_of).await;
                match format.as_str() {
                    "json" => println!("{}", serde_json::to_string_pretty(&overview)?),
                    "csv" => anyhow::bail!("CSV output needs --branch"),
                    _ => {
                        for (branch, panel) in &overview {
                            let title = service.settings().branch_name(*branch);
                            print_panel(&title, panel, print_live_snapshot);
                        }
                    }
                }
                return Ok(());
            };

            let snapshot = service.live_snapshot(branch, as_of).await?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                "csv" => {
                    write_live_snapshot_csv(&snapshot, std::io::stdout())?;
                }
                _ => print_live_snapshot(&snapshot),
            }
        }

        Commands::Dashboard { month, format } => {
            let month = parse_month(month.as_deref(), today)?;
            let mut session = DashboardSession::new(Arc::new(service), today);
            session.select(month);

            // A single load cannot be superseded.
            let Some(dashboard) = session.load_selected().await.into_current() else {
                anyhow::bail!("Dashboard load was superseded");
            };

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&dashboard)?),
                _ => print_dashboard(&dashboard),
            }
        }

        Commands::Rates { date, format } => {
            let as_of = parse_date_or(date.as_deref(), today)?;
            let rates = service.fx_rates(as_of).await?;

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&rates.by_month())?),
                _ => print_fx_rates(&rates),
            }
        }

        Commands::Init | Commands::Status | Commands::Import { .. } => {
            anyhow::bail!("Command does not produce a report");
        }
    }

    Ok(())
}

// ========================
// Argument parsing
// ========================

fn parse_month(input: Option<&str>, today: NaiveDate) -> Result<YearMonth, AppError> {
    match input {
        Some(s) => Ok(s.parse()?),
        None => Ok(YearMonth::of(today)),
    }
}

fn parse_date_or(input: Option<&str>, today: NaiveDate) -> Result<NaiveDate, AppError> {
    match input {
        Some(s) => Ok(parse_iso_date(s)?),
        None => Ok(today),
    }
}

/// Parse repeated `YYYY-MM=PRICE` arguments.
fn parse_manual_prices(inputs: &[String]) -> Result<BTreeMap<YearMonth, Decimal>, AppError> {
    inputs
        .iter()
        .map(|input| {
            let invalid = || AppError::InvalidManualPrice(input.clone());
            let (month, price) = input.split_once('=').ok_or_else(invalid)?;
            let month: YearMonth = month.parse().map_err(|_| invalid())?;
            let price = Decimal::from_str(price.trim()).map_err(|_| invalid())?;
            if price.is_sign_negative() {
                return Err(invalid());
            }
            Ok((month, price))
        })
        .collect()
}

// ========================
// Table output
// ========================

fn format_cell(cell: &Cell) -> String {
    let marker = cell.variance.map(|v| v.marker()).unwrap_or(" ");
    let overridden = if cell.overridden { "*" } else { " " };
    format!("{}{}{}", format_money(cell.value), marker, overridden)
}

fn print_branch_table(table: &BranchTable) {
    let width = 10 + 18 * (table.branches.len() + 1);

    print!("{:<10}", "MONTH");
    for branch in &table.branches {
        print!("{:>18}", truncate(&branch.name.to_uppercase(), 16));
    }
    println!("{:>18}", "TOTAL");
    println!("{}", "-".repeat(width));

    for line in &table.months {
        print!("{:<10}", line.month.to_string());
        for cell in &line.cells {
            print!("{:>18}", format_cell(cell));
        }
        println!("{:>18}", format_cell(&line.total));
    }

    println!("{}", "-".repeat(width));
    for average in &table.averages {
        print!("{:<10}", average.label);
        for value in &average.cells {
            print!("{:>16}  ", format_money(*value));
        }
        println!("{:>16}  ", format_money(average.total));
    }
}

fn print_pnl_report(report: &PnlReport) {
    println!("P&L Report - {}", report.month.label());
    println!("Overhead (780): {}", format_money(report.overhead));
    println!();
    print_branch_table(&report.table);

    for detail in &report.details {
        let Some(first) = detail.lines.first() else {
            continue;
        };
        let components: Vec<_> = first.row.components().into_iter().map(|(c, _)| c).collect();

        println!();
        println!("{} - {}", detail.branch.name, detail.raw_material_label);
        print!("{:<10} {:>14}", "MONTH", "TURNOVER");
        for component in &components {
            print!(" {:>14}", component.header());
        }
        println!(" {:>14} {:>14}", "TOTAL EXP.", "P&L");
        println!("{}", "-".repeat(10 + 15 * (components.len() + 3)));

        for line in &detail.lines {
            print!(
                "{:<10} {:>14}",
                line.row.month.to_string(),
                format_money(line.row.turnover)
            );
            for component in &components {
                let value = line.row.component(*component).unwrap_or_default();
                let marker = line.flags.get(component).map(|v| v.marker()).unwrap_or(" ");
                print!(" {:>13}{}", format_money(value), marker);
            }
            println!(
                " {:>14} {:>14}",
                format_money(line.row.total_expenses),
                format_money(line.row.pnl)
            );
        }

        for window in [3, 6] {
            let pick = |a: &TrailingAverages| if window == 3 { a.last_3m } else { a.last_6m };
            print!(
                "{:<10} {:>14}",
                average_label(window),
                format_money(pick(&detail.turnover_averages))
            );
            for component in &components {
                let value = detail.averages.get(component).map(pick).unwrap_or_default();
                print!(" {:>13} ", format_money(value));
            }
            println!(" {:>14} {:>14}", "", format_money(pick(&detail.pnl_averages)));
        }
    }
}

fn print_category_report(report: &CategoryReport) {
    println!("{} - {}", report.category.title(), report.month.label());
    println!();
    print_branch_table(&report.table);
    if report
        .table
        .months
        .iter()
        .any(|l| l.cells.iter().any(|c| c.overridden))
    {
        println!();
        println!("* manually overridden value");
    }
}

fn print_raw_materials_report(report: &RawMaterialsReport) {
    println!("Raw Materials - {}", report.month.label());
    println!();
    println!(
        "{:<10} {:>12} {:>16} {:>12} {:>16} {:>10} {:>16}",
        "MONTH", "A (KG)", "A COST", "B (KG)", "B COST", report.fx_currency, "TOTAL"
    );
    println!("{}", "-".repeat(100));

    for line in &report.months {
        let rate = line
            .fx_rate
            .map(|r| r.round_dp(4).to_string())
            .unwrap_or_else(|| "-".to_string());
        let manual = if line.manual_price.is_some() { "m" } else { " " };
        println!(
            "{:<10} {:>12} {:>16} {:>12} {:>16} {:>10} {:>15}{}",
            line.month.to_string(),
            format_money(line.branch_a.consumed),
            format_money(line.branch_a.cost_of_consumed),
            format_money(line.branch_b.consumed),
            format_money(line.branch_b.cost_of_consumed),
            rate,
            format_money(line.total_cost),
            manual
        );
    }

    println!("{}", "-".repeat(100));
    println!(
        "{:<10} {:>12} {:>16} {:>12} {:>16} {:>10} {:>15}",
        "L3MA",
        format_money(report.l3ma_kg_a),
        format_money(report.l3ma_branch_a),
        format_money(report.l3ma_kg_b),
        format_money(report.l3ma_branch_b),
        report.l3ma_fx_rate.round_dp(4).to_string(),
        format_money(report.l3ma_total)
    );
}

fn print_live_line(code: &str, label: &str, figures: &LiveFigures) {
    println!(
        "{:<12} {:<30} {:>14} {:>14} {:>14}",
        code,
        truncate(label, 30),
        format_money(figures.current),
        format_money(figures.last_3m),
        format_money(figures.last_6m)
    );
}

fn print_live_snapshot(snapshot: &LiveSnapshot) {
    println!(
        "{} - live as of {}",
        snapshot.branch.name,
        snapshot.as_of.format("%Y-%m-%d")
    );
    println!();
    println!(
        "{:<12} {:<30} {:>14} {:>14} {:>14}",
        "ACCOUNT", "NAME", "CURRENT", "L3M AVG", "L6M AVG"
    );
    println!("{}", "-".repeat(88));

    for group in &snapshot.expense_groups {
        for line in &group.lines {
            print_live_line(line.code.as_deref().unwrap_or(""), &line.label, &line.figures);
        }
        print_live_line(&group.group, "Subtotal", &group.subtotal);
        println!();
    }
    print_live_line("", "Expenses total", &snapshot.expense_total);
    println!("{}", "-".repeat(88));

    for line in &snapshot.purchase_lines {
        print_live_line("", &line.label, &line.figures);
        if let Some(quantity) = line.quantity {
            println!("{:<12} {:<30} {:>14}", "", "  consumed (kg)", format_money(quantity));
        }
    }
    println!(
        "{:<12} {:<30} {:>14}",
        "",
        "Expenses (6M avg estimate)",
        format_money(snapshot.expense_estimate)
    );
    println!("{}", "-".repeat(88));
    print_live_line("", "Turnover", &snapshot.turnover);
    print_live_line("", "Total", &snapshot.total);
    print_live_line("", "Profit", &snapshot.profit);
}

fn print_fx_rates(rates: &FxRates) {
    println!("Average {} rates since {}", rates.currency, rates.since);
    println!();
    println!("{:<10} {:>12}", "MONTH", "RATE");
    println!("{}", "-".repeat(23));
    for line in &rates.months {
        println!("{:<10} {:>12}", line.month.to_string(), line.rate.round_dp(4));
    }
}

fn print_panel<T>(title: &str, panel: &Panel<T>, render: impl Fn(&T)) {
    println!();
    println!("=== {} ===", title);
    match panel {
        Panel::Ready { data } => render(data),
        Panel::Failed { message } => println!("  [failed] {}", message),
    }
}

fn print_dashboard(dashboard: &Dashboard) {
    println!("Dashboard - {}", dashboard.month.label());

    print_panel("P&L", &dashboard.pnl, |r| print_branch_table(&r.table));
    print_panel("Income", &dashboard.income, |r| print_branch_table(&r.table));
    for (category, panel) in &dashboard.expenses {
        print_panel(&format!("Expense {}", category), panel, |r| {
            print_branch_table(&r.table)
        });
    }
    print_panel("Raw Materials", &dashboard.raw_materials, print_raw_materials_report);
    print_panel("FX Rates", &dashboard.fx_rates, print_fx_rates);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
