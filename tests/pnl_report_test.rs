mod common;

use std::collections::BTreeMap;

use anyhow::Result;
use common::{
    consumption, line, month, parse_date, rate, service_over, service_with_rules, test_repo,
};
use pnlboard::application::{CategoryKind, QueryKind, QueryResult};
use pnlboard::config::Config;
use pnlboard::domain::{
    Account, BranchId, BranchSet, DateRange, ExpenseCategory, LedgerLine, Money, PnlComponent,
    Variance, YearMonth,
};
use pnlboard::io::write_live_snapshot_csv;
use pnlboard::Repository;
use rust_decimal_macros::dec;

/// Branch B books 1,000,000 turnover and 100,000 of 720 expenses every
/// month from January to August 2025; July's 720 is doubled.
async fn seed_branch_b(repo: &Repository) -> Result<()> {
    let mut lines: Vec<LedgerLine> = Vec::new();
    for m in month("2025-08").trailing(8) {
        let day = format!("{}-15", m);
        let expense = if m == month("2025-07") {
            dec!(200000)
        } else {
            dec!(100000)
        };
        lines.push(line("600-01-001", 3, dec!(0), dec!(1000000), &day));
        lines.push(line("720-01-001", 3, expense, dec!(0), &day));
    }
    repo.save_ledger_lines(&lines).await?;
    Ok(())
}

#[tokio::test]
async fn test_pnl_report_rows_and_totals() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    seed_branch_b(&repo).await?;
    let service = service_over(repo);

    let report = service.pnl_report(month("2025-08"), 8).await?;

    assert_eq!(report.table.months.len(), 8);
    assert_eq!(report.table.months[0].month, month("2025-08"));
    assert_eq!(report.table.months[7].month, month("2025-01"));

    // Columns follow branch order A, B, C
    let august = &report.table.months[0];
    assert_eq!(august.cells[0].value, dec!(-350000));
    assert_eq!(august.cells[1].value, dec!(550000));
    assert_eq!(august.cells[2].value, dec!(-350000));
    assert_eq!(august.total.value, dec!(-150000));

    let detail = report
        .details
        .iter()
        .find(|d| d.branch.id == BranchId::B)
        .unwrap();
    assert_eq!(detail.raw_material_label, "Raw Mat. (+20%)");
    let row = &detail.lines[0].row;
    assert_eq!(row.turnover, dec!(1000000));
    assert_eq!(row.expense720, dec!(100000));
    assert_eq!(row.expense780, dec!(350000));
    assert_eq!(row.total_expenses, dec!(450000));
    assert!(row.specialty_purchases.is_none());

    let branch_a = report
        .details
        .iter()
        .find(|d| d.branch.id == BranchId::A)
        .unwrap();
    assert!(branch_a.lines[0].row.specialty_purchases.is_some());

    Ok(())
}

#[tokio::test]
async fn test_pnl_report_averages_and_highlights() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    seed_branch_b(&repo).await?;
    let service = service_over(repo);

    let report = service.pnl_report(month("2025-08"), 8).await?;

    // Months -2..-4 (Jun, May, Apr) all show 550,000
    let l3ma = &report.table.averages[0];
    assert_eq!(l3ma.label, "L3MA");
    assert_eq!(l3ma.cells[1], dec!(550000));
    let l6ma = &report.table.averages[1];
    assert_eq!(l6ma.cells[1], dec!(550000));

    // July's P&L of 450,000 is below 0.85 x 550,000
    let july = &report.table.months[1];
    assert_eq!(july.cells[1].value, dec!(450000));
    assert_eq!(july.cells[1].variance, Some(Variance::Low));
    assert_eq!(report.table.months[0].cells[1].variance, None);

    let detail = report
        .details
        .iter()
        .find(|d| d.branch.id == BranchId::B)
        .unwrap();
    assert_eq!(
        detail.lines[1].flags.get(&PnlComponent::Expense720),
        Some(&Variance::High)
    );
    assert!(detail.lines[0].flags.is_empty());
    assert_eq!(
        detail.averages[&PnlComponent::Expense720].last_3m,
        dec!(100000)
    );
    assert_eq!(detail.turnover_averages.last_6m, dec!(1000000));

    Ok(())
}

#[tokio::test]
async fn test_short_pnl_report_keeps_history_for_averages() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    seed_branch_b(&repo).await?;
    let service = service_over(repo);

    let report = service.pnl_report(month("2025-08"), 3).await?;

    assert_eq!(report.table.months.len(), 3);
    assert_eq!(report.table.averages[0].cells[1], dec!(550000));
    // three displayed months never highlight
    assert!(report
        .table
        .months
        .iter()
        .all(|m| m.cells.iter().all(|c| c.variance.is_none())));

    Ok(())
}

#[tokio::test]
async fn test_category_report_applies_overrides() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_ledger_lines(&[
        line("780-01-001", 1, dec!(1000), dec!(0), "2025-06-10"),
        line("780-01-001", 3, dec!(0), dec!(400), "2025-06-11"),
        line("780-01-001", 1, dec!(900), dec!(0), "2025-05-10"),
    ])
    .await?;

    let config = Config::parse(
        r#"
        [[overrides]]
        category = "780"
        month = "2025-06"
        action = "negate"
        "#,
    )?;
    let service = service_with_rules(repo, config.to_pnl_rules());

    let report = service
        .category_report(CategoryKind::Expense(ExpenseCategory::E780), month("2025-06"), 2)
        .await?;

    let june = &report.table.months[0];
    assert_eq!(june.cells[0].value, dec!(-1000));
    assert!(june.cells[0].overridden);
    assert_eq!(june.cells[1].value, dec!(-400));
    assert!(june.total.overridden);

    let may = &report.table.months[1];
    assert_eq!(may.cells[0].value, dec!(900));
    assert!(!may.cells[0].overridden);

    Ok(())
}

#[tokio::test]
async fn test_overrides_reach_pnl_ledger_expenses() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_ledger_lines(&[line("730-01-001", 4, dec!(5000), dec!(0), "2025-02-10")])
        .await?;

    let config = Config::parse(
        r#"
        [[overrides]]
        branch = 4
        category = "730"
        month = "2025-02"
        action = "zero"
        "#,
    )?;
    let service = service_with_rules(repo, config.to_pnl_rules());

    let rows = service.monthly_rows(month("2025-02")).await?;
    let branch_c = rows.iter().find(|r| r.branch == BranchId::C).unwrap();
    assert_eq!(branch_c.expense730, Money::ZERO);
    assert_eq!(branch_c.total_expenses, dec!(350000));

    Ok(())
}

#[tokio::test]
async fn test_raw_materials_report_with_manual_price() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_stock_movements(&[
        consumption(1, dec!(100), dec!(2), "USD", Some(dec!(30)), "2025-03-05"),
        consumption(3, dec!(50), dec!(40), "TRY", None, "2025-03-06"),
        consumption(1, dec!(10), dec!(100), "TRY", None, "2025-02-06"),
    ])
    .await?;
    repo.save_exchange_rates(&[
        rate("USD", "2025-03-03", dec!(37)),
        rate("USD", "2025-03-04", dec!(39)),
    ])
    .await?;
    let service = service_over(repo);

    let mut prices: BTreeMap<YearMonth, _> = BTreeMap::new();
    prices.insert(month("2025-03"), dec!(2.5));

    let report = service
        .raw_materials_report(month("2025-03"), 2, &prices)
        .await?;

    assert_eq!(report.months.len(), 2);
    let march = &report.months[0];
    assert_eq!(march.fx_rate, Some(dec!(38)));
    assert_eq!(march.branch_a.cost_of_consumed, dec!(9500));
    assert_eq!(march.branch_b.cost_of_consumed, dec!(4750));
    assert_eq!(march.total_cost, dec!(14250));

    let february = &report.months[1];
    assert_eq!(february.manual_price, None);
    assert_eq!(february.fx_rate, None);
    assert_eq!(february.branch_a.cost_of_consumed, dec!(1000));

    Ok(())
}

#[tokio::test]
async fn test_raw_materials_l3ma_covers_kg_and_rate() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_stock_movements(&[
        consumption(1, dec!(30), dec!(1), "TRY", None, "2025-04-10"),
        consumption(1, dec!(60), dec!(1), "TRY", None, "2025-03-10"),
        consumption(1, dec!(90), dec!(1), "TRY", None, "2025-02-10"),
        consumption(3, dec!(10), dec!(1), "TRY", None, "2025-04-10"),
        consumption(3, dec!(10), dec!(1), "TRY", None, "2025-03-10"),
        consumption(3, dec!(10), dec!(1), "TRY", None, "2025-02-10"),
        // month -1 stays out of the average
        consumption(1, dec!(999), dec!(1), "TRY", None, "2025-05-10"),
    ])
    .await?;
    repo.save_exchange_rates(&[
        rate("USD", "2025-04-01", dec!(30)),
        rate("USD", "2025-03-01", dec!(36)),
        rate("USD", "2025-02-01", dec!(39)),
    ])
    .await?;
    let service = service_over(repo);

    let report = service
        .raw_materials_report(month("2025-06"), 6, &BTreeMap::new())
        .await?;

    assert_eq!(report.l3ma_kg_a, dec!(60));
    assert_eq!(report.l3ma_kg_b, dec!(10));
    assert_eq!(report.l3ma_fx_rate, dec!(35));
    assert_eq!(report.l3ma_branch_a, dec!(60));
    assert_eq!(report.l3ma_total, dec!(70));

    Ok(())
}

#[tokio::test]
async fn test_live_snapshot_groups_accounts() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_accounts(&[Account {
        code: "720-01-001".to_string(),
        name: "Salaries".to_string(),
    }])
    .await?;

    let mut lines = Vec::new();
    for m in month("2025-07").trailing(7) {
        let day = format!("{}-10", m);
        lines.push(line("720-01-001", 3, dec!(600), dec!(0), &day));
        lines.push(line("730-01-002", 3, dec!(60), dec!(0), &day));
        lines.push(line("600-01-001", 3, dec!(0), dec!(5000), &day));
    }
    lines.push(line("720-01-001", 3, dec!(300), dec!(0), "2025-08-05"));
    // after the as-of date
    lines.push(line("720-01-001", 3, dec!(9999), dec!(0), "2025-08-20"));
    repo.save_ledger_lines(&lines).await?;
    repo.save_stock_movements(&[consumption(
        3,
        dec!(10),
        dec!(50),
        "TRY",
        None,
        "2025-08-02",
    )])
    .await?;
    let service = service_over(repo);

    let snapshot = service
        .live_snapshot(BranchId::B, parse_date("2025-08-15"))
        .await?;

    assert_eq!(snapshot.month, month("2025-08"));
    assert_eq!(snapshot.expense_groups.len(), 2);

    let salaries = &snapshot.expense_groups[0];
    assert_eq!(salaries.group, "720");
    assert_eq!(salaries.lines[0].label, "Salaries");
    assert_eq!(salaries.lines[0].figures.current, dec!(300));
    assert_eq!(salaries.lines[0].figures.last_3m, dec!(600));
    assert_eq!(salaries.lines[0].figures.last_6m, dec!(600));
    assert_eq!(salaries.subtotal.current, dec!(300));

    let other = &snapshot.expense_groups[1];
    assert_eq!(other.lines[0].label, "730-01-002");
    assert_eq!(snapshot.expense_total.last_6m, dec!(660));
    assert_eq!(snapshot.expense_estimate, dec!(660));

    // Branch B: raw material at +20% only
    assert_eq!(snapshot.purchase_lines.len(), 1);
    let raw = &snapshot.purchase_lines[0];
    assert_eq!(raw.label, "Raw Mat. (+20%)");
    assert_eq!(raw.figures.current, dec!(600));
    assert_eq!(raw.quantity, Some(dec!(10)));

    assert_eq!(snapshot.turnover.last_3m, dec!(5000));
    assert_eq!(snapshot.total.current, dec!(600) + dec!(660));

    // no August income booked yet; earlier months earn 5,000 against 660
    assert_eq!(snapshot.profit.current, dec!(-1260));
    assert_eq!(snapshot.profit.last_3m, dec!(4340));
    assert_eq!(snapshot.profit.last_6m, dec!(4340));

    let mut out = Vec::new();
    write_live_snapshot_csv(&snapshot, &mut out)?;
    let text = String::from_utf8(out)?;
    let last: Vec<&str> = text.lines().last().unwrap().split(',').collect();
    assert_eq!(&last[..3], &["summary", "", "profit"]);
    let current: rust_decimal::Decimal = last[3].parse()?;
    assert_eq!(current, dec!(-1260));

    Ok(())
}

#[tokio::test]
async fn test_fx_rates_lookback() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_exchange_rates(&[
        rate("USD", "2024-11-28", dec!(33)),
        rate("USD", "2024-12-02", dec!(34)),
        rate("USD", "2025-08-01", dec!(41)),
        rate("USD", "2025-09-01", dec!(42)),
    ])
    .await?;
    let service = service_over(repo);

    let rates = service.fx_rates(parse_date("2025-08-20")).await?;

    assert_eq!(rates.since, parse_date("2024-12-01"));
    assert_eq!(rates.months.len(), 2);
    assert_eq!(rates.months[0].month, month("2025-08"));
    assert_eq!(rates.rate(month("2024-12")), Some(dec!(34)));
    assert_eq!(rates.by_month()["2025-08"], dec!(41));

    Ok(())
}

#[tokio::test]
async fn test_query_results_keyed_by_branch() -> Result<()> {
    let (repo, _temp) = test_repo().await?;
    repo.save_ledger_lines(&[line("600-01-001", 4, dec!(0), dec!(1234.5), "2025-03-05")])
        .await?;
    repo.save_stock_movements(&[consumption(1, dec!(5), dec!(2), "TRY", None, "2025-03-05")])
        .await?;
    let service = service_over(repo);
    let range = DateRange::parse("2025-03-01", "2025-03-31")?;

    let income = service
        .query(QueryKind::Income, &BranchSet::all(), range)
        .await?;
    let json = serde_json::to_value(&income)?;
    assert_eq!(json["4"], serde_json::json!(1234.5));
    assert_eq!(json["1"], serde_json::json!(0.0));

    let raw = service
        .query(QueryKind::RawMaterials, &BranchSet::parse("1")?, range)
        .await?;
    match raw {
        QueryResult::Consumption(totals) => {
            assert_eq!(totals.len(), 1);
            assert_eq!(totals[&BranchId::A].cost_of_consumed, dec!(10));
        }
        QueryResult::Amounts(_) => panic!("expected consumption"),
    }

    Ok(())
}
