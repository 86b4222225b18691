mod common;

use anyhow::Result;
use common::{consumption, line, month, parse_date, rate, supplier_line, test_repo};
use pnlboard::application::AggregateSource;
use pnlboard::domain::{
    Account, BranchId, BranchSet, DateRange, ExpenseCategory, Money, SpecialtyPurchase,
    REVERSAL_SOURCE_LINE, VOIDED_TRANS_TYPE,
};
use rust_decimal_macros::dec;

fn march() -> DateRange {
    month("2025-03").range()
}

#[tokio::test]
async fn test_net_income_subtracts_discounts_and_skips_excluded_lines() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    let mut voided = line("600-01-001", 1, dec!(0), dec!(999), "2025-03-10");
    voided.trans_type = VOIDED_TRANS_TYPE;
    let mut reversal = line("602-01-001", 1, dec!(0), dec!(777), "2025-03-10");
    reversal.source_line = Some(REVERSAL_SOURCE_LINE);
    let mut other_source = line("602-01-001", 1, dec!(0), dec!(25), "2025-03-11");
    other_source.source_line = Some(5);

    repo.save_ledger_lines(&[
        line("600-01-001", 1, dec!(0), dec!(1000), "2025-03-05"),
        line("601-01-002", 1, dec!(0), dec!(500), "2025-03-31"),
        line("610-01-001", 1, dec!(100), dec!(0), "2025-03-01"),
        other_source,
        voided,
        reversal,
        // outside the month
        line("600-01-001", 1, dec!(0), dec!(50), "2025-04-01"),
        line("600-01-001", 1, dec!(0), dec!(60), "2025-02-28"),
        // not an income prefix
        line("600-02-001", 1, dec!(0), dec!(10000), "2025-03-05"),
        line("602-01-003", 3, dec!(250), dec!(2000), "2025-03-15"),
        line("612-01-001", 3, dec!(50), dec!(0), "2025-03-15"),
        // untracked branch
        line("600-01-001", 2, dec!(0), dec!(5000), "2025-03-15"),
    ])
    .await?;

    let income = repo.net_income(&BranchSet::all(), march()).await?;

    assert_eq!(income.get(BranchId::A), dec!(1425));
    assert_eq!(income.get(BranchId::B), dec!(1700));
    assert_eq!(income.get(BranchId::C), Money::ZERO);
    assert_eq!(income.iter().count(), 3);

    Ok(())
}

#[tokio::test]
async fn test_expense_total_by_prefix_and_branch_subset() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    let mut voided = line("720-01-001", 3, dec!(400), dec!(0), "2025-03-10");
    voided.trans_type = VOIDED_TRANS_TYPE;

    repo.save_ledger_lines(&[
        line("720-01-001", 3, dec!(300), dec!(20), "2025-03-03"),
        line("720-02-009", 3, dec!(100), dec!(0), "2025-03-04"),
        line("730-01-001", 3, dec!(999), dec!(0), "2025-03-04"),
        line("720-01-001", 1, dec!(70), dec!(0), "2025-03-04"),
        voided,
    ])
    .await?;

    let branches = BranchSet::parse("3")?;
    let e720 = repo
        .expense_total(ExpenseCategory::E720, &branches, march())
        .await?;

    assert_eq!(e720.get(BranchId::B), dec!(380));
    assert_eq!(e720.iter().count(), 1);

    let json = serde_json::to_value(&e720)?;
    assert_eq!(json["3"], serde_json::json!(380.0));
    assert!(json.get("1").is_none());

    let e730 = repo
        .expense_total(ExpenseCategory::E730, &BranchSet::all(), march())
        .await?;
    assert_eq!(e730.get(BranchId::B), dec!(999));
    assert_eq!(e730.get(BranchId::A), Money::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_specialty_purchases_are_branch_a_only() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    let mut tray = line("153-01-0004", 1, dec!(1000), dec!(0), "2025-03-05");
    tray.trans_type = 18;
    let mut tray_memo = line("153-01-0004", 1, dec!(400), dec!(0), "2025-03-06");
    tray_memo.trans_type = 19;
    let mut roll_transfer = supplier_line("T013833", 1, dec!(0), dec!(600), "2025-03-08");
    roll_transfer.contra_account = Some("891-01-0001".to_string());
    let other_contra = supplier_line("T013833", 18, dec!(0), dec!(9999), "2025-03-08");

    repo.save_ledger_lines(&[
        tray,
        tray_memo,
        supplier_line("T012274", 18, dec!(0), dec!(1200), "2025-03-07"),
        roll_transfer,
        other_contra,
        supplier_line("T010748", 18, dec!(0), dec!(2400), "2025-03-09"),
        supplier_line("T010748", 19, dec!(120), dec!(0), "2025-03-20"),
        supplier_line("T010748", 1, dec!(0), dec!(5000), "2025-03-20"),
    ])
    .await?;

    let all = BranchSet::all();
    let tray = repo
        .specialty_purchases(SpecialtyPurchase::Tray, &all, march())
        .await?;
    let roll = repo
        .specialty_purchases(SpecialtyPurchase::Roll, &all, march())
        .await?;
    let pad = repo
        .specialty_purchases(SpecialtyPurchase::Pad, &all, march())
        .await?;

    assert_eq!(tray.get(BranchId::A), dec!(1000));
    assert_eq!(roll.get(BranchId::A), dec!(1500));
    assert_eq!(pad.get(BranchId::A), dec!(1900));
    assert_eq!(roll.get(BranchId::B), Money::ZERO);
    assert_eq!(roll.get(BranchId::C), Money::ZERO);

    let without_a = BranchSet::parse("3,4")?;
    let roll = repo
        .specialty_purchases(SpecialtyPurchase::Roll, &without_a, march())
        .await?;
    assert_eq!(roll.total(), Money::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_direct_raw_material_for_branch_c() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    repo.save_ledger_lines(&[
        line("620-01-001", 4, dec!(5000), dec!(0), "2025-03-05"),
        line("895-01-002", 4, dec!(1000), dec!(200), "2025-03-06"),
        line("620-02-001", 4, dec!(777), dec!(0), "2025-03-06"),
        line("620-01-001", 1, dec!(3000), dec!(0), "2025-03-05"),
    ])
    .await?;

    let direct = repo.direct_raw_material(&BranchSet::all(), march()).await?;
    assert_eq!(direct.get(BranchId::C), dec!(5800));
    assert_eq!(direct.get(BranchId::A), Money::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_raw_material_consumption_converts_foreign_lots() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    let mut other_group = consumption(1, dec!(10), dec!(1), "TRY", None, "2025-03-05");
    other_group.item_group = 112;
    let mut receipt = consumption(1, dec!(10), dec!(1), "TRY", None, "2025-03-05");
    receipt.trans_type = 20;

    repo.save_stock_movements(&[
        consumption(1, dec!(100), dec!(2), "USD", Some(dec!(30)), "2025-03-02"),
        consumption(1, dec!(50), dec!(40), "TRY", None, "2025-03-20"),
        consumption(1, dec!(12.5), dec!(2), "USD", None, "2025-03-21"),
        consumption(3, dec!(10), dec!(3), "TRY", None, "2025-03-31"),
        consumption(3, dec!(10), dec!(3), "TRY", None, "2025-04-01"),
        other_group,
        receipt,
    ])
    .await?;

    let totals = repo
        .raw_material_consumption(&BranchSet::all(), march(), "TRY")
        .await?;

    assert_eq!(totals[&BranchId::A].consumed, dec!(162.5));
    assert_eq!(totals[&BranchId::A].cost_of_consumed, dec!(8000));
    assert_eq!(totals[&BranchId::B].consumed, dec!(10));
    assert_eq!(totals[&BranchId::B].cost_of_consumed, dec!(30));
    assert_eq!(totals[&BranchId::C].consumed, Money::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_average_rates_by_month() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    repo.save_exchange_rates(&[
        rate("USD", "2024-12-31", dec!(30)),
        rate("USD", "2025-01-02", dec!(35)),
        rate("USD", "2025-01-03", dec!(36)),
        rate("USD", "2025-02-03", dec!(37.25)),
        rate("EUR", "2025-01-02", dec!(40)),
    ])
    .await?;

    let averages = repo
        .average_rates("USD", parse_date("2025-01-01"))
        .await?;

    assert_eq!(averages.len(), 2);
    assert_eq!(averages[&month("2025-01")], dec!(35.5));
    assert_eq!(averages[&month("2025-02")], dec!(37.25));

    Ok(())
}

#[tokio::test]
async fn test_expense_accounts_by_month_with_names() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    repo.save_accounts(&[Account {
        code: "720-01-001".to_string(),
        name: "Salaries".to_string(),
    }])
    .await?;
    repo.save_ledger_lines(&[
        line("720-01-001", 3, dec!(100), dec!(0), "2025-02-10"),
        line("720-01-001", 3, dec!(150), dec!(0), "2025-03-10"),
        line("720-01-001", 3, dec!(50), dec!(0), "2025-03-11"),
        line("770-01-005", 3, dec!(40), dec!(0), "2025-03-11"),
        line("780-01-001", 3, dec!(40), dec!(0), "2025-03-11"),
        line("720-01-001", 1, dec!(1), dec!(0), "2025-03-11"),
    ])
    .await?;

    let range = DateRange::new(parse_date("2025-02-01"), parse_date("2025-03-31"))?;
    let totals = repo.expense_accounts_by_month(BranchId::B, range).await?;

    assert_eq!(totals.len(), 3);
    assert_eq!(totals[0].account_name, "Salaries");
    assert_eq!(totals[0].month, month("2025-02"));
    assert_eq!(totals[1].amount, dec!(200));
    assert_eq!(totals[2].account, "770-01-005");
    // no name on file
    assert_eq!(totals[2].account_name, "770-01-005");
    assert_eq!(totals[2].group(), "770");

    Ok(())
}

#[tokio::test]
async fn test_empty_ledger_reads_as_zero() -> Result<()> {
    let (repo, _temp) = test_repo().await?;

    let income = repo.net_income(&BranchSet::all(), march()).await?;
    assert_eq!(income.iter().count(), 3);
    assert_eq!(income.total(), Money::ZERO);

    let stats = repo.snapshot_stats().await?;
    assert_eq!(stats.ledger_lines, 0);
    assert_eq!(stats.first_ref_date, None);

    Ok(())
}
