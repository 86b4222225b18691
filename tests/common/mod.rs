// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use pnlboard::application::{ReportSettings, ReportingService};
use pnlboard::domain::{
    ExchangeRate, LedgerLine, Money, PnlRules, StockMovement, YearMonth, CONSUMPTION_TRANS_TYPE,
    RAW_MATERIAL_ITEM_GROUP,
};
use pnlboard::Repository;
use rust_decimal::Decimal;
use tempfile::TempDir;

/// Helper to create a repository over a temporary database
pub async fn test_repo() -> Result<(Repository, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let repo = Repository::create(db_path.to_str().unwrap()).await?;
    Ok((repo, temp_dir))
}

/// Reporting service with default rules over `repo`
pub fn service_over(repo: Repository) -> ReportingService {
    service_with_rules(repo, PnlRules::default())
}

pub fn service_with_rules(repo: Repository, rules: PnlRules) -> ReportingService {
    ReportingService::new(Arc::new(repo), rules, ReportSettings::default())
}

pub fn parse_date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

pub fn month(s: &str) -> YearMonth {
    s.parse().unwrap()
}

/// A plain ledger line; adjust the optional fields on the returned value.
pub fn line(account: &str, branch: i64, debit: Money, credit: Money, date: &str) -> LedgerLine {
    LedgerLine {
        trans_id: 1,
        account: account.to_string(),
        short_name: None,
        contra_account: None,
        branch_id: Some(branch),
        debit,
        credit,
        ref_date: parse_date(date),
        trans_type: 1,
        source_line: None,
    }
}

/// A supplier posting as booked by purchase invoices.
pub fn supplier_line(
    short_name: &str,
    trans_type: i64,
    debit: Money,
    credit: Money,
    date: &str,
) -> LedgerLine {
    LedgerLine {
        short_name: Some(short_name.to_string()),
        trans_type,
        branch_id: None,
        ..line("320-01-0001", 1, debit, credit, date)
    }
}

pub fn consumption(
    branch: i64,
    qty: Decimal,
    price: Decimal,
    currency: &str,
    rate: Option<Decimal>,
    date: &str,
) -> StockMovement {
    StockMovement {
        item_code: "RM-100".to_string(),
        item_group: RAW_MATERIAL_ITEM_GROUP,
        branch_id: Some(branch),
        trans_type: CONSUMPTION_TRANS_TYPE,
        doc_date: parse_date(date),
        out_qty: qty,
        price,
        currency: currency.to_string(),
        rate,
    }
}

pub fn rate(currency: &str, date: &str, rate: Decimal) -> ExchangeRate {
    ExchangeRate {
        currency: currency.to_string(),
        rate_date: parse_date(date),
        rate,
    }
}
