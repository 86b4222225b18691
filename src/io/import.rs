use std::io::Read;
use std::str::FromStr;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{
    parse_iso_date, parse_money, Account, ExchangeRate, LedgerLine, StockMovement,
};
use crate::storage::Repository;

/// Which snapshot table a CSV file feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Ledger,
    Accounts,
    Stock,
    Rates,
}

impl FromStr for ImportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ledger" => Ok(ImportKind::Ledger),
            "accounts" => Ok(ImportKind::Accounts),
            "stock" => Ok(ImportKind::Stock),
            "rates" => Ok(ImportKind::Rates),
            _ => Err(format!(
                "Invalid import type '{}'. Valid types: ledger, accounts, stock, rates",
                s
            )),
        }
    }
}

/// Result of an import operation
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<ImportError>,
}

/// A rejected CSV line
#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    pub line: usize,
    pub field: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    pub dry_run: bool,
}

// Raw CSV rows. Amounts stay text until validated so that decimal values
// are parsed exactly.

#[derive(Debug, Deserialize)]
struct LedgerRecord {
    trans_id: i64,
    account: String,
    short_name: Option<String>,
    contra_account: Option<String>,
    branch_id: Option<i64>,
    debit: String,
    credit: String,
    ref_date: String,
    trans_type: i64,
    source_line: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    code: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StockRecord {
    item_code: String,
    item_group: i64,
    branch_id: Option<i64>,
    trans_type: i64,
    doc_date: String,
    out_qty: String,
    price: String,
    currency: String,
    rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateRecord {
    currency: String,
    rate_date: String,
    rate: String,
}

type FieldError = (&'static str, String);

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn decimal_field(field: &'static str, value: &str) -> Result<Decimal, FieldError> {
    Decimal::from_str(value.trim()).map_err(|e| (field, format!("Invalid number '{}': {}", value, e)))
}

fn money_field(field: &'static str, value: &str) -> Result<Decimal, FieldError> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_money(value).map_err(|e| (field, format!("Invalid amount '{}': {}", value, e)))
}

fn date_field(field: &'static str, value: &str) -> Result<chrono::NaiveDate, FieldError> {
    parse_iso_date(value).map_err(|e| (field, e.to_string()))
}

fn required(field: &'static str, value: &str) -> Result<String, FieldError> {
    let value = value.trim();
    if value.is_empty() {
        return Err((field, "Value is required".to_string()));
    }
    Ok(value.to_string())
}

fn convert_ledger(record: LedgerRecord) -> Result<LedgerLine, FieldError> {
    let debit = money_field("debit", &record.debit)?;
    let credit = money_field("credit", &record.credit)?;
    if debit.is_sign_negative() || credit.is_sign_negative() {
        return Err(("debit", "Debit and credit must not be negative".to_string()));
    }

    Ok(LedgerLine {
        trans_id: record.trans_id,
        account: required("account", &record.account)?,
        short_name: non_empty(record.short_name),
        contra_account: non_empty(record.contra_account),
        branch_id: record.branch_id,
        debit,
        credit,
        ref_date: date_field("ref_date", &record.ref_date)?,
        trans_type: record.trans_type,
        source_line: record.source_line,
    })
}

fn convert_account(record: AccountRecord) -> Result<Account, FieldError> {
    Ok(Account {
        code: required("code", &record.code)?,
        name: record.name.trim().to_string(),
    })
}

fn convert_stock(record: StockRecord) -> Result<StockMovement, FieldError> {
    Ok(StockMovement {
        item_code: required("item_code", &record.item_code)?,
        item_group: record.item_group,
        branch_id: record.branch_id,
        trans_type: record.trans_type,
        doc_date: date_field("doc_date", &record.doc_date)?,
        out_qty: decimal_field("out_qty", &record.out_qty)?,
        price: decimal_field("price", &record.price)?,
        currency: required("currency", &record.currency)?.to_uppercase(),
        rate: non_empty(record.rate)
            .map(|r| decimal_field("rate", &r))
            .transpose()?,
    })
}

fn convert_rate(record: RateRecord) -> Result<ExchangeRate, FieldError> {
    let rate = decimal_field("rate", &record.rate)?;
    if rate <= Decimal::ZERO {
        return Err(("rate", format!("Rate must be positive, got {}", rate)));
    }
    Ok(ExchangeRate {
        currency: required("currency", &record.currency)?.to_uppercase(),
        rate_date: date_field("rate_date", &record.rate_date)?,
        rate,
    })
}

/// Parse every row, keeping the valid ones and an error per rejected line.
fn parse_rows<R, Raw, T>(
    reader: R,
    convert: impl Fn(Raw) -> Result<T, FieldError>,
) -> (Vec<T>, Vec<ImportError>)
where
    R: Read,
    Raw: DeserializeOwned,
{
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (index, result) in csv_reader.deserialize::<Raw>().enumerate() {
        let line = index + 2; // header is line 1
        match result {
            Ok(raw) => match convert(raw) {
                Ok(row) => rows.push(row),
                Err((field, error)) => errors.push(ImportError {
                    line,
                    field: Some(field.to_string()),
                    error,
                }),
            },
            Err(e) => errors.push(ImportError {
                line,
                field: None,
                error: format!("CSV parse error: {}", e),
            }),
        }
    }

    (rows, errors)
}

/// Loads ERP snapshot exports into the reporting database.
pub struct Importer<'a> {
    repo: &'a Repository,
}

impl<'a> Importer<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub async fn import_csv<R: Read>(
        &self,
        kind: ImportKind,
        reader: R,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let dry_run = options.dry_run;
        let (imported, errors) = match kind {
            ImportKind::Ledger => {
                let (rows, errors) = parse_rows(reader, convert_ledger);
                let imported = if dry_run {
                    rows.len()
                } else {
                    self.repo.save_ledger_lines(&rows).await?
                };
                (imported, errors)
            }
            ImportKind::Accounts => {
                let (rows, errors) = parse_rows(reader, convert_account);
                let imported = if dry_run {
                    rows.len()
                } else {
                    self.repo.save_accounts(&rows).await?
                };
                (imported, errors)
            }
            ImportKind::Stock => {
                let (rows, errors) = parse_rows(reader, convert_stock);
                let imported = if dry_run {
                    rows.len()
                } else {
                    self.repo.save_stock_movements(&rows).await?
                };
                (imported, errors)
            }
            ImportKind::Rates => {
                let (rows, errors) = parse_rows(reader, convert_rate);
                let imported = if dry_run {
                    rows.len()
                } else {
                    self.repo.save_exchange_rates(&rows).await?
                };
                (imported, errors)
            }
        };
        let result = ImportResult {
            imported,
            skipped: errors.len(),
            errors,
        };

        if !result.errors.is_empty() {
            warn!(?kind, rejected = result.errors.len(), "Rejected CSV rows");
        }
        info!(?kind, imported = result.imported, dry_run = options.dry_run, "Import finished");
        Ok(result)
    }
}
