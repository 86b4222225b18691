use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

use crate::application::AggregateSource;
use crate::domain::{
    aggregate_consumption, cents_to_money, money_to_cents, monthly_average_rates, Account,
    AccountMonthTotal, BranchAmounts, BranchId, BranchSet, DateRange, ExchangeRate,
    ExpenseCategory, LedgerLine, RawMaterialConsumption, SpecialtyPurchase, StockMovement,
    YearMonth, CONSUMPTION_TRANS_TYPE, DIRECT_RAW_MATERIAL_PREFIXES, RAW_MATERIAL_ITEM_GROUP,
    REVERSAL_SOURCE_LINE, VOIDED_TRANS_TYPE,
};

use super::MIGRATION_001_INITIAL;

/// Row counts per table.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub ledger_lines: i64,
    pub accounts: i64,
    pub stock_movements: i64,
    pub exchange_rates: i64,
    pub first_ref_date: Option<String>,
    pub last_ref_date: Option<String>,
}

/// Repository over the imported ledger snapshot. All aggregate queries are
/// read-only and recomputed on every call.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Create (or upgrade) the database file at `path`.
    pub async fn create(path: &str) -> Result<Self> {
        Self::init(&format!("sqlite:{}?mode=rwc", path)).await
    }

    /// Open an existing database file.
    pub async fn open(path: &str) -> Result<Self> {
        Self::connect(&format!("sqlite:{}", path)).await
    }

    // ========================
    // Snapshot loading
    // ========================

    /// Insert ledger lines in a single transaction.
    pub async fn save_ledger_lines(&self, lines: &[LedgerLine]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO ledger_lines (trans_id, account, short_name, contra_account, branch_id, debit_cents, credit_cents, ref_date, trans_type, source_line)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(line.trans_id)
            .bind(&line.account)
            .bind(&line.short_name)
            .bind(&line.contra_account)
            .bind(line.branch_id)
            .bind(money_to_cents(line.debit)?)
            .bind(money_to_cents(line.credit)?)
            .bind(line.ref_date.format("%Y-%m-%d").to_string())
            .bind(line.trans_type)
            .bind(line.source_line)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save ledger line of transaction {}", line.trans_id))?;
        }

        tx.commit().await.context("Failed to commit ledger lines")?;
        Ok(lines.len())
    }

    /// Insert or rename accounts.
    pub async fn save_accounts(&self, accounts: &[Account]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for account in accounts {
            sqlx::query(
                r#"
                INSERT INTO accounts (code, name) VALUES (?, ?)
                ON CONFLICT(code) DO UPDATE SET name = excluded.name
                "#,
            )
            .bind(&account.code)
            .bind(&account.name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save account {}", account.code))?;
        }

        tx.commit().await.context("Failed to commit accounts")?;
        Ok(accounts.len())
    }

    /// Insert stock movements in a single transaction.
    pub async fn save_stock_movements(&self, movements: &[StockMovement]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for movement in movements {
            sqlx::query(
                r#"
                INSERT INTO stock_movements (item_code, item_group, branch_id, trans_type, doc_date, out_qty, price, currency, rate)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&movement.item_code)
            .bind(movement.item_group)
            .bind(movement.branch_id)
            .bind(movement.trans_type)
            .bind(movement.doc_date.format("%Y-%m-%d").to_string())
            .bind(movement.out_qty.to_string())
            .bind(movement.price.to_string())
            .bind(&movement.currency)
            .bind(movement.rate.map(|r| r.to_string()))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to save stock movement for {}", movement.item_code))?;
        }

        tx.commit().await.context("Failed to commit stock movements")?;
        Ok(movements.len())
    }

    /// Insert or replace daily exchange rates.
    pub async fn save_exchange_rates(&self, rates: &[ExchangeRate]) -> Result<usize> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for rate in rates {
            sqlx::query(
                r#"
                INSERT INTO exchange_rates (currency, rate_date, rate) VALUES (?, ?, ?)
                ON CONFLICT(currency, rate_date) DO UPDATE SET rate = excluded.rate
                "#,
            )
            .bind(&rate.currency)
            .bind(rate.rate_date.format("%Y-%m-%d").to_string())
            .bind(rate.rate.to_string())
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("Failed to save {} rate for {}", rate.currency, rate.rate_date)
            })?;
        }

        tx.commit().await.context("Failed to commit exchange rates")?;
        Ok(rates.len())
    }

    /// Row counts and the ledger's date span.
    pub async fn snapshot_stats(&self) -> Result<SnapshotStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ledger_lines) as ledger_lines,
                (SELECT COUNT(*) FROM accounts) as accounts,
                (SELECT COUNT(*) FROM stock_movements) as stock_movements,
                (SELECT COUNT(*) FROM exchange_rates) as exchange_rates,
                (SELECT MIN(ref_date) FROM ledger_lines) as first_ref_date,
                (SELECT MAX(ref_date) FROM ledger_lines) as last_ref_date
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to read snapshot statistics")?;

        Ok(SnapshotStats {
            ledger_lines: row.get("ledger_lines"),
            accounts: row.get("accounts"),
            stock_movements: row.get("stock_movements"),
            exchange_rates: row.get("exchange_rates"),
            first_ref_date: row.get("first_ref_date"),
            last_ref_date: row.get("last_ref_date"),
        })
    }

    // ========================
    // Aggregation helpers
    // ========================

    /// Run a per-branch sum. `sql` must select `branch_id` and `total`
    /// (in cents) and contain a `{branches}` placeholder for the IN list;
    /// its own bind parameters are `binds`, followed by the branch ids.
    async fn sum_by_branch(
        &self,
        sql: &str,
        binds: Vec<String>,
        branches: &BranchSet,
        what: &str,
    ) -> Result<BranchAmounts> {
        let placeholders = vec!["?"; branches.len()].join(", ");
        let query_str = sql.replace("{branches}", &placeholders);

        let mut query = sqlx::query(&query_str);
        for bind in &binds {
            query = query.bind(bind);
        }
        for id in branches.ids() {
            query = query.bind(id);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to aggregate {}", what))?;

        let mut amounts = BranchAmounts::zeroed(branches);
        for row in rows {
            let branch_id: i64 = row.get("branch_id");
            let total: i64 = row.get("total");
            let branch = BranchId::try_from(branch_id)
                .with_context(|| format!("Unexpected branch in {} aggregate", what))?;
            amounts.set(branch, cents_to_money(total));
        }
        Ok(amounts)
    }

    async fn load_stock_movements(&self, range: DateRange) -> Result<Vec<StockMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT item_code, item_group, branch_id, trans_type, doc_date, out_qty, price, currency, rate
            FROM stock_movements
            WHERE item_group = ?
              AND trans_type = ?
              AND doc_date >= ? AND doc_date <= ?
            "#,
        )
        .bind(RAW_MATERIAL_ITEM_GROUP)
        .bind(CONSUMPTION_TRANS_TYPE)
        .bind(range.start_str())
        .bind(range.end_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load stock movements")?;

        rows.iter().map(Self::row_to_stock_movement).collect()
    }

    fn row_to_stock_movement(row: &sqlx::sqlite::SqliteRow) -> Result<StockMovement> {
        let doc_date: String = row.get("doc_date");
        let out_qty: String = row.get("out_qty");
        let price: String = row.get("price");
        let rate: Option<String> = row.get("rate");

        Ok(StockMovement {
            item_code: row.get("item_code"),
            item_group: row.get("item_group"),
            branch_id: row.get("branch_id"),
            trans_type: row.get("trans_type"),
            doc_date: NaiveDate::parse_from_str(&doc_date, "%Y-%m-%d")
                .context("Invalid stock movement date")?,
            out_qty: Decimal::from_str(&out_qty).context("Invalid stock quantity")?,
            price: Decimal::from_str(&price).context("Invalid stock price")?,
            currency: row.get("currency"),
            rate: rate
                .map(|r| Decimal::from_str(&r))
                .transpose()
                .context("Invalid stock exchange rate")?,
        })
    }
}

#[async_trait]
impl AggregateSource for Repository {
    async fn net_income(&self, branches: &BranchSet, range: DateRange) -> Result<BranchAmounts> {
        let sql = r#"
            SELECT
                branch_id,
                COALESCE(SUM(CASE
                    WHEN account LIKE '600-01-%' OR account LIKE '601-01-%' OR account LIKE '602-01-%'
                    THEN credit_cents - debit_cents
                    ELSE 0
                END), 0)
                -
                COALESCE(SUM(CASE
                    WHEN account LIKE '610-01-%' OR account LIKE '612-01-%'
                    THEN debit_cents - credit_cents
                    ELSE 0
                END), 0) as total
            FROM ledger_lines
            WHERE ref_date >= ? AND ref_date <= ?
              AND trans_type <> ?
              AND (source_line IS NULL OR source_line <> ?)
              AND branch_id IN ({branches})
              AND (
                   account LIKE '600-01-%'
                OR account LIKE '601-01-%'
                OR account LIKE '602-01-%'
                OR account LIKE '610-01-%'
                OR account LIKE '612-01-%'
              )
            GROUP BY branch_id
        "#;

        self.sum_by_branch(
            sql,
            vec![
                range.start_str(),
                range.end_str(),
                VOIDED_TRANS_TYPE.to_string(),
                REVERSAL_SOURCE_LINE.to_string(),
            ],
            branches,
            "net income",
        )
        .await
    }

    async fn expense_total(
        &self,
        category: ExpenseCategory,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts> {
        let sql = r#"
            SELECT branch_id, COALESCE(SUM(debit_cents - credit_cents), 0) as total
            FROM ledger_lines
            WHERE ref_date >= ? AND ref_date <= ?
              AND trans_type <> ?
              AND (source_line IS NULL OR source_line <> ?)
              AND account LIKE ?
              AND branch_id IN ({branches})
            GROUP BY branch_id
        "#;

        self.sum_by_branch(
            sql,
            vec![
                range.start_str(),
                range.end_str(),
                VOIDED_TRANS_TYPE.to_string(),
                REVERSAL_SOURCE_LINE.to_string(),
                category.like_pattern(),
            ],
            branches,
            &format!("{} expenses", category),
        )
        .await
    }

    async fn raw_material_consumption(
        &self,
        branches: &BranchSet,
        range: DateRange,
        local_currency: &str,
    ) -> Result<BTreeMap<BranchId, RawMaterialConsumption>> {
        let movements = self.load_stock_movements(range).await?;
        let mut consumption = aggregate_consumption(&movements, local_currency);
        consumption.retain(|branch, _| branches.contains(*branch));
        for branch in branches.iter() {
            consumption.entry(branch).or_default();
        }
        Ok(consumption)
    }

    async fn specialty_purchases(
        &self,
        kind: SpecialtyPurchase,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts> {
        let mut amounts = BranchAmounts::zeroed(branches);
        if !branches.contains(SpecialtyPurchase::BRANCH) {
            return Ok(amounts);
        }

        // Roll and pad are supplier postings and carry no reliable branch.
        let sql = match kind {
            SpecialtyPurchase::Tray => {
                r#"
                SELECT COALESCE(SUM(debit_cents - credit_cents), 0) as total
                FROM ledger_lines
                WHERE trans_type = 18
                  AND account = '153-01-0004'
                  AND branch_id = 1
                  AND ref_date >= ? AND ref_date <= ?
                "#
            }
            SpecialtyPurchase::Roll => {
                r#"
                SELECT COALESCE(SUM(credit_cents - debit_cents), 0) as total
                FROM ledger_lines
                WHERE (
                       (short_name = 'T012274' AND trans_type IN (18, 19))
                    OR (short_name = 'T013833' AND contra_account = '891-01-0001')
                  )
                  AND ref_date >= ? AND ref_date <= ?
                "#
            }
            SpecialtyPurchase::Pad => {
                r#"
                SELECT COALESCE(SUM(credit_cents - debit_cents), 0) as total
                FROM ledger_lines
                WHERE short_name = 'T010748'
                  AND trans_type IN (18, 19)
                  AND ref_date >= ? AND ref_date <= ?
                "#
            }
        };

        let row = sqlx::query(sql)
            .bind(range.start_str())
            .bind(range.end_str())
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to aggregate {:?} purchases", kind))?;

        let total: i64 = row.get("total");
        amounts.set(
            SpecialtyPurchase::BRANCH,
            kind.net_amount(cents_to_money(total)),
        );
        Ok(amounts)
    }

    async fn direct_raw_material(
        &self,
        branches: &BranchSet,
        range: DateRange,
    ) -> Result<BranchAmounts> {
        let mut amounts = BranchAmounts::zeroed(branches);
        if !branches.contains(BranchId::C) {
            return Ok(amounts);
        }

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(debit_cents - credit_cents), 0) as total
            FROM ledger_lines
            WHERE branch_id = ?
              AND ref_date >= ? AND ref_date <= ?
              AND (account LIKE ? OR account LIKE ?)
            "#,
        )
        .bind(i64::from(BranchId::C.id()))
        .bind(range.start_str())
        .bind(range.end_str())
        .bind(format!("{}%", DIRECT_RAW_MATERIAL_PREFIXES[0]))
        .bind(format!("{}%", DIRECT_RAW_MATERIAL_PREFIXES[1]))
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate direct raw material")?;

        let total: i64 = row.get("total");
        amounts.set(BranchId::C, cents_to_money(total));
        Ok(amounts)
    }

    async fn expense_accounts_by_month(
        &self,
        branch: BranchId,
        range: DateRange,
    ) -> Result<Vec<AccountMonthTotal>> {
        let rows = sqlx::query(
            r#"
            SELECT
                l.account as account,
                COALESCE(a.name, l.account) as account_name,
                substr(l.ref_date, 1, 7) as month,
                COALESCE(SUM(l.debit_cents - l.credit_cents), 0) as total
            FROM ledger_lines l
            LEFT JOIN accounts a ON a.code = l.account
            WHERE l.branch_id = ?
              AND l.ref_date >= ? AND l.ref_date <= ?
              AND l.trans_type <> ?
              AND (l.source_line IS NULL OR l.source_line <> ?)
              AND (
                   l.account LIKE '720-%'
                OR l.account LIKE '730-%'
                OR l.account LIKE '760-%'
                OR l.account LIKE '770-%'
              )
            GROUP BY l.account, month
            ORDER BY l.account, month
            "#,
        )
        .bind(i64::from(branch.id()))
        .bind(range.start_str())
        .bind(range.end_str())
        .bind(VOIDED_TRANS_TYPE)
        .bind(REVERSAL_SOURCE_LINE)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate expense accounts")?;

        rows.iter()
            .map(|row| {
                let month: String = row.get("month");
                let total: i64 = row.get("total");
                Ok(AccountMonthTotal {
                    account: row.get("account"),
                    account_name: row.get("account_name"),
                    month: YearMonth::from_str(&month).context("Invalid ledger month")?,
                    amount: cents_to_money(total),
                })
            })
            .collect()
    }

    async fn average_rates(
        &self,
        currency: &str,
        since: NaiveDate,
    ) -> Result<BTreeMap<YearMonth, Decimal>> {
        let rows = sqlx::query(
            r#"
            SELECT currency, rate_date, rate
            FROM exchange_rates
            WHERE currency = ? AND rate_date >= ?
            ORDER BY rate_date
            "#,
        )
        .bind(currency)
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load exchange rates")?;

        let rates = rows
            .iter()
            .map(|row| {
                let rate_date: String = row.get("rate_date");
                let rate: String = row.get("rate");
                Ok(ExchangeRate {
                    currency: row.get("currency"),
                    rate_date: NaiveDate::parse_from_str(&rate_date, "%Y-%m-%d")
                        .context("Invalid rate date")?,
                    rate: Decimal::from_str(&rate).context("Invalid exchange rate")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(monthly_average_rates(&rates))
    }
}
