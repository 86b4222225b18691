use std::io::Write;

use anyhow::Result;

use crate::application::{BranchTable, LiveSnapshot, PnlReport, RawMaterialsReport};

fn cell_value(value: rust_decimal::Decimal) -> String {
    value.round_dp(2).to_string()
}

/// Months as rows and branches as columns, followed by the average rows.
pub fn write_branch_table_csv<W: Write>(table: &BranchTable, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["month".to_string()];
    header.extend(table.branches.iter().map(|b| b.name.clone()));
    header.push("total".to_string());
    csv_writer.write_record(&header)?;

    let mut count = 0;
    for line in &table.months {
        let mut record = vec![line.month.to_string()];
        record.extend(line.cells.iter().map(|c| cell_value(c.value)));
        record.push(cell_value(line.total.value));
        csv_writer.write_record(&record)?;
        count += 1;
    }

    for average in &table.averages {
        let mut record = vec![average.label.clone()];
        record.extend(average.cells.iter().map(|v| cell_value(*v)));
        record.push(cell_value(average.total));
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush()?;
    Ok(count)
}

/// Every branch's P&L components, one row per branch and month.
pub fn write_pnl_detail_csv<W: Write>(report: &PnlReport, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "branch",
        "month",
        "turnover",
        "expense_720",
        "expense_730",
        "expense_760",
        "expense_770",
        "expense_780",
        "raw_material",
        "tray",
        "roll",
        "pad",
        "total_expenses",
        "pnl",
    ])?;

    let mut count = 0;
    for detail in &report.details {
        for line in &detail.lines {
            let row = &line.row;
            let extra = row.specialty_purchases.unwrap_or_default();
            csv_writer.write_record(&[
                row.branch.id().to_string(),
                row.month.to_string(),
                cell_value(row.turnover),
                cell_value(row.expense720),
                cell_value(row.expense730),
                cell_value(row.expense760),
                cell_value(row.expense770),
                cell_value(row.expense780),
                cell_value(row.raw_material_cost),
                cell_value(extra.tray),
                cell_value(extra.roll),
                cell_value(extra.pad),
                cell_value(row.total_expenses),
                cell_value(row.pnl),
            ])?;
            count += 1;
        }
    }

    csv_writer.flush()?;
    Ok(count)
}

pub fn write_raw_materials_csv<W: Write>(report: &RawMaterialsReport, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "month",
        "branch_a_kg",
        "branch_a_cost",
        "branch_b_kg",
        "branch_b_cost",
        "fx_rate",
        "manual_price",
        "total_cost",
    ])?;

    let mut count = 0;
    for line in &report.months {
        csv_writer.write_record(&[
            line.month.to_string(),
            line.branch_a.consumed.to_string(),
            cell_value(line.branch_a.cost_of_consumed),
            line.branch_b.consumed.to_string(),
            cell_value(line.branch_b.cost_of_consumed),
            line.fx_rate.map(|r| r.to_string()).unwrap_or_default(),
            line.manual_price.map(|p| p.to_string()).unwrap_or_default(),
            cell_value(line.total_cost),
        ])?;
        count += 1;
    }

    csv_writer.write_record(&[
        "L3MA".to_string(),
        report.l3ma_kg_a.to_string(),
        cell_value(report.l3ma_branch_a),
        report.l3ma_kg_b.to_string(),
        cell_value(report.l3ma_branch_b),
        report.l3ma_fx_rate.round_dp(4).to_string(),
        String::new(),
        cell_value(report.l3ma_total),
    ])?;

    csv_writer.flush()?;
    Ok(count)
}

/// Expense accounts, then purchase lines, then the summary lines.
pub fn write_live_snapshot_csv<W: Write>(snapshot: &LiveSnapshot, writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["section", "code", "label", "current", "last_3m", "last_6m"])?;

    let mut count = 0;
    for group in &snapshot.expense_groups {
        for line in &group.lines {
            csv_writer.write_record(&[
                "expense".to_string(),
                line.code.clone().unwrap_or_default(),
                line.label.clone(),
                cell_value(line.figures.current),
                cell_value(line.figures.last_3m),
                cell_value(line.figures.last_6m),
            ])?;
            count += 1;
        }
        csv_writer.write_record(&[
            "subtotal".to_string(),
            group.group.clone(),
            String::new(),
            cell_value(group.subtotal.current),
            cell_value(group.subtotal.last_3m),
            cell_value(group.subtotal.last_6m),
        ])?;
    }

    for line in &snapshot.purchase_lines {
        csv_writer.write_record(&[
            "purchase".to_string(),
            String::new(),
            line.label.clone(),
            cell_value(line.figures.current),
            cell_value(line.figures.last_3m),
            cell_value(line.figures.last_6m),
        ])?;
        count += 1;
    }

    for (label, figures) in [
        ("expenses", snapshot.expense_total),
        ("turnover", snapshot.turnover),
        ("total", snapshot.total),
        ("profit", snapshot.profit),
    ] {
        csv_writer.write_record(&[
            "summary".to_string(),
            String::new(),
            label.to_string(),
            cell_value(figures.current),
            cell_value(figures.last_3m),
            cell_value(figures.last_6m),
        ])?;
    }

    csv_writer.flush()?;
    Ok(count)
}
