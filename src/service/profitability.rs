//! 销售利润报表
//!
//! 每一行都用 [`calculate_profit`] 现算；汇总值同样在读取时推导。

use super::fees::{calculate_profit, round_half_away};
use crate::error::{ReconError, Result};
use crate::models::{Channel, SaleRecord, SaleStatus};
use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfitRow {
    pub sale_id: i64,
    pub listing: String,
    pub barcode: String,
    pub description: Option<String>,
    pub channel: Channel,
    pub hammer_price: BigDecimal,
    pub coupon_amount: BigDecimal,
    pub buyer_paid: BigDecimal,
    pub cost_basis: Option<BigDecimal>,
    pub commission: BigDecimal,
    pub processing: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_payout: BigDecimal,
    pub profit: BigDecimal,
    pub margin: BigDecimal,
}

impl ProfitRow {
    pub fn from_sale(sale: &SaleRecord) -> Self {
        let figures = calculate_profit(&sale.buyer_paid, sale.cost_basis.as_ref());
        Self {
            sale_id: sale.id,
            listing: sale.listing.clone(),
            barcode: sale.barcode.clone(),
            description: sale.description.clone(),
            channel: sale.channel,
            hammer_price: round_half_away(&sale.hammer_price(), 2),
            coupon_amount: round_half_away(&sale.coupon_amount, 2),
            buyer_paid: figures.gross,
            cost_basis: sale.cost_basis.clone(),
            commission: figures.commission,
            processing: figures.processing,
            total_fees: figures.total_fees,
            net_payout: figures.net_payout,
            profit: figures.profit,
            margin: figures.margin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub count: usize,
    pub total_profit: BigDecimal,
    pub total_net: BigDecimal,
    pub avg_profit: BigDecimal,
    /// 总利润 / 总到手 × 100
    pub avg_margin: BigDecimal,
    pub avg_hammer: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfitabilityReport {
    pub rows: Vec<ProfitRow>,
    pub summary: ReportSummary,
}

/// 只统计 valid 状态的销售
pub fn build_report(sales: &[SaleRecord]) -> ProfitabilityReport {
    let rows: Vec<ProfitRow> = sales
        .iter()
        .filter(|s| s.status == SaleStatus::Valid)
        .map(ProfitRow::from_sale)
        .collect();

    let count = rows.len();
    let sum = |f: fn(&ProfitRow) -> &BigDecimal| {
        rows.iter().fold(BigDecimal::zero(), |acc, r| acc + f(r))
    };
    let total_profit = sum(|r| &r.profit);
    let total_net = sum(|r| &r.net_payout);
    let total_hammer = sum(|r| &r.hammer_price);

    let (avg_profit, avg_hammer) = if count > 0 {
        let n = BigDecimal::from(count as i64);
        (
            round_half_away(&(&total_profit / &n), 2),
            round_half_away(&(&total_hammer / &n), 2),
        )
    } else {
        (BigDecimal::zero().with_scale(2), BigDecimal::zero().with_scale(2))
    };
    let avg_margin = if total_net > BigDecimal::zero() {
        round_half_away(&(&total_profit / &total_net * BigDecimal::from(100)), 1)
    } else {
        BigDecimal::zero().with_scale(1)
    };

    ProfitabilityReport {
        summary: ReportSummary {
            count,
            total_profit: round_half_away(&total_profit, 2),
            total_net: round_half_away(&total_net, 2),
            avg_profit,
            avg_margin,
            avg_hammer,
        },
        rows,
    }
}

/// 导出 CSV，返回写入行数
pub fn export_report_csv(rows: &[ProfitRow], path: &Path) -> Result<usize> {
    let csv_err = |e: csv::Error| ReconError::StorageWriteFailed {
        attempted: rows.len(),
        reason: e.to_string(),
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| ReconError::StorageWriteFailed {
        attempted: rows.len(),
        reason: e.to_string(),
    })?;
    tracing::info!("Exported {} profitability rows to {}", rows.len(), path.display());
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn sale(id: i64, paid: &str, coupon: &str, cost: Option<&str>, status: SaleStatus) -> SaleRecord {
        SaleRecord {
            id,
            listing: format!("Show #{}", id),
            barcode: format!("12345{}", id),
            description: Some("Maxi Dress".to_string()),
            channel: Channel::Jumpstart,
            buyer_paid: dec(paid),
            coupon_amount: dec(coupon),
            cost_basis: cost.map(dec),
            status,
        }
    }

    #[test]
    fn rows_recompute_fees_from_buyer_paid() {
        let report = build_report(&[sale(1, "100", "5", Some("40"), SaleStatus::Valid)]);
        let row = &report.rows[0];

        assert_eq!(row.hammer_price, dec("105.00"));
        assert_eq!(row.total_fees, dec("10.40"));
        assert_eq!(row.net_payout, dec("89.60"));
        assert_eq!(row.profit, dec("49.60"));
        assert_eq!(row.margin, dec("49.6"));
    }

    #[test]
    fn summary_skips_cancelled_and_failed_sales() {
        let report = build_report(&[
            sale(1, "100", "0", Some("40"), SaleStatus::Valid),
            sale(2, "25", "0", None, SaleStatus::Valid),
            sale(3, "500", "0", Some("1"), SaleStatus::Cancelled),
            sale(4, "500", "0", Some("1"), SaleStatus::Failed),
        ]);
        let s = &report.summary;

        // 25 → 到手 22.17，利润 22.17
        assert_eq!(s.count, 2);
        assert_eq!(s.total_net, dec("111.77"));
        assert_eq!(s.total_profit, dec("71.77"));
        assert_eq!(s.avg_profit, dec("35.89"));
        assert_eq!(s.avg_hammer, dec("62.50"));
        assert_eq!(s.avg_margin, dec("64.2"));
    }

    #[test]
    fn empty_report_has_zero_summary() {
        let report = build_report(&[]);
        assert_eq!(report.summary.count, 0);
        assert_eq!(report.summary.avg_margin, BigDecimal::zero());
        assert!(report.rows.is_empty());
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let report = build_report(&[sale(1, "100", "0", Some("40"), SaleStatus::Valid)]);

        let written = export_report_csv(&report.rows, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();

        assert_eq!(written, 1);
        assert!(lines.next().unwrap().starts_with("sale_id,listing,barcode"));
        let data = lines.next().unwrap();
        assert!(data.contains("89.60"));
        assert!(data.contains("49.6"));
    }
}
