use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 小票明细 (kickstart_receipt_items)
///
/// `line_total` 以解析结果为准，不做 `qty * price_each` 的二次推导。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReceiptLineItem {
    pub id: i64,
    pub trip_id: i64,
    pub style_number: Option<String>,
    pub description: Option<String>,
    pub qty: i32,
    pub price_each: Option<BigDecimal>,
    pub line_total: Option<BigDecimal>,
    pub matched: bool,
}

/// 待写入的小票明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReceiptItem {
    pub style_number: Option<String>,
    pub description: Option<String>,
    pub qty: i32,
    pub price_each: Option<BigDecimal>,
    pub line_total: Option<BigDecimal>,
}
