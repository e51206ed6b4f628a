use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::TagRecord;

/// 正式入库表 (kickstart_intake) 的一行，finalize 时写入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRow {
    pub trip_id: i64,
    pub tag_id: i64,
    pub upc: Option<String>,
    pub style_number: Option<String>,
    pub brand: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub msrp: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
    pub status: String,
}

impl IntakeRow {
    pub fn from_tag(tag: &TagRecord, default_brand: &str) -> Self {
        Self {
            trip_id: tag.trip_id,
            tag_id: tag.id,
            upc: tag.upc.clone(),
            style_number: tag.style_number.clone(),
            brand: tag
                .brand
                .clone()
                .unwrap_or_else(|| default_brand.to_string()),
            description: tag.description.clone(),
            color: tag.color.clone(),
            size: tag.size.clone(),
            msrp: tag.msrp.clone(),
            cost: tag.cost.clone(),
            status: tag.status.as_str().to_string(),
        }
    }
}
