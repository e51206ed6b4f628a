use super::UnknownVariant;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// 吊牌照片的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    PendingEnrichment,
    Enriched,
    EnrichmentFailed,
    NeedsManual,
}

impl TagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagStatus::PendingEnrichment => "pending_enrichment",
            TagStatus::Enriched => "enriched",
            TagStatus::EnrichmentFailed => "enrichment_failed",
            TagStatus::NeedsManual => "needs_manual",
        }
    }
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_enrichment" => Ok(TagStatus::PendingEnrichment),
            "enriched" => Ok(TagStatus::Enriched),
            "enrichment_failed" => Ok(TagStatus::EnrichmentFailed),
            "needs_manual" => Ok(TagStatus::NeedsManual),
            other => Err(UnknownVariant::new("tag status", other)),
        }
    }
}

impl TryFrom<String> for TagStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 从吊牌中提取出的字段，全部可空
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagFields {
    pub upc: Option<String>,
    pub style_number: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub msrp: Option<BigDecimal>,
}

/// 吊牌记录 (kickstart_tag_photos)，不含照片字节
///
/// `cost` 非空即视为已定价，与 `status` 无关。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: i64,
    pub trip_id: i64,
    pub has_photo: bool,
    pub upc: Option<String>,
    pub style_number: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub msrp: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
    pub receipt_item_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: TagStatus,
}

impl TagRecord {
    pub fn is_priced(&self) -> bool {
        self.cost.is_some()
    }
}

/// 待解析的吊牌 (含照片字节)
#[derive(Debug, Clone, FromRow)]
pub struct PendingTag {
    pub id: i64,
    pub trip_id: i64,
    pub photo: Option<Vec<u8>>,
}

/// 人工修正吊牌字段；`None` 表示不修改
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagPatch {
    pub upc: Option<String>,
    pub style_number: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub msrp: Option<BigDecimal>,
    pub cost: Option<BigDecimal>,
}

impl TagPatch {
    pub fn is_empty(&self) -> bool {
        self.upc.is_none()
            && self.style_number.is_none()
            && self.brand.is_none()
            && self.description.is_none()
            && self.color.is_none()
            && self.size.is_none()
            && self.msrp.is_none()
            && self.cost.is_none()
    }

    /// 是否补录了足以识别商品的字段
    pub fn identifies_item(&self) -> bool {
        [&self.upc, &self.style_number, &self.brand, &self.description]
            .iter()
            .any(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }
}
