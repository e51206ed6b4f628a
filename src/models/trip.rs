use super::UnknownVariant;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// 采购行程状态，只能单向推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scanning,
    Submitted,
    Matched,
    Finalized,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scanning => "scanning",
            TripStatus::Submitted => "submitted",
            TripStatus::Matched => "matched",
            TripStatus::Finalized => "finalized",
        }
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scanning" => Ok(TripStatus::Scanning),
            "submitted" => Ok(TripStatus::Submitted),
            "matched" => Ok(TripStatus::Matched),
            "finalized" => Ok(TripStatus::Finalized),
            other => Err(UnknownVariant::new("trip status", other)),
        }
    }
}

impl TryFrom<String> for TripStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 行程主表 (kickstart_trips)
///
/// `tag_count` 与 `total_cost` 是缓存的聚合值；`version` 用于乐观并发控制。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub buyer_name: String,
    pub has_receipt: bool,
    #[sqlx(try_from = "String")]
    pub status: TripStatus,
    pub tag_count: i64,
    pub total_cost: Option<BigDecimal>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}
