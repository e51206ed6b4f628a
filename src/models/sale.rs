use super::UnknownVariant;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// 销售渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Jumpstart,
    Kickstart,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Jumpstart => "Jumpstart",
            Channel::Kickstart => "Kickstart",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Jumpstart" | "jumpstart" => Ok(Channel::Jumpstart),
            "Kickstart" | "kickstart" => Ok(Channel::Kickstart),
            other => Err(UnknownVariant::new("channel", other)),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Valid,
    Cancelled,
    Failed,
}

impl FromStr for SaleStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(SaleStatus::Valid),
            "cancelled" => Ok(SaleStatus::Cancelled),
            "failed" => Ok(SaleStatus::Failed),
            other => Err(UnknownVariant::new("sale status", other)),
        }
    }
}

impl TryFrom<String> for SaleStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// 拍卖成交记录 (sales)
///
/// `buyer_paid` 是扣除优惠券后的实付金额；利润类字段从不落库。
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: i64,
    pub listing: String,
    pub barcode: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub channel: Channel,
    pub buyer_paid: BigDecimal,
    pub coupon_amount: BigDecimal,
    pub cost_basis: Option<BigDecimal>,
    #[sqlx(try_from = "String")]
    pub status: SaleStatus,
}

impl SaleRecord {
    /// 券前成交价 = 实付 + 优惠券
    pub fn hammer_price(&self) -> BigDecimal {
        &self.buyer_paid + &self.coupon_amount
    }
}
