//! 平台费用与利润计算 (Whatnot premium seller tier)
//!
//! 佣金 7.2%，支付处理费 2.9% + $0.30 / 件。所有金额按“四舍五入、远离零”
//! 保留两位小数，利润率保留一位小数。利润相关字段永远现算，不落库。

use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::str::FromStr;

/// 佣金费率
pub const COMMISSION_RATE: &str = "0.072";
/// 支付处理费率
pub const PROCESSING_RATE: &str = "0.029";
/// 每件固定处理费
pub const PROCESSING_FIXED: &str = "0.30";

/// NUMERIC(12,2) 整数部分最多 10 位
const MAX_AMOUNT: i64 = 10_000_000_000;
/// 小数位上限；超出的输入视为无效，不做缩放
const MAX_AMOUNT_SCALE: i64 = 12;

// 上面的常量都是合法字面量，由 tests::rate_constants_are_exact 校验
fn constant(literal: &str) -> BigDecimal {
    BigDecimal::from_str(literal).unwrap_or_default()
}

/// 金额能否落库：绝对值小于 10^10，小数位不超过 12 位
///
/// 指数形式的超大/超小数值 (如 `1e300000000`) 在缩放时会耗尽 CPU，必须在进入
/// `round_half_away` 之前拦截。
pub fn is_storable_amount(value: &BigDecimal) -> bool {
    let (_, scale) = value.as_bigint_and_exponent();
    (-MAX_AMOUNT_SCALE..=MAX_AMOUNT_SCALE).contains(&scale)
        && value.abs() < BigDecimal::from(MAX_AMOUNT)
}

/// 四舍五入到 `scale` 位小数，.5 远离零进位
pub fn round_half_away(value: &BigDecimal, scale: i64) -> BigDecimal {
    let truncated = value.with_scale(scale);
    let remainder = value - &truncated;
    let ulp = BigDecimal::new(1.into(), scale);
    let half = &ulp / &BigDecimal::from(2);

    let rounded = if remainder.abs() >= half {
        if value < &BigDecimal::zero() {
            truncated - ulp
        } else {
            truncated + ulp
        }
    } else {
        truncated
    };
    rounded.with_scale(scale)
}

fn round2(value: &BigDecimal) -> BigDecimal {
    round_half_away(value, 2)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub commission: BigDecimal,
    pub processing: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_payout: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profitability {
    pub gross: BigDecimal,
    pub commission: BigDecimal,
    pub processing: BigDecimal,
    pub total_fees: BigDecimal,
    pub net_payout: BigDecimal,
    pub profit: BigDecimal,
    pub margin: BigDecimal,
}

/// 按实付金额计算平台费用
///
/// 负数金额会得到负的费用，历史数据依赖这一行为，不做截断。
pub fn calculate_fees(gross: &BigDecimal) -> FeeBreakdown {
    let commission = round2(&(gross * constant(COMMISSION_RATE)));
    let processing = round2(
        &(gross * constant(PROCESSING_RATE) + constant(PROCESSING_FIXED)),
    );
    let total_fees = round2(&(&commission + &processing));
    let net_payout = round2(&(gross - &total_fees));

    FeeBreakdown {
        commission,
        processing,
        total_fees,
        net_payout,
    }
}

/// 单件利润；`landed_cost` 未知时按 0 计
pub fn calculate_profit(gross: &BigDecimal, landed_cost: Option<&BigDecimal>) -> Profitability {
    let fees = calculate_fees(gross);
    let cost = landed_cost.cloned().unwrap_or_else(BigDecimal::zero);
    let profit = round2(&(&fees.net_payout - &cost));

    let margin = if gross > &BigDecimal::zero() {
        round_half_away(&(&profit / gross * BigDecimal::from(100)), 1)
    } else {
        BigDecimal::zero().with_scale(1)
    };

    Profitability {
        gross: gross.with_scale(2),
        commission: fees.commission,
        processing: fees.processing,
        total_fees: fees.total_fees,
        net_payout: fees.net_payout,
        profit,
        margin,
    }
}
