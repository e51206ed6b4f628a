use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ReceiptLineItem, TagRecord};

/// 匹配置信度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// 宽松解析：无法识别的标签按 low 处理
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// oracle 返回的一条配对
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedMatch {
    pub tag_id: i64,
    pub receipt_item_id: i64,
    pub confidence: Confidence,
}

/// 发送给 oracle 的小票明细
#[derive(Debug, Clone, Serialize)]
pub struct LineItemCandidate {
    pub id: i64,
    pub style_number: Option<String>,
    pub description: Option<String>,
    pub qty: i32,
    pub price_each: Option<BigDecimal>,
}

impl From<&ReceiptLineItem> for LineItemCandidate {
    fn from(item: &ReceiptLineItem) -> Self {
        Self {
            id: item.id,
            style_number: item.style_number.clone(),
            description: item.description.clone(),
            qty: item.qty,
            price_each: item.price_each.clone(),
        }
    }
}

/// 发送给 oracle 的吊牌
#[derive(Debug, Clone, Serialize)]
pub struct TagCandidate {
    pub id: i64,
    pub style_number: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub brand: Option<String>,
    pub msrp: Option<BigDecimal>,
}

impl From<&TagRecord> for TagCandidate {
    fn from(tag: &TagRecord) -> Self {
        Self {
            id: tag.id,
            style_number: tag.style_number.clone(),
            description: tag.description.clone(),
            color: tag.color.clone(),
            size: tag.size.clone(),
            brand: tag.brand.clone(),
            msrp: tag.msrp.clone(),
        }
    }
}

/// 一个吊牌的成本分配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAssignment {
    pub tag_id: i64,
    pub receipt_item_id: i64,
    pub cost: BigDecimal,
    pub confidence: Confidence,
}

/// 待提交的匹配方案，整体原子写入
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchPlan {
    pub assignments: Vec<CostAssignment>,
    pub matched_item_ids: Vec<i64>,
    pub discarded: usize,
}

/// 小票明细剩余可配对数量 - 跟踪 qty 扇出
#[derive(Debug, Clone)]
pub struct ReceiptCapacity {
    remaining: HashMap<i64, i32>,
    prices: HashMap<i64, Option<BigDecimal>>,
}

impl ReceiptCapacity {
    pub fn from_items(items: &[ReceiptLineItem]) -> Self {
        let mut remaining = HashMap::new();
        let mut prices = HashMap::new();
        for item in items {
            remaining.insert(item.id, item.qty.max(1));
            prices.insert(item.id, item.price_each.clone());
        }
        Self { remaining, prices }
    }

    pub fn contains(&self, item_id: i64) -> bool {
        self.remaining.contains_key(&item_id)
    }

    pub fn price_of(&self, item_id: i64) -> Option<&BigDecimal> {
        self.prices.get(&item_id).and_then(|p| p.as_ref())
    }

    /// 消费一个数量；已用尽时返回 false
    pub fn consume(&mut self, item_id: i64) -> bool {
        match self.remaining.get_mut(&item_id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

/// 匹配统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStats {
    pub trip_id: i64,
    pub matched_count: usize,
    pub total_tags: usize,
    pub total_receipt_items: usize,
    pub discarded: usize,
    pub matches: Vec<CostAssignment>,
}
