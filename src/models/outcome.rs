use bigdecimal::BigDecimal;
use serde::Serialize;

/// 单个吊牌的识别结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichOutcome {
    Enriched,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagEnrichResult {
    pub tag_id: i64,
    pub outcome: EnrichOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 一批 enrich 的结果；`has_more` 为 true 时调用方应再次调用
#[derive(Debug, Clone, Serialize)]
pub struct EnrichBatch {
    pub processed: usize,
    pub has_more: bool,
    pub results: Vec<TagEnrichResult>,
}

impl EnrichBatch {
    pub fn count(&self, outcome: EnrichOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrainSummary {
    pub rounds: u32,
    pub processed: usize,
    pub enriched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptParse {
    pub trip_id: i64,
    pub parsed_count: usize,
    pub total_cost: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCostResult {
    pub trip_id: i64,
    pub updated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub trip_id: i64,
    pub inserted_count: usize,
    pub unpriced_count: usize,
}
