pub mod intake;
pub mod matching;
pub mod outcome;
pub mod receipt;
pub mod sale;
pub mod tag;
pub mod trip;

pub use intake::IntakeRow;
pub use matching::{
    Confidence, CostAssignment, LineItemCandidate, MatchPlan, MatchStats, ProposedMatch,
    ReceiptCapacity, TagCandidate,
};
pub use outcome::{
    BulkCostResult, DrainSummary, EnrichBatch, EnrichOutcome, FinalizeResult, ReceiptParse,
    TagEnrichResult,
};
pub use receipt::{NewReceiptItem, ReceiptLineItem};
pub use sale::{Channel, SaleRecord, SaleStatus};
pub use tag::{PendingTag, TagFields, TagPatch, TagRecord, TagStatus};
pub use trip::{Trip, TripStatus};

/// 数据库中出现了无法识别的枚举值
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
