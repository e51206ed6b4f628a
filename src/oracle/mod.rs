//! 外部 AI oracle 边界
//!
//! 吊牌识别、小票识别和小票↔吊牌配对都通过窄接口调用，核心逻辑可用确定性的
//! fake 测试；真实实现见 [`anthropic::AnthropicClient`]。

pub mod anthropic;
pub mod parse;
pub mod prompts;

use crate::error::ReconError;
use crate::models::{LineItemCandidate, NewReceiptItem, ProposedMatch, TagCandidate, TagFields};
use async_trait::async_trait;
use thiserror::Error;

pub use anthropic::AnthropicClient;
pub use parse::ExtractedTag;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Parse(String),
}

impl From<OracleError> for ReconError {
    fn from(e: OracleError) -> Self {
        match e {
            OracleError::Unavailable(msg) => ReconError::OracleUnavailable(msg),
            OracleError::Parse(msg) => ReconError::OracleParseError(msg),
        }
    }
}

/// 照片 → 吊牌字段 (尽力而为，字段可能全空)
#[async_trait]
pub trait TagExtractor: Send + Sync {
    async fn extract(&self, photo: &[u8]) -> Result<TagFields, OracleError>;
}

/// 小票照片 → 明细行
#[async_trait]
pub trait ReceiptReader: Send + Sync {
    async fn read_receipt(&self, photo: &[u8]) -> Result<Vec<NewReceiptItem>, OracleError>;
}

/// 小票明细 × 吊牌 → 配对三元组
#[async_trait]
pub trait MatchOracle: Send + Sync {
    async fn propose_matches(
        &self,
        items: &[LineItemCandidate],
        tags: &[TagCandidate],
    ) -> Result<Vec<ProposedMatch>, OracleError>;
}
