pub mod memory;
pub mod pool;
pub mod queries;

pub use memory::MemoryTripStore;
pub use pool::create_pool;
pub use queries::PgTripStore;

use crate::error::Result;
use crate::models::{
    Channel, IntakeRow, MatchPlan, NewReceiptItem, PendingTag, ReceiptLineItem, SaleRecord,
    TagFields, TagPatch, TagRecord, TagStatus, Trip, TripStatus,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// 存储边界
///
/// 行程、吊牌、小票明细都只属于各自的行程；`intake` 对本服务只追加。
/// 带 `expected_version` 的方法是乐观并发控制：版本不符时不写入并返回 false/None。
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn create_trip(&self, buyer_name: &str) -> Result<Trip>;

    async fn get_trip(&self, trip_id: i64) -> Result<Option<Trip>>;

    async fn set_receipt_photo(&self, trip_id: i64, photo: &[u8]) -> Result<()>;

    async fn get_receipt_photo(&self, trip_id: i64) -> Result<Option<Vec<u8>>>;

    /// 新增吊牌 (pending_enrichment)，同时累加行程 tag_count
    async fn add_tag(&self, trip_id: i64, photo: Option<&[u8]>) -> Result<TagRecord>;

    async fn get_tag(&self, tag_id: i64) -> Result<Option<TagRecord>>;

    async fn list_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>>;

    async fn list_enriched_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>>;

    /// 待解析吊牌，按 id 升序，`trip_id` 为空时跨行程
    async fn list_pending_tags(&self, trip_id: Option<i64>, limit: i64) -> Result<Vec<PendingTag>>;

    async fn has_pending_tags(&self, trip_id: Option<i64>) -> Result<bool>;

    /// 写入识别结果并置为 enriched
    async fn record_enrichment(&self, tag_id: i64, fields: &TagFields) -> Result<()>;

    async fn set_tag_status(&self, tag_id: i64, status: TagStatus) -> Result<()>;

    async fn patch_tag(&self, tag_id: i64, patch: &TagPatch) -> Result<()>;

    async fn list_receipt_items(&self, trip_id: i64) -> Result<Vec<ReceiptLineItem>>;

    /// 插入小票明细并更新行程 total_cost，同一事务
    async fn insert_receipt_items(
        &self,
        trip_id: i64,
        items: &[NewReceiptItem],
        total_cost: &BigDecimal,
    ) -> Result<usize>;

    async fn transition_status(
        &self,
        trip_id: i64,
        expected_version: i64,
        status: TripStatus,
    ) -> Result<bool>;

    /// 吊牌成本、明细 matched 标记、行程状态 → matched，同一事务
    async fn apply_match(&self, trip_id: i64, expected_version: i64, plan: &MatchPlan) -> Result<bool>;

    /// 给所有未定价吊牌设置统一成本，返回更新行数
    async fn backfill_cost(&self, trip_id: i64, cost: &BigDecimal) -> Result<u64>;

    /// 写入 intake 并将行程置为 finalized，同一事务；版本冲突返回 None
    async fn finalize_trip(
        &self,
        trip_id: i64,
        expected_version: i64,
        rows: &[IntakeRow],
        chunk_size: usize,
    ) -> Result<Option<usize>>;

    async fn count_intake_rows(&self, trip_id: i64) -> Result<i64>;

    async fn list_sales(&self, channel: Option<Channel>, barcode: Option<&str>) -> Result<Vec<SaleRecord>>;
}
