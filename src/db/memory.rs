//! 进程内存储，用于本地运行和测试
//!
//! 语义与 Postgres 实现一致：多行写入要么全部成功要么不生效。

use super::TripStore;
use crate::error::{ReconError, Result};
use crate::models::{
    Channel, IntakeRow, MatchPlan, NewReceiptItem, PendingTag, ReceiptLineItem, SaleRecord,
    TagFields, TagPatch, TagRecord, TagStatus, Trip, TripStatus,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

struct TripEntry {
    trip: Trip,
    receipt_photo: Option<Vec<u8>>,
}

struct TagEntry {
    tag: TagRecord,
    photo: Option<Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    trips: BTreeMap<i64, TripEntry>,
    tags: BTreeMap<i64, TagEntry>,
    receipt_items: BTreeMap<i64, ReceiptLineItem>,
    intake: Vec<IntakeRow>,
    sales: Vec<SaleRecord>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn trip_mut(&mut self, trip_id: i64) -> Result<&mut TripEntry> {
        self.trips
            .get_mut(&trip_id)
            .ok_or(ReconError::TripNotFound(trip_id))
    }

    fn tag_mut(&mut self, tag_id: i64) -> Result<&mut TagEntry> {
        self.tags
            .get_mut(&tag_id)
            .ok_or(ReconError::TagNotFound(tag_id))
    }

    /// 版本匹配时推进状态
    fn bump(&mut self, trip_id: i64, expected_version: i64, status: TripStatus) -> bool {
        match self.trips.get_mut(&trip_id) {
            Some(entry) if entry.trip.version == expected_version => {
                entry.trip.status = status;
                entry.trip.version += 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryTripStore {
    state: Mutex<MemoryState>,
    /// intake 写入故障注入：写入超过该行数时失败
    fail_intake_after: Mutex<Option<usize>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 模拟存储在写入第 `rows` 行之后失败
    pub fn fail_intake_after(&self, rows: Option<usize>) {
        *self.fail_intake_after.lock().unwrap_or_else(|e| e.into_inner()) = rows;
    }

    pub fn insert_sale(&self, mut sale: SaleRecord) -> SaleRecord {
        let mut state = self.state();
        sale.id = state.next_id();
        state.sales.push(sale.clone());
        sale
    }

    pub fn intake_rows(&self, trip_id: i64) -> Vec<IntakeRow> {
        self.state()
            .intake
            .iter()
            .filter(|row| row.trip_id == trip_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn create_trip(&self, buyer_name: &str) -> Result<Trip> {
        let mut state = self.state();
        let id = state.next_id();
        let trip = Trip {
            id,
            buyer_name: buyer_name.to_string(),
            has_receipt: false,
            status: TripStatus::Scanning,
            tag_count: 0,
            total_cost: None,
            version: 0,
            created_at: Utc::now(),
        };
        state.trips.insert(
            id,
            TripEntry {
                trip: trip.clone(),
                receipt_photo: None,
            },
        );
        Ok(trip)
    }

    async fn get_trip(&self, trip_id: i64) -> Result<Option<Trip>> {
        Ok(self.state().trips.get(&trip_id).map(|e| e.trip.clone()))
    }

    async fn set_receipt_photo(&self, trip_id: i64, photo: &[u8]) -> Result<()> {
        let mut state = self.state();
        let entry = state.trip_mut(trip_id)?;
        entry.receipt_photo = Some(photo.to_vec());
        entry.trip.has_receipt = true;
        Ok(())
    }

    async fn get_receipt_photo(&self, trip_id: i64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state()
            .trips
            .get(&trip_id)
            .and_then(|e| e.receipt_photo.clone()))
    }

    async fn add_tag(&self, trip_id: i64, photo: Option<&[u8]>) -> Result<TagRecord> {
        let mut state = self.state();
        state.trip_mut(trip_id)?.trip.tag_count += 1;
        let id = state.next_id();
        let tag = TagRecord {
            id,
            trip_id,
            has_photo: photo.is_some(),
            upc: None,
            style_number: None,
            brand: None,
            description: None,
            color: None,
            size: None,
            msrp: None,
            cost: None,
            receipt_item_id: None,
            status: TagStatus::PendingEnrichment,
        };
        state.tags.insert(
            id,
            TagEntry {
                tag: tag.clone(),
                photo: photo.map(|p| p.to_vec()),
            },
        );
        Ok(tag)
    }

    async fn get_tag(&self, tag_id: i64) -> Result<Option<TagRecord>> {
        Ok(self.state().tags.get(&tag_id).map(|e| e.tag.clone()))
    }

    async fn list_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>> {
        Ok(self
            .state()
            .tags
            .values()
            .filter(|e| e.tag.trip_id == trip_id)
            .map(|e| e.tag.clone())
            .collect())
    }

    async fn list_enriched_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>> {
        Ok(self
            .state()
            .tags
            .values()
            .filter(|e| e.tag.trip_id == trip_id && e.tag.status == TagStatus::Enriched)
            .map(|e| e.tag.clone())
            .collect())
    }

    async fn list_pending_tags(&self, trip_id: Option<i64>, limit: i64) -> Result<Vec<PendingTag>> {
        Ok(self
            .state()
            .tags
            .values()
            .filter(|e| e.tag.status == TagStatus::PendingEnrichment)
            .filter(|e| trip_id.map_or(true, |id| e.tag.trip_id == id))
            .take(limit.max(0) as usize)
            .map(|e| PendingTag {
                id: e.tag.id,
                trip_id: e.tag.trip_id,
                photo: e.photo.clone(),
            })
            .collect())
    }

    async fn has_pending_tags(&self, trip_id: Option<i64>) -> Result<bool> {
        Ok(self.state().tags.values().any(|e| {
            e.tag.status == TagStatus::PendingEnrichment
                && trip_id.map_or(true, |id| e.tag.trip_id == id)
        }))
    }

    async fn record_enrichment(&self, tag_id: i64, fields: &TagFields) -> Result<()> {
        let mut state = self.state();
        let tag = &mut state.tag_mut(tag_id)?.tag;
        tag.upc = fields.upc.clone();
        tag.style_number = fields.style_number.clone();
        tag.brand = fields.brand.clone();
        tag.description = fields.description.clone();
        tag.color = fields.color.clone();
        tag.size = fields.size.clone();
        tag.msrp = fields.msrp.clone();
        tag.status = TagStatus::Enriched;
        Ok(())
    }

    async fn set_tag_status(&self, tag_id: i64, status: TagStatus) -> Result<()> {
        self.state().tag_mut(tag_id)?.tag.status = status;
        Ok(())
    }

    async fn patch_tag(&self, tag_id: i64, patch: &TagPatch) -> Result<()> {
        let mut state = self.state();
        let tag = &mut state.tag_mut(tag_id)?.tag;
        if let Some(v) = &patch.upc {
            tag.upc = Some(v.clone());
        }
        if let Some(v) = &patch.style_number {
            tag.style_number = Some(v.clone());
        }
        if let Some(v) = &patch.brand {
            tag.brand = Some(v.clone());
        }
        if let Some(v) = &patch.description {
            tag.description = Some(v.clone());
        }
        if let Some(v) = &patch.color {
            tag.color = Some(v.clone());
        }
        if let Some(v) = &patch.size {
            tag.size = Some(v.clone());
        }
        if let Some(v) = &patch.msrp {
            tag.msrp = Some(v.clone());
        }
        if let Some(v) = &patch.cost {
            tag.cost = Some(v.clone());
        }
        Ok(())
    }

    async fn list_receipt_items(&self, trip_id: i64) -> Result<Vec<ReceiptLineItem>> {
        Ok(self
            .state()
            .receipt_items
            .values()
            .filter(|item| item.trip_id == trip_id)
            .cloned()
            .collect())
    }

    async fn insert_receipt_items(
        &self,
        trip_id: i64,
        items: &[NewReceiptItem],
        total_cost: &BigDecimal,
    ) -> Result<usize> {
        let mut state = self.state();
        state.trip_mut(trip_id)?.trip.total_cost = Some(total_cost.clone());
        for item in items {
            let id = state.next_id();
            state.receipt_items.insert(
                id,
                ReceiptLineItem {
                    id,
                    trip_id,
                    style_number: item.style_number.clone(),
                    description: item.description.clone(),
                    qty: item.qty,
                    price_each: item.price_each.clone(),
                    line_total: item.line_total.clone(),
                    matched: false,
                },
            );
        }
        Ok(items.len())
    }

    async fn transition_status(
        &self,
        trip_id: i64,
        expected_version: i64,
        status: TripStatus,
    ) -> Result<bool> {
        Ok(self.state().bump(trip_id, expected_version, status))
    }

    async fn apply_match(&self, trip_id: i64, expected_version: i64, plan: &MatchPlan) -> Result<bool> {
        let mut state = self.state();
        if !state.bump(trip_id, expected_version, TripStatus::Matched) {
            return Ok(false);
        }
        for assignment in &plan.assignments {
            if let Some(entry) = state.tags.get_mut(&assignment.tag_id) {
                if entry.tag.trip_id == trip_id {
                    entry.tag.cost = Some(assignment.cost.clone());
                    entry.tag.receipt_item_id = Some(assignment.receipt_item_id);
                }
            }
        }
        for item_id in &plan.matched_item_ids {
            if let Some(item) = state.receipt_items.get_mut(item_id) {
                if item.trip_id == trip_id {
                    item.matched = true;
                }
            }
        }
        Ok(true)
    }

    async fn backfill_cost(&self, trip_id: i64, cost: &BigDecimal) -> Result<u64> {
        let mut state = self.state();
        let mut updated = 0;
        for entry in state.tags.values_mut() {
            if entry.tag.trip_id == trip_id && entry.tag.cost.is_none() {
                entry.tag.cost = Some(cost.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn finalize_trip(
        &self,
        trip_id: i64,
        expected_version: i64,
        rows: &[IntakeRow],
        chunk_size: usize,
    ) -> Result<Option<usize>> {
        let fail_after = *self.fail_intake_after.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state();

        match state.trips.get(&trip_id) {
            Some(entry) if entry.trip.version == expected_version => {}
            _ => return Ok(None),
        }

        // 先在暂存区分块写入，全部成功后再一次性提交
        let mut staged: Vec<IntakeRow> = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(chunk_size.max(1)) {
            if let Some(limit) = fail_after {
                if staged.len() + chunk.len() > limit {
                    return Err(ReconError::StorageWriteFailed {
                        attempted: rows.len(),
                        reason: format!("injected failure after {} rows", staged.len()),
                    });
                }
            }
            staged.extend_from_slice(chunk);
        }

        state.intake.extend(staged);
        state.bump(trip_id, expected_version, TripStatus::Finalized);
        Ok(Some(rows.len()))
    }

    async fn count_intake_rows(&self, trip_id: i64) -> Result<i64> {
        Ok(self
            .state()
            .intake
            .iter()
            .filter(|row| row.trip_id == trip_id)
            .count() as i64)
    }

    async fn list_sales(&self, channel: Option<Channel>, barcode: Option<&str>) -> Result<Vec<SaleRecord>> {
        Ok(self
            .state()
            .sales
            .iter()
            .filter(|s| channel.map_or(true, |c| s.channel == c))
            .filter(|s| barcode.map_or(true, |b| s.barcode == b))
            .cloned()
            .collect())
    }
}
