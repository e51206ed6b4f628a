//! 行程对账流程
//!
//! `scanning → submitted → matched → finalized`，状态只向前推进。每次状态变更都
//! 带版本号校验；写操作先取行程租约，同一行程不会有两个写操作并发。

use super::lease::TripLeases;
use super::matcher::TagMatcher;
use super::fees::{is_storable_amount, round_half_away};
use super::profitability::{build_report, ProfitabilityReport};
use crate::config::PipelineConfig;
use crate::db::TripStore;
use crate::error::{ReconError, Result};
use crate::models::{
    BulkCostResult, Channel, DrainSummary, EnrichBatch, EnrichOutcome, FinalizeResult,
    IntakeRow, MatchStats, ReceiptParse, TagEnrichResult, TagPatch, TagRecord, TagStatus, Trip,
    TripStatus,
};
use crate::oracle::{MatchOracle, ReceiptReader, TagExtractor};
use crate::service::barcode::normalize_barcode;
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// submit 的结果；`background` 是已启动的 enrich + 小票解析任务
#[derive(Debug)]
pub struct Submitted {
    pub trip: Trip,
    pub background: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TripStore>,
    extractor: Arc<dyn TagExtractor>,
    receipts: Arc<dyn ReceiptReader>,
    matcher: TagMatcher,
    leases: TripLeases,
    pipeline: PipelineConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TripStore>,
        extractor: Arc<dyn TagExtractor>,
        receipts: Arc<dyn ReceiptReader>,
        match_oracle: Arc<dyn MatchOracle>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            matcher: TagMatcher::new(Arc::clone(&store), match_oracle),
            store,
            extractor,
            receipts,
            leases: TripLeases::new(),
            pipeline,
        }
    }

    async fn load_trip(&self, trip_id: i64) -> Result<Trip> {
        self.store
            .get_trip(trip_id)
            .await?
            .ok_or(ReconError::TripNotFound(trip_id))
    }

    fn require_status(trip: &Trip, allowed: &[TripStatus], action: &'static str) -> Result<()> {
        if trip.status == TripStatus::Finalized {
            return Err(ReconError::TripFinalized(trip.id));
        }
        if !allowed.contains(&trip.status) {
            return Err(ReconError::InvalidTransition {
                trip_id: trip.id,
                status: trip.status,
                action,
            });
        }
        Ok(())
    }

    // ---------- 采购员录入 ----------

    pub async fn create_trip(&self, buyer_name: &str) -> Result<Trip> {
        let buyer_name = buyer_name.trim();
        if buyer_name.is_empty() {
            return Err(ReconError::InvalidInput("buyer name is required".to_string()));
        }
        let trip = self.store.create_trip(buyer_name).await?;
        tracing::info!("Trip {} created for {}", trip.id, trip.buyer_name);
        Ok(trip)
    }

    /// 记录一张吊牌；没有照片时后续会被标记为 needs_manual
    pub async fn add_tag(&self, trip_id: i64, photo: Option<Vec<u8>>) -> Result<TagRecord> {
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Scanning], "add tags")?;
        let photo = photo.filter(|p| !p.is_empty());
        self.store.add_tag(trip_id, photo.as_deref()).await
    }

    pub async fn attach_receipt(&self, trip_id: i64, photo: Vec<u8>) -> Result<Trip> {
        if photo.is_empty() {
            return Err(ReconError::InvalidInput("receipt photo is empty".to_string()));
        }
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Scanning], "attach a receipt")?;
        self.store.set_receipt_photo(trip_id, &photo).await?;
        self.load_trip(trip_id).await
    }

    /// scanning → submitted，并在后台触发 enrich 与小票解析
    ///
    /// 后台任务的失败只写日志，调用方通过吊牌/明细状态观察进度。
    pub async fn submit(&self, trip_id: i64) -> Result<Submitted> {
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Scanning], "submit")?;
        if trip.tag_count < 1 {
            return Err(ReconError::NoTags(trip_id));
        }
        if !self
            .store
            .transition_status(trip_id, trip.version, TripStatus::Submitted)
            .await?
        {
            return Err(ReconError::ConcurrentModification(trip_id));
        }
        let trip = self.load_trip(trip_id).await?;
        tracing::info!("Trip {} submitted with {} tags", trip_id, trip.tag_count);

        let this = self.clone();
        let has_receipt = trip.has_receipt;
        let background = tokio::spawn(async move {
            let max_rounds = this.pipeline.max_enrich_rounds;
            let (enriched, parsed) = futures::join!(
                this.drain_enrichment(Some(trip_id), max_rounds),
                async {
                    if has_receipt {
                        Some(this.parse_receipt(trip_id).await)
                    } else {
                        None
                    }
                }
            );
            if let Err(e) = enriched {
                tracing::error!("Trip {}: background enrichment failed: {}", trip_id, e);
            }
            if let Some(Err(e)) = parsed {
                tracing::error!("Trip {}: background receipt parse failed: {}", trip_id, e);
            }
        });

        Ok(Submitted { trip, background })
    }

    // ---------- 吊牌识别 ----------

    /// 处理一批待识别吊牌 (最多 `enrich_batch_size` 个)
    ///
    /// 单个吊牌识别失败只影响该吊牌 (enrichment_failed)，不中断整批。
    pub async fn enrich(&self, trip_id: Option<i64>) -> Result<EnrichBatch> {
        if let Some(id) = trip_id {
            self.load_trip(id).await?;
        }

        let pending = self
            .store
            .list_pending_tags(trip_id, self.pipeline.enrich_batch_size)
            .await?;
        let mut results = Vec::with_capacity(pending.len());

        for tag in pending {
            let photo = match tag.photo.as_deref() {
                Some(bytes) if !bytes.is_empty() => bytes,
                _ => {
                    self.store.set_tag_status(tag.id, TagStatus::NeedsManual).await?;
                    results.push(TagEnrichResult {
                        tag_id: tag.id,
                        outcome: EnrichOutcome::Skipped,
                        reason: Some("no photo".to_string()),
                    });
                    continue;
                }
            };

            match self.extractor.extract(photo).await {
                Ok(fields) => {
                    self.store.record_enrichment(tag.id, &fields).await?;
                    results.push(TagEnrichResult {
                        tag_id: tag.id,
                        outcome: EnrichOutcome::Enriched,
                        reason: None,
                    });
                }
                Err(e) => {
                    let err = ReconError::ExtractionFailed(e.to_string());
                    tracing::warn!("Tag {} (trip {}): {}", tag.id, tag.trip_id, err);
                    self.store
                        .set_tag_status(tag.id, TagStatus::EnrichmentFailed)
                        .await?;
                    results.push(TagEnrichResult {
                        tag_id: tag.id,
                        outcome: EnrichOutcome::Failed,
                        reason: Some(err.to_string()),
                    });
                }
            }
        }

        let has_more = self.store.has_pending_tags(trip_id).await?;
        let batch = EnrichBatch {
            processed: results.len(),
            has_more,
            results,
        };
        tracing::info!(
            "Enrich batch (trip {:?}): processed {}, enriched {}, failed {}, skipped {}, has_more {}",
            trip_id,
            batch.processed,
            batch.count(EnrichOutcome::Enriched),
            batch.count(EnrichOutcome::Failed),
            batch.count(EnrichOutcome::Skipped),
            batch.has_more
        );
        Ok(batch)
    }

    /// 反复调用 enrich 直到没有待处理吊牌，或达到 `max_rounds`
    pub async fn drain_enrichment(&self, trip_id: Option<i64>, max_rounds: u32) -> Result<DrainSummary> {
        let mut summary = DrainSummary {
            rounds: 0,
            processed: 0,
            enriched: 0,
            failed: 0,
            skipped: 0,
            has_more: true,
        };

        while summary.has_more && summary.rounds < max_rounds {
            let batch = self.enrich(trip_id).await?;
            summary.rounds += 1;
            summary.processed += batch.processed;
            summary.enriched += batch.count(EnrichOutcome::Enriched);
            summary.failed += batch.count(EnrichOutcome::Failed);
            summary.skipped += batch.count(EnrichOutcome::Skipped);
            summary.has_more = batch.has_more;
            if batch.processed == 0 {
                break;
            }
        }

        if summary.has_more {
            tracing::warn!(
                "Enrichment drain (trip {:?}) stopped after {} rounds with tags still pending",
                trip_id,
                summary.rounds
            );
        }
        Ok(summary)
    }

    // ---------- 小票解析 ----------

    pub async fn parse_receipt(&self, trip_id: i64) -> Result<ReceiptParse> {
        let _lease = self.leases.acquire(trip_id, "parse_receipt")?;
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(
            &trip,
            &[TripStatus::Scanning, TripStatus::Submitted, TripStatus::Matched],
            "parse a receipt",
        )?;

        let photo = self
            .store
            .get_receipt_photo(trip_id)
            .await?
            .filter(|p| !p.is_empty())
            .ok_or(ReconError::NoReceiptPhoto(trip_id))?;

        if !self.store.list_receipt_items(trip_id).await?.is_empty() {
            return Err(ReconError::ReceiptAlreadyParsed(trip_id));
        }

        let items = self.receipts.read_receipt(&photo).await.map_err(|e| {
            tracing::error!("Trip {}: receipt oracle failed: {}", trip_id, e);
            ReconError::from(e)
        })?;

        let total: BigDecimal = items
            .iter()
            .filter_map(|item| item.line_total.as_ref())
            .fold(BigDecimal::zero(), |acc, v| acc + v);
        let total_cost = round_half_away(&total, 2);

        let parsed_count = self
            .store
            .insert_receipt_items(trip_id, &items, &total_cost)
            .await?;
        tracing::info!(
            "Trip {}: receipt parsed, {} line items, total {}",
            trip_id,
            parsed_count,
            total_cost
        );

        Ok(ReceiptParse {
            trip_id,
            parsed_count,
            total_cost,
        })
    }

    // ---------- 匹配 ----------

    /// 运行小票↔吊牌匹配；可重复执行，重新推导成本
    pub async fn match_trip(&self, trip_id: i64) -> Result<MatchStats> {
        let _lease = self.leases.acquire(trip_id, "match")?;
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Submitted, TripStatus::Matched], "match")?;
        self.matcher.run(&trip).await
    }

    // ---------- 人工成本 ----------

    /// 给所有未定价吊牌设置统一成本；已定价的不受影响，重复执行无副作用
    pub async fn bulk_set_cost(&self, trip_id: i64, cost: &BigDecimal) -> Result<BulkCostResult> {
        if !is_storable_amount(cost) {
            return Err(ReconError::InvalidInput("bulk cost is out of range".to_string()));
        }
        if cost <= &BigDecimal::zero() {
            return Err(ReconError::InvalidInput(format!("bulk cost must be positive, got {}", cost)));
        }
        let _lease = self.leases.acquire(trip_id, "bulk_cost")?;
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Submitted, TripStatus::Matched], "set costs")?;

        let updated = self
            .store
            .backfill_cost(trip_id, &round_half_away(cost, 2))
            .await?;
        tracing::info!("Trip {}: bulk cost {} applied to {} tags", trip_id, cost, updated);
        Ok(BulkCostResult { trip_id, updated })
    }

    /// 人工修正吊牌字段
    ///
    /// 识别失败 (enrichment_failed / needs_manual) 的吊牌补录了款号、描述、UPC 或品牌后
    /// 视为已识别，可以参与匹配和入库。
    pub async fn edit_tag(&self, tag_id: i64, patch: &TagPatch) -> Result<TagRecord> {
        let tag = self
            .store
            .get_tag(tag_id)
            .await?
            .ok_or(ReconError::TagNotFound(tag_id))?;
        let trip = self.load_trip(tag.trip_id).await?;
        if trip.status == TripStatus::Finalized {
            return Err(ReconError::TripFinalized(trip.id));
        }
        for (name, value) in [("cost", &patch.cost), ("msrp", &patch.msrp)] {
            if let Some(v) = value {
                if !is_storable_amount(v) {
                    return Err(ReconError::InvalidInput(format!("{} is out of range", name)));
                }
                if v < &BigDecimal::zero() {
                    return Err(ReconError::InvalidInput(format!("{} must not be negative", name)));
                }
            }
        }
        if patch.is_empty() {
            return Ok(tag);
        }

        let _lease = self.leases.acquire(trip.id, "edit_tag")?;
        self.store.patch_tag(tag_id, patch).await?;
        if matches!(tag.status, TagStatus::EnrichmentFailed | TagStatus::NeedsManual)
            && patch.identifies_item()
        {
            self.store.set_tag_status(tag_id, TagStatus::Enriched).await?;
            tracing::info!("Tag {} (trip {}) enriched manually", tag_id, trip.id);
        }
        self.store
            .get_tag(tag_id)
            .await?
            .ok_or(ReconError::TagNotFound(tag_id))
    }

    // ---------- 入库 ----------

    /// 把行程的全部吊牌写入 intake 并锁定行程
    ///
    /// 允许的前置状态：matched；或 submitted、至少一个吊牌已识别且没有可配对的小票明细
    /// (没有小票，或小票解析结果为空)。
    /// 已 finalized 的行程直接拒绝，不会产生重复入库。
    pub async fn finalize(&self, trip_id: i64) -> Result<FinalizeResult> {
        let _lease = self.leases.acquire(trip_id, "finalize")?;
        let trip = self.load_trip(trip_id).await?;
        Self::require_status(&trip, &[TripStatus::Submitted, TripStatus::Matched], "finalize")?;

        let tags = self.store.list_tags(trip_id).await?;
        if tags.is_empty() {
            return Err(ReconError::NoTags(trip_id));
        }
        if trip.status == TripStatus::Submitted {
            if !tags.iter().any(|t| t.status == TagStatus::Enriched) {
                return Err(ReconError::NoEnrichedTags(trip_id));
            }
            // 小票解析出明细时必须先匹配；没有明细可配对时直接入库
            if trip.has_receipt && !self.store.list_receipt_items(trip_id).await?.is_empty() {
                return Err(ReconError::InvalidTransition {
                    trip_id,
                    status: trip.status,
                    action: "finalize before matching",
                });
            }
        }

        let rows: Vec<IntakeRow> = tags
            .iter()
            .map(|tag| IntakeRow::from_tag(tag, &self.pipeline.default_brand))
            .collect();
        let unpriced_count = tags.iter().filter(|t| !t.is_priced()).count();

        let inserted_count = self
            .store
            .finalize_trip(trip_id, trip.version, &rows, self.pipeline.intake_chunk_size)
            .await
            .map_err(|e| {
                tracing::error!("Trip {}: finalize failed, status unchanged: {}", trip_id, e);
                e
            })?
            .ok_or(ReconError::ConcurrentModification(trip_id))?;

        if unpriced_count > 0 {
            tracing::warn!("Trip {}: finalized with {} unpriced tags", trip_id, unpriced_count);
        }
        tracing::info!("Trip {}: finalized, {} intake rows", trip_id, inserted_count);

        Ok(FinalizeResult {
            trip_id,
            inserted_count,
            unpriced_count,
        })
    }

    // ---------- 利润报表 ----------

    pub async fn profitability(
        &self,
        channel: Option<Channel>,
        barcode: Option<&str>,
    ) -> Result<ProfitabilityReport> {
        let barcode = barcode.map(normalize_barcode).filter(|b| !b.is_empty());
        let sales = self.store.list_sales(channel, barcode.as_deref()).await?;
        Ok(build_report(&sales))
    }
}
