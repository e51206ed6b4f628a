use super::TripStore;
use crate::error::{ReconError, Result};
use crate::models::{
    Channel, IntakeRow, MatchPlan, NewReceiptItem, PendingTag, ReceiptLineItem, SaleRecord,
    TagFields, TagPatch, TagRecord, TagStatus, Trip, TripStatus,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::time::{Duration, Instant};

const TRIP_COLUMNS: &str = "id, buyer_name, receipt_photo IS NOT NULL AS has_receipt, status, \
                            tag_count, total_cost, version, created_at";

const TAG_COLUMNS: &str = "id, trip_id, photo IS NOT NULL AS has_photo, upc, style_number, brand, \
                           description, color, size, msrp, cost, receipt_item_id, status";

/// 单个批量 INSERT 的超时
const INSERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres 存储
pub struct PgTripStore {
    pool: PgPool,
}

impl PgTripStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn create_trip(&self, buyer_name: &str) -> Result<Trip> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "INSERT INTO kickstart_trips (buyer_name, status) VALUES ($1, 'scanning') RETURNING {}",
            TRIP_COLUMNS
        ))
        .bind(buyer_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(trip)
    }

    async fn get_trip(&self, trip_id: i64) -> Result<Option<Trip>> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {} FROM kickstart_trips WHERE id = $1",
            TRIP_COLUMNS
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(trip)
    }

    async fn set_receipt_photo(&self, trip_id: i64, photo: &[u8]) -> Result<()> {
        sqlx::query("UPDATE kickstart_trips SET receipt_photo = $1 WHERE id = $2")
            .bind(photo)
            .bind(trip_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_receipt_photo(&self, trip_id: i64) -> Result<Option<Vec<u8>>> {
        let photo = sqlx::query_scalar::<_, Option<Vec<u8>>>(
            "SELECT receipt_photo FROM kickstart_trips WHERE id = $1",
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(photo.flatten())
    }

    async fn add_tag(&self, trip_id: i64, photo: Option<&[u8]>) -> Result<TagRecord> {
        let mut tx = self.pool.begin().await?;

        let tag = sqlx::query_as::<_, TagRecord>(&format!(
            "INSERT INTO kickstart_tag_photos (trip_id, photo, status) \
             VALUES ($1, $2, 'pending_enrichment') RETURNING {}",
            TAG_COLUMNS
        ))
        .bind(trip_id)
        .bind(photo)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE kickstart_trips SET tag_count = tag_count + 1 WHERE id = $1")
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(tag)
    }

    async fn get_tag(&self, tag_id: i64) -> Result<Option<TagRecord>> {
        let tag = sqlx::query_as::<_, TagRecord>(&format!(
            "SELECT {} FROM kickstart_tag_photos WHERE id = $1",
            TAG_COLUMNS
        ))
        .bind(tag_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tag)
    }

    async fn list_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>> {
        let tags = sqlx::query_as::<_, TagRecord>(&format!(
            "SELECT {} FROM kickstart_tag_photos WHERE trip_id = $1 ORDER BY id",
            TAG_COLUMNS
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn list_enriched_tags(&self, trip_id: i64) -> Result<Vec<TagRecord>> {
        let tags = sqlx::query_as::<_, TagRecord>(&format!(
            "SELECT {} FROM kickstart_tag_photos WHERE trip_id = $1 AND status = 'enriched' ORDER BY id",
            TAG_COLUMNS
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn list_pending_tags(&self, trip_id: Option<i64>, limit: i64) -> Result<Vec<PendingTag>> {
        let tags = sqlx::query_as::<_, PendingTag>(
            r#"
            SELECT id, trip_id, photo
            FROM kickstart_tag_photos
            WHERE status = 'pending_enrichment'
              AND ($1::bigint IS NULL OR trip_id = $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(trip_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    async fn has_pending_tags(&self, trip_id: Option<i64>) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM kickstart_tag_photos
                WHERE status = 'pending_enrichment'
                  AND ($1::bigint IS NULL OR trip_id = $1)
            )
            "#,
        )
        .bind(trip_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_enrichment(&self, tag_id: i64, fields: &TagFields) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE kickstart_tag_photos
            SET upc = $1, style_number = $2, brand = $3, description = $4,
                color = $5, size = $6, msrp = $7, status = 'enriched'
            WHERE id = $8
            "#,
        )
        .bind(&fields.upc)
        .bind(&fields.style_number)
        .bind(&fields.brand)
        .bind(&fields.description)
        .bind(&fields.color)
        .bind(&fields.size)
        .bind(&fields.msrp)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_tag_status(&self, tag_id: i64, status: TagStatus) -> Result<()> {
        sqlx::query("UPDATE kickstart_tag_photos SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(tag_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn patch_tag(&self, tag_id: i64, patch: &TagPatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE kickstart_tag_photos
            SET upc = COALESCE($1, upc),
                style_number = COALESCE($2, style_number),
                brand = COALESCE($3, brand),
                description = COALESCE($4, description),
                color = COALESCE($5, color),
                size = COALESCE($6, size),
                msrp = COALESCE($7, msrp),
                cost = COALESCE($8, cost)
            WHERE id = $9
            "#,
        )
        .bind(&patch.upc)
        .bind(&patch.style_number)
        .bind(&patch.brand)
        .bind(&patch.description)
        .bind(&patch.color)
        .bind(&patch.size)
        .bind(&patch.msrp)
        .bind(&patch.cost)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_receipt_items(&self, trip_id: i64) -> Result<Vec<ReceiptLineItem>> {
        let items = sqlx::query_as::<_, ReceiptLineItem>(
            r#"
            SELECT id, trip_id, style_number, description, qty, price_each, line_total, matched
            FROM kickstart_receipt_items
            WHERE trip_id = $1
            ORDER BY id
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn insert_receipt_items(
        &self,
        trip_id: i64,
        items: &[NewReceiptItem],
        total_cost: &BigDecimal,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        if !items.is_empty() {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO kickstart_receipt_items (trip_id, style_number, description, qty, price_each, line_total) ",
            );
            query_builder.push_values(items, |mut b, item| {
                b.push_bind(trip_id)
                    .push_bind(item.style_number.clone())
                    .push_bind(item.description.clone())
                    .push_bind(item.qty)
                    .push_bind(item.price_each.clone())
                    .push_bind(item.line_total.clone());
            });
            query_builder.build().execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE kickstart_trips SET total_cost = $1 WHERE id = $2")
            .bind(total_cost)
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(items.len())
    }

    async fn transition_status(
        &self,
        trip_id: i64,
        expected_version: i64,
        status: TripStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE kickstart_trips SET status = $1, version = version + 1 WHERE id = $2 AND version = $3",
        )
        .bind(status.as_str())
        .bind(trip_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn apply_match(&self, trip_id: i64, expected_version: i64, plan: &MatchPlan) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            "UPDATE kickstart_trips SET status = 'matched', version = version + 1 WHERE id = $1 AND version = $2",
        )
        .bind(trip_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for assignment in &plan.assignments {
            sqlx::query(
                "UPDATE kickstart_tag_photos SET cost = $1, receipt_item_id = $2 WHERE id = $3 AND trip_id = $4",
            )
            .bind(&assignment.cost)
            .bind(assignment.receipt_item_id)
            .bind(assignment.tag_id)
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;
        }

        if !plan.matched_item_ids.is_empty() {
            sqlx::query(
                "UPDATE kickstart_receipt_items SET matched = TRUE WHERE trip_id = $1 AND id = ANY($2)",
            )
            .bind(trip_id)
            .bind(&plan.matched_item_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn backfill_cost(&self, trip_id: i64, cost: &BigDecimal) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE kickstart_tag_photos SET cost = $1 WHERE trip_id = $2 AND cost IS NULL",
        )
        .bind(cost)
        .bind(trip_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finalize_trip(
        &self,
        trip_id: i64,
        expected_version: i64,
        rows: &[IntakeRow],
        chunk_size: usize,
    ) -> Result<Option<usize>> {
        let attempted = rows.len();
        let write_failed = |reason: String| ReconError::StorageWriteFailed { attempted, reason };

        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            "UPDATE kickstart_trips SET status = 'finalized', version = version + 1 WHERE id = $1 AND version = $2",
        )
        .bind(trip_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tracing::debug!("开始写入 intake, {} 条记录, 分块 {}", attempted, chunk_size);
        let start_time = Instant::now();
        let mut inserted = 0usize;

        for chunk in rows.chunks(chunk_size.max(1)) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO kickstart_intake (
                    trip_id, tag_id, upc, style_number, brand, description,
                    color, size, msrp, cost, status
                ) ",
            );
            query_builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.trip_id)
                    .push_bind(row.tag_id)
                    .push_bind(row.upc.clone())
                    .push_bind(row.style_number.clone())
                    .push_bind(row.brand.clone())
                    .push_bind(row.description.clone())
                    .push_bind(row.color.clone())
                    .push_bind(row.size.clone())
                    .push_bind(row.msrp.clone())
                    .push_bind(row.cost.clone())
                    .push_bind(row.status.clone());
            });

            // tx 在出错返回时被 drop，已写入的分块随之回滚
            match tokio::time::timeout(INSERT_TIMEOUT, query_builder.build().execute(&mut *tx)).await {
                Ok(Ok(result)) => {
                    inserted += result.rows_affected() as usize;
                }
                Ok(Err(e)) => {
                    tracing::error!("✗ intake INSERT 失败, trip {}, 已写 {} 行, 错误: {:?}", trip_id, inserted, e);
                    return Err(write_failed(e.to_string()));
                }
                Err(_) => {
                    tracing::error!("✗ intake INSERT 超时 (>30秒), trip {}", trip_id);
                    return Err(write_failed("insert timed out".to_string()));
                }
            }
        }

        tx.commit().await.map_err(|e| write_failed(e.to_string()))?;
        tracing::info!(
            "✓ trip {} finalized, intake 写入 {} 行, 耗时: {:?}",
            trip_id,
            inserted,
            start_time.elapsed()
        );
        Ok(Some(inserted))
    }

    async fn count_intake_rows(&self, trip_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM kickstart_intake WHERE trip_id = $1",
        )
        .bind(trip_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_sales(&self, channel: Option<Channel>, barcode: Option<&str>) -> Result<Vec<SaleRecord>> {
        let sales = sqlx::query_as::<_, SaleRecord>(
            r#"
            SELECT id, listing, barcode, description, channel, buyer_paid,
                   coupon_amount, cost_basis, status
            FROM sales
            WHERE ($1::text IS NULL OR channel = $1)
              AND ($2::text IS NULL OR barcode = $2)
            ORDER BY id
            "#,
        )
        .bind(channel.map(|c| c.as_str()))
        .bind(barcode)
        .fetch_all(&self.pool)
        .await?;
        Ok(sales)
    }
}
