#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use kickstart_recon::config::PipelineConfig;
use kickstart_recon::models::{
    Confidence, LineItemCandidate, NewReceiptItem, ProposedMatch, TagCandidate, TagFields,
};
use kickstart_recon::oracle::{MatchOracle, OracleError, ReceiptReader, TagExtractor};
use kickstart_recon::{MemoryTripStore, Reconciler};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// 照片内容为 `STYLE|DESCRIPTION`；内容为 `fail` 时模拟识别失败
#[derive(Default)]
pub struct FakeExtractor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TagExtractor for FakeExtractor {
    async fn extract(&self, photo: &[u8]) -> Result<TagFields, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(photo);
        if text == "fail" {
            return Err(OracleError::Unavailable("vision service returned 529".to_string()));
        }
        let mut parts = text.splitn(2, '|');
        Ok(TagFields {
            style_number: parts.next().map(str::to_string),
            description: parts.next().map(str::to_string),
            ..TagFields::default()
        })
    }
}

pub struct FakeReceipt {
    pub items: Mutex<Vec<NewReceiptItem>>,
    pub calls: AtomicUsize,
}

impl FakeReceipt {
    pub fn new(items: Vec<NewReceiptItem>) -> Self {
        Self {
            items: Mutex::new(items),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReceiptReader for FakeReceipt {
    async fn read_receipt(&self, _photo: &[u8]) -> Result<Vec<NewReceiptItem>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.lock().unwrap().clone())
    }
}

pub fn receipt_item(style: &str, description: &str, qty: i32, price: &str) -> NewReceiptItem {
    let price_each = dec(price);
    NewReceiptItem {
        style_number: Some(style.to_string()),
        description: Some(description.to_string()),
        qty,
        line_total: Some(&price_each * BigDecimal::from(qty)),
        price_each: Some(price_each),
    }
}

pub enum MatchMode {
    /// 明细款号以吊牌款号开头即配对 (high)
    ByStylePrefix,
    Fixed(Vec<ProposedMatch>),
    Unavailable,
    Malformed,
    /// 进入 oracle 后等待放行，再按款号配对
    Gated,
}

pub struct FakeMatcher {
    pub mode: Mutex<MatchMode>,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeMatcher {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn set_mode(&self, mode: MatchMode) {
        *self.mode.lock().unwrap() = mode;
    }
}

fn by_style_prefix(items: &[LineItemCandidate], tags: &[TagCandidate]) -> Vec<ProposedMatch> {
    let mut out = Vec::new();
    for tag in tags {
        let Some(style) = tag.style_number.as_deref() else { continue };
        if let Some(item) = items
            .iter()
            .find(|i| i.style_number.as_deref().map_or(false, |s| s.starts_with(style)))
        {
            out.push(ProposedMatch {
                tag_id: tag.id,
                receipt_item_id: item.id,
                confidence: Confidence::High,
            });
        }
    }
    out
}

#[async_trait]
impl MatchOracle for FakeMatcher {
    async fn propose_matches(
        &self,
        items: &[LineItemCandidate],
        tags: &[TagCandidate],
    ) -> Result<Vec<ProposedMatch>, OracleError> {
        let scripted = {
            let mode = self.mode.lock().unwrap();
            match &*mode {
                MatchMode::ByStylePrefix => Some(Ok(by_style_prefix(items, tags))),
                MatchMode::Fixed(proposals) => Some(Ok(proposals.clone())),
                MatchMode::Unavailable => {
                    Some(Err(OracleError::Unavailable("status 503".to_string())))
                }
                MatchMode::Malformed => {
                    Some(Err(OracleError::Parse("expected a JSON array".to_string())))
                }
                MatchMode::Gated => None,
            }
        };
        if let Some(result) = scripted {
            return result;
        }
        self.entered.notify_one();
        self.release.notified().await;
        Ok(by_style_prefix(items, tags))
    }
}

pub struct Harness {
    pub store: Arc<MemoryTripStore>,
    pub extractor: Arc<FakeExtractor>,
    pub receipts: Arc<FakeReceipt>,
    pub matcher: Arc<FakeMatcher>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new(receipt_items: Vec<NewReceiptItem>) -> Self {
        Self::with_pipeline(receipt_items, PipelineConfig::default())
    }

    pub fn with_pipeline(receipt_items: Vec<NewReceiptItem>, pipeline: PipelineConfig) -> Self {
        let store = Arc::new(MemoryTripStore::new());
        let extractor = Arc::new(FakeExtractor::default());
        let receipts = Arc::new(FakeReceipt::new(receipt_items));
        let matcher = Arc::new(FakeMatcher::new(MatchMode::ByStylePrefix));
        let reconciler = Reconciler::new(
            store.clone(),
            extractor.clone(),
            receipts.clone(),
            matcher.clone(),
            pipeline,
        );
        Self {
            store,
            extractor,
            receipts,
            matcher,
            reconciler,
        }
    }

    /// 建行程、录入吊牌、可选附小票，提交并等待后台 enrich/解析完成
    pub async fn submitted_trip(&self, tag_photos: &[&str], with_receipt: bool) -> i64 {
        let trip = self.reconciler.create_trip("Dana").await.unwrap();
        for photo in tag_photos {
            self.reconciler
                .add_tag(trip.id, Some(photo.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        if with_receipt {
            self.reconciler
                .attach_receipt(trip.id, b"receipt-jpeg".to_vec())
                .await
                .unwrap();
        }
        let submitted = self.reconciler.submit(trip.id).await.unwrap();
        submitted.background.await.unwrap();
        trip.id
    }
}
