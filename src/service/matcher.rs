use crate::db::TripStore;
use crate::error::{ReconError, Result};
use crate::models::{
    CostAssignment, LineItemCandidate, MatchPlan, MatchStats, ProposedMatch, ReceiptCapacity,
    ReceiptLineItem, TagCandidate, TagRecord, Trip,
};
use crate::oracle::MatchOracle;
use indexmap::IndexSet;
use std::collections::HashSet;
use std::sync::Arc;

/// 把 oracle 的配对结果整理成可提交的成本分配
///
/// - 每个吊牌最多接受一条，重复出现时第一条生效
/// - 每条小票明细最多被 `qty` 个吊牌使用
/// - 引用未知吊牌/明细、或明细没有单价的条目直接丢弃
pub fn plan_matches(
    items: &[ReceiptLineItem],
    tags: &[TagRecord],
    proposals: &[ProposedMatch],
) -> MatchPlan {
    let known_tags: HashSet<i64> = tags.iter().map(|t| t.id).collect();
    let mut capacity = ReceiptCapacity::from_items(items);
    let mut assigned_tags: HashSet<i64> = HashSet::new();
    let mut matched_items: IndexSet<i64> = IndexSet::new(); // 保序去重
    let mut plan = MatchPlan::default();

    for proposal in proposals {
        let item_id = proposal.receipt_item_id;

        if !known_tags.contains(&proposal.tag_id) {
            tracing::warn!("oracle returned unknown tag {}, ignored", proposal.tag_id);
            plan.discarded += 1;
            continue;
        }
        if !capacity.contains(item_id) {
            tracing::warn!("oracle returned unknown receipt item {}, ignored", item_id);
            plan.discarded += 1;
            continue;
        }
        if assigned_tags.contains(&proposal.tag_id) {
            tracing::warn!("duplicate match for tag {}, keeping the first", proposal.tag_id);
            plan.discarded += 1;
            continue;
        }
        let Some(cost) = capacity.price_of(item_id).cloned() else {
            tracing::warn!("receipt item {} has no unit price, tag {} left unpriced", item_id, proposal.tag_id);
            plan.discarded += 1;
            continue;
        };
        if !capacity.consume(item_id) {
            tracing::warn!(
                "receipt item {} already used for its full quantity, tag {} ignored",
                item_id,
                proposal.tag_id
            );
            plan.discarded += 1;
            continue;
        }

        assigned_tags.insert(proposal.tag_id);
        matched_items.insert(item_id);
        plan.assignments.push(CostAssignment {
            tag_id: proposal.tag_id,
            receipt_item_id: item_id,
            cost,
            confidence: proposal.confidence,
        });
    }

    plan.matched_item_ids = matched_items.into_iter().collect();
    plan
}

/// 小票↔吊牌匹配服务
#[derive(Clone)]
pub struct TagMatcher {
    store: Arc<dyn TripStore>,
    oracle: Arc<dyn MatchOracle>,
}

impl TagMatcher {
    pub fn new(store: Arc<dyn TripStore>, oracle: Arc<dyn MatchOracle>) -> Self {
        Self { store, oracle }
    }

    /// 单个行程匹配；oracle 失败或返回无法解析时不写入任何数据
    pub async fn run(&self, trip: &Trip) -> Result<MatchStats> {
        let trip_id = trip.id;

        // Phase 1: 加载双方数据，未 enriched 的吊牌不参与匹配
        let items = self.store.list_receipt_items(trip_id).await?;
        if items.is_empty() {
            return Err(ReconError::NoReceiptItems(trip_id));
        }
        let tags = self.store.list_enriched_tags(trip_id).await?;
        if tags.is_empty() {
            return Err(ReconError::NoEnrichedTags(trip_id));
        }

        tracing::info!(
            "Trip {}: 开始匹配, {} 条小票明细, {} 个吊牌",
            trip_id,
            items.len(),
            tags.len()
        );

        // Phase 2: oracle 配对
        let item_candidates: Vec<LineItemCandidate> = items.iter().map(Into::into).collect();
        let tag_candidates: Vec<TagCandidate> = tags.iter().map(Into::into).collect();
        let proposals = self
            .oracle
            .propose_matches(&item_candidates, &tag_candidates)
            .await
            .map_err(|e| {
                tracing::error!("Trip {}: matching oracle failed: {}", trip_id, e);
                ReconError::from(e)
            })?;

        // Phase 3: 去重、扇出校验
        let plan = plan_matches(&items, &tags, &proposals);

        // Phase 4: 原子提交
        if !self.store.apply_match(trip_id, trip.version, &plan).await? {
            return Err(ReconError::ConcurrentModification(trip_id));
        }

        let stats = MatchStats {
            trip_id,
            matched_count: plan.assignments.len(),
            total_tags: tags.len(),
            total_receipt_items: items.len(),
            discarded: plan.discarded,
            matches: plan.assignments,
        };

        tracing::info!(
            "Trip {}: 匹配完成 - 吊牌: {}/{}, 明细: {}, 丢弃: {}",
            trip_id,
            stats.matched_count,
            stats.total_tags,
            plan.matched_item_ids.len(),
            stats.discarded
        );

        Ok(stats)
    }
}
