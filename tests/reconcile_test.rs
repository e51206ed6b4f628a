mod common;

use common::{dec, receipt_item, Harness, MatchMode};
use kickstart_recon::config::PipelineConfig;
use kickstart_recon::models::{Confidence, EnrichOutcome, ProposedMatch, TagPatch, TagStatus, TripStatus};
use kickstart_recon::{ReconError, TripStore};
use std::sync::atomic::Ordering;

fn dress_receipt() -> Vec<kickstart_recon::models::NewReceiptItem> {
    vec![receipt_item("OB123X", "Floral Dress", 1, "24.00")]
}

#[tokio::test]
async fn matched_tag_takes_receipt_price_and_others_stay_unpriced() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress", "C456|Top"], true).await;

    let trip = h.store.get_trip(trip_id).await.unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::Submitted);
    assert_eq!(trip.total_cost, Some(dec("24.00")));

    let stats = h.reconciler.match_trip(trip_id).await.unwrap();
    assert_eq!(stats.matched_count, 1);
    assert_eq!(stats.total_tags, 2);
    assert_eq!(stats.matches[0].confidence, Confidence::High);

    let tags = h.store.list_tags(trip_id).await.unwrap();
    let dress = tags.iter().find(|t| t.style_number.as_deref() == Some("OB123")).unwrap();
    let top = tags.iter().find(|t| t.style_number.as_deref() == Some("C456")).unwrap();
    let items = h.store.list_receipt_items(trip_id).await.unwrap();

    assert_eq!(dress.cost, Some(dec("24.00")));
    assert_eq!(dress.receipt_item_id, Some(items[0].id));
    assert_eq!(top.cost, None);
    assert!(items[0].matched);
    assert_eq!(
        h.store.get_trip(trip_id).await.unwrap().unwrap().status,
        TripStatus::Matched
    );
}

#[tokio::test]
async fn match_without_receipt_items_mutates_nothing() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress"], false).await;

    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoReceiptItems(id) if id == trip_id));

    let tags = h.store.list_tags(trip_id).await.unwrap();
    assert!(tags.iter().all(|t| t.cost.is_none()));
    assert_eq!(
        h.store.get_trip(trip_id).await.unwrap().unwrap().status,
        TripStatus::Submitted
    );
}

#[tokio::test]
async fn match_requires_enriched_tags() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["fail"], true).await;

    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoEnrichedTags(_)));
}

#[tokio::test]
async fn oracle_failures_leave_trip_unchanged() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress"], true).await;

    h.matcher.set_mode(MatchMode::Unavailable);
    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::OracleUnavailable(_)));

    h.matcher.set_mode(MatchMode::Malformed);
    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::OracleParseError(_)));

    let trip = h.store.get_trip(trip_id).await.unwrap().unwrap();
    assert_eq!(trip.status, TripStatus::Submitted);
    assert!(h.store.list_tags(trip_id).await.unwrap()[0].cost.is_none());
    assert!(!h.store.list_receipt_items(trip_id).await.unwrap()[0].matched);

    // 重新运行即可恢复
    h.matcher.set_mode(MatchMode::ByStylePrefix);
    assert_eq!(h.reconciler.match_trip(trip_id).await.unwrap().matched_count, 1);
}

#[tokio::test]
async fn duplicate_proposals_for_a_tag_keep_the_first() {
    let h = Harness::new(vec![
        receipt_item("OB123X", "Floral Dress", 1, "24.00"),
        receipt_item("OB999", "Slip Dress", 1, "31.00"),
    ]);
    let trip_id = h.submitted_trip(&["OB123|Dress"], true).await;
    let tag_id = h.store.list_tags(trip_id).await.unwrap()[0].id;
    let items = h.store.list_receipt_items(trip_id).await.unwrap();

    h.matcher.set_mode(MatchMode::Fixed(vec![
        ProposedMatch {
            tag_id,
            receipt_item_id: items[0].id,
            confidence: Confidence::Medium,
        },
        ProposedMatch {
            tag_id,
            receipt_item_id: items[1].id,
            confidence: Confidence::High,
        },
    ]));
    let stats = h.reconciler.match_trip(trip_id).await.unwrap();

    assert_eq!(stats.matched_count, 1);
    assert_eq!(stats.discarded, 1);
    let tag = h.store.get_tag(tag_id).await.unwrap().unwrap();
    assert_eq!(tag.cost, Some(dec("24.00")));
    let items = h.store.list_receipt_items(trip_id).await.unwrap();
    assert!(items[0].matched);
    assert!(!items[1].matched);
}

#[tokio::test]
async fn multi_quantity_line_prices_several_tags() {
    let h = Harness::new(vec![receipt_item("T100", "Tank", 2, "8.50")]);
    let trip_id = h
        .submitted_trip(&["T100|Tank", "T100|Tank", "T100|Tank"], true)
        .await;

    let stats = h.reconciler.match_trip(trip_id).await.unwrap();

    assert_eq!(stats.matched_count, 2);
    let priced = h
        .store
        .list_tags(trip_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.cost == Some(dec("8.50")))
        .count();
    assert_eq!(priced, 2);
}

#[tokio::test]
async fn match_is_rejected_before_submit() {
    let h = Harness::new(dress_receipt());
    let trip = h.reconciler.create_trip("Dana").await.unwrap();
    h.reconciler
        .add_tag(trip.id, Some(b"OB123|Dress".to_vec()))
        .await
        .unwrap();

    let err = h.reconciler.match_trip(trip.id).await.unwrap_err();
    assert!(matches!(
        err,
        ReconError::InvalidTransition { status: TripStatus::Scanning, .. }
    ));
}

#[tokio::test]
async fn submit_requires_tags_and_freezes_scanning() {
    let h = Harness::new(dress_receipt());
    let trip = h.reconciler.create_trip("Dana").await.unwrap();

    let err = h.reconciler.submit(trip.id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoTags(_)));

    h.reconciler
        .add_tag(trip.id, Some(b"OB123|Dress".to_vec()))
        .await
        .unwrap();
    let submitted = h.reconciler.submit(trip.id).await.unwrap();
    submitted.background.await.unwrap();

    let err = h.reconciler.add_tag(trip.id, None).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidTransition { .. }));
    let err = h.reconciler.submit(trip.id).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidTransition { .. }));
}

#[tokio::test]
async fn create_trip_rejects_blank_buyer() {
    let h = Harness::new(vec![]);
    let err = h.reconciler.create_trip("   ").await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidInput(_)));
}

#[tokio::test]
async fn enrich_processes_bounded_batches_and_flags_bad_tags() {
    let h = Harness::new(vec![]);
    let trip = h.reconciler.create_trip("Dana").await.unwrap();
    h.reconciler.add_tag(trip.id, None).await.unwrap();
    h.reconciler
        .add_tag(trip.id, Some(b"fail".to_vec()))
        .await
        .unwrap();
    for i in 0..5 {
        h.reconciler
            .add_tag(trip.id, Some(format!("S{}|Skirt", i).into_bytes()))
            .await
            .unwrap();
    }

    let first = h.reconciler.enrich(Some(trip.id)).await.unwrap();
    assert_eq!(first.processed, 5);
    assert!(first.has_more);
    assert_eq!(first.count(EnrichOutcome::Skipped), 1);
    assert_eq!(first.count(EnrichOutcome::Failed), 1);
    assert_eq!(first.count(EnrichOutcome::Enriched), 3);
    let failed = first
        .results
        .iter()
        .find(|r| r.outcome == EnrichOutcome::Failed)
        .unwrap();
    assert!(failed.reason.as_deref().unwrap().contains("extraction failed"));

    let second = h.reconciler.enrich(Some(trip.id)).await.unwrap();
    assert_eq!(second.processed, 2);
    assert!(!second.has_more);

    let third = h.reconciler.enrich(Some(trip.id)).await.unwrap();
    assert_eq!(third.processed, 0);

    let statuses: Vec<TagStatus> = h
        .store
        .list_tags(trip.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.status)
        .collect();
    assert_eq!(statuses[0], TagStatus::NeedsManual);
    assert_eq!(statuses[1], TagStatus::EnrichmentFailed);
    assert!(statuses[2..].iter().all(|s| *s == TagStatus::Enriched));
    // 无照片的吊牌不调用 oracle
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn drain_enrichment_stops_when_nothing_is_pending() {
    let pipeline = PipelineConfig {
        enrich_batch_size: 2,
        ..PipelineConfig::default()
    };
    let h = Harness::with_pipeline(vec![], pipeline);
    let trip = h.reconciler.create_trip("Dana").await.unwrap();
    for i in 0..5 {
        h.reconciler
            .add_tag(trip.id, Some(format!("S{}|Skirt", i).into_bytes()))
            .await
            .unwrap();
    }

    let summary = h.reconciler.drain_enrichment(Some(trip.id), 50).await.unwrap();
    assert_eq!(summary.rounds, 3);
    assert_eq!(summary.enriched, 5);
    assert!(!summary.has_more);

    let capped = h.reconciler.drain_enrichment(Some(trip.id), 0).await.unwrap();
    assert_eq!(capped.rounds, 0);
}

#[tokio::test]
async fn receipt_is_parsed_once() {
    let h = Harness::new(vec![
        receipt_item("OB123X", "Floral Dress", 1, "24.00"),
        receipt_item("T100", "Tank", 3, "8.335"),
    ]);
    let trip_id = h.submitted_trip(&["OB123|Dress"], true).await;

    // 24.00 + 25.005 → 49.01
    let trip = h.store.get_trip(trip_id).await.unwrap().unwrap();
    assert_eq!(trip.total_cost, Some(dec("49.01")));

    let err = h.reconciler.parse_receipt(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::ReceiptAlreadyParsed(_)));
    assert_eq!(h.receipts.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.list_receipt_items(trip_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn parse_receipt_requires_a_photo() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress"], false).await;

    let err = h.reconciler.parse_receipt(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoReceiptPhoto(_)));
}

#[tokio::test]
async fn bulk_cost_only_fills_unpriced_tags() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress", "C456|Top"], true).await;
    h.reconciler.match_trip(trip_id).await.unwrap();

    let first = h.reconciler.bulk_set_cost(trip_id, &dec("10")).await.unwrap();
    assert_eq!(first.updated, 1);
    let again = h.reconciler.bulk_set_cost(trip_id, &dec("12")).await.unwrap();
    assert_eq!(again.updated, 0);

    let costs: Vec<_> = h
        .store
        .list_tags(trip_id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.cost.unwrap())
        .collect();
    assert_eq!(costs, vec![dec("24.00"), dec("10.00")]);

    let err = h.reconciler.bulk_set_cost(trip_id, &dec("0")).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidInput(_)));
}

#[tokio::test]
async fn edit_tag_applies_patch_and_validates_amounts() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["C456|Top"], true).await;
    let tag_id = h.store.list_tags(trip_id).await.unwrap()[0].id;

    let bad = TagPatch {
        cost: Some(dec("-1")),
        ..TagPatch::default()
    };
    let err = h.reconciler.edit_tag(tag_id, &bad).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidInput(_)));

    let patch = TagPatch {
        brand: Some("Anthropologie".to_string()),
        cost: Some(dec("6.50")),
        ..TagPatch::default()
    };
    let tag = h.reconciler.edit_tag(tag_id, &patch).await.unwrap();
    assert_eq!(tag.brand.as_deref(), Some("Anthropologie"));
    assert_eq!(tag.cost, Some(dec("6.50")));
    assert_eq!(tag.style_number.as_deref(), Some("C456"));

    let err = h.reconciler.edit_tag(9999, &patch).await.unwrap_err();
    assert!(matches!(err, ReconError::TagNotFound(9999)));
}

#[tokio::test]
async fn finalize_writes_intake_once() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress", "C456|Top"], true).await;
    h.reconciler.match_trip(trip_id).await.unwrap();

    let result = h.reconciler.finalize(trip_id).await.unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.unpriced_count, 1);

    let rows = h.store.intake_rows(trip_id);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.brand == "Free People"));

    let err = h.reconciler.finalize(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::TripFinalized(_)));
    assert_eq!(h.store.count_intake_rows(trip_id).await.unwrap(), 2);

    let err = h
        .reconciler
        .edit_tag(rows[0].tag_id, &TagPatch { cost: Some(dec("1")), ..TagPatch::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, ReconError::TripFinalized(_)));
    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::TripFinalized(_)));
}

#[tokio::test]
async fn failed_intake_write_leaves_trip_matched() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress", "C456|Top"], true).await;
    h.reconciler.match_trip(trip_id).await.unwrap();

    h.store.fail_intake_after(Some(1));
    let err = h.reconciler.finalize(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::StorageWriteFailed { attempted: 2, .. }));
    assert_eq!(
        h.store.get_trip(trip_id).await.unwrap().unwrap().status,
        TripStatus::Matched
    );
    assert_eq!(h.store.count_intake_rows(trip_id).await.unwrap(), 0);

    h.store.fail_intake_after(None);
    assert_eq!(h.reconciler.finalize(trip_id).await.unwrap().inserted_count, 2);
}

#[tokio::test]
async fn finalize_without_receipt_needs_an_enriched_tag() {
    let h = Harness::new(vec![]);
    let ok_trip = h.submitted_trip(&["OB123|Dress"], false).await;
    let result = h.reconciler.finalize(ok_trip).await.unwrap();
    assert_eq!(result.unpriced_count, 1);

    let bad_trip = h.submitted_trip(&["fail"], false).await;
    let err = h.reconciler.finalize(bad_trip).await.unwrap_err();
    assert!(matches!(err, ReconError::NoEnrichedTags(id) if id == bad_trip));

    let h = Harness::new(dress_receipt());
    let unmatched = h.submitted_trip(&["OB123|Dress"], true).await;
    let err = h.reconciler.finalize(unmatched).await.unwrap_err();
    assert!(matches!(err, ReconError::InvalidTransition { .. }));
}

#[tokio::test]
async fn empty_receipt_does_not_block_finalize() {
    let h = Harness::new(vec![]);
    let trip_id = h.submitted_trip(&["OB123|Dress", "C456|Top"], true).await;

    assert_eq!(h.receipts.calls.load(Ordering::SeqCst), 1);
    assert!(h.store.list_receipt_items(trip_id).await.unwrap().is_empty());
    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoReceiptItems(_)));

    let result = h.reconciler.finalize(trip_id).await.unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.unpriced_count, 2);
    assert_eq!(
        h.store.get_trip(trip_id).await.unwrap().unwrap().status,
        TripStatus::Finalized
    );
}

#[tokio::test]
async fn failed_tags_are_finalized_after_manual_entry() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["fail", "fail"], true).await;

    let tags = h.store.list_tags(trip_id).await.unwrap();
    assert!(tags.iter().all(|t| t.status == TagStatus::EnrichmentFailed));
    let err = h.reconciler.match_trip(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoEnrichedTags(_)));
    let err = h.reconciler.finalize(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::NoEnrichedTags(_)));

    // 只改成本不算补录
    let cost_only = TagPatch {
        cost: Some(dec("3.00")),
        ..TagPatch::default()
    };
    let tag = h.reconciler.edit_tag(tags[1].id, &cost_only).await.unwrap();
    assert_eq!(tag.status, TagStatus::EnrichmentFailed);

    let manual = TagPatch {
        style_number: Some("OB123".to_string()),
        ..TagPatch::default()
    };
    let tag = h.reconciler.edit_tag(tags[0].id, &manual).await.unwrap();
    assert_eq!(tag.status, TagStatus::Enriched);

    let stats = h.reconciler.match_trip(trip_id).await.unwrap();
    assert_eq!(stats.matched_count, 1);
    let result = h.reconciler.finalize(trip_id).await.unwrap();
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.unpriced_count, 0);
}

#[tokio::test]
async fn failure_in_a_later_intake_chunk_rolls_back_earlier_chunks() {
    let pipeline = PipelineConfig {
        intake_chunk_size: 2,
        ..PipelineConfig::default()
    };
    let h = Harness::with_pipeline(vec![], pipeline);
    let trip_id = h
        .submitted_trip(&["A1|One", "A2|Two", "A3|Three", "A4|Four", "A5|Five"], false)
        .await;

    // 第一块 (2 行) 写入成功，第二块失败
    h.store.fail_intake_after(Some(3));
    let err = h.reconciler.finalize(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::StorageWriteFailed { attempted: 5, .. }));
    assert_eq!(h.store.count_intake_rows(trip_id).await.unwrap(), 0);
    assert_eq!(
        h.store.get_trip(trip_id).await.unwrap().unwrap().status,
        TripStatus::Submitted
    );

    h.store.fail_intake_after(None);
    let result = h.reconciler.finalize(trip_id).await.unwrap();
    assert_eq!(result.inserted_count, 5);
    assert_eq!(h.store.intake_rows(trip_id).len(), 5);
}

#[tokio::test]
async fn out_of_range_amounts_are_rejected() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["C456|Top"], true).await;
    let tag_id = h.store.list_tags(trip_id).await.unwrap()[0].id;

    for raw in ["1e300000000", "-1e300000000", "12345678901", "0.0000000000001"] {
        let err = h.reconciler.bulk_set_cost(trip_id, &dec(raw)).await.unwrap_err();
        assert!(matches!(err, ReconError::InvalidInput(_)));
        let patch = TagPatch {
            msrp: Some(dec(raw)),
            ..TagPatch::default()
        };
        let err = h.reconciler.edit_tag(tag_id, &patch).await.unwrap_err();
        assert!(matches!(err, ReconError::InvalidInput(_)));
    }

    assert!(h.store.list_tags(trip_id).await.unwrap()[0].cost.is_none());
    let ok = h.reconciler.bulk_set_cost(trip_id, &dec("9999999999.99")).await.unwrap();
    assert_eq!(ok.updated, 1);
}

#[tokio::test]
async fn concurrent_write_on_same_trip_is_rejected() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress"], true).await;
    h.matcher.set_mode(MatchMode::Gated);

    let reconciler = h.reconciler.clone();
    let running = tokio::spawn(async move { reconciler.match_trip(trip_id).await });
    h.matcher.entered.notified().await;

    let err = h.reconciler.finalize(trip_id).await.unwrap_err();
    assert!(matches!(err, ReconError::TripBusy(_)));

    h.matcher.release.notify_one();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.matched_count, 1);
    assert!(h.reconciler.finalize(trip_id).await.is_ok());
}

#[tokio::test]
async fn rerunning_match_rederives_costs() {
    let h = Harness::new(dress_receipt());
    let trip_id = h.submitted_trip(&["OB123|Dress"], true).await;
    h.reconciler.match_trip(trip_id).await.unwrap();

    let again = h.reconciler.match_trip(trip_id).await.unwrap();
    assert_eq!(again.matched_count, 1);
    assert_eq!(
        h.store.list_tags(trip_id).await.unwrap()[0].cost,
        Some(dec("24.00"))
    );
}
