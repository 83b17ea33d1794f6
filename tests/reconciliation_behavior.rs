//! Behavior-driven tests for integrity reconciliation.
//!
//! These tests verify the retroactive-adjustment pipeline end to end: split
//! detection, pre-adjustment preservation, conservative handling of
//! dividend-shaped gaps, and deferral when the reference source is down.

use barvault_core::{AdjustmentKind, ConnectorError, CorporateAction, CorporateActionKind};
use barvault_engine::{EngineError, ReconcileOutcome};
use barvault_tests::*;

fn stored_series() -> Vec<OhlcvPoint> {
    (0..10)
        .map(|i| daily_bar("AAPL", day(i), 400.0 + i as f64, 1_000_000))
        .collect()
}

/// Reference history carrying a 4:1 split effective on day 6: earlier closes
/// divided by 4 and volumes multiplied by 4.
fn split_reference() -> Vec<OhlcvPoint> {
    stored_series()
        .into_iter()
        .enumerate()
        .map(|(i, point)| {
            if i < 6 {
                daily_bar("AAPL", point.ts, point.close / 4.0, 4_000_000)
            } else {
                point
            }
        })
        .collect()
}

async fn seeded_service(reference: Arc<ScriptedConnector>) -> (MarketDataService, InstrumentId) {
    let service = MarketDataService::builder()
        .connector(scripted("mock", 0), None)
        .reference_source(reference)
        .build();
    let aapl = instrument("AAPL");
    service
        .store()
        .put(
            &SeriesKey::new(aapl.clone(), Timeframe::OneDay),
            &VersionTag::Latest,
            stored_series(),
            "fixture",
        )
        .await
        .expect("seed succeeds");
    (service, aapl)
}

// =============================================================================
// Reconciliation: split detection
// =============================================================================

#[tokio::test]
async fn a_four_to_one_split_creates_an_adjustment_record_with_factor_a_quarter() {
    let reference = scripted("authority", 0);
    reference.push_response(Ok(VendorBatch::Points(split_reference())));
    let (service, aapl) = seeded_service(reference).await;

    let outcome = service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect("reconcile runs");

    let ReconcileOutcome::Applied { record, .. } = outcome else {
        panic!("expected an applied adjustment");
    };
    assert_eq!(record.kind, AdjustmentKind::Split);
    assert_eq!(record.factor, 0.25);
    assert_eq!(record.effective, day(6));
}

#[tokio::test]
async fn pre_split_values_are_divided_in_the_new_latest() {
    let reference = scripted("authority", 0);
    reference.push_response(Ok(VendorBatch::Points(split_reference())));
    let (service, aapl) = seeded_service(reference).await;

    service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect("reconcile runs");

    let window = range("2026-01-01T00:00:00Z", "2026-02-01T00:00:00Z");
    let latest = service
        .get_series(&aapl, Timeframe::OneDay, window, &VersionTag::Latest)
        .await
        .expect("series resolves");

    // Bars before the effective date are divided by 4, volume inverted.
    assert_eq!(latest[0].close, 100.0);
    assert_eq!(latest[0].volume, Some(4_000_000));
    assert!(latest[0].is_adjusted);
    assert_eq!(latest[0].adjustment_factor, Some(0.25));
    // Bars from the effective date on are untouched.
    assert_eq!(latest[6].close, 406.0);
    assert!(!latest[6].is_adjusted);
}

#[tokio::test]
async fn the_pre_adjustment_snapshot_preserves_original_values() {
    let reference = scripted("authority", 0);
    reference.push_response(Ok(VendorBatch::Points(split_reference())));
    let (service, aapl) = seeded_service(reference).await;

    let outcome = service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect("reconcile runs");
    let ReconcileOutcome::Applied { snapshot, sealed, record } = outcome else {
        panic!("expected an applied adjustment");
    };
    assert_eq!(record.superseded_tag, sealed.tag);

    // The snapshot still resolves to the original, unadjusted values and its
    // hash re-verifies after the adjustment advanced latest.
    let preserved = service
        .get_snapshot(snapshot.id)
        .await
        .expect("snapshot resolves");
    assert_eq!(preserved.points[0].close, 400.0);
    assert_eq!(preserved.points[0].volume, Some(1_000_000));
    assert!(!preserved.points[0].is_adjusted);
    assert_eq!(preserved.manifest.content_hash, snapshot.content_hash);

    // The sealed tag resolves the same values through the version store.
    let window = range("2026-01-01T00:00:00Z", "2026-02-01T00:00:00Z");
    let sealed_series = service
        .get_series(&aapl, Timeframe::OneDay, window, &sealed.tag)
        .await
        .expect("sealed series resolves");
    assert_eq!(sealed_series[0].close, 400.0);
}

// =============================================================================
// Reconciliation: conservative paths
// =============================================================================

#[tokio::test]
async fn a_dividend_shaped_gap_is_never_applied_from_price_action_alone() {
    let reference = scripted("authority", 0);
    let shifted: Vec<OhlcvPoint> = stored_series()
        .into_iter()
        .enumerate()
        .map(|(i, point)| {
            if i < 6 {
                daily_bar("AAPL", point.ts, point.close / 1.02, 1_000_000)
            } else {
                point
            }
        })
        .collect();
    reference.push_response(Ok(VendorBatch::Points(shifted)));
    let (service, aapl) = seeded_service(reference).await;

    let outcome = service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect("reconcile runs");

    assert!(matches!(
        outcome,
        ReconcileOutcome::PendingReview {
            kind: AdjustmentKind::Dividend,
            ..
        }
    ));

    // Latest is untouched.
    let window = range("2026-01-01T00:00:00Z", "2026-02-01T00:00:00Z");
    let latest = service
        .get_series(&aapl, Timeframe::OneDay, window, &VersionTag::Latest)
        .await
        .expect("series resolves");
    assert_eq!(latest[0].close, 400.0);
}

#[tokio::test]
async fn a_corroborated_dividend_is_applied() {
    let reference = scripted("authority", 0);
    let shifted: Vec<OhlcvPoint> = stored_series()
        .into_iter()
        .enumerate()
        .map(|(i, point)| {
            if i < 6 {
                daily_bar("AAPL", point.ts, point.close / 1.02, 1_000_000)
            } else {
                point
            }
        })
        .collect();
    reference.push_response(Ok(VendorBatch::Points(shifted)));

    let feed = Arc::new(barvault_core::StaticActionFeed::new(vec![
        CorporateAction::new(
            instrument("AAPL"),
            CorporateActionKind::Dividend,
            day(6),
            Some(8.0),
        )
        .expect("valid action"),
    ]));

    let service = MarketDataService::builder()
        .connector(scripted("mock", 0), None)
        .reference_source(reference)
        .corporate_action_feed(feed)
        .build();
    let aapl = instrument("AAPL");
    service
        .store()
        .put(
            &SeriesKey::new(aapl.clone(), Timeframe::OneDay),
            &VersionTag::Latest,
            stored_series(),
            "fixture",
        )
        .await
        .expect("seed succeeds");

    let outcome = service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect("reconcile runs");
    let ReconcileOutcome::Applied { record, .. } = outcome else {
        panic!("expected an applied adjustment");
    };
    assert_eq!(record.kind, AdjustmentKind::Dividend);
}

#[tokio::test]
async fn an_unreachable_reference_source_defers_the_run() {
    let reference = scripted("authority", 0);
    reference.push_response(Err(ConnectorError::unavailable("authority down")));
    let (service, aapl) = seeded_service(reference).await;

    let err = service
        .reconcile(&aapl, Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect_err("run must defer");
    assert!(matches!(
        err,
        EngineError::ReconciliationSourceUnavailable { .. }
    ));
}

#[tokio::test]
async fn reconcile_without_a_reference_source_reports_it_unavailable() {
    let service = MarketDataService::builder()
        .connector(scripted("mock", 0), None)
        .build();

    let err = service
        .reconcile(&instrument("AAPL"), Timeframe::OneDay, day(9), "reconciler")
        .await
        .expect_err("must report the missing reference");
    assert!(matches!(
        err,
        EngineError::ReconciliationSourceUnavailable { .. }
    ));
}
