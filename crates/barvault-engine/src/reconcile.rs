//! Integrity reconciliation against an authoritative source.
//!
//! A run refetches a bounded lookback window and compares per-bar deviation
//! against stored `latest`. Detection is deliberately conservative: splits are
//! auto-applied only when the price ratio snaps to a clean n:1 grid and the
//! volume ratio moves inversely; dividend-shaped gaps are held as pending
//! review unless a corporate-action feed corroborates them; everything else is
//! flagged as a discrepancy and left alone.
//!
//! Acceptance is all-or-nothing: seal the pre-adjustment `latest` under a
//! dated tag, snapshot it, then swap in the adjusted series. Readers observe
//! either the old series or the fully adjusted one.

use std::sync::Arc;
use std::time::Duration;

use barvault_core::{
    AdjustmentKind, AdjustmentRecord, CorporateActionFeed, CorporateActionKind, FetchRequest,
    OhlcvPoint, SourceConnector, TimeRange, UtcTimestamp, VersionTag,
};
use barvault_store::{
    AuditOperation, SeriesKey, SnapshotManifest, SnapshotStore, StoreError, VersionInfo,
    VersionRef, VersionStore,
};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ingest::normalize_batch;
use crate::EngineError;

/// Detection thresholds. The defaults are conservative: a candidate that does
/// not clear them is reported, never guessed at.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Bars fetched back from the reference date.
    pub lookback_bars: u32,
    /// Relative close deviation ignored as vendor noise.
    pub noise_epsilon: f64,
    /// Relative tolerance for a sustained price ratio and for snapping it to
    /// an n:1 split grid.
    pub ratio_tolerance: f64,
    /// Minimum deviating bars before a ratio counts as sustained.
    pub min_sustained_bars: usize,
    /// Relative tolerance on the volume-ratio checks.
    pub volume_tolerance: f64,
    /// Largest n considered when snapping to n:1 / 1:n.
    pub max_split_ratio: u32,
    pub fetch_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 90,
            noise_epsilon: 0.001,
            ratio_tolerance: 0.05,
            min_sustained_bars: 3,
            volume_tolerance: 0.25,
            max_split_ratio: 20,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// One stored-vs-reference mismatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Deviation {
    pub ts: UtcTimestamp,
    pub stored_close: f64,
    pub reference_close: f64,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Stored data matches the reference within the noise epsilon.
    Clean,
    /// An adjustment was accepted and `latest` now carries adjusted values.
    Applied {
        record: AdjustmentRecord,
        sealed: VersionInfo,
        snapshot: SnapshotManifest,
    },
    /// A plausible adjustment that must not be auto-applied from price action
    /// alone; surfaced for an operator or a corroborating feed.
    PendingReview {
        kind: AdjustmentKind,
        effective: UtcTimestamp,
        factor: f64,
    },
    /// Deviations that match no known adjustment shape.
    Discrepancy { deviations: Vec<Deviation> },
}

/// Compares `latest` against an authoritative connector and applies accepted
/// adjustments as new versions.
pub struct ReconciliationEngine {
    store: Arc<VersionStore>,
    snapshots: Arc<SnapshotStore>,
    reference: Arc<dyn SourceConnector>,
    feed: Option<Arc<dyn CorporateActionFeed>>,
    config: ReconcileConfig,
    adjustments: RwLock<Vec<AdjustmentRecord>>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<VersionStore>,
        snapshots: Arc<SnapshotStore>,
        reference: Arc<dyn SourceConnector>,
        feed: Option<Arc<dyn CorporateActionFeed>>,
        config: ReconcileConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            snapshots,
            reference,
            feed,
            config,
            adjustments: RwLock::new(Vec::new()),
        })
    }

    /// Adjustment records accepted so far, oldest first.
    pub async fn adjustments(&self) -> Vec<AdjustmentRecord> {
        self.adjustments.read().await.clone()
    }

    /// Run one reconciliation for `key` looking back from `reference_date`.
    ///
    /// # Errors
    ///
    /// [`EngineError::ReconciliationSourceUnavailable`] when the reference
    /// source cannot be reached; the caller retries on its next schedule.
    pub async fn reconcile(
        &self,
        key: &SeriesKey,
        reference_date: UtcTimestamp,
        actor: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        let window = self.lookback_window(key, reference_date)?;
        let stored = self
            .store
            .get(key, &VersionTag::Latest, Some(window))
            .await?;
        if stored.is_empty() {
            return Ok(ReconcileOutcome::Clean);
        }

        let request = FetchRequest {
            instrument: key.instrument.clone(),
            timeframe: key.timeframe,
            range: window,
        };
        let batch = match tokio::time::timeout(
            self.config.fetch_timeout,
            self.reference.fetch(request),
        )
        .await
        {
            Ok(Ok(batch)) => batch,
            Ok(Err(error)) => return Err(EngineError::reference_unavailable(error.to_string())),
            Err(_) => return Err(EngineError::reference_unavailable("fetch timed out")),
        };
        let reference = normalize_batch(key, window, batch, &self.reference.id());

        let pairs = pair_by_timestamp(&stored, &reference);
        if pairs.is_empty() {
            debug!(key = %key, "reference returned no overlapping bars");
            return Ok(ReconcileOutcome::Clean);
        }

        match self.classify(&pairs) {
            Classification::Clean => Ok(ReconcileOutcome::Clean),
            Classification::Split { effective, factor } => {
                let rationale = format!(
                    "sustained {:.4}x price ratio with inverse volume before {} vs {}",
                    1.0 / factor,
                    effective,
                    self.reference.id()
                );
                self.apply(key, AdjustmentKind::Split, effective, factor, rationale, actor)
                    .await
            }
            Classification::Dividend { effective, factor } => {
                if self.corroborated(key, effective).await {
                    let rationale = format!(
                        "price gap at {} corroborated by corporate-action feed",
                        effective
                    );
                    self.apply(key, AdjustmentKind::Dividend, effective, factor, rationale, actor)
                        .await
                } else {
                    info!(key = %key, effective = %effective, factor, "dividend candidate held for review");
                    Ok(ReconcileOutcome::PendingReview {
                        kind: AdjustmentKind::Dividend,
                        effective,
                        factor,
                    })
                }
            }
            Classification::Discrepancy(deviations) => {
                warn!(key = %key, count = deviations.len(), "unclassified discrepancy");
                Ok(ReconcileOutcome::Discrepancy { deviations })
            }
        }
    }

    fn lookback_window(
        &self,
        key: &SeriesKey,
        reference_date: UtcTimestamp,
    ) -> Result<TimeRange, EngineError> {
        let step = key.timeframe.step();
        let end = key.timeframe.align_down(reference_date).saturating_add(step);
        let start = end.saturating_sub(step * (self.config.lookback_bars as i32));
        Ok(TimeRange::new(start, end)?)
    }

    async fn corroborated(&self, key: &SeriesKey, effective: UtcTimestamp) -> bool {
        let Some(feed) = &self.feed else {
            return false;
        };
        // Accept an ex-date within one grid step of the detected effective date.
        let step = key.timeframe.step();
        let Ok(window) = TimeRange::new(
            effective.saturating_sub(step),
            effective.saturating_add(step * 2),
        ) else {
            return false;
        };
        match feed.lookup(key.instrument.clone(), window).await {
            Ok(events) => events
                .iter()
                .any(|event| event.kind == CorporateActionKind::Dividend),
            Err(error) => {
                warn!(key = %key, error = %error, "corporate-action feed lookup failed");
                false
            }
        }
    }

    fn classify(&self, pairs: &[(OhlcvPoint, OhlcvPoint)]) -> Classification {
        let config = &self.config;

        let deviations: Vec<bool> = pairs
            .iter()
            .map(|(stored, reference)| {
                reference.close > 0.0
                    && ((stored.close - reference.close).abs() / reference.close)
                        > config.noise_epsilon
            })
            .collect();

        if deviations.iter().all(|deviating| !deviating) {
            return Classification::Clean;
        }

        let discrepancy = || {
            Classification::Discrepancy(
                pairs
                    .iter()
                    .zip(&deviations)
                    .filter(|(_, deviating)| **deviating)
                    .map(|((stored, reference), _)| Deviation {
                        ts: stored.ts,
                        stored_close: stored.close,
                        reference_close: reference.close,
                    })
                    .collect(),
            )
        };

        // Adjustment shape: a deviating prefix (reference history is already
        // adjusted, stored is not) followed by a clean suffix.
        let Some(split_index) = deviations.iter().position(|deviating| !deviating) else {
            // Every bar deviates: no clean suffix to anchor an effective date.
            return discrepancy();
        };
        if split_index < config.min_sustained_bars {
            return discrepancy();
        }
        if deviations[split_index..].iter().any(|deviating| *deviating) {
            return discrepancy();
        }

        let prefix = &pairs[..split_index];
        let ratios: Vec<f64> = prefix
            .iter()
            .map(|(stored, reference)| stored.close / reference.close)
            .collect();
        let mean_ratio = geometric_mean(&ratios);
        let sustained = ratios
            .iter()
            .all(|ratio| (ratio / mean_ratio - 1.0).abs() <= config.ratio_tolerance);
        if !sustained {
            return discrepancy();
        }

        let effective = pairs[split_index].0.ts;
        let volume_ratio = mean_volume_ratio(prefix);

        if let Some(snapped) = snap_ratio(mean_ratio, config.ratio_tolerance, config.max_split_ratio)
        {
            // A split moves volume inversely to price.
            let expected_volume = 1.0 / snapped;
            if let Some(volume_ratio) = volume_ratio {
                if (volume_ratio / expected_volume - 1.0).abs() <= config.volume_tolerance {
                    return Classification::Split {
                        effective,
                        factor: 1.0 / snapped,
                    };
                }
            }
        }

        // A cash distribution shifts price without a volume signature.
        if mean_ratio > 1.0 {
            if let Some(volume_ratio) = volume_ratio {
                if (volume_ratio - 1.0).abs() <= config.volume_tolerance {
                    return Classification::Dividend {
                        effective,
                        factor: 1.0 / mean_ratio,
                    };
                }
            }
        }

        discrepancy()
    }

    /// Seal, snapshot, adjust, swap. Holds the per-key write lock across the
    /// sequence so no other writer interleaves; the final swap is atomic.
    async fn apply(
        &self,
        key: &SeriesKey,
        kind: AdjustmentKind,
        effective: UtcTimestamp,
        factor: f64,
        rationale: String,
        actor: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        let guard = self.store.lock_key(key).await;

        let base = format!("pre-adjust-{}-{}", kind.as_str(), effective.date());
        let sealed = match self.store.seal_locked(&guard, key, &base, actor).await {
            Ok(info) => info,
            Err(StoreError::Conflict { .. }) => {
                let salted = format!("{base}-{}", &Uuid::new_v4().simple().to_string()[..8]);
                self.store.seal_locked(&guard, key, &salted, actor).await?
            }
            Err(error) => return Err(error.into()),
        };

        let sealed_version = self.store.resolve(key, &sealed.tag).await?;
        let span = points_span(sealed_version.points(), key)?;
        let snapshot = self
            .snapshots
            .create(
                key,
                span,
                &sealed_version,
                &format!("pre-adjustment preservation ({})", kind.as_str()),
                actor,
            )
            .await?;

        let latest = self.store.resolve(key, &VersionTag::Latest).await?;
        let mut adjusted = Vec::with_capacity(latest.points().len());
        for point in latest.points() {
            if point.ts < effective {
                adjusted.push(point.with_adjustment(factor)?);
            } else {
                adjusted.push(point.clone());
            }
        }
        let swapped = self
            .store
            .swap_latest_locked(&guard, key, adjusted, actor)
            .await?;

        let record = AdjustmentRecord {
            instrument: key.instrument.clone(),
            timeframe: key.timeframe,
            effective,
            kind,
            factor,
            superseded_tag: sealed.tag.clone(),
            rationale: rationale.clone(),
            created_at: UtcTimestamp::now(),
        };
        self.store
            .audit()
            .append(
                key.clone(),
                AuditOperation::AdjustmentApplied,
                actor,
                Some(VersionRef::new(sealed.tag.clone(), sealed.content_hash.clone())),
                Some(VersionRef::new(VersionTag::Latest, swapped.content_hash)),
                Some(rationale),
            )
            .await;
        self.adjustments.write().await.push(record.clone());

        info!(
            key = %key,
            kind = kind.as_str(),
            factor,
            effective = %effective,
            sealed = %sealed.tag,
            "adjustment applied"
        );
        Ok(ReconcileOutcome::Applied {
            record,
            sealed,
            snapshot,
        })
    }
}

enum Classification {
    Clean,
    Split { effective: UtcTimestamp, factor: f64 },
    Dividend { effective: UtcTimestamp, factor: f64 },
    Discrepancy(Vec<Deviation>),
}

fn pair_by_timestamp(
    stored: &[OhlcvPoint],
    reference: &[OhlcvPoint],
) -> Vec<(OhlcvPoint, OhlcvPoint)> {
    let by_ts: std::collections::BTreeMap<i64, &OhlcvPoint> = reference
        .iter()
        .map(|point| (point.ts.unix(), point))
        .collect();
    stored
        .iter()
        .filter_map(|point| {
            by_ts
                .get(&point.ts.unix())
                .map(|matched| (point.clone(), (*matched).clone()))
        })
        .collect()
}

fn geometric_mean(values: &[f64]) -> f64 {
    let sum: f64 = values.iter().map(|value| value.ln()).sum();
    (sum / values.len() as f64).exp()
}

/// Mean stored/reference volume ratio over bars where both sides carry volume.
fn mean_volume_ratio(pairs: &[(OhlcvPoint, OhlcvPoint)]) -> Option<f64> {
    let ratios: Vec<f64> = pairs
        .iter()
        .filter_map(|(stored, reference)| match (stored.volume, reference.volume) {
            (Some(s), Some(r)) if r > 0 => Some(s as f64 / r as f64),
            _ => None,
        })
        .collect();
    if ratios.is_empty() {
        None
    } else {
        Some(geometric_mean(&ratios))
    }
}

/// Snap a price ratio onto the n:1 / 1:n split grid, n >= 2.
fn snap_ratio(ratio: f64, tolerance: f64, max_n: u32) -> Option<f64> {
    for n in 2..=max_n {
        let forward = n as f64;
        if (ratio / forward - 1.0).abs() <= tolerance {
            return Some(forward);
        }
        let inverse = 1.0 / n as f64;
        if (ratio / inverse - 1.0).abs() <= tolerance {
            return Some(inverse);
        }
    }
    None
}

fn points_span(points: &[OhlcvPoint], key: &SeriesKey) -> Result<TimeRange, EngineError> {
    let first = points
        .first()
        .ok_or_else(|| StoreError::not_found(key, VersionTag::Latest))?;
    let last = points
        .last()
        .ok_or_else(|| StoreError::not_found(key, VersionTag::Latest))?;
    Ok(TimeRange::new(
        first.ts,
        last.ts.saturating_add(key.timeframe.step()),
    )?)
}

/// Background reconciliation loop, decoupled from request-path latency.
///
/// Cancellable between keys; an in-progress acceptance always completes, so a
/// shutdown never leaves a partially applied adjustment.
pub struct ReconciliationScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconciliationScheduler {
    pub fn start(engine: Arc<ReconciliationEngine>, every: Duration, actor: String) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so a fresh scheduler waits
            // one interval before its first sweep.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for key in engine.store.known_keys().await {
                            if *rx.borrow() {
                                return;
                            }
                            let now = UtcTimestamp::now();
                            match engine.reconcile(&key, now, &actor).await {
                                Ok(outcome) => {
                                    debug!(key = %key, outcome = outcome_code(&outcome), "scheduled reconciliation finished");
                                }
                                Err(error) => {
                                    warn!(key = %key, error = %error, "scheduled reconciliation deferred");
                                }
                            }
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn outcome_code(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Clean => "clean",
        ReconcileOutcome::Applied { .. } => "applied",
        ReconcileOutcome::PendingReview { .. } => "pending_review",
        ReconcileOutcome::Discrepancy { .. } => "discrepancy",
    }
}
