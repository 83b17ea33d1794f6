//! Age-based purging of sealed versions and snapshots.
//!
//! Deletions are audited before they happen. Exempt material (legal hold, or
//! referenced by an unexpired snapshot) is retained and the skip itself is
//! audited so retention runs leave a complete record either way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use barvault_core::{InstrumentId, Timeframe, UtcTimestamp, VersionTag};
use time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditOperation;
use crate::snapshot::SnapshotStore;
use crate::version_store::VersionStore;
use crate::{SeriesKey, StoreError};

/// Per-timeframe max ages plus exemptions.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    max_age: HashMap<Timeframe, Duration>,
    snapshot_max_age: Option<Duration>,
    legal_holds: HashSet<InstrumentId>,
}

impl RetentionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sealed versions of `timeframe` older than `max_age` become candidates
    /// for deletion. Timeframes without a configured age are never purged.
    pub fn with_max_age(mut self, timeframe: Timeframe, max_age: Duration) -> Self {
        self.max_age.insert(timeframe, max_age);
        self
    }

    /// Snapshots older than this expire; an expired snapshot no longer exempts
    /// the version it references.
    pub fn with_snapshot_max_age(mut self, max_age: Duration) -> Self {
        self.snapshot_max_age = Some(max_age);
        self
    }

    pub fn with_legal_hold(mut self, instrument: InstrumentId) -> Self {
        self.legal_holds.insert(instrument);
        self
    }

    pub fn is_held(&self, instrument: &InstrumentId) -> bool {
        self.legal_holds.contains(instrument)
    }

    fn version_cutoff(&self, timeframe: Timeframe, now: UtcTimestamp) -> Option<UtcTimestamp> {
        self.max_age
            .get(&timeframe)
            .map(|age| now.saturating_sub(*age))
    }

    fn snapshot_cutoff(&self, now: UtcTimestamp) -> Option<UtcTimestamp> {
        self.snapshot_max_age.map(|age| now.saturating_sub(age))
    }
}

/// Why a deletion candidate was retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExemptionReason {
    LegalHold,
    SnapshotReferenced,
}

impl ExemptionReason {
    const fn code(self) -> &'static str {
        match self {
            Self::LegalHold => "legal_hold",
            Self::SnapshotReferenced => "snapshot_referenced",
        }
    }
}

/// Outcome of one retention run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    pub deleted_versions: Vec<(SeriesKey, VersionTag)>,
    pub retained_exempt: Vec<(SeriesKey, VersionTag, ExemptionReason)>,
    pub deleted_snapshots: Vec<Uuid>,
}

/// Applies a [`RetentionPolicy`] across the whole store.
pub struct RetentionEnforcer {
    store: Arc<VersionStore>,
    snapshots: Arc<SnapshotStore>,
}

impl RetentionEnforcer {
    pub fn new(store: Arc<VersionStore>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { store, snapshots }
    }

    pub async fn apply(
        &self,
        policy: &RetentionPolicy,
        actor: &str,
    ) -> Result<RetentionReport, StoreError> {
        self.apply_at(policy, UtcTimestamp::now(), actor).await
    }

    /// Retention with an explicit clock, used by scheduled runs and tests.
    pub async fn apply_at(
        &self,
        policy: &RetentionPolicy,
        now: UtcTimestamp,
        actor: &str,
    ) -> Result<RetentionReport, StoreError> {
        let mut report = RetentionReport::default();
        let snapshot_cutoff = policy.snapshot_cutoff(now);

        for key in self.store.known_keys().await {
            let Some(cutoff) = policy.version_cutoff(key.timeframe, now) else {
                continue;
            };

            for version in self.store.list_versions(&key).await {
                // Only sealed versions age out; latest is always live.
                let Some(sealed_at) = version.sealed_at else {
                    continue;
                };
                if sealed_at >= cutoff {
                    continue;
                }

                if let Some(reason) = self
                    .exemption(policy, &key, &version.tag, snapshot_cutoff)
                    .await
                {
                    self.store
                        .audit()
                        .append(
                            key.clone(),
                            AuditOperation::RetentionSkippedExempt,
                            actor,
                            None,
                            None,
                            Some(format!("{} exempt: {}", version.tag, reason.code())),
                        )
                        .await;
                    report.retained_exempt.push((key.clone(), version.tag, reason));
                    continue;
                }

                self.store
                    .delete_version_as(&key, &version.tag, actor, AuditOperation::RetentionDeleted)
                    .await?;
                report.deleted_versions.push((key.clone(), version.tag));
            }
        }

        if let Some(cutoff) = snapshot_cutoff {
            for key in self.store.known_keys().await {
                for manifest in self.snapshots.list(&key).await {
                    if manifest.created_at >= cutoff || policy.is_held(&key.instrument) {
                        continue;
                    }
                    self.snapshots
                        .delete_as(manifest.id, actor, AuditOperation::RetentionDeleted)
                        .await?;
                    report.deleted_snapshots.push(manifest.id);
                }
            }
        }

        info!(
            deleted_versions = report.deleted_versions.len(),
            retained_exempt = report.retained_exempt.len(),
            deleted_snapshots = report.deleted_snapshots.len(),
            "retention run complete"
        );
        Ok(report)
    }

    async fn exemption(
        &self,
        policy: &RetentionPolicy,
        key: &SeriesKey,
        tag: &VersionTag,
        snapshot_cutoff: Option<UtcTimestamp>,
    ) -> Option<ExemptionReason> {
        if policy.is_held(&key.instrument) {
            return Some(ExemptionReason::LegalHold);
        }
        if self.snapshots.references(key, tag, snapshot_cutoff).await {
            return Some(ExemptionReason::SnapshotReferenced);
        }
        None
    }
}
