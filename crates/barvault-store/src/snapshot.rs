//! Immutable, hash-verified snapshots.
//!
//! A snapshot freezes a (key, range, version) selection at creation time.
//! Reads re-verify the content hash; a mismatch is fatal and is surfaced to
//! the operator rather than silently repaired.

use std::collections::HashMap;
use std::sync::Arc;

use barvault_core::{OhlcvPoint, TimeRange, UtcTimestamp, VersionTag};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditOperation, VersionRef};
use crate::hash::content_hash;
use crate::version_store::SeriesVersion;
use crate::{SeriesKey, StoreError};

/// Descriptor of one snapshot; the payload lives alongside it in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub id: Uuid,
    pub key: SeriesKey,
    pub range: TimeRange,
    /// Version the selection was resolved against at creation time.
    pub version: VersionTag,
    pub content_hash: String,
    pub purpose: String,
    pub requester: String,
    pub created_at: UtcTimestamp,
}

struct FrozenSnapshot {
    manifest: SnapshotManifest,
    points: Arc<Vec<OhlcvPoint>>,
}

/// Resolved snapshot returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub manifest: SnapshotManifest,
    pub points: Vec<OhlcvPoint>,
}

/// Write-once/read-many snapshot storage.
pub struct SnapshotStore {
    inner: RwLock<HashMap<Uuid, FrozenSnapshot>>,
    audit: Arc<AuditLog>,
}

impl SnapshotStore {
    pub fn new(audit: Arc<AuditLog>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
            audit,
        })
    }

    /// Freeze the points of `version` falling inside `range`.
    pub async fn create(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        version: &SeriesVersion,
        purpose: &str,
        requester: &str,
    ) -> Result<SnapshotManifest, StoreError> {
        let selection: Vec<OhlcvPoint> = version
            .points()
            .iter()
            .filter(|point| range.contains(point.ts))
            .cloned()
            .collect();

        let manifest = SnapshotManifest {
            id: Uuid::new_v4(),
            key: key.clone(),
            range,
            version: version.tag().clone(),
            content_hash: content_hash(&selection),
            purpose: purpose.to_owned(),
            requester: requester.to_owned(),
            created_at: UtcTimestamp::now(),
        };

        info!(
            key = %key,
            snapshot_id = %manifest.id,
            version = %manifest.version,
            points = selection.len(),
            "snapshot created"
        );
        self.audit
            .append(
                key.clone(),
                AuditOperation::SnapshotCreated,
                requester,
                None,
                Some(VersionRef::new(
                    manifest.version.clone(),
                    manifest.content_hash.clone(),
                )),
                Some(format!("snapshot {} ({})", manifest.id, purpose)),
            )
            .await;

        self.inner.write().await.insert(
            manifest.id,
            FrozenSnapshot {
                manifest: manifest.clone(),
                points: Arc::new(selection),
            },
        );
        Ok(manifest)
    }

    /// Resolve a snapshot by id, re-verifying its content hash.
    ///
    /// # Errors
    ///
    /// [`StoreError::SnapshotNotFound`] for an unknown id;
    /// [`StoreError::IntegrityVerification`] (fatal) when the frozen content no
    /// longer matches the recorded hash.
    pub async fn get(&self, id: Uuid) -> Result<Snapshot, StoreError> {
        let inner = self.inner.read().await;
        let frozen = inner
            .get(&id)
            .ok_or(StoreError::SnapshotNotFound { id })?;

        let recomputed = content_hash(&frozen.points);
        if recomputed != frozen.manifest.content_hash {
            return Err(StoreError::IntegrityVerification {
                context: format!("snapshot {id}"),
                expected: frozen.manifest.content_hash.clone(),
                actual: recomputed,
            });
        }

        Ok(Snapshot {
            manifest: frozen.manifest.clone(),
            points: frozen.points.to_vec(),
        })
    }

    /// Manifests for one key, oldest first.
    pub async fn list(&self, key: &SeriesKey) -> Vec<SnapshotManifest> {
        let inner = self.inner.read().await;
        let mut manifests: Vec<SnapshotManifest> = inner
            .values()
            .filter(|frozen| &frozen.manifest.key == key)
            .map(|frozen| frozen.manifest.clone())
            .collect();
        manifests.sort_by_key(|manifest| manifest.created_at);
        manifests
    }

    /// Whether any snapshot created at or after `unexpired_after` references
    /// this (key, version). Retention treats such versions as exempt.
    pub async fn references(
        &self,
        key: &SeriesKey,
        version: &VersionTag,
        unexpired_after: Option<UtcTimestamp>,
    ) -> bool {
        let inner = self.inner.read().await;
        inner.values().any(|frozen| {
            &frozen.manifest.key == key
                && &frozen.manifest.version == version
                && unexpired_after.is_none_or(|cutoff| frozen.manifest.created_at >= cutoff)
        })
    }

    pub(crate) async fn delete_as(
        &self,
        id: Uuid,
        actor: &str,
        operation: AuditOperation,
    ) -> Result<(), StoreError> {
        let manifest = {
            let inner = self.inner.read().await;
            inner
                .get(&id)
                .map(|frozen| frozen.manifest.clone())
                .ok_or(StoreError::SnapshotNotFound { id })?
        };

        self.audit
            .append(
                manifest.key.clone(),
                operation,
                actor,
                Some(VersionRef::new(
                    manifest.version.clone(),
                    manifest.content_hash.clone(),
                )),
                None,
                Some(format!("snapshot {id}")),
            )
            .await;

        self.inner.write().await.remove(&id);
        info!(snapshot_id = %id, operation = operation.code(), "snapshot deleted");
        Ok(())
    }

    /// Delete one snapshot. The audit entry is written before the delete.
    pub async fn delete(&self, id: Uuid, actor: &str) -> Result<(), StoreError> {
        self.delete_as(id, actor, AuditOperation::SnapshotDeleted).await
    }
}
