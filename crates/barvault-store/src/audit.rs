//! Append-only audit trail.
//!
//! Every mutation of the store emits exactly one entry. The log is
//! chronologically ordered per series key and is never truncated within the
//! retention window; deletions are audited before they happen, not after.

use std::collections::HashMap;
use std::sync::Arc;

use barvault_core::{TimeRange, UtcTimestamp, VersionTag};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::SeriesKey;

/// What a mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    LatestWritten,
    LatestSwapped,
    VersionSealed,
    VersionDeleted,
    SnapshotCreated,
    SnapshotDeleted,
    AdjustmentApplied,
    RetentionDeleted,
    RetentionSkippedExempt,
}

impl AuditOperation {
    pub const fn code(self) -> &'static str {
        match self {
            Self::LatestWritten => "latest_written",
            Self::LatestSwapped => "latest_swapped",
            Self::VersionSealed => "version_sealed",
            Self::VersionDeleted => "version_deleted",
            Self::SnapshotCreated => "snapshot_created",
            Self::SnapshotDeleted => "snapshot_deleted",
            Self::AdjustmentApplied => "adjustment_applied",
            Self::RetentionDeleted => "retention_deleted",
            Self::RetentionSkippedExempt => "retention_skipped_exempt",
        }
    }
}

/// A (tag, content hash) pair identifying one version state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub tag: VersionTag,
    pub content_hash: String,
}

impl VersionRef {
    pub fn new(tag: VersionTag, content_hash: impl Into<String>) -> Self {
        Self {
            tag,
            content_hash: content_hash.into(),
        }
    }
}

/// One mutation of one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub key: SeriesKey,
    pub operation: AuditOperation,
    pub actor: String,
    pub at: UtcTimestamp,
    /// Version state replaced by this mutation, if any.
    pub before: Option<VersionRef>,
    /// Version state produced by this mutation, if any.
    pub after: Option<VersionRef>,
    pub note: Option<String>,
}

/// In-memory append-only log, one chronological vector per key.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<HashMap<SeriesKey, Vec<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append one entry and return its id.
    pub async fn append(
        &self,
        key: SeriesKey,
        operation: AuditOperation,
        actor: &str,
        before: Option<VersionRef>,
        after: Option<VersionRef>,
        note: Option<String>,
    ) -> Uuid {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            key: key.clone(),
            operation,
            actor: actor.to_owned(),
            at: UtcTimestamp::now(),
            before,
            after,
            note,
        };
        let id = entry.id;

        debug!(
            key = %key,
            operation = operation.code(),
            actor,
            audit_id = %id,
            "audit entry appended"
        );

        self.entries.write().await.entry(key).or_default().push(entry);
        id
    }

    /// Chronological trail for one key, optionally restricted to entries whose
    /// timestamp falls inside `range`.
    pub async fn trail(&self, key: &SeriesKey, range: Option<TimeRange>) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        let Some(trail) = entries.get(key) else {
            return Vec::new();
        };
        match range {
            Some(range) => trail
                .iter()
                .filter(|entry| range.contains(entry.at))
                .cloned()
                .collect(),
            None => trail.clone(),
        }
    }

    /// Entries across all keys matching one operation, newest last.
    pub async fn by_operation(&self, operation: AuditOperation) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        let mut matched: Vec<AuditEntry> = entries
            .values()
            .flatten()
            .filter(|entry| entry.operation == operation)
            .cloned()
            .collect();
        matched.sort_by_key(|entry| entry.at);
        matched
    }
}
