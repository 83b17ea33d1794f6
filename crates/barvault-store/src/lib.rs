//! # Barvault Store
//!
//! Versioned OHLCV storage with snapshots, an append-only audit trail, and
//! retention enforcement.
//!
//! ## Overview
//!
//! - **Version store**: a mutable `latest` version per series plus immutable
//!   sealed versions, swapped atomically so readers never observe partial writes
//! - **Availability**: calendar-aware completeness assessment over the expected
//!   timestamp grid
//! - **Snapshots**: write-once, hash-verified freezes of a data selection
//! - **Audit**: one append-only entry per mutation, chronological per key
//! - **Retention**: age-based purging with audited exemptions
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`audit`] | Append-only audit log |
//! | [`availability`] | Grid completeness assessment |
//! | [`hash`] | Canonical content hashing |
//! | [`retention`] | Retention policy and enforcer |
//! | [`snapshot`] | Immutable snapshots |
//! | [`version_store`] | Versioned series storage |

pub mod audit;
pub mod availability;
pub mod hash;
mod key;
pub mod retention;
pub mod snapshot;
pub mod version_store;

mod error;

// Re-export commonly used types at crate root for convenience

pub use audit::{AuditEntry, AuditLog, AuditOperation, VersionRef};
pub use availability::{assess, AvailabilityReport, FieldSet, SourceCoverage};
pub use error::StoreError;
pub use hash::content_hash;
pub use key::SeriesKey;
pub use retention::{ExemptionReason, RetentionEnforcer, RetentionPolicy, RetentionReport};
pub use snapshot::{Snapshot, SnapshotManifest, SnapshotStore};
pub use version_store::{SeriesVersion, SeriesWriteGuard, VersionInfo, VersionStore};
