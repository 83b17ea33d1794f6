//! Content hashing over canonical point encodings.
//!
//! The hash is the integrity anchor for sealed versions and snapshots: it is
//! computed once at seal/snapshot time and recomputed on every verifying read.
//! The encoding is byte-exact (f64 bit patterns, not decimal renderings) so a
//! hash match means byte-identical data.

use barvault_core::OhlcvPoint;
use sha2::{Digest, Sha256};

/// SHA-256 over the canonical encoding of an ascending point slice, lowercase hex.
pub fn content_hash(points: &[OhlcvPoint]) -> String {
    let mut hasher = Sha256::new();
    for point in points {
        hasher.update(point.instrument.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(point.timeframe.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(point.ts.unix().to_be_bytes());
        hasher.update(point.open.to_bits().to_be_bytes());
        hasher.update(point.high.to_bits().to_be_bytes());
        hasher.update(point.low.to_bits().to_be_bytes());
        hasher.update(point.close.to_bits().to_be_bytes());
        match point.volume {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update(v.to_be_bytes());
            }
            None => hasher.update([0u8; 9]),
        }
        hasher.update(point.source.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update([u8::from(point.is_adjusted)]);
        match point.adjustment_factor {
            Some(f) => {
                hasher.update([1u8]);
                hasher.update(f.to_bits().to_be_bytes());
            }
            None => hasher.update([0u8; 9]),
        }
    }
    hex::encode(hasher.finalize())
}
