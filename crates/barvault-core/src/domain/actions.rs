use serde::{Deserialize, Serialize};

use crate::{InstrumentId, Timeframe, UtcTimestamp, ValidationError, VersionTag};

/// Corporate action event reported by an external feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateActionKind {
    Dividend,
    Split,
    Merger,
    Other,
}

/// Canonical corporate action event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub instrument: InstrumentId,
    pub kind: CorporateActionKind,
    pub ex_date: UtcTimestamp,
    /// Split ratio or dividend amount, in the feed's own unit.
    pub value: Option<f64>,
}

impl CorporateAction {
    pub fn new(
        instrument: InstrumentId,
        kind: CorporateActionKind,
        ex_date: UtcTimestamp,
        value: Option<f64>,
    ) -> Result<Self, ValidationError> {
        if let Some(value) = value {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field: "value" });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field: "value" });
            }
        }

        Ok(Self {
            instrument,
            kind,
            ex_date,
            value,
        })
    }
}

/// Kind of retroactive adjustment applied to stored history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Split,
    Dividend,
    Merger,
    VendorCorrection,
}

impl AdjustmentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Dividend => "dividend",
            Self::Merger => "merger",
            Self::VendorCorrection => "vendor_correction",
        }
    }
}

/// Record of an applied retroactive adjustment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub instrument: InstrumentId,
    pub timeframe: Timeframe,
    pub effective: UtcTimestamp,
    pub kind: AdjustmentKind,
    /// Multiplier applied to prices before the effective date (0.25 for a 4:1 split).
    pub factor: f64,
    /// Sealed tag preserving the pre-adjustment values.
    pub superseded_tag: VersionTag,
    pub rationale: String,
    pub created_at: UtcTimestamp,
}
