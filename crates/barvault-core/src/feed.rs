//! Corporate-action feed contract.
//!
//! Optional collaborator used by reconciliation to corroborate detections that
//! must never be auto-applied from price action alone.

use std::future::Future;
use std::pin::Pin;

use crate::{ConnectorError, CorporateAction, InstrumentId, TimeRange};

type LookupFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<CorporateAction>, ConnectorError>> + Send + 'a>>;

pub trait CorporateActionFeed: Send + Sync {
    /// Events for one instrument whose ex-date falls inside `range`.
    fn lookup<'a>(&'a self, instrument: InstrumentId, range: TimeRange) -> LookupFuture<'a>;
}

/// Fixed-content feed for tests and replays.
#[derive(Debug, Default)]
pub struct StaticActionFeed {
    actions: Vec<CorporateAction>,
}

impl StaticActionFeed {
    pub fn new(actions: Vec<CorporateAction>) -> Self {
        Self { actions }
    }
}

impl CorporateActionFeed for StaticActionFeed {
    fn lookup<'a>(&'a self, instrument: InstrumentId, range: TimeRange) -> LookupFuture<'a> {
        let matched: Vec<CorporateAction> = self
            .actions
            .iter()
            .filter(|action| action.instrument == instrument && range.contains(action.ex_date))
            .cloned()
            .collect();
        Box::pin(async move { Ok(matched) })
    }
}
