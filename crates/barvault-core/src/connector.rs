//! Source connector contract and vendor payload shapes.
//!
//! A connector is the boundary to one external market-data vendor. Vendors
//! return differently shaped payloads; [`VendorBatch`] carries one variant per
//! shape and is normalized into canonical [`OhlcvPoint`]s at the ingestion
//! boundary. Vendor types never cross into the version store.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{InstrumentId, OhlcvPoint, SourceId, TimeRange, Timeframe};

/// Connector-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
}

/// Structured connector error consumed by the ingestion fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorError {
    kind: ConnectorErrorKind,
    message: String,
    retryable: bool,
}

impl ConnectorError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: ConnectorErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> ConnectorErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ConnectorErrorKind::Unavailable => "connector.unavailable",
            ConnectorErrorKind::RateLimited => "connector.rate_limited",
            ConnectorErrorKind::InvalidRequest => "connector.invalid_request",
        }
    }
}

impl Display for ConnectorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ConnectorError {}

/// Request for one (instrument, timeframe, range) fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub instrument: InstrumentId,
    pub timeframe: Timeframe,
    pub range: TimeRange,
}

/// Row-shaped candle as emitted by list-of-candles vendors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRow {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
}

/// Vendor response payload, one variant per vendor shape.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorBatch {
    /// Parallel column arrays keyed by unix-second timestamps.
    Columnar {
        ts: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Vec<Option<u64>>,
    },
    /// One candle per row.
    Rows(Vec<CandleRow>),
    /// Already-canonical points (in-process sources, replays).
    Points(Vec<OhlcvPoint>),
}

impl VendorBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Columnar { ts, .. } => ts.len(),
            Self::Rows(rows) => rows.len(),
            Self::Points(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<VendorBatch, ConnectorError>> + Send + 'a>>;

/// Contract implemented by every vendor connector.
///
/// Implementations must be `Send + Sync`; the coordinator shares them across
/// workers and tries them in ascending [`priority`](SourceConnector::priority)
/// order (lower value wins).
pub trait SourceConnector: Send + Sync {
    /// Unique vendor identifier, stamped onto every ingested point.
    fn id(&self) -> SourceId;

    /// Fallback order; the lowest-priority healthy connector is tried first.
    fn priority(&self) -> u8;

    /// Fetch bars for one sub-range.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::unavailable`] and [`ConnectorError::rate_limited`] are
    /// retryable; the coordinator retries within its policy and then advances
    /// to the next-priority connector.
    fn fetch<'a>(&'a self, req: FetchRequest) -> FetchFuture<'a>;
}

enum ScriptStep {
    Respond(Result<VendorBatch, ConnectorError>),
    Synthesize,
}

/// Deterministic in-process connector used by tests and examples.
///
/// With an empty script it synthesizes one bar per open grid point of the
/// requested range; pushed responses are consumed first, in order.
pub struct ScriptedConnector {
    id: SourceId,
    priority: u8,
    base_price: f64,
    script: Mutex<VecDeque<ScriptStep>>,
    calls: AtomicU64,
}

impl ScriptedConnector {
    pub fn new(id: SourceId, priority: u8) -> Self {
        Self {
            id,
            priority,
            base_price: 100.0,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// Queue a canned response ahead of synthetic generation.
    pub fn push_response(&self, response: Result<VendorBatch, ConnectorError>) {
        self.script
            .lock()
            .expect("scripted connector script lock is not poisoned")
            .push_back(ScriptStep::Respond(response));
    }

    /// Queue an explicit synthetic step (useful between canned failures).
    pub fn push_synthetic(&self) {
        self.script
            .lock()
            .expect("scripted connector script lock is not poisoned")
            .push_back(ScriptStep::Synthesize);
    }

    /// Number of fetches issued against this connector.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Deterministic bars over the request's grid: price walks with the
    /// timestamp so repeated fetches of the same range are identical.
    pub fn synthesize(&self, req: &FetchRequest) -> VendorBatch {
        let rows = req
            .range
            .grid_points(req.timeframe)
            .into_iter()
            .map(|ts| {
                let step = (ts.unix() / req.timeframe.step_seconds()) % 97;
                let open = self.base_price + step as f64;
                CandleRow {
                    ts: ts.unix(),
                    open,
                    high: open + 2.0,
                    low: open - 2.0,
                    close: open + 1.0,
                    volume: Some(1_000_000),
                }
            })
            .collect();
        VendorBatch::Rows(rows)
    }
}

impl SourceConnector for ScriptedConnector {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn fetch<'a>(&'a self, req: FetchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .expect("scripted connector script lock is not poisoned")
                .pop_front();

            match step {
                Some(ScriptStep::Respond(response)) => response,
                Some(ScriptStep::Synthesize) | None => Ok(self.synthesize(&req)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UtcTimestamp;

    fn request() -> FetchRequest {
        FetchRequest {
            instrument: InstrumentId::parse("AAPL").expect("valid instrument"),
            timeframe: Timeframe::OneHour,
            range: TimeRange::new(
                UtcTimestamp::parse("2026-01-05T00:00:00Z").expect("valid timestamp"),
                UtcTimestamp::parse("2026-01-05T06:00:00Z").expect("valid timestamp"),
            )
            .expect("valid range"),
        }
    }

    #[tokio::test]
    async fn synthesizes_one_bar_per_grid_point() {
        let connector = ScriptedConnector::new(SourceId::parse("mock").expect("valid source"), 0);
        let batch = connector.fetch(request()).await.expect("must fetch");
        assert_eq!(batch.len(), 6);
        assert_eq!(connector.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_is_consumed_before_synthesis() {
        let connector = ScriptedConnector::new(SourceId::parse("mock").expect("valid source"), 0);
        connector.push_response(Err(ConnectorError::unavailable("vendor down")));

        let err = connector.fetch(request()).await.expect_err("must fail");
        assert_eq!(err.kind(), ConnectorErrorKind::Unavailable);
        assert!(err.retryable());

        let batch = connector.fetch(request()).await.expect("must fetch");
        assert!(!batch.is_empty());
        assert_eq!(connector.call_count(), 2);
    }

    #[tokio::test]
    async fn synthesis_is_deterministic() {
        let connector = ScriptedConnector::new(SourceId::parse("mock").expect("valid source"), 0);
        let first = connector.fetch(request()).await.expect("must fetch");
        let second = connector.fetch(request()).await.expect("must fetch");
        assert_eq!(first, second);
    }
}
