//! Gap-filling ingestion.
//!
//! `ensure` walks the availability gaps for a key, fills each missing
//! sub-range by trying connectors in ascending priority order, and reports
//! exhaustion as partial availability rather than an error. Concurrent ensure
//! calls on overlapping ranges attach to in-flight fetches instead of issuing
//! duplicate external calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use barvault_core::{
    CalendarRegistry, ConnectorError, ConnectorQuota, FetchRequest, OhlcvPoint, RetryConfig,
    SourceConnector, SourceId, TimeRange, TradingCalendar, VendorBatch, VersionTag,
};
use barvault_store::{assess, AvailabilityReport, FieldSet, SeriesKey, StoreError, VersionStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::EngineError;

/// Knobs shared by every connector call site.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub retry: RetryConfig,
    pub fetch_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// All connectors for one sub-range failed; the attempts explain why.
#[derive(Debug, Clone)]
pub struct SubRangeFailure {
    pub range: TimeRange,
    pub attempts: Vec<(SourceId, ConnectorError)>,
}

/// Outcome of one `ensure` call. Partial data is explicit: the availability
/// report carries the completeness ratio and remaining gaps.
#[derive(Debug, Clone)]
pub struct EnsureReport {
    pub availability: AvailabilityReport,
    /// Points written by this call.
    pub ingested: usize,
    /// Whether any sub-range attached to another caller's in-flight fetch.
    pub attached: bool,
    pub failures: Vec<SubRangeFailure>,
}

impl EnsureReport {
    pub fn is_complete(&self) -> bool {
        self.availability.is_complete()
    }
}

struct RegisteredConnector {
    connector: Arc<dyn SourceConnector>,
    quota: Option<ConnectorQuota>,
}

type FlightKey = (SeriesKey, i64, i64);

type FlightRegistry = Mutex<HashMap<FlightKey, watch::Receiver<bool>>>;

/// Leadership over one in-flight sub-range fetch. Dropping it removes the
/// registration and wakes attached followers; drop runs on every exit path,
/// including unwinding, so a failed fill can never strand its registration.
struct FlightGuard<'a> {
    registry: &'a FlightRegistry,
    flight: FlightKey,
    done: watch::Sender<bool>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("in-flight registry lock is not poisoned")
            .remove(&self.flight);
        let _ = self.done.send(true);
    }
}

/// Fills availability gaps from a priority-ordered connector chain.
pub struct IngestionCoordinator {
    store: Arc<VersionStore>,
    calendars: Arc<CalendarRegistry>,
    connectors: Vec<RegisteredConnector>,
    config: IngestionConfig,
    in_flight: FlightRegistry,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<VersionStore>,
        calendars: Arc<CalendarRegistry>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            store,
            calendars,
            connectors: Vec::new(),
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connector, keeping the chain sorted by ascending priority.
    pub fn add_connector(
        &mut self,
        connector: Arc<dyn SourceConnector>,
        quota: Option<ConnectorQuota>,
    ) {
        self.connectors.push(RegisteredConnector { connector, quota });
        self.connectors
            .sort_by_key(|registered| registered.connector.priority());
    }

    /// Make `range` as available as the connector chain allows.
    ///
    /// Never fails on connector exhaustion: the report flags missing
    /// sub-ranges and the attempts that were made for them.
    pub async fn ensure(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        fields: FieldSet,
    ) -> Result<EnsureReport, EngineError> {
        let calendar = self.calendars.calendar_for(&key.instrument).clone();

        let mut ingested = 0usize;
        let mut attached = false;
        let mut failures = Vec::new();

        for sub in self.missing_ranges(key, range, fields, &calendar).await? {
            let outcome = self.fill_sub_range(key, sub, fields, &calendar).await?;
            ingested += outcome.ingested;
            attached |= outcome.attached;
            failures.extend(outcome.failures);
        }

        let availability = self.availability(key, range, fields, &calendar).await?;
        info!(
            key = %key,
            range = %range,
            ingested,
            completeness = availability.completeness,
            "ensure finished"
        );
        Ok(EnsureReport {
            availability,
            ingested,
            attached,
            failures,
        })
    }

    pub async fn availability(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        fields: FieldSet,
        calendar: &TradingCalendar,
    ) -> Result<AvailabilityReport, EngineError> {
        let points = self.latest_points(key, range).await?;
        Ok(assess(key, range, &points, calendar, fields))
    }

    async fn latest_points(
        &self,
        key: &SeriesKey,
        range: TimeRange,
    ) -> Result<Vec<OhlcvPoint>, EngineError> {
        match self.store.get(key, &VersionTag::Latest, Some(range)).await {
            Ok(points) => Ok(points),
            Err(StoreError::NotFound { .. }) => Ok(Vec::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn missing_ranges(
        &self,
        key: &SeriesKey,
        range: TimeRange,
        fields: FieldSet,
        calendar: &TradingCalendar,
    ) -> Result<Vec<TimeRange>, EngineError> {
        Ok(self.availability(key, range, fields, calendar).await?.missing)
    }

    async fn fill_sub_range(
        &self,
        key: &SeriesKey,
        sub: TimeRange,
        fields: FieldSet,
        calendar: &TradingCalendar,
    ) -> Result<FillOutcome, EngineError> {
        let flight_key = (key.clone(), sub.start().unix(), sub.end().unix());

        let role = {
            let mut in_flight = self
                .in_flight
                .lock()
                .expect("in-flight registry lock is not poisoned");
            match in_flight.get(&flight_key) {
                Some(rx) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    in_flight.insert(flight_key.clone(), rx);
                    Ok(FlightGuard {
                        registry: &self.in_flight,
                        flight: flight_key,
                        done: tx,
                    })
                }
            }
        };
        let _flight = match role {
            Err(mut rx) => {
                debug!(key = %key, range = %sub, "attaching to in-flight fetch");
                // A dropped sender also means the leader is done.
                let _ = rx.wait_for(|done| *done).await;
                return Ok(FillOutcome::attached());
            }
            Ok(guard) => guard,
        };

        let mut outcome = FillOutcome::default();

        // Another caller may have written this sub-range between our gap scan
        // and acquiring leadership; only fetch what is still missing.
        for target in self.missing_ranges(key, sub, fields, calendar).await? {
            match self.fetch_with_fallback(key, target).await {
                Ok((points, source)) => {
                    let actor = format!("ingest:{source}");
                    outcome.ingested += points.len();
                    self.store
                        .put(key, &VersionTag::Latest, points, &actor)
                        .await?;
                }
                Err(attempts) => {
                    outcome.failures.push(SubRangeFailure {
                        range: target,
                        attempts,
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Try connectors in ascending priority until one yields a batch.
    async fn fetch_with_fallback(
        &self,
        key: &SeriesKey,
        target: TimeRange,
    ) -> Result<(Vec<OhlcvPoint>, SourceId), Vec<(SourceId, ConnectorError)>> {
        let mut attempts = Vec::new();

        for registered in &self.connectors {
            let source = registered.connector.id();

            if let Some(quota) = &registered.quota {
                if !quota.try_acquire() {
                    debug!(key = %key, source = %source, "local quota exhausted, advancing");
                    attempts.push((source, ConnectorError::rate_limited("local quota exhausted")));
                    continue;
                }
            }

            let request = FetchRequest {
                instrument: key.instrument.clone(),
                timeframe: key.timeframe,
                range: target,
            };

            let mut attempt = 0u32;
            loop {
                let result = match tokio::time::timeout(
                    self.config.fetch_timeout,
                    registered.connector.fetch(request.clone()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ConnectorError::unavailable("fetch timed out")),
                };

                match result {
                    Ok(batch) => {
                        let points = normalize_batch(key, target, batch, &source);
                        debug!(
                            key = %key,
                            range = %target,
                            source = %source,
                            points = points.len(),
                            "fetch succeeded"
                        );
                        return Ok((points, source));
                    }
                    Err(error) if self.config.retry.should_retry(&error, attempt) => {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        debug!(
                            key = %key,
                            source = %source,
                            attempt,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            "retrying fetch"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(error) => {
                        warn!(key = %key, source = %source, error = %error, "connector failed, advancing");
                        attempts.push((source, error));
                        break;
                    }
                }
            }
        }

        Err(attempts)
    }
}

#[derive(Debug, Default)]
struct FillOutcome {
    ingested: usize,
    attached: bool,
    failures: Vec<SubRangeFailure>,
}

impl FillOutcome {
    fn attached() -> Self {
        Self {
            attached: true,
            ..Self::default()
        }
    }
}

/// Flatten a vendor payload into canonical points inside `range`.
///
/// Unparseable rows are skipped with a warning rather than failing the batch;
/// off-grid vendor timestamps are aligned down to the grid.
pub(crate) fn normalize_batch(
    key: &SeriesKey,
    range: TimeRange,
    batch: VendorBatch,
    source: &SourceId,
) -> Vec<OhlcvPoint> {
    let rows: Vec<(i64, f64, f64, f64, f64, Option<u64>)> = match batch {
        VendorBatch::Points(points) => {
            return points
                .into_iter()
                .filter(|point| {
                    point.instrument == key.instrument
                        && point.timeframe == key.timeframe
                        && range.contains(point.ts)
                })
                .collect();
        }
        VendorBatch::Rows(rows) => rows
            .into_iter()
            .map(|row| (row.ts, row.open, row.high, row.low, row.close, row.volume))
            .collect(),
        VendorBatch::Columnar {
            ts,
            open,
            high,
            low,
            close,
            volume,
        } => ts
            .into_iter()
            .zip(open)
            .zip(high)
            .zip(low)
            .zip(close)
            .zip(volume)
            .map(|(((((ts, open), high), low), close), volume)| {
                (ts, open, high, low, close, volume)
            })
            .collect(),
    };

    let mut points = Vec::with_capacity(rows.len());
    for (unix, open, high, low, close, volume) in rows {
        let Ok(stamp) = barvault_core::UtcTimestamp::from_unix(unix) else {
            warn!(key = %key, unix, "skipping row with out-of-range timestamp");
            continue;
        };
        let stamp = key.timeframe.align_down(stamp);
        if !range.contains(stamp) {
            continue;
        }
        match OhlcvPoint::new(
            key.instrument.clone(),
            key.timeframe,
            stamp,
            open,
            high,
            low,
            close,
            volume,
            source.clone(),
        ) {
            Ok(point) => points.push(point),
            Err(error) => {
                warn!(key = %key, ts = %stamp, error = %error, "skipping invalid vendor bar");
            }
        }
    }
    points
}
