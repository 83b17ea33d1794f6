//! Service facade wiring the store, coordinator, reconciliation, and
//! indicator engine behind one API surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use barvault_core::{
    CalendarRegistry, ConnectorQuota, CorporateActionFeed, InstrumentId, OhlcvPoint,
    SourceConnector, TimeRange, Timeframe, UtcTimestamp, VersionTag,
};
use barvault_store::{
    AuditEntry, AuditLog, AvailabilityReport, FieldSet, RetentionEnforcer, RetentionPolicy,
    RetentionReport, SeriesKey, Snapshot, SnapshotManifest, SnapshotStore, VersionInfo,
    VersionStore,
};
use uuid::Uuid;

use crate::indicator::{IndicatorEngine, IndicatorSeries, IndicatorSpec};
use crate::ingest::{EnsureReport, IngestionConfig, IngestionCoordinator};
use crate::reconcile::{
    ReconcileConfig, ReconcileOutcome, ReconciliationEngine, ReconciliationScheduler,
};
use crate::EngineError;

/// Builder for [`MarketDataService`].
pub struct MarketDataServiceBuilder {
    calendars: CalendarRegistry,
    ingestion: IngestionConfig,
    reconcile: ReconcileConfig,
    connectors: Vec<(Arc<dyn SourceConnector>, Option<ConnectorQuota>)>,
    reference: Option<Arc<dyn SourceConnector>>,
    feed: Option<Arc<dyn CorporateActionFeed>>,
}

impl Default for MarketDataServiceBuilder {
    fn default() -> Self {
        Self {
            calendars: CalendarRegistry::default(),
            ingestion: IngestionConfig::default(),
            reconcile: ReconcileConfig::default(),
            connectors: Vec::new(),
            reference: None,
            feed: None,
        }
    }
}

impl MarketDataServiceBuilder {
    pub fn calendars(mut self, calendars: CalendarRegistry) -> Self {
        self.calendars = calendars;
        self
    }

    pub fn ingestion_config(mut self, config: IngestionConfig) -> Self {
        self.ingestion = config;
        self
    }

    pub fn reconcile_config(mut self, config: ReconcileConfig) -> Self {
        self.reconcile = config;
        self
    }

    /// Register an ingestion connector, optionally behind a local quota.
    pub fn connector(
        mut self,
        connector: Arc<dyn SourceConnector>,
        quota: Option<ConnectorQuota>,
    ) -> Self {
        self.connectors.push((connector, quota));
        self
    }

    /// Authoritative source used by reconciliation. Without one, `reconcile`
    /// reports the reference source as unavailable.
    pub fn reference_source(mut self, connector: Arc<dyn SourceConnector>) -> Self {
        self.reference = Some(connector);
        self
    }

    pub fn corporate_action_feed(mut self, feed: Arc<dyn CorporateActionFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn build(self) -> MarketDataService {
        let audit = AuditLog::new();
        let store = VersionStore::new(Arc::clone(&audit));
        let snapshots = SnapshotStore::new(Arc::clone(&audit));
        let calendars = Arc::new(self.calendars);

        let mut coordinator =
            IngestionCoordinator::new(Arc::clone(&store), Arc::clone(&calendars), self.ingestion);
        for (connector, quota) in self.connectors {
            coordinator.add_connector(connector, quota);
        }

        let reconciliation = self.reference.map(|reference| {
            ReconciliationEngine::new(
                Arc::clone(&store),
                Arc::clone(&snapshots),
                reference,
                self.feed,
                self.reconcile,
            )
        });

        MarketDataService {
            indicators: IndicatorEngine::new(Arc::clone(&store)),
            retention: RetentionEnforcer::new(Arc::clone(&store), Arc::clone(&snapshots)),
            coordinator: Arc::new(coordinator),
            reconciliation,
            calendars,
            snapshots,
            audit,
            store,
        }
    }
}

/// The versioned OHLCV cache, as seen by strategy/backtest and operational
/// callers.
pub struct MarketDataService {
    store: Arc<VersionStore>,
    snapshots: Arc<SnapshotStore>,
    audit: Arc<AuditLog>,
    calendars: Arc<CalendarRegistry>,
    coordinator: Arc<IngestionCoordinator>,
    reconciliation: Option<Arc<ReconciliationEngine>>,
    indicators: Arc<IndicatorEngine>,
    retention: RetentionEnforcer,
}

impl MarketDataService {
    pub fn builder() -> MarketDataServiceBuilder {
        MarketDataServiceBuilder::default()
    }

    pub fn store(&self) -> Arc<VersionStore> {
        Arc::clone(&self.store)
    }

    fn key(&self, instrument: &InstrumentId, timeframe: Timeframe) -> SeriesKey {
        SeriesKey::new(instrument.clone(), timeframe)
    }

    /// Fill gaps in `latest` for the requested range. Exhausted connectors are
    /// reported as partial availability on the returned report, not an error.
    pub async fn ensure(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        fields: FieldSet,
    ) -> Result<EnsureReport, EngineError> {
        self.coordinator
            .ensure(&self.key(instrument, timeframe), range, fields)
            .await
    }

    /// Points of one version restricted to `range`, ascending.
    ///
    /// # Errors
    ///
    /// [`barvault_store::StoreError::NotFound`] for an unknown version; call
    /// [`ensure`](Self::ensure) first.
    pub async fn get_series(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        tag: &VersionTag,
    ) -> Result<Vec<OhlcvPoint>, EngineError> {
        Ok(self
            .store
            .get(&self.key(instrument, timeframe), tag, Some(range))
            .await?)
    }

    pub async fn availability(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        fields: FieldSet,
    ) -> Result<AvailabilityReport, EngineError> {
        let key = self.key(instrument, timeframe);
        let calendar = self.calendars.calendar_for(instrument).clone();
        self.coordinator
            .availability(&key, range, fields, &calendar)
            .await
    }

    /// Freeze the current `latest` selection into an immutable snapshot.
    pub async fn snapshot(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        purpose: &str,
        requester: &str,
    ) -> Result<SnapshotManifest, EngineError> {
        let key = self.key(instrument, timeframe);
        let version = self.store.resolve(&key, &VersionTag::Latest).await?;
        Ok(self
            .snapshots
            .create(&key, range, &version, purpose, requester)
            .await?)
    }

    /// Resolve a snapshot by id; later `latest` mutations are invisible here.
    pub async fn get_snapshot(&self, id: Uuid) -> Result<Snapshot, EngineError> {
        Ok(self.snapshots.get(id).await?)
    }

    /// Seal the current `latest` under an immutable named tag.
    pub async fn seal_version(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        name: &str,
        actor: &str,
    ) -> Result<VersionInfo, EngineError> {
        Ok(self
            .store
            .seal(&self.key(instrument, timeframe), name, actor)
            .await?)
    }

    pub async fn list_versions(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
    ) -> Vec<VersionInfo> {
        self.store
            .list_versions(&self.key(instrument, timeframe))
            .await
    }

    pub async fn get_audit_trail(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: Option<TimeRange>,
    ) -> Vec<AuditEntry> {
        self.audit
            .trail(&self.key(instrument, timeframe), range)
            .await
    }

    pub async fn compute(
        &self,
        spec: &IndicatorSpec,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        tag: &VersionTag,
    ) -> Result<Arc<IndicatorSeries>, EngineError> {
        self.indicators
            .compute(spec, &self.key(instrument, timeframe), range, tag)
            .await
    }

    /// Kernel executions so far; cache hits do not count. Instrumentation
    /// hook for verifying that repeated computes do no work.
    pub fn indicator_computations(&self) -> u64 {
        self.indicators.computations()
    }

    pub async fn compute_many(
        &self,
        specs: Vec<IndicatorSpec>,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        range: TimeRange,
        tag: &VersionTag,
    ) -> HashMap<String, Result<Arc<IndicatorSeries>, EngineError>> {
        self.indicators
            .compute_many(specs, &self.key(instrument, timeframe), range, tag)
            .await
    }

    /// Run one on-demand reconciliation against the configured reference
    /// source.
    pub async fn reconcile(
        &self,
        instrument: &InstrumentId,
        timeframe: Timeframe,
        reference_date: UtcTimestamp,
        actor: &str,
    ) -> Result<ReconcileOutcome, EngineError> {
        let engine = self
            .reconciliation
            .as_ref()
            .ok_or_else(|| EngineError::reference_unavailable("no reference source configured"))?;
        engine
            .reconcile(&self.key(instrument, timeframe), reference_date, actor)
            .await
    }

    /// Start the background reconciliation loop. The returned handle stops it.
    pub fn start_reconciliation(
        &self,
        every: Duration,
        actor: impl Into<String>,
    ) -> Result<ReconciliationScheduler, EngineError> {
        let engine = self
            .reconciliation
            .as_ref()
            .ok_or_else(|| EngineError::reference_unavailable("no reference source configured"))?;
        Ok(ReconciliationScheduler::start(
            Arc::clone(engine),
            every,
            actor.into(),
        ))
    }

    pub async fn apply_retention(
        &self,
        policy: &RetentionPolicy,
        actor: &str,
    ) -> Result<RetentionReport, EngineError> {
        let report = self.retention.apply(policy, actor).await?;
        // Adjusted or purged versions may have invalidated cached indicators.
        self.indicators.purge_stale().await;
        Ok(report)
    }
}
