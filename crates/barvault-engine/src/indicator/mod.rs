//! Version-aware indicator computation.
//!
//! Cache keys canonicalize the indicator parameters into an ordered string and
//! include the underlying version's content hash, so a mutated `latest` can
//! never serve stale values: the new hash simply misses the cache. Entries are
//! in-process only and are never persisted.

pub mod calc;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use barvault_core::{OhlcvPoint, TimeRange, UtcTimestamp, VersionTag};
use barvault_store::{SeriesKey, VersionStore};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;
use tracing::debug;

use crate::EngineError;

const MAX_PERIOD: u32 = 10_000;

/// Supported indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Atr,
    Adx,
}

impl IndicatorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Rsi => "rsi",
            Self::Atr => "atr",
            Self::Adx => "adx",
        }
    }

    /// Inclusive period bounds for this indicator.
    const fn period_bounds(self) -> (u32, u32) {
        match self {
            Self::Sma | Self::Ema => (1, MAX_PERIOD),
            Self::Rsi | Self::Atr | Self::Adx => (2, MAX_PERIOD),
        }
    }
}

/// An indicator request: kind plus named parameters.
///
/// Parameters live in an ordered map so the canonical rendering, and therefore
/// the cache key, is independent of insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub kind: IndicatorKind,
    pub params: BTreeMap<String, f64>,
}

impl IndicatorSpec {
    pub fn new(kind: IndicatorKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Canonical rendering: kind plus sorted `name=value` pairs.
    pub fn canonical(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("{}({})", self.kind.as_str(), params.join(","))
    }

    /// Validate parameters against this indicator's bounds.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] naming the violated bound; raised
    /// synchronously, before any series is resolved.
    pub fn validated_period(&self) -> Result<usize, EngineError> {
        for name in self.params.keys() {
            if name != "period" {
                return Err(EngineError::invalid_parameter(
                    self.kind.as_str(),
                    name.clone(),
                    self.params[name],
                    "unknown parameter",
                ));
            }
        }

        let (min, max) = self.kind.period_bounds();
        let value = *self.params.get("period").ok_or_else(|| {
            EngineError::invalid_parameter(
                self.kind.as_str(),
                "period",
                f64::NAN,
                format!("period is required ({min} <= period <= {max})"),
            )
        })?;

        if !value.is_finite() || value.fract() != 0.0 {
            return Err(EngineError::invalid_parameter(
                self.kind.as_str(),
                "period",
                value,
                "period must be an integer",
            ));
        }
        if value < min as f64 || value > max as f64 {
            return Err(EngineError::invalid_parameter(
                self.kind.as_str(),
                "period",
                value,
                format!("{min} <= period <= {max}"),
            ));
        }
        Ok(value as usize)
    }
}

/// One computed indicator value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorPoint {
    pub ts: UtcTimestamp,
    pub value: f64,
}

/// A computed indicator series; warmup bars are omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub kind: IndicatorKind,
    pub canonical: String,
    pub points: Vec<IndicatorPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    series: SeriesKey,
    tag: String,
    content_hash: String,
    spec: String,
    start: i64,
    end: i64,
}

/// Computes indicators over resolved series with a compute-once cache.
pub struct IndicatorEngine {
    store: Arc<VersionStore>,
    cache: RwLock<HashMap<CacheKey, Arc<OnceCell<Arc<IndicatorSeries>>>>>,
    computations: AtomicU64,
}

impl IndicatorEngine {
    pub fn new(store: Arc<VersionStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache: RwLock::new(HashMap::new()),
            computations: AtomicU64::new(0),
        })
    }

    /// Number of kernel executions so far. Cache hits do not increment it;
    /// tests use this to prove a repeated compute did no work.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::SeqCst)
    }

    /// Compute one indicator over the resolved series.
    ///
    /// Concurrent calls for the same cache key compute once and fan out the
    /// shared result to all waiters.
    pub async fn compute(
        &self,
        spec: &IndicatorSpec,
        key: &SeriesKey,
        range: TimeRange,
        tag: &VersionTag,
    ) -> Result<Arc<IndicatorSeries>, EngineError> {
        let period = spec.validated_period()?;

        let version = self.store.resolve(key, tag).await?;
        let cache_key = CacheKey {
            series: key.clone(),
            tag: tag.as_str().to_owned(),
            content_hash: version.content_hash().to_owned(),
            spec: spec.canonical(),
            start: range.start().unix(),
            end: range.end().unix(),
        };

        let cell = {
            let mut cache = self.cache.write().await;
            Arc::clone(cache.entry(cache_key).or_default())
        };

        let series = cell
            .get_or_try_init(|| async {
                self.computations.fetch_add(1, Ordering::SeqCst);
                debug!(key = %key, spec = spec.canonical(), tag = %tag, "computing indicator");
                let bars: Vec<&OhlcvPoint> = version
                    .points()
                    .iter()
                    .filter(|point| range.contains(point.ts))
                    .collect();
                Ok::<_, EngineError>(Arc::new(run_kernel(spec, period, &bars)))
            })
            .await?;
        Ok(Arc::clone(series))
    }

    /// Compute independent indicators in parallel. A failure in one spec shows
    /// up as that spec's entry in the result map; it never aborts the batch.
    pub async fn compute_many(
        self: &Arc<Self>,
        specs: Vec<IndicatorSpec>,
        key: &SeriesKey,
        range: TimeRange,
        tag: &VersionTag,
    ) -> HashMap<String, Result<Arc<IndicatorSeries>, EngineError>> {
        let mut tasks = JoinSet::new();
        for spec in specs {
            let engine = Arc::clone(self);
            let key = key.clone();
            let tag = tag.clone();
            tasks.spawn(async move {
                let canonical = spec.canonical();
                let result = engine.compute(&spec, &key, range, &tag).await;
                (canonical, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((canonical, result)) = joined {
                results.insert(canonical, result);
            }
        }
        results
    }

    /// Drop cache entries for `latest` versions whose content hash has moved
    /// on. Stale entries are already unreachable (lookups carry the current
    /// hash); this reclaims their memory.
    pub async fn purge_stale(&self) {
        let candidates: Vec<CacheKey> = {
            let cache = self.cache.read().await;
            cache
                .keys()
                .filter(|cached| cached.tag == VersionTag::LATEST)
                .cloned()
                .collect()
        };

        let mut stale = Vec::new();
        for cached in candidates {
            let current = self
                .store
                .resolve(&cached.series, &VersionTag::Latest)
                .await;
            match current {
                Ok(version) if version.content_hash() == cached.content_hash => {}
                _ => stale.push(cached),
            }
        }

        if !stale.is_empty() {
            let mut cache = self.cache.write().await;
            for cached in &stale {
                cache.remove(cached);
            }
            debug!(purged = stale.len(), "purged stale indicator cache entries");
        }
    }
}

fn run_kernel(spec: &IndicatorSpec, period: usize, bars: &[&OhlcvPoint]) -> IndicatorSeries {
    let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();
    let values = match spec.kind {
        IndicatorKind::Sma => calc::sma(&closes, period),
        IndicatorKind::Ema => calc::ema(&closes, period),
        IndicatorKind::Rsi => calc::rsi(&closes, period),
        IndicatorKind::Atr | IndicatorKind::Adx => {
            let highs: Vec<f64> = bars.iter().map(|bar| bar.high).collect();
            let lows: Vec<f64> = bars.iter().map(|bar| bar.low).collect();
            match spec.kind {
                IndicatorKind::Atr => calc::atr(&highs, &lows, &closes, period),
                _ => calc::adx(&highs, &lows, &closes, period),
            }
        }
    };

    let points = bars
        .iter()
        .zip(values)
        .filter_map(|(bar, value)| value.map(|value| IndicatorPoint { ts: bar.ts, value }))
        .collect();

    IndicatorSeries {
        kind: spec.kind,
        canonical: spec.canonical(),
        points,
    }
}
