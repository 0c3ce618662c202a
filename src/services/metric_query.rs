//! Maps metrics onto windowed queries and normalizes the results.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::backend::{Bucket, Sample, TimeSeriesBackend};
use crate::error::QueryError;
use crate::metric::{
    MeasurementKind, Metric, MetricSpec, SeriesRef, TemperatureLocation, POWER_CURRENT,
    POWER_GENERATION, POWER_SCALE, TEMPERATURE_SCALE,
};
use crate::period::TimeRange;
use crate::query::{pipeline, Aggregate, LabeledQuery, QueryBuilder, WindowedQuery};
use crate::time::{local_midnight, local_naive};
use crate::units::events_to_raw;
use crate::window::Window;

/// How far back the last counter value before a range is looked up.
const PRIME_LOOKBACK_DAYS: i64 = 62;
/// Trailing window searched for the latest live power sample.
const LAST_POWER_WINDOW_MINUTES: i64 = 5;
/// How far back the latest water tick is searched.
const WATER_ANCHOR_LOOKBACK_DAYS: i64 = 30;
const RECENT_POWER_WINDOW: Window = Window::Seconds(10);
const RECENT_WATER_WINDOW: Window = Window::Seconds(30);
const PROFILE_WINDOW: Window = Window::Minutes(15);
const PROFILE_DAYS: i64 = 7;

const SERIES_LABEL: &str = "series";
const CURRENT_LABEL: &str = "current";
const GENERATION_LABEL: &str = "generation";

/// `[timestamp, value]` with the timestamp in RFC 3339 local time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint(pub String, pub f64);

/// `[hour, minute, value]` of a daily profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfilePoint(pub u32, pub u32, pub i64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSnapshot {
    pub timestamp: String,
    /// Net draw in kW.
    pub current: f64,
}

/// Per-bucket reduction selectable by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Max,
}

impl Reducer {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "mean" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            other => Err(QueryError::invalid_parameter(
                "fn",
                format!("unknown function {other:?}"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Max => "max",
        }
    }

    fn aggregate(self) -> Aggregate {
        match self {
            Self::Mean => Aggregate::Mean,
            Self::Max => Aggregate::Max,
        }
    }

    fn reduce(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Clone)]
pub struct MetricQueryService {
    backend: Arc<dyn TimeSeriesBackend>,
    tz: Tz,
    timeout: StdDuration,
}

impl MetricQueryService {
    pub fn new(backend: Arc<dyn TimeSeriesBackend>, tz: Tz, timeout: StdDuration) -> Self {
        Self {
            backend,
            tz,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The windowed pipeline for a metric's storage series over `range`.
    pub fn pipeline_for(
        &self,
        spec: &MetricSpec,
        range: TimeRange,
    ) -> Result<WindowedQuery, QueryError> {
        pipeline_builder(spec.series, spec.kind, spec.interpolate, range).build()
    }

    /// Runs one pipeline and returns its buckets in raw units.
    pub async fn execute(&self, query: &WindowedQuery) -> Result<Vec<Bucket>, QueryError> {
        let labeled = [LabeledQuery::new(SERIES_LABEL, query.aggregation)];
        let mut tables = self.deadline(self.backend.aggregate(&labeled)).await?;
        let buckets = tables.remove(SERIES_LABEL).unwrap_or_default();

        let primer = if query.prime && !starts_with_value(&buckets, query.aggregation.start) {
            let start = query.aggregation.start;
            self.deadline(self.backend.last_sample(
                query.aggregation.series,
                start - Duration::days(PRIME_LOOKBACK_DAYS),
                start,
            ))
            .await?
            .map(|sample| sample.value)
        } else {
            None
        };

        Ok(pipeline::apply(query, buckets, primer, &self.tz))
    }

    /// Usage of a metric over a resolved range, in display units.
    pub async fn usage_series(
        &self,
        metric: Metric,
        range: TimeRange,
    ) -> Result<Vec<SeriesPoint>, QueryError> {
        let spec = metric.spec();
        let query = self.pipeline_for(&spec, range)?;
        let buckets = self.execute(&query).await?;
        Ok(buckets
            .iter()
            .filter_map(|bucket| {
                let value = bucket.value?;
                let raw = match spec.kind {
                    MeasurementKind::EventCount => events_to_raw(value, spec.raw_per_event),
                    MeasurementKind::CumulativeCounter
                    | MeasurementKind::InstantaneousSummable => value,
                };
                Some(self.point(bucket.time, spec.scale.to_display(raw)))
            })
            .collect())
    }

    /// Every sensor of a location, keyed by sensor name, in one backend request.
    pub async fn temperature_series(
        &self,
        location: TemperatureLocation,
        range: TimeRange,
        reducer: Reducer,
    ) -> Result<BTreeMap<String, Vec<SeriesPoint>>, QueryError> {
        let sensors = location.sensors();
        let queries = sensors
            .iter()
            .map(|sensor| {
                QueryBuilder::new(sensor.series)
                    .range(range)
                    .aggregate_with(reducer.aggregate())
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let labeled: Vec<LabeledQuery> = sensors
            .iter()
            .zip(&queries)
            .map(|(sensor, query)| LabeledQuery::new(sensor.name, query.aggregation))
            .collect();

        let mut tables = self.deadline(self.backend.aggregate(&labeled)).await?;

        let mut out = BTreeMap::new();
        for (sensor, query) in sensors.iter().zip(&queries) {
            let buckets = tables.remove(sensor.name).unwrap_or_default();
            let points = pipeline::apply(query, buckets, None, &self.tz)
                .iter()
                .filter_map(|bucket| {
                    let value = bucket.value?;
                    Some(self.point(bucket.time, TEMPERATURE_SCALE.to_display(value)))
                })
                .collect();
            out.insert(sensor.name.to_string(), points);
        }
        Ok(out)
    }

    /// Latest net draw (grid minus solar) within the last few minutes.
    pub async fn last_power_draw(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<PowerSnapshot>, QueryError> {
        let start = now - Duration::minutes(LAST_POWER_WINDOW_MINUTES);
        let Some(current) = self.last_in(POWER_CURRENT, start, now).await? else {
            return Ok(None);
        };
        let generation = self
            .last_in(POWER_GENERATION, start, now)
            .await?
            .map_or(0.0, |sample| sample.value);

        Ok(Some(PowerSnapshot {
            timestamp: self.format_time(current.time),
            current: POWER_SCALE.to_display(current.value - generation),
        }))
    }

    /// Net draw over the trailing `minutes`, at a 10 s mean cadence.
    pub async fn recent_power_draw(
        &self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>, QueryError> {
        let start = now - Duration::minutes(i64::from(minutes));
        let range = TimeRange::new(start, now, RECENT_POWER_WINDOW)?;
        let channels = [(CURRENT_LABEL, POWER_CURRENT), (GENERATION_LABEL, POWER_GENERATION)];
        let labeled = channels
            .iter()
            .map(|(label, series)| {
                let query = QueryBuilder::new(*series)
                    .range(range)
                    .aggregate_with(Aggregate::Mean)
                    .build()?;
                Ok(LabeledQuery::new(*label, query.aggregation))
            })
            .collect::<Result<Vec<_>, QueryError>>()?;

        let mut tables = self.deadline(self.backend.aggregate(&labeled)).await?;
        let current = tables.remove(CURRENT_LABEL).unwrap_or_default();
        let generation: BTreeMap<DateTime<Utc>, f64> = tables
            .remove(GENERATION_LABEL)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|bucket| Some((bucket.time, bucket.value?)))
            .collect();

        Ok(current
            .iter()
            .filter_map(|bucket| {
                let draw = bucket.value? - generation.get(&bucket.time).copied().unwrap_or(0.0);
                Some(self.point(bucket.time, POWER_SCALE.to_display(draw)))
            })
            .collect())
    }

    /// Water use per 30 s over the `minutes` before the latest water tick.
    pub async fn recent_water_usage(
        &self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>, QueryError> {
        let spec = Metric::Water.spec();
        let Some(anchor) = self
            .last_in(
                spec.series,
                now - Duration::days(WATER_ANCHOR_LOOKBACK_DAYS),
                now + Duration::seconds(1),
            )
            .await?
        else {
            return Ok(Vec::new());
        };

        let start = anchor.time - Duration::minutes(i64::from(minutes));
        // Stop is exclusive; the anchor tick itself belongs to the range.
        let stop = anchor.time + Duration::seconds(1);
        let range = TimeRange::new(start, stop, RECENT_WATER_WINDOW)?;
        self.usage_series(Metric::Water, range).await
    }

    /// Average (or peak) solar output per quarter hour over the week before `date`.
    pub async fn generation_profile(
        &self,
        date: NaiveDate,
        reducer: Reducer,
    ) -> Result<Vec<ProfilePoint>, QueryError> {
        let first = date
            .checked_sub_signed(Duration::days(PROFILE_DAYS))
            .ok_or_else(|| QueryError::invalid_parameter("day", "date out of range"))?;
        let start = self.midnight(first)?;
        let stop = self.midnight(date)?;
        let range = TimeRange::new(start, stop, PROFILE_WINDOW)?;
        let series = Metric::SolarGeneration.spec().series;

        let query = QueryBuilder::new(series)
            .range(range)
            .aggregate_with(reducer.aggregate())
            .build()?;
        let buckets = self.execute(&query).await?;

        let mut slots: BTreeMap<(u32, u32), Vec<f64>> = BTreeMap::new();
        for bucket in buckets {
            let Some(value) = bucket.value else {
                continue;
            };
            let local = local_naive(&self.tz, bucket.time);
            if local.minute() % 15 != 0 || local.second() != 0 {
                continue;
            }
            slots
                .entry((local.hour(), local.minute()))
                .or_default()
                .push(value);
        }

        Ok(slots
            .into_iter()
            .filter_map(|((hour, minute), values)| {
                let value = reducer.reduce(&values)?;
                Some(ProfilePoint(hour, minute, value as i64))
            })
            .collect())
    }

    async fn last_in(
        &self,
        series: SeriesRef,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Option<Sample>, QueryError> {
        self.deadline(self.backend.last_sample(series, start, stop))
            .await
    }

    async fn deadline<T>(
        &self,
        call: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::BackendTimeout(self.timeout)),
        }
    }

    fn midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>, QueryError> {
        local_midnight(&self.tz, date).map_err(|reason| QueryError::invalid_parameter("day", reason))
    }

    fn point(&self, time: DateTime<Utc>, value: f64) -> SeriesPoint {
        SeriesPoint(self.format_time(time), value)
    }

    fn format_time(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.tz).to_rfc3339()
    }
}

fn pipeline_builder(
    series: SeriesRef,
    kind: MeasurementKind,
    interpolate: bool,
    range: TimeRange,
) -> QueryBuilder {
    let builder = QueryBuilder::new(series).range(range);
    match kind {
        MeasurementKind::CumulativeCounter => {
            let builder = builder
                .aggregate_with(Aggregate::Max)
                .take_difference()
                .include_previous();
            if interpolate {
                builder.interpolate()
            } else {
                builder
            }
        }
        MeasurementKind::InstantaneousSummable => builder.aggregate_with(Aggregate::Sum),
        MeasurementKind::EventCount => builder.aggregate_with(Aggregate::Count).create_empty(),
    }
}

fn starts_with_value(buckets: &[Bucket], start: DateTime<Utc>) -> bool {
    buckets
        .first()
        .is_some_and(|bucket| bucket.time == start && bucket.value.is_some())
}
