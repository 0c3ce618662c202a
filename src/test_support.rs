use crate::backend::{Bucket, Sample, TimeSeriesBackend};
use crate::config::{ApiConfig, BackendConfig, InfluxConfig};
use crate::error::QueryError;
use crate::metric::SeriesRef;
use crate::query::{Aggregate, AggregationQuery, LabeledQuery};
use crate::state::{AppState, Clock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SeriesKey = (&'static str, &'static str);

/// In-memory backend that windows raw samples itself and counts calls.
#[derive(Default)]
pub struct FakeBackend {
    samples: Mutex<BTreeMap<SeriesKey, Vec<Sample>>>,
    aggregate_calls: AtomicUsize,
    last_sample_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeBackend {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, series: SeriesRef, time: DateTime<Utc>, value: f64) {
        self.samples
            .lock()
            .expect("samples lock")
            .entry((series.measurement, series.field))
            .or_default()
            .push(Sample { time, value });
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn last_sample_calls(&self) -> usize {
        self.last_sample_calls.load(Ordering::SeqCst)
    }

    pub fn backend_calls(&self) -> usize {
        self.aggregate_calls() + self.last_sample_calls()
    }

    fn in_range(&self, series: SeriesRef, start: DateTime<Utc>, stop: DateTime<Utc>) -> Vec<Sample> {
        let samples = self.samples.lock().expect("samples lock");
        let mut out: Vec<Sample> = samples
            .get(&(series.measurement, series.field))
            .map(|samples| {
                samples
                    .iter()
                    .filter(|sample| sample.time >= start && sample.time < stop)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|sample| sample.time);
        out
    }

    fn window(&self, query: &AggregationQuery) -> Vec<Bucket> {
        let tz = chrono_tz::Europe::Amsterdam;
        let mut grouped: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
        for sample in self.in_range(query.series, query.start, query.stop) {
            let bucket = query.window.bucket_for(sample.time, query.start, &tz);
            grouped.entry(bucket).or_default().push(sample.value);
        }
        grouped
            .into_iter()
            .map(|(time, values)| {
                let value = match query.aggregate {
                    Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Aggregate::Sum => values.iter().sum(),
                    Aggregate::Count => values.len() as f64,
                    Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
                };
                Bucket {
                    time,
                    value: Some(value),
                }
            })
            .collect()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TimeSeriesBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn aggregate(
        &self,
        queries: &[LabeledQuery],
    ) -> Result<BTreeMap<String, Vec<Bucket>>, QueryError> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(queries
            .iter()
            .map(|labeled| (labeled.label.clone(), self.window(&labeled.query)))
            .collect())
    }

    async fn last_sample(
        &self,
        series: SeriesRef,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Option<Sample>, QueryError> {
        self.last_sample_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.in_range(series, start, stop).last().copied())
    }
}

pub fn test_config(cache_dir: &Path) -> ApiConfig {
    ApiConfig {
        backend: BackendConfig::Influx(InfluxConfig {
            host: "127.0.0.1".to_string(),
            org: "home".to_string(),
            bucket: "readings".to_string(),
            token: "test-token".to_string(),
            use_ssl: false,
        }),
        cache_dir: cache_dir.to_path_buf(),
        timezone: chrono_tz::Europe::Amsterdam,
        backend_timeout: Duration::from_secs(5),
    }
}

pub fn test_state(backend: Arc<FakeBackend>, cache_dir: &Path, now: DateTime<Utc>) -> AppState {
    AppState::new(&test_config(cache_dir), backend, Clock::Fixed(now))
}
