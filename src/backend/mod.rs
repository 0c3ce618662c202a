//! Time-series storage backends.

pub mod influx;
pub mod timescale;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::metric::SeriesRef;
use crate::query::LabeledQuery;

/// One window aggregate, stamped with the window start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub time: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs every sub-query in one request and returns the buckets per label,
    /// in chronological order. Labels without data may be absent.
    async fn aggregate(
        &self,
        queries: &[LabeledQuery],
    ) -> Result<BTreeMap<String, Vec<Bucket>>, QueryError>;

    /// Latest sample of `series` in `[start, stop)`.
    async fn last_sample(
        &self,
        series: SeriesRef,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Option<Sample>, QueryError>;
}
