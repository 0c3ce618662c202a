use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{Bucket, Sample, TimeSeriesBackend};
use crate::config::TimescaleConfig;
use crate::error::QueryError;
use crate::metric::SeriesRef;
use crate::query::{sql, LabeledQuery};
use crate::window::{alignment_origin, Window};

pub fn connect_lazy(config: &TimescaleConfig, acquire_timeout: Duration) -> Result<PgPool> {
    let options = config
        .connect_options()
        .context("failed to build timescale connect options")?;
    Ok(PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect_lazy_with(options))
}

#[derive(sqlx::FromRow)]
struct BucketRow {
    label: String,
    bucket: DateTime<Utc>,
    value: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    created: DateTime<Utc>,
    value: f64,
}

/// TimescaleDB tables queried with `time_bucket`.
pub struct TimescaleBackend {
    pool: PgPool,
    timezone: Tz,
}

impl TimescaleBackend {
    pub fn new(pool: PgPool, timezone: Tz) -> Self {
        Self { pool, timezone }
    }
}

#[async_trait]
impl TimeSeriesBackend for TimescaleBackend {
    fn name(&self) -> &'static str {
        "timescale"
    }

    async fn aggregate(
        &self,
        queries: &[LabeledQuery],
    ) -> Result<BTreeMap<String, Vec<Bucket>>, QueryError> {
        if queries.is_empty() {
            return Ok(BTreeMap::new());
        }
        let text = sql::render_aggregations(queries)?;
        tracing::debug!(sql = %text, "timescale query");

        let origin = alignment_origin(&self.timezone);
        let mut query = sqlx::query_as::<_, BucketRow>(&text);
        for labeled in queries {
            query = query
                .bind(labeled.label.clone())
                .bind(labeled.query.window.sql_interval())
                .bind(self.timezone.name().to_string())
                .bind(origin)
                .bind(labeled.query.start)
                .bind(labeled.query.stop);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend_error)?;

        let ranges: BTreeMap<&str, (DateTime<Utc>, Window)> = queries
            .iter()
            .map(|labeled| {
                (
                    labeled.label.as_str(),
                    (labeled.query.start, labeled.query.window),
                )
            })
            .collect();
        Ok(group_rows(rows, &ranges, &self.timezone))
    }

    async fn last_sample(
        &self,
        series: SeriesRef,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Option<Sample>, QueryError> {
        let text = sql::render_last_sample(series)?;
        let row: Option<SampleRow> = sqlx::query_as(&text)
            .bind(start)
            .bind(stop)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(row.map(|row| Sample {
            time: row.created,
            value: row.value,
        }))
    }
}

/// Groups rows per label. `time_bucket` floors the first bucket below the
/// range start; it is clipped so both backends stamp it alike.
fn group_rows(
    rows: Vec<BucketRow>,
    ranges: &BTreeMap<&str, (DateTime<Utc>, Window)>,
    tz: &Tz,
) -> BTreeMap<String, Vec<Bucket>> {
    let mut grouped: BTreeMap<String, Vec<Bucket>> = BTreeMap::new();
    for row in rows {
        let time = match ranges.get(row.label.as_str()) {
            Some((start, window)) => window.bucket_for(row.bucket, *start, tz),
            None => row.bucket,
        };
        grouped.entry(row.label).or_default().push(Bucket {
            time,
            value: row.value,
        });
    }
    grouped
}

fn backend_error(err: sqlx::Error) -> QueryError {
    QueryError::BackendUnavailable(format!("timescale query failed: {err}"))
}
