//! SQL rendering for TimescaleDB.
//!
//! Every table stores its samples with a `created` timestamp column. Values
//! that vary per request are bound; only validated identifiers and the
//! aggregate call are interpolated.

use super::{is_plain_identifier, AggregationQuery, LabeledQuery};
use crate::error::QueryError;
use crate::metric::SeriesRef;

/// Bind parameters per sub-query: label, bucket interval, timezone, bucket
/// origin, start, stop.
pub const BINDS_PER_QUERY: usize = 6;

/// Labeled sub-queries combined with `UNION ALL`, ordered by label and bucket.
///
/// Sub-query `k` binds `$6k+1..=$6k+6` in the order listed on
/// [`BINDS_PER_QUERY`]. The origin is [`crate::window::alignment_origin`], so
/// buckets line up with the in-process grid.
pub fn render_aggregations(queries: &[LabeledQuery]) -> Result<String, QueryError> {
    if queries.is_empty() {
        return Err(QueryError::InvalidQuery("no sub-queries".to_string()));
    }

    let parts = queries
        .iter()
        .enumerate()
        .map(|(index, labeled)| render_aggregation(index * BINDS_PER_QUERY, &labeled.query))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!(
        "{}\nORDER BY label, bucket",
        parts.join("\nUNION ALL\n")
    ))
}

fn render_aggregation(offset: usize, query: &AggregationQuery) -> Result<String, QueryError> {
    let SeriesRef { measurement, field } = checked(query.series)?;
    let p = |n: usize| format!("${}", offset + n);
    Ok(format!(
        "(SELECT {label}::text AS label, \
time_bucket({interval}::interval, created, {tz}::text, origin => {origin}::timestamptz) AS bucket, \
({agg})::double precision AS value \
FROM {measurement} \
WHERE created >= {start} AND created < {stop} \
GROUP BY bucket)",
        label = p(1),
        interval = p(2),
        tz = p(3),
        origin = p(4),
        start = p(5),
        stop = p(6),
        agg = query.aggregate.sql_expr(field),
    ))
}

/// Latest non-null sample; binds `$1` start and `$2` stop.
pub fn render_last_sample(series: SeriesRef) -> Result<String, QueryError> {
    let SeriesRef { measurement, field } = checked(series)?;
    Ok(format!(
        "SELECT created, {field}::double precision AS value \
FROM {measurement} \
WHERE created >= $1 AND created < $2 AND {field} IS NOT NULL \
ORDER BY created DESC LIMIT 1"
    ))
}

fn checked(series: SeriesRef) -> Result<SeriesRef, QueryError> {
    for ident in [series.measurement, series.field] {
        if !is_plain_identifier(ident) {
            return Err(QueryError::InvalidQuery(format!(
                "{ident:?} is not a plain identifier"
            )));
        }
    }
    Ok(series)
}
