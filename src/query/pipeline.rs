//! In-process steps applied to backend bucket aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use super::{Aggregate, WindowedQuery};
use crate::backend::Bucket;
use crate::window::bucket_starts;

/// Runs the post-aggregation steps of `query` over `buckets`.
///
/// `primer` is the last counter value before the range start, if one was
/// looked up.
pub fn apply<Tz: TimeZone>(
    query: &WindowedQuery,
    buckets: Vec<Bucket>,
    primer: Option<f64>,
    tz: &Tz,
) -> Vec<Bucket> {
    let agg = &query.aggregation;
    let mut buckets = normalize(buckets);

    if query.prime {
        buckets = prime(buckets, agg.start, primer);
    }
    if agg.create_empty || query.interpolate {
        let grid = bucket_starts(agg.window, agg.start, agg.stop, tz);
        let fill = match agg.aggregate {
            Aggregate::Count | Aggregate::Sum if agg.create_empty => Some(0.0),
            _ => None,
        };
        buckets = fill_grid(buckets, &grid, fill);
    }
    if query.interpolate {
        interpolate_linear(&mut buckets);
    }

    let mut buckets = drop_empty(buckets);
    if query.difference {
        buckets = difference_clamped(&buckets);
    }
    trim_before(buckets, query.reported_from)
}

/// Sorted by time; later duplicates win.
fn normalize(buckets: Vec<Bucket>) -> Vec<Bucket> {
    let by_time: BTreeMap<DateTime<Utc>, Option<f64>> = buckets
        .into_iter()
        .map(|bucket| (bucket.time, bucket.value))
        .collect();
    by_time
        .into_iter()
        .map(|(time, value)| Bucket { time, value })
        .collect()
}

/// Puts `primer` into the bucket at `start` when that bucket has no value.
pub fn prime(mut buckets: Vec<Bucket>, start: DateTime<Utc>, primer: Option<f64>) -> Vec<Bucket> {
    let Some(value) = primer else {
        return buckets;
    };
    match buckets.first_mut() {
        Some(first) if first.time == start => {
            if first.value.is_none() {
                first.value = Some(value);
            }
        }
        _ => buckets.insert(
            0,
            Bucket {
                time: start,
                value: Some(value),
            },
        ),
    }
    buckets
}

/// One bucket per grid instant; instants with no bucket get `fill`.
pub fn fill_grid(
    buckets: Vec<Bucket>,
    grid: &[DateTime<Utc>],
    fill: Option<f64>,
) -> Vec<Bucket> {
    let mut by_time: BTreeMap<DateTime<Utc>, Option<f64>> = buckets
        .into_iter()
        .map(|bucket| (bucket.time, bucket.value))
        .collect();
    for time in grid {
        by_time.entry(*time).or_insert(fill);
    }
    by_time
        .into_iter()
        .map(|(time, value)| Bucket { time, value })
        .collect()
}

/// Fills interior gaps on the straight line between their neighbours.
/// Leading and trailing gaps stay empty.
pub fn interpolate_linear(buckets: &mut [Bucket]) {
    let mut previous: Option<usize> = None;
    for index in 0..buckets.len() {
        if buckets[index].value.is_none() {
            continue;
        }
        if let Some(left) = previous {
            if index - left > 1 {
                fill_between(buckets, left, index);
            }
        }
        previous = Some(index);
    }
}

fn fill_between(buckets: &mut [Bucket], left: usize, right: usize) {
    let (Some(left_value), Some(right_value)) = (buckets[left].value, buckets[right].value) else {
        return;
    };
    let left_time = buckets[left].time;
    let span = (buckets[right].time - left_time).num_milliseconds() as f64;
    if span <= 0.0 {
        return;
    }
    for bucket in &mut buckets[left + 1..right] {
        let offset = (bucket.time - left_time).num_milliseconds() as f64;
        bucket.value = Some(left_value + (right_value - left_value) * offset / span);
    }
}

pub fn drop_empty(buckets: Vec<Bucket>) -> Vec<Bucket> {
    buckets
        .into_iter()
        .filter(|bucket| bucket.value.is_some())
        .collect()
}

/// Successive differences stamped with the later bucket's time; a counter
/// that went backwards yields 0.
pub fn difference_clamped(buckets: &[Bucket]) -> Vec<Bucket> {
    buckets
        .windows(2)
        .filter_map(|pair| {
            let (previous, current) = (pair[0].value?, pair[1].value?);
            Some(Bucket {
                time: pair[1].time,
                value: Some((current - previous).max(0.0)),
            })
        })
        .collect()
}

pub fn trim_before(buckets: Vec<Bucket>, reported_from: DateTime<Utc>) -> Vec<Bucket> {
    buckets
        .into_iter()
        .filter(|bucket| bucket.time >= reported_from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::SeriesRef;
    use crate::period::TimeRange;
    use crate::query::QueryBuilder;
    use crate::window::Window;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 14, 21, 0, 0).single().expect("t0")
    }

    fn hourly(values: &[Option<f64>]) -> Vec<Bucket> {
        values
            .iter()
            .enumerate()
            .map(|(hour, value)| Bucket {
                time: t0() + Duration::hours(hour as i64),
                value: *value,
            })
            .collect()
    }

    fn values(buckets: &[Bucket]) -> Vec<f64> {
        buckets.iter().filter_map(|bucket| bucket.value).collect()
    }

    #[test]
    fn counter_deltas_clamp_resets() {
        let deltas = difference_clamped(&hourly(&[
            Some(10.0),
            Some(10.0),
            Some(15.0),
            Some(15.0),
            Some(30.0),
        ]));
        assert_eq!(values(&deltas), [0.0, 5.0, 0.0, 15.0]);
        assert_eq!(deltas[0].time, t0() + Duration::hours(1));

        let reset = difference_clamped(&hourly(&[Some(30.0), Some(2.0), Some(5.0)]));
        assert_eq!(values(&reset), [0.0, 3.0]);
    }

    #[test]
    fn interpolates_interior_gaps_only() {
        let mut buckets = hourly(&[None, Some(10.0), None, None, Some(16.0), None]);
        interpolate_linear(&mut buckets);
        let filled: Vec<_> = buckets.iter().map(|bucket| bucket.value).collect();
        assert_eq!(
            filled,
            [None, Some(10.0), Some(12.0), Some(14.0), Some(16.0), None]
        );
    }

    #[test]
    fn priming_fills_a_missing_first_bucket() {
        let primed = prime(hourly(&[None, Some(12.0)]), t0(), Some(9.0));
        assert_eq!(values(&primed), [9.0, 12.0]);

        let inserted = prime(hourly(&[Some(12.0)]), t0() - Duration::hours(1), Some(9.0));
        assert_eq!(inserted[0].time, t0() - Duration::hours(1));

        let untouched = prime(hourly(&[Some(11.0), Some(12.0)]), t0(), Some(9.0));
        assert_eq!(values(&untouched), [11.0, 12.0]);
    }

    #[test]
    fn counter_pipeline_reports_from_period_start() {
        let tz = chrono_tz::Europe::Amsterdam;
        let range = TimeRange::new(t0(), t0() + Duration::hours(4), Window::HOUR)
            .expect("range")
            .reported_from(t0() + Duration::hours(1));
        let query = QueryBuilder::new(SeriesRef::new("gas", "cumulative_total_dm3"))
            .range(range)
            .aggregate_with(Aggregate::Max)
            .interpolate()
            .take_difference()
            .include_previous()
            .build()
            .expect("build");

        // First bucket empty, primed from before the range; one interior gap.
        let buckets = vec![
            Bucket { time: t0() + Duration::hours(1), value: Some(100.0) },
            Bucket { time: t0() + Duration::hours(3), value: Some(110.0) },
        ];
        let out = apply(&query, buckets, Some(96.0), &tz);

        assert_eq!(values(&out), [4.0, 5.0, 5.0]);
        assert_eq!(out[0].time, range.reported_from);
    }

    #[test]
    fn event_counts_get_explicit_zero_buckets() {
        let tz = chrono_tz::Europe::Amsterdam;
        let range = TimeRange::new(t0(), t0() + Duration::hours(3), Window::HOUR).expect("range");
        let query = QueryBuilder::new(SeriesRef::new("water", "usage_dl"))
            .range(range)
            .aggregate_with(Aggregate::Count)
            .create_empty()
            .build()
            .expect("build");

        let out = apply(
            &query,
            vec![Bucket { time: t0() + Duration::hours(1), value: Some(4.0) }],
            None,
            &tz,
        );
        assert_eq!(values(&out), [0.0, 4.0, 0.0]);
    }

    #[test]
    fn non_differencing_pipelines_start_at_reported_from() {
        let tz = chrono_tz::Europe::Amsterdam;
        let range = TimeRange::new(t0(), t0() + Duration::hours(3), Window::HOUR)
            .expect("range")
            .reported_from(t0() + Duration::hours(1));
        let query = QueryBuilder::new(SeriesRef::new("generation", "generation_wh"))
            .range(range)
            .aggregate_with(Aggregate::Sum)
            .build()
            .expect("build");
        assert_eq!(query.aggregation.start, range.reported_from);

        let out = apply(&query, hourly(&[Some(7.0), Some(3.0), None]), None, &tz);
        assert_eq!(values(&out), [3.0]);
    }
}
