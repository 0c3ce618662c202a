//! Flux rendering and annotated-CSV parsing for InfluxDB 2.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

use super::{AggregationQuery, LabeledQuery};
use crate::backend::{Bucket, Sample};
use crate::error::QueryError;
use crate::metric::SeriesRef;

/// Label of the single table a last-sample script yields.
pub const LAST_SAMPLE_LABEL: &str = "last";

/// One script yielding one named result per sub-query.
pub fn render_aggregations(bucket: &str, timezone: &str, queries: &[LabeledQuery]) -> String {
    let mut script = prelude(timezone);
    for (index, labeled) in queries.iter().enumerate() {
        script.push('\n');
        script.push_str(&render_aggregation(index, bucket, &labeled.query));
        script.push_str(&format!(
            "t{index} |> yield(name: {})\n",
            string_literal(&labeled.label)
        ));
    }
    script
}

fn prelude(timezone: &str) -> String {
    format!(
        "import \"timezone\"\n\noption location = timezone.location(name: {})\n",
        string_literal(timezone)
    )
}

fn render_aggregation(index: usize, bucket: &str, query: &AggregationQuery) -> String {
    let steps = [
        format!("range(start: {}, stop: {})", timestamp(query.start), timestamp(query.stop)),
        series_filter(query.series),
        format!(
            "window(every: {}, createEmpty: {})",
            query.window.flux_duration(),
            query.create_empty
        ),
        query.aggregate.flux_call().to_string(),
        "duplicate(column: \"_start\", as: \"_time\")".to_string(),
        "window(every: inf)".to_string(),
        "keep(columns: [\"_time\", \"_value\"])".to_string(),
    ];
    pipe(&format!("t{index} = from(bucket: {})", string_literal(bucket)), &steps)
}

pub fn render_last_sample(
    bucket: &str,
    series: SeriesRef,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> String {
    let steps = [
        format!("range(start: {}, stop: {})", timestamp(start), timestamp(stop)),
        series_filter(series),
        "last()".to_string(),
        "keep(columns: [\"_time\", \"_value\"])".to_string(),
        format!("yield(name: {})", string_literal(LAST_SAMPLE_LABEL)),
    ];
    pipe(&format!("from(bucket: {})", string_literal(bucket)), &steps)
}

/// `source` followed by one `  |> step` line per step.
fn pipe(source: &str, steps: &[String]) -> String {
    let mut out = format!("{source}\n");
    for step in steps {
        out.push_str(&format!("  |> {step}\n"));
    }
    out
}

fn series_filter(series: SeriesRef) -> String {
    format!(
        "filter(fn: (r) => r._measurement == {} and r._field == {})",
        string_literal(series.measurement),
        string_literal(series.field)
    )
}

fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn string_literal(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    result: usize,
    time: usize,
    value: usize,
}

/// Parses an annotated-CSV query response into buckets per `result` label.
///
/// Each table may restate its annotations and header. Empty cells take the
/// table's `#default` annotation. An in-band `error` table is reported as a
/// backend failure.
pub fn parse_annotated_csv(body: &str) -> Result<BTreeMap<String, Vec<Bucket>>, QueryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut tables: BTreeMap<String, Vec<Bucket>> = BTreeMap::new();
    let mut columns: Option<Columns> = None;
    let mut error_column: Option<usize> = None;
    let mut defaults: Option<csv::StringRecord> = None;

    for record in reader.records() {
        let record = record.map_err(|err| {
            QueryError::BackendUnavailable(format!("malformed influx response: {err}"))
        })?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.get(0) == Some("#default") {
            defaults = Some(record);
            continue;
        }
        if record.get(0).is_some_and(|first| first.starts_with('#')) {
            continue;
        }

        let position = |name: &str| record.iter().position(|field| field == name);
        if let Some(index) = position("error") {
            error_column = Some(index);
            columns = None;
            continue;
        }
        if let (Some(result), Some(time), Some(value)) =
            (position("result"), position("_time"), position("_value"))
        {
            columns = Some(Columns {
                result,
                time,
                value,
            });
            error_column = None;
            continue;
        }

        if let Some(index) = error_column {
            let message = record.get(index).unwrap_or("unknown error");
            return Err(QueryError::BackendUnavailable(format!(
                "influx query failed: {message}"
            )));
        }
        let Some(columns) = columns else {
            continue;
        };

        let label = cell(&record, defaults.as_ref(), columns.result).to_string();
        let raw_time = record.get(columns.time).unwrap_or_default();
        let time = DateTime::parse_from_rfc3339(raw_time)
            .map_err(|err| {
                QueryError::BackendUnavailable(format!("bad _time {raw_time:?} in influx response: {err}"))
            })?
            .with_timezone(&Utc);
        let value = record
            .get(columns.value)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| raw.parse::<f64>().ok());

        tables.entry(label).or_default().push(Bucket { time, value });
    }

    for buckets in tables.values_mut() {
        buckets.sort_by_key(|bucket| bucket.time);
    }
    Ok(tables)
}

fn cell<'a>(
    record: &'a csv::StringRecord,
    defaults: Option<&'a csv::StringRecord>,
    index: usize,
) -> &'a str {
    match record.get(index) {
        Some(value) if !value.is_empty() => value,
        _ => defaults
            .and_then(|defaults| defaults.get(index))
            .unwrap_or_default(),
    }
}

/// The sample yielded by a [`render_last_sample`] script, if any.
pub fn parse_last_sample(body: &str) -> Result<Option<Sample>, QueryError> {
    let tables = parse_annotated_csv(body)?;
    Ok(tables
        .get(LAST_SAMPLE_LABEL)
        .and_then(|buckets| buckets.last())
        .and_then(|bucket| {
            bucket.value.map(|value| Sample {
                time: bucket.time,
                value,
            })
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Aggregate;
    use crate::window::Window;
    use chrono::TimeZone;

    fn gas_query() -> AggregationQuery {
        AggregationQuery {
            series: SeriesRef::new("gas", "cumulative_total_dm3"),
            start: Utc.with_ymd_and_hms(2023, 6, 14, 21, 0, 0).single().expect("start"),
            stop: Utc.with_ymd_and_hms(2023, 6, 15, 22, 0, 0).single().expect("stop"),
            window: Window::HOUR,
            aggregate: Aggregate::Max,
            create_empty: false,
        }
    }

    #[test]
    fn renders_windowed_pipeline_per_label() {
        let script = render_aggregations(
            "readings",
            "Europe/Amsterdam",
            &[
                LabeledQuery::new("gas", gas_query()),
                LabeledQuery::new("other", gas_query()),
            ],
        );

        assert!(script.contains("option location = timezone.location(name: \"Europe/Amsterdam\")"));
        assert!(script.contains("t0 = from(bucket: \"readings\")"));
        assert!(script.contains("|> range(start: 2023-06-14T21:00:00Z, stop: 2023-06-15T22:00:00Z)"));
        assert!(script.contains(
            "r._measurement == \"gas\" and r._field == \"cumulative_total_dm3\""
        ));
        assert!(script.contains("|> window(every: 1h, createEmpty: false)"));
        assert!(script.contains("|> max()"));
        assert!(script.contains("t0 |> yield(name: \"gas\")"));
        assert!(script.contains("t1 |> yield(name: \"other\")"));
    }

    #[test]
    fn event_counts_request_empty_windows() {
        let water = AggregationQuery {
            series: SeriesRef::new("water", "usage_dl"),
            window: Window::Seconds(30),
            aggregate: Aggregate::Count,
            create_empty: true,
            ..gas_query()
        };
        let script = render_aggregations("readings", "Europe/Amsterdam", &[LabeledQuery::new("series", water)]);

        assert!(script.contains("|> window(every: 30s, createEmpty: true)"));
        assert!(script.contains("|> count()"));
        assert!(script.ends_with("t0 |> yield(name: \"series\")\n"));
    }

    #[test]
    fn last_sample_script_yields_one_row() {
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).single().expect("start");
        let script = render_last_sample(
            "readings",
            SeriesRef::new("power", "current_w"),
            start,
            start + chrono::Duration::minutes(5),
        );
        assert!(script.starts_with("from(bucket: \"readings\")\n  |> range("));
        assert!(script.contains("  |> last()\n"));
        assert!(script.ends_with("  |> yield(name: \"last\")\n"));
    }

    #[test]
    fn escapes_string_literals() {
        assert_eq!(string_literal("a\"b\\c"), "\"a\\\"b\\\\c\"");
    }

    #[test]
    fn parses_multiple_tables_with_annotations() {
        let body = "#datatype,string,long,dateTime:RFC3339,double\n\
#group,false,false,false,false\n\
#default,gas,,,\n\
,result,table,_time,_value\n\
,,0,2023-06-14T22:00:00Z,100\n\
,,0,2023-06-14T21:00:00Z,98\n\
\n\
#datatype,string,long,dateTime:RFC3339,double\n\
#group,false,false,false,false\n\
#default,zolder,,,\n\
,result,table,_time,_value\n\
,zolder,0,2023-06-14T22:00:00Z,\n";

        let tables = parse_annotated_csv(body).expect("parse");
        assert_eq!(tables.len(), 2);
        let gas = &tables["gas"];
        assert_eq!(gas.len(), 2);
        assert_eq!(gas[0].value, Some(98.0));
        let zolder = &tables["zolder"];
        assert_eq!(zolder.len(), 1);
        assert_eq!(zolder[0].value, None);
    }

    #[test]
    fn orders_buckets_and_reads_values() {
        let body = ",result,table,_time,_value\n\
,gas,0,2023-06-14T22:00:00Z,100\n\
,gas,0,2023-06-14T21:00:00Z,98.5\n";

        let tables = parse_annotated_csv(body).expect("parse");
        let gas = &tables["gas"];
        assert_eq!(gas[0].value, Some(98.5));
        assert_eq!(gas[1].value, Some(100.0));
        assert!(gas[0].time < gas[1].time);
    }

    #[test]
    fn in_band_errors_are_backend_failures() {
        let body = ",error,reference\n,\"failed to parse query\",897\n";
        let err = parse_annotated_csv(body).expect_err("error table");
        assert!(matches!(err, QueryError::BackendUnavailable(ref message) if message.contains("failed to parse")));
    }

    #[test]
    fn last_sample_reads_the_yielded_row() {
        let body = ",result,table,_time,_value\n,last,0,2023-06-15T10:00:00Z,1234\n";
        let sample = parse_last_sample(body).expect("parse").expect("sample");
        assert_eq!(sample.value, 1234.0);

        assert!(parse_last_sample("").expect("empty").is_none());
    }
}
