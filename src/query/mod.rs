//! Typed windowed-aggregation queries.
//!
//! A [`WindowedQuery`] is built once per series and carries everything both
//! backends need: the range and window that run in the backend, and the
//! in-process steps applied to the returned buckets (see [`pipeline`]).

pub mod flux;
pub mod pipeline;
pub mod sql;

use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::metric::SeriesRef;
use crate::period::TimeRange;
use crate::window::{Window, MAX_BUCKETS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Sum,
    Count,
    Mean,
}

impl Aggregate {
    pub fn flux_call(self) -> &'static str {
        match self {
            Self::Max => "max()",
            Self::Sum => "sum()",
            Self::Count => "count()",
            Self::Mean => "mean()",
        }
    }

    pub fn sql_expr(self, column: &str) -> String {
        match self {
            Self::Max => format!("MAX({column})"),
            Self::Sum => format!("SUM({column})"),
            Self::Count => format!("COUNT({column})"),
            Self::Mean => format!("AVG({column})"),
        }
    }

    /// Whether successive bucket values of this aggregate can be differenced.
    fn preserves_counter(self) -> bool {
        matches!(self, Self::Max)
    }
}

/// The part of a query that runs in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationQuery {
    pub series: SeriesRef,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub window: Window,
    pub aggregate: Aggregate,
    pub create_empty: bool,
}

/// A validated per-series pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowedQuery {
    pub aggregation: AggregationQuery,
    pub reported_from: DateTime<Utc>,
    pub interpolate: bool,
    pub difference: bool,
    pub prime: bool,
}

/// One sub-query of a combined backend request; results are demultiplexed by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledQuery {
    pub label: String,
    pub query: AggregationQuery,
}

impl LabeledQuery {
    pub fn new(label: impl Into<String>, query: AggregationQuery) -> Self {
        Self {
            label: label.into(),
            query,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    series: SeriesRef,
    range: Option<TimeRange>,
    window: Option<Window>,
    aggregate: Aggregate,
    create_empty: bool,
    interpolate: bool,
    difference: bool,
    prime: bool,
}

impl QueryBuilder {
    pub fn new(series: SeriesRef) -> Self {
        Self {
            series,
            range: None,
            window: None,
            aggregate: Aggregate::Mean,
            create_empty: false,
            interpolate: false,
            difference: false,
            prime: false,
        }
    }

    /// Sets the range; its window is used unless [`QueryBuilder::window`] overrides it.
    pub fn range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn aggregate_with(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn create_empty(mut self) -> Self {
        self.create_empty = true;
        self
    }

    pub fn interpolate(mut self) -> Self {
        self.interpolate = true;
        self
    }

    pub fn take_difference(mut self) -> Self {
        self.difference = true;
        self
    }

    /// Carry the last counter value before the range into an empty first bucket.
    pub fn include_previous(mut self) -> Self {
        self.prime = true;
        self
    }

    /// Validates the pipeline. Only a differencing pipeline reads the
    /// leading bucket before `reported_from`; every other pipeline starts there.
    pub fn build(self) -> Result<WindowedQuery, QueryError> {
        let range = self
            .range
            .ok_or_else(|| QueryError::InvalidQuery("range not set".to_string()))?;
        let window = self.window.unwrap_or(range.window);

        if range.start >= range.stop {
            return Err(QueryError::InvalidQuery(format!(
                "empty range {}..{}",
                range.start, range.stop
            )));
        }
        for ident in [self.series.measurement, self.series.field] {
            if !is_plain_identifier(ident) {
                return Err(QueryError::InvalidQuery(format!(
                    "{ident:?} is not a plain identifier"
                )));
            }
        }
        if self.difference && !self.aggregate.preserves_counter() {
            return Err(QueryError::InvalidQuery(format!(
                "difference over {:?} buckets",
                self.aggregate
            )));
        }
        if self.interpolate && self.create_empty {
            return Err(QueryError::InvalidQuery(
                "interpolation over explicit empty buckets".to_string(),
            ));
        }
        if self.prime && !self.difference {
            return Err(QueryError::InvalidQuery(
                "priming without a difference step".to_string(),
            ));
        }

        let start = if self.difference {
            range.start
        } else {
            range.reported_from
        };
        let buckets = (range.stop - start).num_seconds() / window.min_seconds() + 1;
        if buckets > MAX_BUCKETS {
            return Err(QueryError::invalid_parameter(
                "window",
                format!(
                    "{} over this range yields more than {MAX_BUCKETS} buckets",
                    window.flux_duration()
                ),
            ));
        }

        Ok(WindowedQuery {
            aggregation: AggregationQuery {
                series: self.series,
                start,
                stop: range.stop,
                window,
                aggregate: self.aggregate,
                create_empty: self.create_empty,
            },
            reported_from: range.reported_from,
            interpolate: self.interpolate,
            difference: self.difference,
            prime: self.prime,
        })
    }
}

pub(crate) fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
