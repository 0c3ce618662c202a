//! Calendar periods and the ranges they resolve to.
//!
//! Usage metrics are reported as deltas of bucket maxima, so their ranges
//! start one bucket early: the leading bucket `[start, reported_from)` only
//! primes the first delta. Other pipelines read from `reported_from`.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::QueryError;
use crate::time::{local_date, local_midnight};
use crate::window::Window;

/// Largest `count` a period request may span.
pub const MAX_PERIOD_COUNT: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodKind {
    Day,
    Month,
    Year,
}

impl PeriodKind {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(QueryError::invalid_parameter(
                "period",
                format!("unknown period {other:?}"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Selects the padding and bucket defaults of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSensitivity {
    Usage,
    Temperature,
}

/// A validated calendar period: `count` consecutive days, months or years
/// starting at `first_day`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    kind: PeriodKind,
    first_day: NaiveDate,
    count: u32,
}

impl Period {
    pub fn from_parts(
        kind: PeriodKind,
        year: i32,
        month: Option<u32>,
        day: Option<u32>,
        count: u32,
    ) -> Result<Self, QueryError> {
        if count == 0 || count > MAX_PERIOD_COUNT {
            return Err(QueryError::invalid_parameter(
                "count",
                format!("must be between 1 and {MAX_PERIOD_COUNT}"),
            ));
        }

        let (month, day) = match kind {
            PeriodKind::Day => (
                month.ok_or_else(|| missing("month", kind))?,
                day.ok_or_else(|| missing("day", kind))?,
            ),
            PeriodKind::Month => (month.ok_or_else(|| missing("month", kind))?, 1),
            PeriodKind::Year => (1, 1),
        };
        if !(1..=12).contains(&month) {
            return Err(QueryError::invalid_parameter(
                "month",
                format!("{month} is not a month"),
            ));
        }
        let first_day = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            QueryError::invalid_parameter("day", format!("{year}-{month:02}-{day:02} does not exist"))
        })?;

        let period = Self {
            kind,
            first_day,
            count,
        };
        // Reject periods whose end falls outside the calendar.
        period.end_day()?;
        Ok(period)
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            kind: PeriodKind::Day,
            first_day: date,
            count: 1,
        }
    }

    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// First local day after the period.
    pub fn end_day(&self) -> Result<NaiveDate, QueryError> {
        let end = match self.kind {
            PeriodKind::Day => self
                .first_day
                .checked_add_signed(Duration::days(i64::from(self.count))),
            PeriodKind::Month => self.first_day.checked_add_months(Months::new(self.count)),
            PeriodKind::Year => self
                .count
                .checked_mul(12)
                .and_then(|months| self.first_day.checked_add_months(Months::new(months))),
        };
        end.ok_or_else(|| QueryError::invalid_parameter("count", "period ends out of range"))
    }
}

fn missing(name: &str, kind: PeriodKind) -> QueryError {
    QueryError::invalid_parameter(name, format!("required for a {} period", kind.as_str()))
}

/// Instants a query covers.
///
/// `reported_from` is the nominal period start; buckets before it only
/// exist to prime deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub window: Window,
    pub reported_from: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        window: Window,
    ) -> Result<Self, QueryError> {
        if start >= stop {
            return Err(QueryError::invalid_parameter(
                "range",
                format!("start {start} is not before stop {stop}"),
            ));
        }
        Ok(Self {
            start,
            stop,
            window,
            reported_from: start,
        })
    }

    /// Same range with `reported_from` moved; clamped into `[start, stop]`.
    pub fn reported_from(mut self, reported_from: DateTime<Utc>) -> Self {
        self.reported_from = reported_from.clamp(self.start, self.stop);
        self
    }

    /// Replaces the bucket; the range itself never changes.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodStatus {
    Open,
    Closed,
}

impl PeriodStatus {
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Trailing windows ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingWindow {
    Last30Days,
    LastYear,
    Hourly { days: u32 },
}

#[derive(Debug, Clone)]
pub struct PeriodResolver {
    tz: Tz,
}

impl PeriodResolver {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn resolve(
        &self,
        period: &Period,
        sensitivity: MetricSensitivity,
    ) -> Result<TimeRange, QueryError> {
        let reported_from = self.midnight(period.first_day())?;
        let stop = self.midnight(period.end_day()?)?;

        let (start, window) = match (period.kind(), sensitivity) {
            (PeriodKind::Day, _) => (reported_from - Duration::hours(1), Window::HOUR),
            (PeriodKind::Month, MetricSensitivity::Usage) => {
                (self.midnight(previous_day(period.first_day())?)?, Window::DAY)
            }
            (PeriodKind::Month, MetricSensitivity::Temperature) => (reported_from, Window::HOUR),
            (PeriodKind::Year, sensitivity) => {
                let window = match sensitivity {
                    MetricSensitivity::Usage => Window::MONTH,
                    MetricSensitivity::Temperature => Window::Days(10),
                };
                (self.midnight(previous_day(period.first_day())?)?, window)
            }
        };

        Ok(TimeRange::new(start, stop, window)?.reported_from(reported_from))
    }

    /// Open while the period's end lies after `now`; future periods are open too.
    pub fn status_at(
        &self,
        period: &Period,
        now: DateTime<Utc>,
    ) -> Result<PeriodStatus, QueryError> {
        let end = self.midnight(period.end_day()?)?;
        Ok(if end > now {
            PeriodStatus::Open
        } else {
            PeriodStatus::Closed
        })
    }

    /// Resolves a rolling window ending at `now`. Rolling windows are always open.
    pub fn trailing(
        &self,
        rolling: RollingWindow,
        now: DateTime<Utc>,
    ) -> Result<TimeRange, QueryError> {
        let today = local_date(&self.tz, now);

        let (reported_day, window) = match rolling {
            RollingWindow::Last30Days => (
                today
                    .checked_sub_signed(Duration::days(30))
                    .ok_or_else(|| out_of_range("last_30_days"))?,
                Window::DAY,
            ),
            RollingWindow::LastYear => {
                let first_of_month = today.with_day(1).unwrap_or(today);
                (
                    first_of_month
                        .checked_sub_months(Months::new(12))
                        .ok_or_else(|| out_of_range("last_year"))?,
                    Window::DAY,
                )
            }
            RollingWindow::Hourly { days } => {
                if days == 0 || days > MAX_PERIOD_COUNT {
                    return Err(QueryError::invalid_parameter(
                        "days",
                        format!("must be between 1 and {MAX_PERIOD_COUNT}"),
                    ));
                }
                (
                    today
                        .checked_sub_signed(Duration::days(i64::from(days)))
                        .ok_or_else(|| out_of_range("hourly"))?,
                    Window::HOUR,
                )
            }
        };

        let reported_from = self.midnight(reported_day)?;
        let start = match window {
            Window::Days(_) => self.midnight(previous_day(reported_day)?)?,
            _ => reported_from - Duration::hours(1),
        };
        Ok(TimeRange::new(start, now, window)?.reported_from(reported_from))
    }

    fn midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>, QueryError> {
        local_midnight(&self.tz, date).map_err(|reason| QueryError::invalid_parameter("date", reason))
    }
}

fn previous_day(date: NaiveDate) -> Result<NaiveDate, QueryError> {
    date.pred_opt()
        .ok_or_else(|| QueryError::invalid_parameter("date", format!("no day before {date}")))
}

fn out_of_range(what: &str) -> QueryError {
    QueryError::invalid_parameter(what, "window starts out of range")
}
