//! Aggregation windows.
//!
//! Sub-day windows are fixed durations aligned on the local wall clock;
//! day and month windows are calendar-relative in the configured timezone so
//! that a "day" bucket spans 23 or 25 hours across DST changes and a "month"
//! bucket spans the real month length.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Offset, TimeZone, Utc};

use crate::error::QueryError;
use crate::time::{local_date, local_midnight};

/// Most buckets one query may span.
pub const MAX_BUCKETS: i64 = 100_000;

/// `NaiveDate::num_days_from_ce` of 1970-01-01; multi-day windows align on the Unix epoch.
const DAYS_FROM_CE_TO_EPOCH: i64 = 719_163;
/// Month index (`year * 12 + month0`) of January 1970.
const EPOCH_MONTH_INDEX: i64 = 1970 * 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Seconds(u32),
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Months(u32),
}

impl Window {
    pub const HOUR: Window = Window::Hours(1);
    pub const DAY: Window = Window::Days(1);
    pub const MONTH: Window = Window::Months(1);

    /// Parses `15m`, `1h`, `1d`, `2w`, `1mo`, `1y` and the interval style
    /// `"1 hour"`, `"10 days"`.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let trimmed = raw.trim().to_ascii_lowercase();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid_window(raw, "missing unit"))?;
        let (amount, unit) = trimmed.split_at(split);
        let amount: u32 = amount
            .parse()
            .map_err(|_| invalid_window(raw, "missing amount"))?;
        if amount == 0 {
            return Err(invalid_window(raw, "amount must be positive"));
        }

        let window = match unit.trim() {
            "s" | "sec" | "second" | "seconds" => Self::Seconds(amount),
            "m" | "min" | "minute" | "minutes" => Self::Minutes(amount),
            "h" | "hour" | "hours" => Self::Hours(amount),
            "d" | "day" | "days" => Self::Days(amount),
            "w" | "week" | "weeks" => Self::Days(amount.saturating_mul(7)),
            "mo" | "mon" | "month" | "months" => Self::Months(amount),
            "y" | "year" | "years" => Self::Months(amount.saturating_mul(12)),
            other => return Err(invalid_window(raw, &format!("unknown unit {other:?}"))),
        };
        Ok(window)
    }

    /// Duration literal in Flux syntax.
    pub fn flux_duration(&self) -> String {
        match self {
            Self::Seconds(n) => format!("{n}s"),
            Self::Minutes(n) => format!("{n}m"),
            Self::Hours(n) => format!("{n}h"),
            Self::Days(n) => format!("{n}d"),
            Self::Months(n) => format!("{n}mo"),
        }
    }

    /// Interval literal for Postgres/Timescale.
    pub fn sql_interval(&self) -> String {
        let (n, unit) = match self {
            Self::Seconds(n) => (n, "second"),
            Self::Minutes(n) => (n, "minute"),
            Self::Hours(n) => (n, "hour"),
            Self::Days(n) => (n, "day"),
            Self::Months(n) => (n, "month"),
        };
        if *n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    }

    /// Shortest real length of one window: days may be 23 hours, months 28 days.
    pub fn min_seconds(&self) -> i64 {
        match self {
            Self::Days(n) => i64::from(*n) * 23 * 3600,
            Self::Months(n) => i64::from(*n) * 28 * 86_400,
            _ => self.fixed_seconds().unwrap_or(1),
        }
        .max(1)
    }

    fn fixed_seconds(&self) -> Option<i64> {
        match self {
            Self::Seconds(n) => Some(i64::from(*n)),
            Self::Minutes(n) => Some(i64::from(*n) * 60),
            Self::Hours(n) => Some(i64::from(*n) * 3600),
            Self::Days(_) | Self::Months(_) => None,
        }
    }

    /// Start of the window containing `instant`.
    pub fn floor<Tz: TimeZone>(&self, instant: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        if let Some(width) = self.fixed_seconds() {
            let offset = i64::from(instant.with_timezone(tz).offset().fix().local_minus_utc());
            let local = instant.timestamp() + offset;
            let floored = local - local.rem_euclid(width) - offset;
            return DateTime::from_timestamp(floored, 0).unwrap_or(instant);
        }

        let date = local_date(tz, instant);
        let floored = match self {
            Self::Days(n) => {
                let since_epoch = i64::from(date.num_days_from_ce()) - DAYS_FROM_CE_TO_EPOCH;
                date - Duration::days(since_epoch.rem_euclid(i64::from(*n)))
            }
            Self::Months(n) => {
                let index = i64::from(date.year()) * 12 + i64::from(date.month0());
                let index = index - (index - EPOCH_MONTH_INDEX).rem_euclid(i64::from(*n));
                first_of_month_index(index).unwrap_or(date)
            }
            _ => date,
        };
        local_midnight(tz, floored).unwrap_or(instant)
    }

    /// Start of the window following the one that starts at `bucket_start`.
    pub fn next_boundary<Tz: TimeZone>(
        &self,
        bucket_start: DateTime<Utc>,
        tz: &Tz,
    ) -> DateTime<Utc> {
        if let Some(width) = self.fixed_seconds() {
            return bucket_start + Duration::seconds(width);
        }

        let date = local_date(tz, bucket_start);
        let next = match self {
            Self::Days(n) => date.checked_add_signed(Duration::days(i64::from(*n))),
            Self::Months(n) => date.checked_add_months(Months::new(*n)),
            _ => None,
        };
        next.and_then(|date| local_midnight(tz, date).ok())
            .unwrap_or(bucket_start + Duration::days(1))
    }

    /// Bucket a sample at `instant` belongs to, clipped to the range start the
    /// way windowed backends report partial leading windows.
    pub fn bucket_for<Tz: TimeZone>(
        &self,
        instant: DateTime<Utc>,
        range_start: DateTime<Utc>,
        tz: &Tz,
    ) -> DateTime<Utc> {
        self.floor(instant, tz).max(range_start)
    }
}

/// Local midnight of 1970-01-01: the instant every window is aligned to.
/// Timescale's `time_bucket` gets it as an explicit origin.
pub fn alignment_origin<Tz: TimeZone>(tz: &Tz) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| local_midnight(tz, epoch).ok())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// All bucket starts in `[start, stop)`, the first clipped to `start`.
pub fn bucket_starts<Tz: TimeZone>(
    window: Window,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    tz: &Tz,
) -> Vec<DateTime<Utc>> {
    let mut starts = Vec::new();
    let mut current = start;
    let limit = usize::try_from(MAX_BUCKETS).unwrap_or(usize::MAX);
    while current < stop && starts.len() < limit {
        starts.push(current);
        let next = window.next_boundary(window.floor(current, tz), tz);
        if next <= current {
            break;
        }
        current = next;
    }
    starts
}

fn first_of_month_index(index: i64) -> Option<NaiveDate> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn invalid_window(raw: &str, reason: &str) -> QueryError {
    QueryError::invalid_parameter("window", format!("{raw:?}: {reason}"))
}
