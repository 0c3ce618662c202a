//! `/api/...` endpoints.
//!
//! The path shapes overlap (`/api/{field}/...` vs `/api/temperature/...`),
//! so one catch-all route parses the path into an [`ApiRequest`].

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::NaiveDate;

use crate::error::{AppResult, QueryError};
use crate::metric::{Metric, TemperatureLocation};
use crate::period::{MetricSensitivity, Period, PeriodKind, RollingWindow};
use crate::services::metric_query::Reducer;
use crate::state::AppState;
use crate::window::Window;

const DEFAULT_RECENT_MINUTES: u32 = 60;
const MAX_RECENT_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq)]
struct CalendarAnchor {
    period: PeriodKind,
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
enum ApiRequest {
    Period {
        metric: Metric,
        anchor: CalendarAnchor,
        window: Option<Window>,
    },
    Temperature {
        location: TemperatureLocation,
        anchor: CalendarAnchor,
    },
    GenerationProfile {
        reducer: Reducer,
        date: NaiveDate,
    },
    Rolling {
        metric: Metric,
        rolling: RollingWindow,
    },
    RecentPower,
    RecentWater,
    LastUsage,
}

impl ApiRequest {
    /// Parses the path below `/api/`; also returns the named path parameters
    /// that identify the request for caching.
    fn parse(rest: &str) -> Result<(Self, BTreeMap<String, String>), QueryError> {
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = BTreeMap::new();

        let request = match segments.as_slice() {
            ["usage", "last"] => Self::LastUsage,
            ["stroom", "recent"] => Self::RecentPower,
            ["water", "recent"] => Self::RecentWater,
            ["temperature", location, period, calendar @ ..] => {
                params.insert("location".to_string(), location.to_string());
                let location = TemperatureLocation::parse(location)?;
                let (anchor, extra) = parse_anchor(period, calendar, &mut params)?;
                if extra.is_some() {
                    return Err(unknown_route(rest));
                }
                Self::Temperature { location, anchor }
            }
            ["generation", "aggregate", function, "day", year, month, day] => {
                params.insert("fn".to_string(), function.to_string());
                let reducer = Reducer::parse(function)?;
                params.insert("year".to_string(), year.to_string());
                params.insert("month".to_string(), month.to_string());
                params.insert("day".to_string(), day.to_string());
                let (year, month, day) = (
                    parse_number::<i32>("year", year)?,
                    parse_number::<u32>("month", month)?,
                    parse_number::<u32>("day", day)?,
                );
                let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                    QueryError::invalid_parameter(
                        "day",
                        format!("{year}-{month:02}-{day:02} does not exist"),
                    )
                })?;
                Self::GenerationProfile { reducer, date }
            }
            [field, "last_30_days"] => Self::Rolling {
                metric: Metric::from_path_field(field)?,
                rolling: RollingWindow::Last30Days,
            },
            [field, "last_year"] => Self::Rolling {
                metric: Metric::from_path_field(field)?,
                rolling: RollingWindow::LastYear,
            },
            [field, "hourly", days] => Self::Rolling {
                metric: Metric::from_path_field(field)?,
                rolling: RollingWindow::Hourly {
                    days: parse_number("days", days)?,
                },
            },
            [field, period, calendar @ ..] => {
                params.insert("field".to_string(), field.to_string());
                let metric = Metric::from_path_field(field)?;
                let (anchor, window) = parse_anchor(period, calendar, &mut params)?;
                let window = window
                    .map(|raw| {
                        params.insert("window".to_string(), raw.to_string());
                        Window::parse(raw)
                    })
                    .transpose()?;
                Self::Period {
                    metric,
                    anchor,
                    window,
                }
            }
            _ => return Err(unknown_route(rest)),
        };
        Ok((request, params))
    }
}

/// Reads `year[/month[/day]]` as the period kind requires and returns any
/// single trailing segment.
fn parse_anchor<'a>(
    period: &str,
    calendar: &[&'a str],
    params: &mut BTreeMap<String, String>,
) -> Result<(CalendarAnchor, Option<&'a str>), QueryError> {
    let kind = PeriodKind::parse(period)?;
    params.insert("period".to_string(), period.to_string());

    let needed = match kind {
        PeriodKind::Year => 1,
        PeriodKind::Month => 2,
        PeriodKind::Day => 3,
    };
    if calendar.len() < needed || calendar.len() > needed + 1 {
        return Err(QueryError::invalid_parameter(
            "path",
            format!("a {period} period takes {needed} calendar segments"),
        ));
    }

    let names = ["year", "month", "day"];
    for (name, raw) in names.iter().zip(&calendar[..needed]) {
        params.insert(name.to_string(), raw.to_string());
    }
    let year = parse_number::<i32>("year", calendar[0])?;
    let month = calendar
        .get(1)
        .filter(|_| needed >= 2)
        .map(|raw| parse_number::<u32>("month", raw))
        .transpose()?;
    let day = calendar
        .get(2)
        .filter(|_| needed >= 3)
        .map(|raw| parse_number::<u32>("day", raw))
        .transpose()?;

    Ok((
        CalendarAnchor {
            period: kind,
            year,
            month,
            day,
        },
        calendar.get(needed).copied(),
    ))
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, QueryError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| QueryError::invalid_parameter(name, format!("{raw:?} is not a number")))
}

fn unknown_route(rest: &str) -> QueryError {
    QueryError::invalid_parameter("path", format!("unknown route /api/{rest}"))
}

fn count_param(query: &BTreeMap<String, String>) -> Result<u32, QueryError> {
    query
        .get("count")
        .map(|raw| parse_number::<u32>("count", raw))
        .transpose()
        .map(|count| count.unwrap_or(1))
}

fn minutes_param(query: &BTreeMap<String, String>) -> Result<u32, QueryError> {
    let minutes = query
        .get("minutes")
        .map(|raw| parse_number::<u32>("minutes", raw))
        .transpose()?
        .unwrap_or(DEFAULT_RECENT_MINUTES);
    if minutes == 0 || minutes > MAX_RECENT_MINUTES {
        return Err(QueryError::invalid_parameter(
            "minutes",
            format!("must be between 1 and {MAX_RECENT_MINUTES}"),
        ));
    }
    Ok(minutes)
}

fn period_of(anchor: &CalendarAnchor, count: u32) -> Result<Period, QueryError> {
    Period::from_parts(anchor.period, anchor.year, anchor.month, anchor.day, count)
}

fn json_response(payload: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
}

pub(crate) async fn api_handler(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> AppResult<Response> {
    let (request, mut params) = ApiRequest::parse(&rest)?;
    let now = state.now();

    let payload = match request {
        ApiRequest::Period {
            metric,
            anchor,
            window,
        } => {
            let count = count_param(&query)?;
            params.insert("count".to_string(), count.to_string());
            let period = period_of(&anchor, count)?;
            let mut range = state.resolver.resolve(&period, MetricSensitivity::Usage)?;
            if let Some(window) = window {
                range = range.with_window(window);
            }
            let status = state.resolver.status_at(&period, now)?;
            let metrics = &state.metrics;
            state
                .cache
                .with_cache("period", &params, status, || async move {
                    let points = metrics.usage_series(metric, range).await?;
                    Ok(serde_json::to_string(&points)?)
                })
                .await?
        }
        ApiRequest::Temperature { location, anchor } => {
            let count = count_param(&query)?;
            params.insert("count".to_string(), count.to_string());
            let reducer = match query.get("fn") {
                Some(raw) => Reducer::parse(raw)?,
                None => Reducer::Mean,
            };
            params.insert("fn".to_string(), reducer.as_str().to_string());
            let period = period_of(&anchor, count)?;
            let range = state
                .resolver
                .resolve(&period, MetricSensitivity::Temperature)?;
            let status = state.resolver.status_at(&period, now)?;
            let metrics = &state.metrics;
            state
                .cache
                .with_cache("temperature", &params, status, || async move {
                    let series = metrics.temperature_series(location, range, reducer).await?;
                    Ok(serde_json::to_string(&series)?)
                })
                .await?
        }
        ApiRequest::GenerationProfile { reducer, date } => {
            let status = state.resolver.status_at(&Period::day(date), now)?;
            let category = format!("generation_aggregate_{}", reducer.as_str());
            let metrics = &state.metrics;
            state
                .cache
                .with_cache(&category, &params, status, || async move {
                    let profile = metrics.generation_profile(date, reducer).await?;
                    Ok(serde_json::to_string(&profile)?)
                })
                .await?
        }
        ApiRequest::Rolling { metric, rolling } => {
            let range = state.resolver.trailing(rolling, now)?;
            let points = state.metrics.usage_series(metric, range).await?;
            serde_json::to_vec(&points).map_err(QueryError::from)?
        }
        ApiRequest::RecentPower => {
            let points = state
                .metrics
                .recent_power_draw(minutes_param(&query)?, now)
                .await?;
            serde_json::to_vec(&points).map_err(QueryError::from)?
        }
        ApiRequest::RecentWater => {
            let points = state
                .metrics
                .recent_water_usage(minutes_param(&query)?, now)
                .await?;
            serde_json::to_vec(&points).map_err(QueryError::from)?
        }
        ApiRequest::LastUsage => match state.metrics.last_power_draw(now).await? {
            Some(snapshot) => serde_json::to_vec(&snapshot).map_err(QueryError::from)?,
            None => b"{}".to_vec(),
        },
    };

    Ok(json_response(payload))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/{*rest}", get(api_handler))
}
