use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Converts a wall-clock time in `tz` to an instant.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant;
/// nonexistent local times (DST spring-forward gap) resolve to the next valid
/// local time.
pub(crate) fn local_to_utc<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
) -> Result<DateTime<Utc>, String> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(a, b) => {
            let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
            Ok(a.min(b))
        }
        chrono::LocalResult::None => find_next_valid_local(tz, naive, 180)
            .ok_or_else(|| format!("no valid local datetime found after {naive}")),
    }
}

pub(crate) fn local_midnight<Tz: TimeZone>(
    tz: &Tz,
    date: NaiveDate,
) -> Result<DateTime<Utc>, String> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid midnight for {date}"))?;
    local_to_utc(tz, naive)
}

pub(crate) fn local_date<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(tz).date_naive()
}

pub(crate) fn local_naive<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(tz).naive_local()
}

fn find_next_valid_local<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    max_minutes: i64,
) -> Option<DateTime<Utc>> {
    for minutes in 1..=max_minutes {
        let candidate = naive + Duration::minutes(minutes);
        match tz.from_local_datetime(&candidate) {
            chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(a, b) => {
                return Some(a.with_timezone(&Utc).min(b.with_timezone(&Utc)))
            }
            chrono::LocalResult::None => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dst_gap_to_next_valid_local_time() {
        let tz = chrono_tz::Europe::Amsterdam;
        let naive = NaiveDate::from_ymd_opt(2023, 3, 26)
            .expect("date")
            .and_hms_opt(2, 30, 0)
            .expect("time");

        let resolved = local_to_utc(&tz, naive).expect("resolve");
        let expected = Utc.with_ymd_and_hms(2023, 3, 26, 1, 0, 0).single().expect("utc");
        assert_eq!(resolved, expected);
    }

    #[test]
    fn resolves_dst_ambiguity_to_earlier_instant() {
        let tz = chrono_tz::Europe::Amsterdam;
        let naive = NaiveDate::from_ymd_opt(2023, 10, 29)
            .expect("date")
            .and_hms_opt(2, 30, 0)
            .expect("time");

        let resolved = local_to_utc(&tz, naive).expect("resolve");
        let expected = Utc.with_ymd_and_hms(2023, 10, 29, 0, 30, 0).single().expect("utc");
        assert_eq!(resolved, expected);
    }

    #[test]
    fn local_midnight_tracks_utc_offset() {
        let tz = chrono_tz::Europe::Amsterdam;
        let summer = local_midnight(&tz, NaiveDate::from_ymd_opt(2023, 6, 15).expect("date"))
            .expect("midnight");
        let winter = local_midnight(&tz, NaiveDate::from_ymd_opt(2023, 1, 15).expect("date"))
            .expect("midnight");

        assert_eq!(
            summer,
            Utc.with_ymd_and_hms(2023, 6, 14, 22, 0, 0).single().expect("utc")
        );
        assert_eq!(
            winter,
            Utc.with_ymd_and_hms(2023, 1, 14, 23, 0, 0).single().expect("utc")
        );
    }
}
