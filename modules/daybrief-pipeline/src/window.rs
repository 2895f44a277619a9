use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use daybrief_common::DaybriefError;

/// Compute the 24-hour window for a target date: it ends at `start_hour`
/// local time on that date and starts exactly one day earlier. Half-open
/// `[start, end)`.
pub fn compute_window(
    target_date: NaiveDate,
    tz: &str,
    start_hour: u32,
) -> Result<(DateTime<Utc>, DateTime<Utc>), DaybriefError> {
    if start_hour > 23 {
        return Err(DaybriefError::Validation(
            "start_hour must be in range 0..=23".to_string(),
        ));
    }

    let timezone: Tz = tz
        .parse()
        .map_err(|_| DaybriefError::Config(format!("unknown timezone: {tz}")))?;

    let end_local = timezone
        .with_ymd_and_hms(
            target_date.year(),
            target_date.month(),
            target_date.day(),
            start_hour,
            0,
            0,
        )
        .earliest()
        .ok_or_else(|| {
            DaybriefError::Validation(format!(
                "window boundary {target_date} {start_hour}:00 does not exist in {tz}"
            ))
        })?;

    let end_at = end_local.with_timezone(&Utc);
    let start_at = end_at - Duration::days(1);
    Ok((start_at, end_at))
}

/// Today's date in the configured timezone; the default pipeline target.
pub fn today_in(tz: &str) -> Result<NaiveDate, DaybriefError> {
    let timezone: Tz = tz
        .parse()
        .map_err(|_| DaybriefError::Config(format!("unknown timezone: {tz}")))?;
    Ok(Utc::now().with_timezone(&timezone).date_naive())
}
