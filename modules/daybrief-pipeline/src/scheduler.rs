use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use daybrief_common::{Config, DaybriefError};

use crate::run::Pipeline;

/// Daily trigger loop: sleep until the configured local fire time, run the
/// pipeline, repeat. Exits on ctrl-c. A fire that lands while a manual run
/// is still in flight is rejected by the run guard and simply logged.
pub async fn run_scheduler(pipeline: Arc<Pipeline>, config: &Config) -> anyhow::Result<()> {
    let tz: Tz = config
        .timezone
        .parse()
        .map_err(|_| DaybriefError::Config(format!("unknown timezone: {}", config.timezone)))?;

    info!(
        timezone = config.timezone.as_str(),
        run_at = format_args!("{:02}:{:02}", config.run_at_hour, config.run_at_minute),
        "Scheduler started"
    );

    loop {
        let now = Utc::now().with_timezone(&tz);
        let next = next_fire_after(now, config.run_at_hour, config.run_at_minute);
        let wait = (next - now)
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(1));
        info!(next_run = %next, "Scheduler sleeping until next daily run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Scheduler shutting down");
                return Ok(());
            }
        }

        match pipeline.run_daily(None, false).await {
            Ok(stats) if stats.failed => {
                error!(
                    error = stats.error.as_deref().unwrap_or("unknown"),
                    "Scheduled pipeline run failed"
                );
            }
            Ok(stats) => {
                info!(
                    window_id = stats.window_id,
                    duration_s = stats.total_duration_seconds,
                    "Scheduled pipeline run finished"
                );
            }
            Err(DaybriefError::RunInFlight) => {
                warn!("Scheduled run skipped: another run is already in flight");
            }
            Err(err) => {
                error!(error = %err, "Scheduled run could not start");
            }
        }
    }
}

/// The next `hour:minute` local fire time strictly after `now`. Walks
/// forward over nonexistent local times (DST gaps).
fn next_fire_after(now: DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
            if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                if candidate > now {
                    return candidate;
                }
            }
        }
        date += Duration::days(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riga() -> Tz {
        "Europe/Riga".parse().unwrap()
    }

    #[test]
    fn fires_later_today_when_time_not_passed() {
        let now = riga().with_ymd_and_hms(2026, 2, 7, 9, 0, 0).unwrap();
        let next = next_fire_after(now, 13, 10);
        assert_eq!(next, riga().with_ymd_and_hms(2026, 2, 7, 13, 10, 0).unwrap());
    }

    #[test]
    fn fires_tomorrow_when_time_already_passed() {
        let now = riga().with_ymd_and_hms(2026, 2, 7, 14, 0, 0).unwrap();
        let next = next_fire_after(now, 13, 10);
        assert_eq!(next, riga().with_ymd_and_hms(2026, 2, 8, 13, 10, 0).unwrap());
    }

    #[test]
    fn exact_fire_time_rolls_to_next_day() {
        let now = riga().with_ymd_and_hms(2026, 2, 7, 13, 10, 0).unwrap();
        let next = next_fire_after(now, 13, 10);
        assert_eq!(next, riga().with_ymd_and_hms(2026, 2, 8, 13, 10, 0).unwrap());
    }
}
