//! Clock/timezone resolver — turns a local `HH:MM` into the next absolute instant.
//!
//! A local `09:00` always means 09:00 on the wall clock of the zone, so the
//! UTC instant moves with DST. Nonexistent local times (spring-forward gap)
//! fire at the first valid minute after the gap; ambiguous ones (fall-back)
//! fire at the earlier of the two instants.

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use castbot_core::{CastError, Result};

/// Longest DST gap we walk across when a local time does not exist.
const MAX_GAP_MINUTES: i64 = 180;

/// Parse a strict 24-hour `HH:MM` (two digits each).
pub fn parse_time_of_day(time: &str) -> Result<NaiveTime> {
    let malformed = || CastError::MalformedTime(time.to_string());
    let (h, m) = time.split_once(':').ok_or_else(malformed)?;
    if h.len() != 2 || m.len() != 2 || !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let hour: u32 = h.parse().map_err(|_| malformed())?;
    let minute: u32 = m.parse().map_err(|_| malformed())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(malformed)
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CastError::InvalidTimezone(name.to_string()))
}

/// Next instant strictly after `now` at which `time_of_day` occurs in `tz`.
pub fn next_trigger_instant(time_of_day: &str, tz: Tz, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let time = parse_time_of_day(time_of_day)?;
    let today = now.with_timezone(&tz).date_naive();

    let candidate = local_instant(tz, today, time)?;
    if candidate > now {
        return Ok(candidate);
    }
    let tomorrow = today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| CastError::MalformedTime(time_of_day.to_string()))?;
    local_instant(tz, tomorrow, time)
}

fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Utc>> {
    let naive = date.and_time(time);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.with_timezone(&Utc));
    }
    // Spring-forward gap: first minute that exists on the wall clock.
    for minutes in 1..=MAX_GAP_MINUTES {
        if let Some(dt) = tz
            .from_local_datetime(&(naive + Duration::minutes(minutes)))
            .earliest()
        {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Err(CastError::MalformedTime(time.format("%H:%M").to_string()))
}
