use chrono::{DateTime, Duration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Fires once a day at a fixed wall-clock hour in a given timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyTrigger {
    hour: u32,
    timezone: Tz,
}

impl DailyTrigger {
    /// Returns `None` for hours outside 0-23.
    pub fn new(hour: u32, timezone: Tz) -> Option<Self> {
        (hour < 24).then_some(Self { hour, timezone })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The first firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_today = now.with_timezone(&self.timezone).date_naive();
        let fire_time = NaiveTime::from_hms_opt(self.hour, 0, 0).unwrap_or(NaiveTime::MIN);

        for day_offset in 0..=2 {
            let date = local_today + Duration::days(day_offset);
            let candidate = match self.timezone.from_local_datetime(&date.and_time(fire_time)) {
                LocalResult::Single(dt) => dt,
                LocalResult::Ambiguous(earliest, _) => earliest,
                // Hour skipped by a DST jump: fire an hour later.
                LocalResult::None => {
                    match self
                        .timezone
                        .from_local_datetime(&(date.and_time(fire_time) + Duration::hours(1)))
                    {
                        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
                        LocalResult::None => continue,
                    }
                }
            };

            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return candidate;
            }
        }

        now + Duration::days(1)
    }

    /// How long to sleep from `now` until the next firing.
    pub fn delay_from(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.next_after(now) - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1))
    }
}
