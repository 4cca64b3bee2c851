use chrono::{Duration, FixedOffset, Offset, TimeZone, Utc};

/// Local working-hours window used to decide whether a message was posted
/// "late" (outside the configured workday).
///
/// Built once from configuration and never mutated at runtime; changing the
/// window means redeploying configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkdayWindow {
    /// Local hour the workday opens, minute zero.
    pub start_hour: u32,
    /// Length of the workday; the interval is `[start, start + duration)`.
    pub duration_hours: i64,
    /// Offset applied when the author's own UTC offset is unknown.
    pub default_utc_offset_minutes: i32,
}

impl Default for WorkdayWindow {
    fn default() -> Self {
        Self { start_hour: 7, duration_hours: 12, default_utc_offset_minutes: -240 }
    }
}

impl WorkdayWindow {
    /// Returns true when `timestamp_secs` falls outside the workday in the
    /// author's local time.
    ///
    /// `timestamp_secs` is epoch seconds, possibly fractional (Slack uses
    /// `"1530071118.000184"` style timestamps). `author_utc_offset_seconds`
    /// is the author's UTC offset as reported by the user directory; absent
    /// values fall back to `default_utc_offset_minutes`.
    ///
    /// The window is closed-open: an instant equal to the day start is in
    /// hours, an instant at or after the day end is late. Pure with respect
    /// to its inputs; never reads the current wall clock.
    pub fn is_late(&self, timestamp_secs: f64, author_utc_offset_seconds: Option<i32>) -> bool {
        let offset_minutes = author_utc_offset_seconds
            .map(|seconds| seconds / 60)
            .unwrap_or(self.default_utc_offset_minutes);
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix());

        let whole_secs = timestamp_secs.floor();
        let nanos = (((timestamp_secs - whole_secs) * 1e9) as u32).min(999_999_999);
        let local = match offset.timestamp_opt(whole_secs as i64, nanos) {
            chrono::LocalResult::Single(instant) => instant,
            // Unrepresentable instants belong to no workday.
            _ => return true,
        };

        let wall = local.naive_local();
        let Some(day_start) = wall.date().and_hms_opt(self.start_hour, 0, 0) else {
            return true;
        };
        let day_end = day_start + Duration::hours(self.duration_hours);

        !(wall >= day_start && wall < day_end)
    }
}
