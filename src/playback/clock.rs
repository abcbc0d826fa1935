//! Virtual playback clock
//!
//! Holds the engine's notion of "now" in recorded time, plus the wall-clock
//! anchors used to advance it. All wall-clock readings are tokio instants so
//! the clock follows a paused test runtime.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Cadence of the background ticker
pub const CLOCK_TICK: Duration = Duration::from_millis(10);

/// Scale a wall-clock delta by the playback rate
pub fn scale(delta: Duration, rate: f64) -> TimeDelta {
    // f64 -> i64 casts saturate, so huge rates clamp instead of panicking
    TimeDelta::nanoseconds((delta.as_nanos() as f64 * rate) as i64)
}

#[derive(Debug, Clone)]
pub struct VirtualClock {
    /// Current playback time, `None` only for an empty history
    current_time: Option<DateTime<Utc>>,
    /// Playback offset accumulated up to the last pause
    elapsed_before_pause: TimeDelta,
    /// Rate-scaled unpaused time since the last release
    since_last_event: Duration,
    /// When playback last resumed
    start_time: Instant,
    /// When the clock last absorbed wall-clock time
    suspend_time: Instant,
}

impl VirtualClock {
    pub fn new(start: Option<DateTime<Utc>>, now: Instant) -> Self {
        Self {
            current_time: start,
            elapsed_before_pause: TimeDelta::zero(),
            since_last_event: Duration::ZERO,
            start_time: now,
            suspend_time: now,
        }
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current_time
    }

    pub fn since_last_event(&self) -> Duration {
        self.since_last_event
    }

    /// Absorb the wall-clock time since the last call
    ///
    /// Both the playback time and the event timer move by the delta scaled
    /// by `rate`. `running` is false while paused: nothing accumulates, only
    /// the anchor moves.
    pub fn advance(&mut self, now: Instant, rate: f64, running: bool) {
        if running {
            let scaled = scale(now.saturating_duration_since(self.suspend_time), rate);
            self.since_last_event = self
                .since_last_event
                .saturating_add(scaled.to_std().unwrap_or(Duration::ZERO));
            if let Some(time) = self.current_time {
                self.current_time = Some(time.checked_add_signed(scaled).unwrap_or(time));
            }
        }
        self.suspend_time = now;
    }

    /// Fold the running segment into the accumulated offset
    pub fn pause(&mut self, now: Instant, rate: f64) {
        let segment = now.saturating_duration_since(self.start_time);
        self.elapsed_before_pause += scale(segment, rate);
    }

    /// Start a new running segment at `now`
    pub fn resume(&mut self, now: Instant) {
        self.start_time = now;
        self.suspend_time = now;
    }

    /// Jump to `time`, measuring the offset from the first command at `origin`
    pub fn seek(&mut self, time: DateTime<Utc>, origin: DateTime<Utc>) {
        self.current_time = Some(time);
        self.elapsed_before_pause = time - origin;
    }

    /// Record a released command; never moves the clock backwards
    pub fn mark_release(&mut self, time: DateTime<Utc>) {
        self.current_time = Some(match self.current_time {
            Some(current) if current > time => current,
            _ => time,
        });
        self.since_last_event = Duration::ZERO;
    }

    /// Playback offset, including the running segment if not paused
    pub fn elapsed(&self, now: Instant, rate: f64, paused: bool) -> TimeDelta {
        if paused {
            self.elapsed_before_pause
        } else {
            self.elapsed_before_pause + scale(now.saturating_duration_since(self.start_time), rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale(Duration::from_secs(2), 1.5), TimeDelta::seconds(3));
        assert_eq!(scale(Duration::from_millis(10), 0.5), TimeDelta::milliseconds(5));
        assert_eq!(scale(Duration::MAX, f64::MAX), TimeDelta::nanoseconds(i64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_scales_time_and_event_timer() {
        let start = Instant::now();
        let mut clock = VirtualClock::new(Some(origin()), start);

        clock.advance(start + Duration::from_secs(2), 4.0, true);
        assert_eq!(clock.current_time(), Some(origin() + TimeDelta::seconds(8)));
        assert_eq!(clock.since_last_event(), Duration::from_secs(8));

        clock.advance(start + Duration::from_secs(4), 0.5, true);
        assert_eq!(clock.current_time(), Some(origin() + TimeDelta::seconds(9)));
        assert_eq!(clock.since_last_event(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_advance_only_moves_anchor() {
        let start = Instant::now();
        let mut clock = VirtualClock::new(Some(origin()), start);

        clock.advance(start + Duration::from_secs(30), 1.0, false);
        assert_eq!(clock.current_time(), Some(origin()));
        assert_eq!(clock.since_last_event(), Duration::ZERO);

        // the paused 30s must not show up on the next running tick
        clock.advance(start + Duration::from_secs(31), 1.0, true);
        assert_eq!(clock.current_time(), Some(origin() + TimeDelta::seconds(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_across_pause() {
        let start = Instant::now();
        let mut clock = VirtualClock::new(Some(origin()), start);

        clock.pause(start + Duration::from_secs(3), 2.0);
        assert_eq!(clock.elapsed(start + Duration::from_secs(100), 2.0, true), TimeDelta::seconds(6));

        clock.resume(start + Duration::from_secs(100));
        assert_eq!(clock.elapsed(start + Duration::from_secs(101), 2.0, false), TimeDelta::seconds(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_and_release() {
        let mut clock = VirtualClock::new(Some(origin()), Instant::now());

        clock.seek(origin() + TimeDelta::minutes(5), origin());
        assert_eq!(clock.elapsed(Instant::now(), 1.0, true), TimeDelta::minutes(5));

        // a release behind the clock leaves it where it is
        clock.mark_release(origin() + TimeDelta::minutes(1));
        assert_eq!(clock.current_time(), Some(origin() + TimeDelta::minutes(5)));

        clock.mark_release(origin() + TimeDelta::minutes(9));
        assert_eq!(clock.current_time(), Some(origin() + TimeDelta::minutes(9)));
        assert_eq!(clock.since_last_event(), Duration::ZERO);
    }
}
