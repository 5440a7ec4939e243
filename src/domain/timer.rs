//! Mental Clock focus timer.
//!
//! The only timer state that survives a restart is the absolute completion
//! instant stored in `ApplicationState::timer_target`. Remaining time is always
//! recomputed as `target - now`, so reloads, suspended processes and device
//! sleep cannot make the countdown drift.

use crate::domain::models::ApplicationState;
use chrono::{DateTime, Duration, SubsecRound, Utc};

pub const DEFAULT_FOCUS_MINUTES: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running { target: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { target: DateTime<Utc> },
    AlreadyRunning { target: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Running { remaining: Duration },
    /// The target was reached on this tick and has been cleared.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MentalClock {
    focus: Duration,
}

impl Default for MentalClock {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_FOCUS_MINUTES))
    }
}

impl MentalClock {
    pub fn new(focus: Duration) -> Self {
        Self {
            focus: focus.max(Duration::seconds(1)),
        }
    }

    pub fn focus_duration(&self) -> Duration {
        self.focus
    }

    pub fn phase(&self, state: &ApplicationState) -> TimerPhase {
        match state.timer_target {
            Some(target) => TimerPhase::Running { target },
            None => TimerPhase::Idle,
        }
    }

    /// Sets a fresh target when idle. A running timer keeps its target.
    /// The target is kept to whole milliseconds, the precision it is stored at.
    pub fn start(&self, state: &mut ApplicationState, now: DateTime<Utc>) -> StartOutcome {
        if let Some(target) = state.timer_target {
            return StartOutcome::AlreadyRunning { target };
        }
        let target = (now + self.focus).trunc_subsecs(3);
        state.timer_target = Some(target);
        StartOutcome::Started { target }
    }

    pub fn tick(&self, state: &mut ApplicationState, now: DateTime<Utc>) -> TickOutcome {
        let Some(target) = state.timer_target else {
            return TickOutcome::Idle;
        };
        let remaining = target - now;
        if remaining <= Duration::zero() {
            state.timer_target = None;
            return TickOutcome::Expired;
        }
        TickOutcome::Running { remaining }
    }

    /// Forgets the running session. Returns whether a session was running.
    pub fn pause(&self, state: &mut ApplicationState) -> bool {
        state.timer_target.take().is_some()
    }

    /// Pauses and returns the full duration to display.
    pub fn reset(&self, state: &mut ApplicationState) -> Duration {
        self.pause(state);
        self.focus
    }

    /// Time left for display: the full duration when idle, never negative.
    pub fn remaining(&self, state: &ApplicationState, now: DateTime<Utc>) -> Duration {
        match state.timer_target {
            Some(target) => (target - now).max(Duration::zero()),
            None => self.focus,
        }
    }
}

/// Whole seconds for display, rounded up so a running timer never shows zero.
pub fn display_seconds(remaining: Duration) -> i64 {
    let millis = remaining.num_milliseconds().max(0);
    (millis + 999) / 1000
}

/// Formats as `m:ss`, e.g. `25:00` or `4:05`.
pub fn format_clock(remaining: Duration) -> String {
    let seconds = display_seconds(remaining);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
            + Duration::seconds(seconds)
    }

    #[test]
    fn start_sets_target_from_now() {
        let clock = MentalClock::default();
        let mut state = ApplicationState::default();

        let outcome = clock.start(&mut state, at(0));

        assert_eq!(outcome, StartOutcome::Started { target: at(25 * 60) });
        assert_eq!(state.timer_target, Some(at(25 * 60)));
    }

    #[test]
    fn start_is_idempotent_while_running() {
        let clock = MentalClock::default();
        let mut state = ApplicationState::default();
        clock.start(&mut state, at(0));

        let outcome = clock.start(&mut state, at(120));

        assert_eq!(outcome, StartOutcome::AlreadyRunning { target: at(25 * 60) });
        assert_eq!(state.timer_target, Some(at(25 * 60)));
    }

    #[test]
    fn tick_expires_exactly_once() {
        let clock = MentalClock::new(Duration::minutes(1));
        let mut state = ApplicationState::default();
        clock.start(&mut state, at(0));

        assert_eq!(
            clock.tick(&mut state, at(30)),
            TickOutcome::Running {
                remaining: Duration::seconds(30)
            }
        );
        assert_eq!(clock.tick(&mut state, at(60)), TickOutcome::Expired);
        assert_eq!(state.timer_target, None);
        assert_eq!(clock.tick(&mut state, at(61)), TickOutcome::Idle);
    }

    #[test]
    fn pause_discards_progress() {
        let clock = MentalClock::default();
        let mut state = ApplicationState::default();
        clock.start(&mut state, at(0));

        assert!(clock.pause(&mut state));
        assert!(!clock.pause(&mut state));

        let outcome = clock.start(&mut state, at(600));
        assert_eq!(outcome, StartOutcome::Started { target: at(600 + 25 * 60) });
        assert_eq!(clock.remaining(&state, at(600)), Duration::minutes(25));
    }

    #[test]
    fn reset_reports_full_duration() {
        let clock = MentalClock::new(Duration::minutes(50));
        let mut state = ApplicationState::default();
        clock.start(&mut state, at(0));

        assert_eq!(clock.reset(&mut state), Duration::minutes(50));
        assert_eq!(clock.phase(&state), TimerPhase::Idle);
        assert_eq!(format_clock(clock.remaining(&state, at(10))), "50:00");
    }

    #[test]
    fn stale_target_expires_on_first_tick() {
        let clock = MentalClock::default();
        let mut state = ApplicationState {
            timer_target: Some(at(0)),
            ..ApplicationState::default()
        };
        assert_eq!(clock.tick(&mut state, at(3600)), TickOutcome::Expired);
        assert_eq!(clock.remaining(&state, at(3600)), Duration::minutes(25));
    }

    #[test]
    fn sub_millisecond_start_round_trips_through_json() {
        let clock = MentalClock::default();
        let mut state = ApplicationState::default();
        let now = at(0) + Duration::nanoseconds(394_451_039);

        clock.start(&mut state, now);

        let target = state.timer_target.expect("running");
        assert_eq!(target, at(25 * 60) + Duration::milliseconds(394));
        let restored: ApplicationState =
            serde_json::from_str(&serde_json::to_string(&state).expect("serialize")).expect("deserialize");
        assert_eq!(restored, state);
        assert_eq!(format_clock(clock.remaining(&state, now)), "25:00");
    }

    #[test]
    fn clock_format_rounds_up() {
        assert_eq!(format_clock(Duration::minutes(25)), "25:00");
        assert_eq!(format_clock(Duration::milliseconds(245_001)), "4:06");
        assert_eq!(format_clock(Duration::seconds(245)), "4:05");
        assert_eq!(format_clock(Duration::milliseconds(10)), "0:01");
        assert_eq!(format_clock(Duration::zero()), "0:00");
    }

    // A restart at T + d resumes with D - d remaining from the persisted target alone.
    proptest! {
        #[test]
        fn target_survives_restart(focus_minutes in 1i64..120, elapsed_seconds in 0i64..7200) {
            let focus = Duration::minutes(focus_minutes);
            prop_assume!(Duration::seconds(elapsed_seconds) < focus);

            let clock = MentalClock::new(focus);
            let mut before = ApplicationState::default();
            clock.start(&mut before, at(0));

            let persisted = serde_json::to_string(&before).expect("serialize");
            let mut after: ApplicationState = serde_json::from_str(&persisted).expect("deserialize");

            let outcome = clock.tick(&mut after, at(elapsed_seconds));
            prop_assert_eq!(
                outcome,
                TickOutcome::Running { remaining: focus - Duration::seconds(elapsed_seconds) }
            );
        }
    }
}
