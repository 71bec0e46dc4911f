//! Node mode/schedule engine.

use crate::config::{ControlMode, Schedule};

/// `true` when `now` falls inside `[on, off)`, treating the schedule as a
/// cyclic interval over the day so an overnight window (`off < on`) wraps
/// through midnight.
///
/// The degenerate case `on == off` has no non-empty "on" interval under
/// either reading, so it always evaluates to "never on".
pub fn should_be_on(on: (u8, u8), off: (u8, u8), now: (u8, u8)) -> bool {
    let minutes = |h: u8, m: u8| h as u32 * 60 + m as u32;
    let on_m = minutes(on.0, on.1);
    let off_m = minutes(off.0, off.1);
    let now_m = minutes(now.0, now.1);

    if on_m < off_m {
        now_m >= on_m && now_m < off_m
    } else if on_m > off_m {
        now_m >= on_m || now_m < off_m
    } else {
        false
    }
}

/// Drives the relay from the mode-arbitration rules. Commits and reports
/// a new output only on a transition (edge-triggered); ticking again
/// with an unchanged `shouldBeOn` result returns `None` so the caller
/// neither persists nor re-writes the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEngine {
    committed: bool,
}

impl ScheduleEngine {
    /// `initial` should be the persisted `lightState`, applied to the
    /// relay at boot before the first tick to avoid a visible blink.
    pub fn new(initial: bool) -> Self {
        Self { committed: initial }
    }

    pub fn committed_state(&self) -> bool {
        self.committed
    }

    /// `now` is `None` when the RTC read failed; the engine then keeps the
    /// last committed state and reports no write for this tick, regardless
    /// of control mode, since a failed clock read can't even evaluate the
    /// `Auto` branch.
    pub fn tick(&mut self, mode: ControlMode, schedule: Schedule, now: Option<(u8, u8)>) -> Option<bool> {
        let desired = match mode {
            ControlMode::ManualOn => true,
            ControlMode::ManualOff => false,
            ControlMode::Auto => {
                let now = now?;
                should_be_on(
                    (schedule.on_hour, schedule.on_min),
                    (schedule.off_hour, schedule.off_min),
                    now,
                )
            }
        };

        if desired == self.committed {
            None
        } else {
            self.committed = desired;
            Some(desired)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_daytime_window() {
        assert!(should_be_on((8, 0), (18, 0), (12, 0)));
        assert!(!should_be_on((8, 0), (18, 0), (19, 0)));
        assert!(should_be_on((8, 0), (18, 0), (8, 0)));
        assert!(!should_be_on((8, 0), (18, 0), (18, 0)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        assert!(should_be_on((18, 0), (6, 0), (23, 30)));
        assert!(should_be_on((18, 0), (6, 0), (0, 0)));
        assert!(should_be_on((18, 0), (6, 0), (5, 59)));
        assert!(!should_be_on((18, 0), (6, 0), (6, 0)));
        assert!(!should_be_on((18, 0), (6, 0), (12, 0)));
    }

    #[test]
    fn degenerate_equal_bounds_never_on() {
        assert!(!should_be_on((9, 0), (9, 0), (9, 0)));
        assert!(!should_be_on((9, 0), (9, 0), (23, 0)));
    }

    #[test]
    fn manual_modes_ignore_schedule_and_rtc() {
        let mut engine = ScheduleEngine::new(false);
        let schedule = Schedule {
            on_hour: 18,
            on_min: 0,
            off_hour: 6,
            off_min: 0,
        };
        assert_eq!(
            engine.tick(ControlMode::ManualOn, schedule, None),
            Some(true)
        );
        // Already committed ON; further ticks (even with a schedule that
        // would say OFF) report no change.
        assert_eq!(engine.tick(ControlMode::ManualOn, schedule, Some((12, 0))), None);
    }

    #[test]
    fn rtc_failure_keeps_last_committed_state() {
        let mut engine = ScheduleEngine::new(true);
        let schedule = Schedule {
            on_hour: 8,
            on_min: 0,
            off_hour: 18,
            off_min: 0,
        };
        assert_eq!(engine.tick(ControlMode::Auto, schedule, None), None);
        assert!(engine.committed_state());
    }

    #[test]
    fn auto_mode_commits_only_on_transition() {
        let mut engine = ScheduleEngine::new(false);
        let schedule = Schedule {
            on_hour: 8,
            on_min: 0,
            off_hour: 18,
            off_min: 0,
        };
        assert_eq!(engine.tick(ControlMode::Auto, schedule, Some((7, 0))), None);
        assert_eq!(
            engine.tick(ControlMode::Auto, schedule, Some((8, 0))),
            Some(true)
        );
        assert_eq!(engine.tick(ControlMode::Auto, schedule, Some((9, 0))), None);
        assert_eq!(
            engine.tick(ControlMode::Auto, schedule, Some((18, 0))),
            Some(false)
        );
    }
}
