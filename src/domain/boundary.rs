// Shift boundary detection for live shift-based windows
use crate::domain::schedule::ShiftSchedule;
use crate::domain::window::{TimeWindow, TimeWindowResolver};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourCondition {
    AtLeast(u32),
    Exactly(u32),
    /// `from <= hour < until`
    Between { from: u32, until: u32 },
}

impl HourCondition {
    pub fn matches(&self, hour: u32) -> bool {
        match *self {
            HourCondition::AtLeast(h) => hour >= h,
            HourCondition::Exactly(h) => hour == h,
            HourCondition::Between { from, until } => hour >= from && hour < until,
        }
    }
}

/// Leaving `from_shift` of `mode` once any condition holds.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryRule {
    pub mode: &'static str,
    pub from_shift: &'static str,
    pub to_shift: &'static str,
    pub when: &'static [HourCondition],
}

pub const BOUNDARY_RULES: &[BoundaryRule] = &[
    BoundaryRule {
        mode: "mode1",
        from_shift: "shift1",
        to_shift: "shift2",
        when: &[HourCondition::AtLeast(16)],
    },
    BoundaryRule {
        mode: "mode1",
        from_shift: "shift2",
        to_shift: "shift3",
        when: &[HourCondition::AtLeast(24), HourCondition::Exactly(0)],
    },
    BoundaryRule {
        mode: "mode1",
        from_shift: "shift3",
        to_shift: "shift1",
        when: &[HourCondition::AtLeast(8)],
    },
    BoundaryRule {
        mode: "mode2",
        from_shift: "shift1",
        to_shift: "shift2",
        when: &[HourCondition::AtLeast(18)],
    },
    BoundaryRule {
        mode: "mode2",
        from_shift: "shift2",
        to_shift: "shift1",
        when: &[HourCondition::Between { from: 8, until: 18 }],
    },
    BoundaryRule {
        mode: "mode3",
        from_shift: "shift1",
        to_shift: "shift2",
        when: &[HourCondition::AtLeast(20)],
    },
    BoundaryRule {
        mode: "mode3",
        from_shift: "shift2",
        to_shift: "shift1",
        when: &[HourCondition::Between { from: 8, until: 20 }],
    },
];

pub fn matching_rule(mode: &str, shift: &str, hour: u32) -> Option<&'static BoundaryRule> {
    BOUNDARY_RULES
        .iter()
        .filter(|r| r.mode == mode && r.from_shift == shift)
        .find(|r| r.when.iter().any(|c| c.matches(hour)))
}

/// Holds the active shift and window; the only writer of the session's window.
#[derive(Debug, Clone)]
pub struct ShiftBoundaryMonitor {
    schedule: Arc<ShiftSchedule>,
    resolver: TimeWindowResolver,
    working_mode_id: String,
    active_shift_id: Option<String>,
    active_window: TimeWindow,
}

impl ShiftBoundaryMonitor {
    /// Armed only for a shift preset that is live at `now`.
    pub fn new(
        schedule: Arc<ShiftSchedule>,
        resolver: TimeWindowResolver,
        window: TimeWindow,
        now: DateTime<Utc>,
    ) -> Self {
        let window = window.anchored(now);
        let active_shift_id = window
            .preset_shift_id()
            .filter(|_| window.is_live(now))
            .map(str::to_string);
        Self {
            schedule,
            resolver,
            working_mode_id: window.working_mode_id().to_string(),
            active_shift_id,
            active_window: window,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.active_shift_id.is_some()
    }

    pub fn working_mode_id(&self) -> &str {
        &self.working_mode_id
    }

    pub fn active_shift_id(&self) -> Option<&str> {
        self.active_shift_id.as_deref()
    }

    pub fn active_window(&self) -> &TimeWindow {
        &self.active_window
    }

    pub fn has_crossed_boundary(&self, now: DateTime<Utc>) -> bool {
        let Some(active) = self.active_shift_id.as_deref() else {
            return false;
        };
        let hour = self.resolver.zone().hour(now);
        let mode = self.schedule.resolve_or_default(&self.working_mode_id);
        let resolved = self.resolver.current_shift(mode, now);
        let rule = matching_rule(&self.working_mode_id, active, hour);

        match (rule, resolved.id != active) {
            (Some(rule), true) => {
                tracing::debug!(
                    mode = %self.working_mode_id,
                    "boundary {} -> {} at hour {}",
                    rule.from_shift,
                    rule.to_shift,
                    hour
                );
                true
            }
            (Some(_), false) => {
                // rule fired inside an uncovered gap; the resolver still maps to the active shift
                tracing::debug!(mode = %self.working_mode_id, shift = active, hour, "boundary held in gap");
                false
            }
            (None, true) => {
                // no rule; only catch up when the clock has really left the active shift
                // for another one (a poll that slept through the boundary hour)
                let active_covers = mode.shift(active).is_some_and(|s| s.contains_hour(hour));
                if active_covers || !resolved.contains_hour(hour) {
                    return false;
                }
                tracing::warn!(
                    mode = %self.working_mode_id,
                    "missed boundary: active {} but clock is in {}",
                    active,
                    resolved.id
                );
                true
            }
            (None, false) => false,
        }
    }

    /// Replaces the active shift and window wholesale for `now`.
    pub fn advance(&mut self, now: DateTime<Utc>) -> TimeWindow {
        let mode = self.schedule.resolve_or_default(&self.working_mode_id);
        let shift = self.resolver.current_shift(mode, now);
        let window = self.resolver.window_for(mode, &shift.id, now);

        tracing::info!(
            mode = mode.id(),
            from = self.active_shift_id.as_deref().unwrap_or("-"),
            to = %shift.id,
            "active shift advanced"
        );

        self.working_mode_id = mode.id().to_string();
        self.active_shift_id = Some(shift.id.clone());
        self.active_window = window.clone();
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::PlantZone;
    use chrono::{NaiveDate, NaiveTime};

    fn zone() -> PlantZone {
        PlantZone::from_offset_minutes(180).unwrap()
    }

    fn local(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        zone().at_time(
            NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        )
    }

    fn monitor(mode: &str, shift: &str, now: DateTime<Utc>) -> ShiftBoundaryMonitor {
        let schedule = Arc::new(ShiftSchedule::standard());
        let resolver = TimeWindowResolver::new(zone());
        let window = {
            let working_mode = schedule.resolve(mode).unwrap();
            resolver.window_for(working_mode, shift, now)
        };
        ShiftBoundaryMonitor::new(schedule, resolver, window, now)
    }

    #[test]
    fn test_scenario_mode1_afternoon_crossing() {
        let mut monitor = monitor("mode1", "shift1", local(10, 15, 50));
        assert!(monitor.is_armed());
        assert!(!monitor.has_crossed_boundary(local(10, 15, 59)));
        assert!(monitor.has_crossed_boundary(local(10, 16, 5)));

        let window = monitor.advance(local(10, 16, 5));
        assert_eq!(monitor.active_shift_id(), Some("shift2"));
        assert_eq!(window.start(), local(10, 16, 0));
        assert_eq!(window.end(), local(10, 16, 5));
        assert!(!monitor.has_crossed_boundary(local(10, 16, 6)));
    }

    #[test]
    fn test_repeated_checks_within_shift_stay_false() {
        let monitor = monitor("mode3", "shift2", local(10, 21, 0));
        for minutes in 0..(10 * 60) {
            let now = local(10, 21, 0) + chrono::Duration::minutes(minutes);
            assert!(!monitor.has_crossed_boundary(now), "fired at +{}m", minutes);
        }
        assert!(monitor.has_crossed_boundary(local(11, 8, 0)));
    }

    #[test]
    fn test_mode1_midnight_and_morning_rules() {
        let late = monitor("mode1", "shift2", local(10, 23, 0));
        assert!(!late.has_crossed_boundary(local(10, 23, 59)));
        assert!(late.has_crossed_boundary(local(11, 0, 0)));

        let night = monitor("mode1", "shift3", local(11, 2, 0));
        assert!(!night.has_crossed_boundary(local(11, 7, 59)));
        assert!(night.has_crossed_boundary(local(11, 8, 0)));
    }

    #[test]
    fn test_mode2_gap_does_not_flap() {
        let monitor = monitor("mode2", "shift1", local(10, 17, 0));
        // table fires at 18:00 but no shift covers 18-20
        assert!(matching_rule("mode2", "shift1", 18).is_some());
        assert!(!monitor.has_crossed_boundary(local(10, 18, 30)));
        assert!(!monitor.has_crossed_boundary(local(10, 19, 59)));
        assert!(monitor.has_crossed_boundary(local(10, 20, 0)));
    }

    #[test]
    fn test_mode2_night_preset_waits_out_the_gap() {
        // shift2 picked at 19:00; the resolver falls back to shift1 until 20:00
        let monitor = monitor("mode2", "shift2", local(10, 19, 0));
        assert!(monitor.is_armed());
        assert_eq!(monitor.active_window().start(), local(10, 20, 0));
        assert!(matching_rule("mode2", "shift2", 19).is_none());
        assert!(!monitor.has_crossed_boundary(local(10, 19, 5)));
        assert!(!monitor.has_crossed_boundary(local(10, 19, 59)));
        assert!(!monitor.has_crossed_boundary(local(10, 23, 0)));
        assert!(monitor.has_crossed_boundary(local(11, 8, 0)));
    }

    #[test]
    fn test_mode2_and_mode3_morning_return() {
        let m2 = monitor("mode2", "shift2", local(11, 6, 0));
        assert!(m2.has_crossed_boundary(local(11, 8, 1)));

        let m3 = monitor("mode3", "shift2", local(11, 6, 0));
        assert!(!m3.has_crossed_boundary(local(11, 7, 59)));
        assert!(m3.has_crossed_boundary(local(11, 9, 0)));
    }

    #[test]
    fn test_missed_midnight_is_caught_up() {
        // the 00:00 hour was never polled (e.g. suspended kiosk)
        let monitor = monitor("mode1", "shift2", local(10, 23, 30));
        assert!(matching_rule("mode1", "shift2", 3).is_none());
        assert!(monitor.has_crossed_boundary(local(11, 3, 0)));
    }

    #[test]
    fn test_custom_and_historical_windows_never_cross() {
        let schedule = Arc::new(ShiftSchedule::standard());
        let resolver = TimeWindowResolver::new(zone());

        let custom = TimeWindow::new(local(10, 9, 0), local(10, 10, 0), None, "mode1").unwrap();
        let monitor = ShiftBoundaryMonitor::new(schedule.clone(), resolver, custom, local(10, 10, 0));
        assert!(!monitor.is_armed());
        assert!(!monitor.has_crossed_boundary(local(10, 17, 0)));

        let past = TimeWindow::new(local(9, 8, 0), local(9, 16, 0), Some("shift1".to_string()), "mode1")
            .unwrap();
        let monitor = ShiftBoundaryMonitor::new(schedule, resolver, past, local(10, 10, 0));
        assert!(!monitor.is_armed());
    }

    #[test]
    fn test_hour_conditions() {
        assert!(HourCondition::AtLeast(16).matches(16));
        assert!(!HourCondition::AtLeast(16).matches(15));
        assert!(HourCondition::Exactly(0).matches(0));
        assert!(HourCondition::Between { from: 8, until: 18 }.matches(8));
        assert!(!HourCondition::Between { from: 8, until: 18 }.matches(18));
    }
}
