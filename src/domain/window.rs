// Time windows and shift-based window resolution
use crate::domain::errors::PreconditionError;
use crate::domain::schedule::{PlantZone, Shift, WorkingMode};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

/// A window whose end is at most this many seconds behind "now" is live.
pub const LIVE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Live,
    Historical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    preset_shift_id: Option<String>,
    working_mode_id: String,
    /// Set once the window was judged live; its end then follows the clock.
    #[serde(skip)]
    open: bool,
}

impl TimeWindow {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        preset_shift_id: Option<String>,
        working_mode_id: &str,
    ) -> Result<Self, PreconditionError> {
        if start >= end {
            return Err(PreconditionError::EmptyWindow);
        }
        Ok(Self {
            start,
            end,
            preset_shift_id,
            working_mode_id: working_mode_id.to_string(),
            open: false,
        })
    }

    /// Pins liveness as judged at `now`. A window live here stays live, its
    /// end moving with every later request and snapshot.
    pub fn anchored(mut self, now: DateTime<Utc>) -> Self {
        self.open = self.is_live(now);
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn preset_shift_id(&self) -> Option<&str> {
        self.preset_shift_id.as_deref()
    }

    pub fn working_mode_id(&self) -> &str {
        &self.working_mode_id
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.open || now - self.end <= Duration::seconds(LIVE_TOLERANCE_SECS)
    }

    pub fn kind(&self, now: DateTime<Utc>) -> WindowKind {
        if self.is_live(now) {
            WindowKind::Live
        } else {
            WindowKind::Historical
        }
    }

    /// End used for elapsed-time math: "now" while live, the fixed end otherwise.
    pub fn effective_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.is_live(now) { now } else { self.end }
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = self.effective_end(now) - self.start;
        (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// Elapsed seconds, less the mode's scheduled breaks when `deduct_breaks` is set.
    pub fn operating_seconds(
        &self,
        mode: &WorkingMode,
        zone: PlantZone,
        now: DateTime<Utc>,
        deduct_breaks: bool,
    ) -> f64 {
        let elapsed = self.elapsed_seconds(now);
        if !deduct_breaks {
            return elapsed;
        }
        let breaks = mode.break_seconds(zone, self.start, self.effective_end(now));
        (elapsed - breaks).max(0.0)
    }

    /// Same window with its end moved to `now`, if live and `now` is past the start.
    pub fn extended_to(&self, now: DateTime<Utc>) -> TimeWindow {
        if self.is_live(now) && now > self.start {
            TimeWindow {
                end: now,
                ..self.clone()
            }
        } else {
            self.clone()
        }
    }

    /// Request parameters as sent at `now`.
    pub fn request_at(&self, now: DateTime<Utc>) -> WindowRequest {
        let window = self.extended_to(now);
        WindowRequest {
            start_time: window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            end_time: window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            working_mode: window.working_mode_id,
        }
    }
}

/// Body of every refresh request sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowRequest {
    pub start_time: String,
    pub end_time: String,
    pub working_mode: String,
}

/// Maps wall-clock instants onto shifts and shift windows.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowResolver {
    zone: PlantZone,
}

impl TimeWindowResolver {
    pub fn new(zone: PlantZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> PlantZone {
        self.zone
    }

    /// First shift in declared order containing the hour of `now`, else the first shift.
    pub fn current_shift<'a>(&self, mode: &'a WorkingMode, now: DateTime<Utc>) -> &'a Shift {
        let hour = self.zone.hour(now);
        mode.shifts()
            .iter()
            .find(|s| s.contains_hour(hour))
            .unwrap_or_else(|| mode.first_shift())
    }

    pub fn window_for(&self, mode: &WorkingMode, shift_id: &str, now: DateTime<Utc>) -> TimeWindow {
        let shift = match mode.shift(shift_id) {
            Some(shift) => shift,
            None => {
                let current = self.current_shift(mode, now);
                tracing::warn!(
                    mode = mode.id(),
                    shift = shift_id,
                    "unknown shift, using current shift {}",
                    current.id
                );
                current
            }
        };

        let (start, end) = self.nominal_bounds(shift, now);
        let end = if start < now && now < end { now } else { end };

        TimeWindow {
            start,
            end,
            preset_shift_id: Some(shift.id.clone()),
            working_mode_id: mode.id().to_string(),
            open: false,
        }
        .anchored(now)
    }

    pub fn current_window(&self, mode: &WorkingMode, now: DateTime<Utc>) -> TimeWindow {
        let shift = self.current_shift(mode, now);
        self.window_for(mode, &shift.id, now)
    }

    /// Full start/end of the occurrence of `shift` that `now` is judged against.
    pub fn nominal_bounds(&self, shift: &Shift, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let hour = self.zone.hour(now);
        let today = self.zone.local_date(now);
        let yesterday = today.pred_opt().unwrap_or(today);
        let tomorrow = today.succ_opt().unwrap_or(today);

        if !shift.crosses_midnight {
            return (
                self.zone.at_hour(today, shift.start_hour),
                self.zone.at_hour(today, shift.end_hour),
            );
        }

        let before_midnight = (
            self.zone.at_hour(today, shift.start_hour),
            self.zone.at_hour(tomorrow, shift.end_hour),
        );
        if hour >= shift.start_hour {
            before_midnight
        } else if hour < shift.end_hour {
            (
                self.zone.at_hour(yesterday, shift.start_hour),
                self.zone.at_hour(today, shift.end_hour),
            )
        } else {
            // between shifts: judged against the upcoming occurrence
            before_midnight
        }
    }
}
