// Working modes, shifts and scheduled breaks
use crate::domain::errors::ConfigError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;

pub const HOURS_PER_DAY: u32 = 24;

/// The plant's wall-clock zone. Shift hours are always read in this zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlantZone {
    offset: FixedOffset,
}

impl PlantZone {
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, ConfigError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(|offset| Self { offset })
            .ok_or(ConfigError::InvalidOffset(minutes))
    }

    pub fn hour(&self, instant: DateTime<Utc>) -> u32 {
        instant.with_timezone(&self.offset).hour()
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Instant of `hour` o'clock on the local `date`; hour 24 is the next midnight.
    pub fn at_hour(&self, date: NaiveDate, hour: u32) -> DateTime<Utc> {
        self.at_time(date, NaiveTime::MIN) + Duration::hours(i64::from(hour))
    }

    pub fn at_time(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// RFC 3339, or a plant-local `YYYY-MM-DDTHH:MM[:SS[.fff]]`.
    pub fn parse_instant(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
            return Some(instant.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
            .map(|local| self.at_time(local.date(), local.time()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shift {
    pub id: String,
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub crosses_midnight: bool,
}

impl Shift {
    pub fn new(id: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{:02}:00 - {:02}:00", start_hour, end_hour),
            start_hour,
            end_hour,
            crosses_midnight: end_hour <= start_hour,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.crosses_midnight {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }

    fn validate(&self, mode: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidShift {
            mode: mode.to_string(),
            shift: self.id.clone(),
            reason,
        };

        if self.start_hour >= HOURS_PER_DAY {
            return Err(invalid(format!("start hour {} is not in 0..=23", self.start_hour)));
        }
        if self.end_hour > HOURS_PER_DAY {
            return Err(invalid(format!("end hour {} is not in 0..=24", self.end_hour)));
        }
        if self.crosses_midnight != (self.end_hour <= self.start_hour) {
            return Err(invalid("midnight-crossing flag disagrees with its hours".to_string()));
        }
        Ok(())
    }
}

/// A recurring daily pause, in plant wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakPeriod {
    pub id: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl BreakPeriod {
    pub fn new(id: &str, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            id: id.to_string(),
            start,
            end,
        }
    }

    /// Parses `HH:MM` bounds.
    pub fn parse(id: &str, start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end, "%H:%M").ok()?;
        Some(Self::new(id, start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkingMode {
    id: String,
    name: String,
    shifts: Vec<Shift>,
    breaks: Vec<BreakPeriod>,
}

impl WorkingMode {
    pub fn new(
        id: &str,
        name: &str,
        shifts: Vec<Shift>,
        breaks: Vec<BreakPeriod>,
    ) -> Result<Self, ConfigError> {
        let mode = Self {
            id: id.to_string(),
            name: name.to_string(),
            shifts,
            breaks,
        };
        mode.validate()?;
        Ok(mode)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shifts(&self) -> &[Shift] {
        &self.shifts
    }

    pub fn breaks(&self) -> &[BreakPeriod] {
        &self.breaks
    }

    pub fn shift(&self, id: &str) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    pub fn first_shift(&self) -> &Shift {
        // non-empty, checked by validate()
        &self.shifts[0]
    }

    /// Hours of the day that no shift of this mode covers.
    pub fn uncovered_hours(&self) -> Vec<u32> {
        (0..HOURS_PER_DAY)
            .filter(|h| !self.shifts.iter().any(|s| s.contains_hour(*h)))
            .collect()
    }

    /// Seconds of scheduled break time overlapping `[start, end)`.
    pub fn break_seconds(&self, zone: PlantZone, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        if end <= start || self.breaks.is_empty() {
            return 0.0;
        }

        // Start one day early so a break that began before midnight is counted.
        let mut day = zone.local_date(start).pred_opt().unwrap_or(zone.local_date(start));
        let last_day = zone.local_date(end);
        let mut total_ms: i64 = 0;

        while day <= last_day {
            for period in &self.breaks {
                let break_start = zone.at_time(day, period.start);
                let mut break_end = zone.at_time(day, period.end);
                if period.end <= period.start {
                    break_end += Duration::days(1);
                }

                let overlap_start = start.max(break_start);
                let overlap_end = end.min(break_end);
                if overlap_start < overlap_end {
                    total_ms += (overlap_end - overlap_start).num_milliseconds();
                }
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        total_ms as f64 / 1000.0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.shifts.is_empty() {
            return Err(ConfigError::EmptyMode(self.id.clone()));
        }
        for shift in &self.shifts {
            shift.validate(&self.id)?;
        }

        for hour in 0..HOURS_PER_DAY {
            let mut covering = self.shifts.iter().filter(|s| s.contains_hour(hour));
            if let (Some(first), Some(second)) = (covering.next(), covering.next()) {
                return Err(ConfigError::OverlappingShifts {
                    mode: self.id.clone(),
                    first: first.id.clone(),
                    second: second.id.clone(),
                    hour,
                });
            }
        }

        for period in &self.breaks {
            if period.id.is_empty() || period.start == period.end {
                return Err(ConfigError::InvalidBreak {
                    mode: self.id.clone(),
                    id: period.id.clone(),
                    reason: "break must have an id and a non-zero length".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Immutable set of working modes defined at process start.
#[derive(Debug, Clone)]
pub struct ShiftSchedule {
    modes: Vec<WorkingMode>,
    default_mode_id: String,
}

impl ShiftSchedule {
    pub fn new(modes: Vec<WorkingMode>, default_mode_id: &str) -> Result<Self, ConfigError> {
        if modes.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        if !modes.iter().any(|m| m.id == default_mode_id) {
            return Err(ConfigError::MissingDefault(default_mode_id.to_string()));
        }
        for mode in &modes {
            let gaps = mode.uncovered_hours();
            if !gaps.is_empty() {
                tracing::warn!(mode = %mode.id, ?gaps, "working mode leaves hours without a shift");
            }
        }
        Ok(Self {
            modes,
            default_mode_id: default_mode_id.to_string(),
        })
    }

    /// The three plant modes with their break tables.
    pub fn standard() -> Self {
        let brk = |id: &str, start: (u32, u32), end: (u32, u32)| {
            BreakPeriod::new(
                id,
                NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap_or(NaiveTime::MIN),
                NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap_or(NaiveTime::MIN),
            )
        };
        let a = brk("a", (10, 0), (10, 15));
        let b = brk("b", (12, 0), (12, 30));
        let c = brk("c", (16, 0), (16, 15));
        let d = brk("d", (18, 0), (18, 30));
        let e = brk("e", (20, 0), (20, 30));
        let f = brk("f", (22, 0), (22, 15));
        let g = brk("g", (0, 0), (0, 30));
        let h = brk("h", (3, 0), (3, 15));
        let i = brk("i", (5, 0), (5, 30));

        let modes = vec![
            WorkingMode {
                id: "mode1".to_string(),
                name: "Mode 1".to_string(),
                shifts: vec![
                    Shift::new("shift1", 8, 16),
                    Shift::new("shift2", 16, 24),
                    Shift::new("shift3", 0, 8),
                ],
                breaks: vec![a.clone(), b.clone(), e, f.clone(), h.clone(), i.clone()],
            },
            WorkingMode {
                id: "mode2".to_string(),
                name: "Mode 2".to_string(),
                shifts: vec![Shift::new("shift1", 8, 18), Shift::new("shift2", 20, 8)],
                breaks: vec![
                    a.clone(),
                    b.clone(),
                    c.clone(),
                    f.clone(),
                    g.clone(),
                    h.clone(),
                    i.clone(),
                ],
            },
            WorkingMode {
                id: "mode3".to_string(),
                name: "Mode 3".to_string(),
                shifts: vec![Shift::new("shift1", 8, 20), Shift::new("shift2", 20, 8)],
                breaks: vec![a, b, c, d, f, g, h, i],
            },
        ];

        Self {
            modes,
            default_mode_id: "mode1".to_string(),
        }
    }

    pub fn modes(&self) -> &[WorkingMode] {
        &self.modes
    }

    pub fn default_mode(&self) -> &WorkingMode {
        // presence checked in new()
        self.modes
            .iter()
            .find(|m| m.id == self.default_mode_id)
            .unwrap_or(&self.modes[0])
    }

    pub fn resolve(&self, working_mode_id: &str) -> Result<&WorkingMode, ConfigError> {
        self.modes
            .iter()
            .find(|m| m.id == working_mode_id)
            .ok_or_else(|| ConfigError::UnknownWorkingMode(working_mode_id.to_string()))
    }

    pub fn resolve_or_default(&self, working_mode_id: &str) -> &WorkingMode {
        match self.resolve(working_mode_id) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!("{}, falling back to {}", e, self.default_mode_id);
                self.default_mode()
            }
        }
    }
}
