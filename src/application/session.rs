// View session: navigation parameter validation and the session state machine
use crate::application::backend::DataFamily;
use crate::application::unit_channel::{ChannelEvent, ChannelEventKind};
use crate::domain::boundary::ShiftBoundaryMonitor;
use crate::domain::dashboard::{ConnectionState, DashboardSnapshot, SessionPhase, UnitSnapshot, UnitStatus};
use crate::domain::errors::PreconditionError;
use crate::domain::metrics::{cross_unit_metrics, unit_metrics, UnitMetrics};
use crate::domain::production::MetricsPayload;
use crate::domain::schedule::{PlantZone, ShiftSchedule};
use crate::domain::window::{TimeWindow, TimeWindowResolver};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Raw navigation parameters as the view sends them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationParams {
    pub units: Vec<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub preset: Option<String>,
    pub working_mode: Option<String>,
    pub view: Option<String>,
}

impl NavigationParams {
    /// Parses a query string; `units` may repeat or hold a comma-separated list.
    pub fn from_query(query: &str) -> Self {
        let mut params = NavigationParams::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(value);
            match key {
                "units" | "units[]" | "unit" => params
                    .units
                    .extend(value.split(',').map(str::trim).filter(|u| !u.is_empty()).map(str::to_string)),
                "start" => params.start = Some(value),
                "end" => params.end = Some(value),
                "preset" => params.preset = Some(value).filter(|v| !v.is_empty()),
                "workingMode" => params.working_mode = Some(value).filter(|v| !v.is_empty()),
                "view" => params.view = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }
        params
    }

    /// Turns the parameters into a session request, or rejects them outright.
    pub fn validate(
        &self,
        schedule: &ShiftSchedule,
        zone: PlantZone,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> Result<SessionRequest, PreconditionError> {
        let mut units: Vec<String> = Vec::new();
        for unit in &self.units {
            if !units.contains(unit) {
                units.push(unit.clone());
            }
        }
        if units.is_empty() {
            return Err(PreconditionError::NoUnits);
        }

        let start = parse_required(self.start.as_deref(), "start", zone)?;
        let end = parse_required(self.end.as_deref(), "end", zone)?;
        if start >= end {
            return Err(PreconditionError::EmptyWindow);
        }

        let cutoff = now - Duration::days(retention_days);
        if start < cutoff {
            return Err(PreconditionError::BeyondRetention {
                field: "start",
                days: retention_days,
            });
        }
        if end < cutoff {
            return Err(PreconditionError::BeyondRetention {
                field: "end",
                days: retention_days,
            });
        }

        let mode = match self.working_mode.as_deref() {
            Some(id) => schedule.resolve_or_default(id),
            None => schedule.default_mode(),
        };
        let preset = match self.preset.as_deref() {
            Some(shift) if mode.shift(shift).is_some() => Some(shift.to_string()),
            Some(shift) => {
                tracing::warn!(mode = mode.id(), "unknown preset {}, treating as custom window", shift);
                None
            }
            None => None,
        };
        let family = match self.view.as_deref() {
            Some(view) => DataFamily::parse(view).unwrap_or_else(|| {
                tracing::warn!("unknown view {}, using standard", view);
                DataFamily::Standard
            }),
            None => DataFamily::Standard,
        };

        Ok(SessionRequest {
            units,
            window: TimeWindow::new(start, end, preset, mode.id())?.anchored(now),
            family,
        })
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

fn parse_required(
    value: Option<&str>,
    field: &'static str,
    zone: PlantZone,
) -> Result<DateTime<Utc>, PreconditionError> {
    let text = value.filter(|v| !v.trim().is_empty()).ok_or(PreconditionError::Missing(field))?;
    zone.parse_instant(text).ok_or_else(|| PreconditionError::InvalidInstant {
        field,
        value: text.to_string(),
    })
}

/// Validated input of one view session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub units: Vec<String>,
    pub window: TimeWindow,
    pub family: DataFamily,
}

/// Window the view should pre-fill: the preset's, or the current shift's.
pub fn suggest_window(
    schedule: &ShiftSchedule,
    resolver: &TimeWindowResolver,
    working_mode: Option<&str>,
    preset: Option<&str>,
    now: DateTime<Utc>,
) -> TimeWindow {
    let mode = match working_mode {
        Some(id) => schedule.resolve_or_default(id),
        None => schedule.default_mode(),
    };
    match preset {
        Some(shift) => resolver.window_for(mode, shift, now),
        None => resolver.current_window(mode, now),
    }
}

#[derive(Debug, Clone)]
struct UnitEntry {
    unit: String,
    connection: ConnectionState,
    status: UnitStatus,
    detail: Option<String>,
    payload: Option<MetricsPayload>,
}

impl UnitEntry {
    fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            connection: ConnectionState::Connecting,
            status: UnitStatus::Pending,
            detail: None,
            payload: None,
        }
    }

    /// Keeps the last good payload; a unit that never had one shows as empty.
    fn degrade(&mut self, status: UnitStatus, detail: String) {
        self.status = status;
        self.detail = Some(detail);
        self.payload.get_or_insert_with(MetricsPayload::empty);
    }
}

/// Everything one session shows, with a single writer (the session runner).
///
/// Events are tagged with the epoch of the channel that produced them; a
/// shift transition bumps the epoch, so anything from a superseded channel
/// is rejected here even if it slipped past the channel's own tombstone.
#[derive(Debug, Clone)]
pub struct SessionState {
    id: Uuid,
    epoch: u64,
    phase: SessionPhase,
    frozen: bool,
    monitor: ShiftBoundaryMonitor,
    schedule: Arc<ShiftSchedule>,
    zone: PlantZone,
    deduct_breaks: bool,
    units: Vec<UnitEntry>,
}

impl SessionState {
    pub fn new(
        id: Uuid,
        request: &SessionRequest,
        schedule: Arc<ShiftSchedule>,
        resolver: TimeWindowResolver,
        deduct_breaks: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let monitor = ShiftBoundaryMonitor::new(schedule.clone(), resolver, request.window.clone(), now);
        Self {
            id,
            epoch: 0,
            phase: SessionPhase::Connecting,
            frozen: false,
            monitor,
            schedule,
            zone: resolver.zone(),
            deduct_breaks,
            units: request.units.iter().map(|u| UnitEntry::new(u)).collect(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn window(&self) -> &TimeWindow {
        self.monitor.active_window()
    }

    pub fn is_armed(&self) -> bool {
        self.monitor.is_armed()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.unit.clone()).collect()
    }

    /// Applies one channel event. Returns whether anything visible changed.
    pub fn apply(&mut self, event: ChannelEvent) -> bool {
        if event.epoch != self.epoch {
            tracing::debug!(
                unit = %event.unit,
                event_epoch = event.epoch,
                epoch = self.epoch,
                "discarding event from superseded window"
            );
            return false;
        }
        if matches!(self.phase, SessionPhase::Closed) {
            return false;
        }
        let Some(entry) = self.units.iter_mut().find(|u| u.unit == event.unit) else {
            return false;
        };

        match event.kind {
            ChannelEventKind::Opened => {
                entry.connection = ConnectionState::Open;
            }
            ChannelEventKind::Data(payload) => {
                entry.status = if payload.is_empty() {
                    UnitStatus::Empty
                } else {
                    UnitStatus::Ok
                };
                entry.detail = None;
                entry.payload = Some(payload);
            }
            ChannelEventKind::TimedOut => {
                entry.degrade(UnitStatus::TimedOut, "no response yet".to_string());
            }
            ChannelEventKind::BackendError(message) => {
                entry.degrade(UnitStatus::BackendError, message);
            }
            ChannelEventKind::Malformed(e) => {
                entry.degrade(UnitStatus::Malformed, e.to_string());
            }
            ChannelEventKind::Closed { .. } => {
                entry.connection = ConnectionState::Closed;
            }
            ChannelEventKind::Reconnecting { attempt, .. } => {
                entry.connection = ConnectionState::Connecting;
                entry.detail = Some(format!("reconnect attempt {}", attempt));
            }
            ChannelEventKind::Failed(e) => {
                entry.connection = ConnectionState::Failed;
                entry.degrade(UnitStatus::Failed, e.to_string());
            }
        }

        self.refresh_phase();
        true
    }

    fn refresh_phase(&mut self) {
        if matches!(self.phase, SessionPhase::Closed | SessionPhase::Invalidating) {
            return;
        }
        self.phase = if self.units.iter().all(|u| u.connection == ConnectionState::Failed) {
            SessionPhase::Failed
        } else if self.units.iter().any(|u| u.payload.is_some()) {
            SessionPhase::Live
        } else {
            SessionPhase::Connecting
        };
    }

    /// Runs the state half of a shift transition if the boundary was crossed.
    ///
    /// Freezes further checks, bumps the epoch, swaps in the new window and
    /// clears every unit. The caller must close the old channels and open new
    /// ones for the returned window before anything else observes the state.
    pub fn begin_transition(&mut self, now: DateTime<Utc>) -> Option<TimeWindow> {
        if self.frozen || !self.monitor.has_crossed_boundary(now) {
            return None;
        }
        let from = self.monitor.active_shift_id().unwrap_or("-").to_string();

        self.frozen = true;
        self.phase = SessionPhase::Invalidating;
        for entry in &mut self.units {
            entry.connection = ConnectionState::Invalid;
        }
        self.epoch += 1;

        let window = self.monitor.advance(now);
        for entry in &mut self.units {
            *entry = UnitEntry::new(&entry.unit);
        }
        self.phase = SessionPhase::Connecting;

        tracing::info!(
            session = %self.id,
            epoch = self.epoch,
            from = %from,
            to = self.monitor.active_shift_id().unwrap_or("-"),
            "shift transition"
        );
        Some(window)
    }

    /// Ends the settle delay so the next boundary check may fire.
    pub fn settle(&mut self) {
        self.frozen = false;
    }

    pub fn close(&mut self) {
        self.phase = SessionPhase::Closed;
        for entry in &mut self.units {
            if entry.connection != ConnectionState::Failed {
                entry.connection = ConnectionState::Closed;
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let window = self.monitor.active_window();
        let mode = self.schedule.resolve_or_default(window.working_mode_id());
        let operating_seconds = window.operating_seconds(mode, self.zone, now, self.deduct_breaks);

        let units: Vec<UnitSnapshot> = self
            .units
            .iter()
            .map(|entry| UnitSnapshot {
                unit: entry.unit.clone(),
                connection: entry.connection,
                status: entry.status,
                detail: entry.detail.clone(),
                metrics: entry
                    .payload
                    .as_ref()
                    .map(|p| unit_metrics(p, operating_seconds))
                    .unwrap_or_default(),
            })
            .collect();

        let reporting: Vec<&UnitMetrics> = units
            .iter()
            .zip(&self.units)
            .filter(|(_, entry)| entry.payload.is_some())
            .map(|(snapshot, _)| &snapshot.metrics)
            .collect();

        DashboardSnapshot {
            session_id: self.id,
            epoch: self.epoch,
            working_mode: window.working_mode_id().to_string(),
            shift: self
                .monitor
                .active_shift_id()
                .or(window.preset_shift_id())
                .map(str::to_string),
            window_start: window.start(),
            window_end: window.extended_to(now).end(),
            live: window.is_live(now),
            phase: self.phase,
            transitioning: self.frozen,
            totals: cross_unit_metrics(reporting),
            units,
            generated_at: now,
        }
    }
}
