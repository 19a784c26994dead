// Dashboard snapshot domain model, the only shape the view ever sees
use crate::domain::metrics::{CrossUnitMetrics, UnitMetrics};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    /// Superseded by a shift transition; nothing it delivers is applied.
    Invalid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Ok,
    Empty,
    TimedOut,
    BackendError,
    Malformed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Connecting,
    Live,
    Invalidating,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSnapshot {
    pub unit: String,
    pub connection: ConnectionState,
    pub status: UnitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub metrics: UnitMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub session_id: Uuid,
    pub epoch: u64,
    pub working_mode: String,
    pub shift: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub live: bool,
    pub phase: SessionPhase,
    pub transitioning: bool,
    pub units: Vec<UnitSnapshot>,
    pub totals: CrossUnitMetrics,
    pub generated_at: DateTime<Utc>,
}

impl DashboardSnapshot {
    pub fn unit(&self, name: &str) -> Option<&UnitSnapshot> {
        self.units.iter().find(|u| u.unit == name)
    }
}
