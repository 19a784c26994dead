// Configuration loading - File and environment layers deserialized into AppConfig
use crate::application::cadence::Cadence;
use crate::application::streaming_service::SessionSettings;
use crate::application::unit_channel::ChannelSettings;
use crate::domain::errors::ConfigError;
use crate::domain::schedule::{BreakPeriod, PlantZone, Shift, ShiftSchedule, WorkingMode};
use serde::Deserialize;
use tokio::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub plant: PlantSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    #[serde(default = "default_http_base_url")]
    pub http_base_url: String,
    #[serde(default)]
    pub ws_base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            http_base_url: default_http_base_url(),
            ws_base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl BackendSettings {
    /// Explicit WebSocket base, or the HTTP base with its scheme swapped.
    pub fn ws_base_url(&self) -> String {
        if let Some(url) = &self.ws_base_url {
            return url.trim_end_matches('/').to_string();
        }
        let http = self.http_base_url.trim_end_matches('/');
        if let Some(rest) = http.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = http.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", http)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlantSettings {
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_working_mode")]
    pub default_working_mode: String,
}

impl Default for PlantSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            default_working_mode: default_working_mode(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimingSettings {
    #[serde(default = "default_boundary_poll_secs")]
    pub boundary_poll_secs: u64,
    #[serde(default = "default_boundary_poll_background_secs")]
    pub boundary_poll_background_secs: u64,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_refresh_background_secs")]
    pub refresh_background_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_settle_delay_secs")]
    pub settle_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            boundary_poll_secs: default_boundary_poll_secs(),
            boundary_poll_background_secs: default_boundary_poll_background_secs(),
            refresh_secs: default_refresh_secs(),
            refresh_background_secs: default_refresh_background_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            settle_delay_secs: default_settle_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsSettings {
    #[serde(default)]
    pub deduct_breaks: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub modes: Vec<ModeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModeConfig {
    pub id: String,
    pub name: Option<String>,
    pub shifts: Vec<ShiftConfig>,
    #[serde(default)]
    pub breaks: Vec<BreakConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShiftConfig {
    pub id: String,
    pub name: Option<String>,
    pub start_hour: u32,
    pub end_hour: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakConfig {
    pub id: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_utc_offset_minutes() -> i32 {
    180
}

fn default_working_mode() -> String {
    "mode1".to_string()
}

fn default_boundary_poll_secs() -> u64 {
    10
}

fn default_boundary_poll_background_secs() -> u64 {
    30
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_refresh_background_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_settle_delay_secs() -> u64 {
    2
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_retention_days() -> i64 {
    14
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Reads `config/dashboard.toml` if present, then `DASHBOARD__SECTION__KEY` overrides.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(
            config::Environment::with_prefix("DASHBOARD")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

impl AppConfig {
    pub fn zone(&self) -> Result<PlantZone, ConfigError> {
        PlantZone::from_offset_minutes(self.plant.utc_offset_minutes)
    }

    /// The configured modes, or the built-in table when none are configured.
    pub fn shift_schedule(&self) -> Result<ShiftSchedule, ConfigError> {
        let modes = if self.schedule.modes.is_empty() {
            ShiftSchedule::standard().modes().to_vec()
        } else {
            self.schedule
                .modes
                .iter()
                .map(ModeConfig::to_mode)
                .collect::<Result<Vec<_>, _>>()?
        };
        ShiftSchedule::new(modes, &self.plant.default_working_mode)
    }

    pub fn session_settings(&self) -> SessionSettings {
        let t = &self.timing;
        SessionSettings {
            boundary_poll: Cadence {
                foreground: Duration::from_secs(t.boundary_poll_secs.max(1)),
                background: Duration::from_secs(t.boundary_poll_background_secs.clamp(30, 60)),
            },
            settle_delay: Duration::from_secs(t.settle_delay_secs),
            channel: ChannelSettings {
                refresh: Cadence {
                    foreground: Duration::from_secs(t.refresh_secs.max(1)),
                    background: Duration::from_secs(t.refresh_background_secs.max(60)),
                },
                connect_timeout: Duration::from_secs(t.connect_timeout_secs.clamp(10, 15)),
                max_reconnect_attempts: t.max_reconnect_attempts,
                reconnect_base: Duration::from_millis(t.reconnect_base_ms.clamp(100, 10_000)),
            },
            deduct_breaks: self.metrics.deduct_breaks,
            retention_days: t.retention_days.max(1),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs.max(1))
    }
}

impl ModeConfig {
    fn to_mode(&self) -> Result<WorkingMode, ConfigError> {
        let shifts = self
            .shifts
            .iter()
            .map(|s| {
                let shift = Shift::new(&s.id, s.start_hour, s.end_hour);
                match &s.name {
                    Some(name) => shift.with_name(name),
                    None => shift,
                }
            })
            .collect();
        let breaks = self
            .breaks
            .iter()
            .map(|b| {
                BreakPeriod::parse(&b.id, &b.start, &b.end).ok_or_else(|| ConfigError::InvalidBreak {
                    mode: self.id.clone(),
                    id: b.id.clone(),
                    reason: format!("bounds {}-{} are not HH:MM", b.start, b.end),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        WorkingMode::new(&self.id, self.name.as_deref().unwrap_or(&self.id), shifts, breaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("");
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.backend.ws_base_url(), "ws://127.0.0.1:8000");
        assert_eq!(config.timing.retention_days, 14);
        assert!(!config.metrics.deduct_breaks);

        let schedule = config.shift_schedule().unwrap();
        assert_eq!(schedule.default_mode().id(), "mode1");
        assert_eq!(schedule.modes().len(), 3);
    }

    #[test]
    fn test_timing_is_clamped() {
        let config = from_toml(
            r#"
            [timing]
            boundary_poll_background_secs = 5
            refresh_background_secs = 20
            connect_timeout_secs = 40
            reconnect_base_ms = 9223372036854775807
            "#,
        );
        let settings = config.session_settings();
        assert_eq!(settings.boundary_poll.background, Duration::from_secs(30));
        assert_eq!(settings.channel.refresh.background, Duration::from_secs(60));
        assert_eq!(settings.channel.connect_timeout, Duration::from_secs(15));
        assert_eq!(settings.channel.reconnect_base, Duration::from_secs(10));
    }

    #[test]
    fn test_ws_url_follows_http_scheme() {
        let config = from_toml(
            r#"
            [backend]
            http_base_url = "https://plant.example/"
            "#,
        );
        assert_eq!(config.backend.ws_base_url(), "wss://plant.example");
    }

    #[test]
    fn test_configured_schedule() {
        let config = from_toml(
            r#"
            [plant]
            default_working_mode = "two"

            [[schedule.modes]]
            id = "two"
            shifts = [
                { id = "day", start_hour = 7, end_hour = 19 },
                { id = "night", start_hour = 19, end_hour = 7 },
            ]
            breaks = [{ id = "lunch", start = "12:00", end = "12:45" }]
            "#,
        );
        let schedule = config.shift_schedule().unwrap();
        let mode = schedule.default_mode();
        assert_eq!(mode.id(), "two");
        assert!(mode.shift("night").unwrap().crosses_midnight);
        assert_eq!(mode.breaks().len(), 1);
    }

    #[test]
    fn test_schedule_with_gap_is_accepted() {
        let config = from_toml(
            r#"
            [plant]
            default_working_mode = "short"

            [[schedule.modes]]
            id = "short"
            shifts = [{ id = "day", start_hour = 8, end_hour = 18 }]
            "#,
        );
        let schedule = config.shift_schedule().unwrap();
        assert_eq!(schedule.default_mode().uncovered_hours().len(), 14);
        assert_eq!(from_toml("").shift_schedule().unwrap().modes().len(), 3);
    }

    #[test]
    fn test_malformed_schedule_is_rejected() {
        let overlapping = from_toml(
            r#"
            [plant]
            default_working_mode = "m"

            [[schedule.modes]]
            id = "m"
            shifts = [
                { id = "a", start_hour = 8, end_hour = 17 },
                { id = "b", start_hour = 16, end_hour = 8 },
            ]
            "#,
        );
        assert!(matches!(
            overlapping.shift_schedule(),
            Err(ConfigError::OverlappingShifts { .. })
        ));

        let unknown_default = from_toml(
            r#"
            [plant]
            default_working_mode = "mode9"
            "#,
        );
        assert_eq!(
            unknown_default.shift_schedule().err(),
            Some(ConfigError::MissingDefault("mode9".to_string()))
        );

        let bad_break = from_toml(
            r#"
            [[schedule.modes]]
            id = "mode1"
            shifts = [{ id = "a", start_hour = 0, end_hour = 24 }]
            breaks = [{ id = "x", start = "noon", end = "13:00" }]
            "#,
        );
        assert!(matches!(bad_break.shift_schedule(), Err(ConfigError::InvalidBreak { .. })));
    }
}
