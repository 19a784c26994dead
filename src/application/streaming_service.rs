// Streaming dashboard service - Live sessions that push a snapshot on every change
use crate::application::backend::UnitTransport;
use crate::application::cadence::{AdaptiveTicker, Cadence, Visibility};
use crate::application::dashboard_service::DashboardService;
use crate::application::session::{suggest_window, NavigationParams, SessionRequest, SessionState};
use crate::application::unit_channel::{ChannelContext, ChannelEvent, ChannelSettings, UnitDataChannel};
use crate::domain::clock::Clock;
use crate::domain::dashboard::DashboardSnapshot;
use crate::domain::errors::PreconditionError;
use crate::domain::schedule::ShiftSchedule;
use crate::domain::window::{TimeWindow, TimeWindowResolver};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub boundary_poll: Cadence,
    pub settle_delay: Duration,
    pub channel: ChannelSettings,
    pub deduct_breaks: bool,
    pub retention_days: i64,
}

/// A started session. Dropping `snapshots` tears the session down.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub snapshots: watch::Receiver<DashboardSnapshot>,
}

type VisibilityRegistry = Arc<Mutex<HashMap<Uuid, watch::Sender<Visibility>>>>;

#[derive(Clone)]
pub struct StreamingDashboardService {
    transport: Arc<dyn UnitTransport>,
    history: DashboardService,
    schedule: Arc<ShiftSchedule>,
    resolver: TimeWindowResolver,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    sessions: VisibilityRegistry,
}

impl StreamingDashboardService {
    pub fn new(
        transport: Arc<dyn UnitTransport>,
        history: DashboardService,
        schedule: Arc<ShiftSchedule>,
        resolver: TimeWindowResolver,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            transport,
            history,
            schedule,
            resolver,
            clock,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn suggest_window(&self, working_mode: Option<&str>, preset: Option<&str>) -> TimeWindow {
        suggest_window(&self.schedule, &self.resolver, working_mode, preset, self.clock.now())
    }

    pub fn is_live(&self, window: &TimeWindow) -> bool {
        window.is_live(self.clock.now())
    }

    /// Validates the navigation parameters and starts a session.
    ///
    /// Historical windows are answered with a single snapshot after which the
    /// stream ends; live windows keep a session running until the last
    /// snapshot receiver is dropped.
    pub async fn start_session(&self, params: &NavigationParams) -> Result<SessionHandle, PreconditionError> {
        let now = self.clock.now();
        let request = params.validate(&self.schedule, self.resolver.zone(), now, self.settings.retention_days)?;
        let id = Uuid::new_v4();

        if !request.window.is_live(now) {
            let snapshot = self.history.snapshot(id, &request).await;
            let (_, snapshots) = watch::channel(snapshot);
            return Ok(SessionHandle { id, snapshots });
        }

        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Foreground);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id, visibility_tx);
        }

        let state = SessionState::new(
            id,
            &request,
            self.schedule.clone(),
            self.resolver,
            self.settings.deduct_breaks,
            now,
        );
        let (snapshot_tx, snapshots) = watch::channel(state.snapshot(now));
        tracing::info!(
            session = %id,
            units = request.units.len(),
            armed = state.is_armed(),
            "live session started"
        );

        let runner = SessionRunner {
            state,
            request,
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            resolver: self.resolver,
            settings: self.settings,
            visibility: visibility_rx,
            snapshots: snapshot_tx,
            sessions: self.sessions.clone(),
        };
        tokio::spawn(runner.run());

        Ok(SessionHandle { id, snapshots })
    }

    /// Forwards the view's visibility to a live session. False if it is unknown.
    pub fn set_visibility(&self, id: Uuid, visibility: Visibility) -> bool {
        let Ok(sessions) = self.sessions.lock() else {
            return false;
        };
        match sessions.get(&id) {
            Some(tx) => {
                tx.send_replace(visibility);
                tracing::debug!(session = %id, ?visibility, "visibility changed");
                true
            }
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Sole owner and writer of one live session's state.
struct SessionRunner {
    state: SessionState,
    request: SessionRequest,
    transport: Arc<dyn UnitTransport>,
    clock: Arc<dyn Clock>,
    resolver: TimeWindowResolver,
    settings: SessionSettings,
    visibility: watch::Receiver<Visibility>,
    snapshots: watch::Sender<DashboardSnapshot>,
    sessions: VisibilityRegistry,
}

impl SessionRunner {
    async fn run(mut self) {
        let (events_tx, mut events) = mpsc::channel::<ChannelEvent>(EVENT_BUFFER);
        let mut channels = self.open_channels(self.state.window().clone(), &events_tx);
        let mut boundary = AdaptiveTicker::new(self.settings.boundary_poll, self.visibility.clone());
        let armed = self.state.is_armed();
        let settle = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(settle);
        let mut settling = false;

        loop {
            tokio::select! {
                _ = self.snapshots.closed() => {
                    tracing::info!(session = %self.state.id(), "viewer disconnected");
                    break;
                }
                Some(event) = events.recv() => {
                    if self.state.apply(event) {
                        self.publish();
                    }
                }
                _ = boundary.tick(), if armed => {
                    let now = self.clock.now();
                    if let Some(window) = self.state.begin_transition(now) {
                        for channel in channels.drain(..) {
                            channel.close();
                        }
                        channels = self.open_channels(window, &events_tx);
                        settle.as_mut().reset(Instant::now() + self.settings.settle_delay);
                        settling = true;
                        self.publish();
                    }
                }
                _ = &mut settle, if settling => {
                    settling = false;
                    self.state.settle();
                    tracing::debug!(session = %self.state.id(), "transition settled");
                    self.publish();
                }
            }
        }

        for channel in &channels {
            channel.close();
        }
        self.state.close();
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.state.id());
        }
        tracing::info!(session = %self.state.id(), "live session closed");
    }

    fn open_channels(&self, window: TimeWindow, events: &mpsc::Sender<ChannelEvent>) -> Vec<UnitDataChannel> {
        let ctx = ChannelContext {
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            zone: self.resolver.zone(),
            family: self.request.family,
            settings: self.settings.channel,
            visibility: self.visibility.clone(),
            events: events.clone(),
        };
        self.state
            .unit_names()
            .iter()
            .map(|unit| UnitDataChannel::open(unit, window.clone(), self.state.epoch(), ctx.clone()))
            .collect()
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.state.snapshot(self.clock.now()));
    }
}
