// Dashboard service - One-shot snapshots for historical windows
use crate::application::backend::ProductionBackend;
use crate::application::session::{SessionRequest, SessionState};
use crate::application::unit_channel::{ChannelEvent, ChannelEventKind};
use crate::domain::clock::Clock;
use crate::domain::dashboard::DashboardSnapshot;
use crate::domain::schedule::ShiftSchedule;
use crate::domain::window::{TimeWindowResolver, WindowRequest};
use crate::infrastructure::payload_codec::{decode_response, BackendResponse};
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct DashboardService {
    backend: Arc<dyn ProductionBackend>,
    schedule: Arc<ShiftSchedule>,
    resolver: TimeWindowResolver,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    deduct_breaks: bool,
}

impl DashboardService {
    pub fn new(
        backend: Arc<dyn ProductionBackend>,
        schedule: Arc<ShiftSchedule>,
        resolver: TimeWindowResolver,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
        deduct_breaks: bool,
    ) -> Self {
        Self {
            backend,
            schedule,
            resolver,
            clock,
            request_timeout,
            deduct_breaks,
        }
    }

    /// Fetches every unit concurrently and reduces the results into one snapshot.
    pub async fn snapshot(&self, id: Uuid, request: &SessionRequest) -> DashboardSnapshot {
        let now = self.clock.now();
        let body = request.window.request_at(now);

        let fetches = request.units.iter().map(|unit| {
            let body = &body;
            async move { (unit.clone(), self.fetch_unit(unit, body).await) }
        });
        let results = futures::future::join_all(fetches).await;

        let mut state = SessionState::new(
            id,
            request,
            self.schedule.clone(),
            self.resolver,
            self.deduct_breaks,
            now,
        );
        for (unit, kind) in results {
            let epoch = state.epoch();
            state.apply(ChannelEvent { unit, epoch, kind });
        }
        state.close();

        tracing::info!(session = %id, units = request.units.len(), "historical snapshot built");
        state.snapshot(now)
    }

    async fn fetch_unit(&self, unit: &str, body: &WindowRequest) -> ChannelEventKind {
        let response = tokio::time::timeout(self.request_timeout, self.backend.fetch_historical(unit, body)).await;
        match response {
            Err(_) => {
                tracing::warn!(unit, "historical request timed out, reporting empty result");
                ChannelEventKind::TimedOut
            }
            Ok(Err(e)) => {
                tracing::warn!(unit, "historical request failed: {}", e);
                ChannelEventKind::Failed(e)
            }
            Ok(Ok(text)) => match decode_response(&text, self.resolver.zone()) {
                Ok(BackendResponse::Metrics(payload)) => ChannelEventKind::Data(payload),
                Ok(BackendResponse::Failure(message)) => {
                    tracing::warn!(unit, "backend reported error: {}", message);
                    ChannelEventKind::BackendError(message)
                }
                Err(e) => {
                    tracing::warn!(unit, "malformed historical payload: {}", e);
                    ChannelEventKind::Malformed(e)
                }
            },
        }
    }
}
