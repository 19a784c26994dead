// Application state for HTTP handlers
use crate::application::streaming_service::StreamingDashboardService;
use crate::application::unit_service::UnitService;

#[derive(Clone)]
pub struct AppState {
    pub unit_service: UnitService,
    pub streaming_service: StreamingDashboardService,
}
