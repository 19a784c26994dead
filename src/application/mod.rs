// Application layer - Use cases, session orchestration and backend ports
pub mod backend;
pub mod cadence;
pub mod dashboard_service;
pub mod session;
pub mod streaming_service;
pub mod unit_channel;
pub mod unit_service;
