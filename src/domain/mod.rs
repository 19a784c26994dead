// Domain layer - Schedules, windows, production data and pure metric math
pub mod boundary;
pub mod clock;
pub mod dashboard;
pub mod errors;
pub mod metrics;
pub mod production;
pub mod schedule;
pub mod window;
