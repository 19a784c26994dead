// Unit service - Use case for listing production units
use crate::application::backend::ProductionBackend;
use std::sync::Arc;

/// Offered when the backend cannot enumerate units.
pub const PLACEHOLDER_UNIT: &str = "DefaultUnit";

#[derive(Clone)]
pub struct UnitService {
    backend: Arc<dyn ProductionBackend>,
}

impl UnitService {
    pub fn new(backend: Arc<dyn ProductionBackend>) -> Self {
        Self { backend }
    }

    /// Never fails: an unreachable backend yields the single placeholder unit.
    pub async fn list_units(&self) -> Vec<String> {
        match self.backend.list_units().await {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!("unit enumeration failed, offering placeholder: {}", e);
                vec![PLACEHOLDER_UNIT.to_string()]
            }
        }
    }
}
