// Production data domain models, in the canonical shape every backend response is normalized to
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecord {
    pub model: String,
    pub target: Option<f64>,
    pub success_qty: u64,
    pub fail_qty: u64,
    pub total_qty: u64,
    /// Pre-computed by the backend, when it sends one.
    pub oee: Option<f64>,
}

impl ModelRecord {
    pub fn new(model: &str, target: Option<f64>, success_qty: u64, fail_qty: u64, total_qty: u64) -> Self {
        Self {
            model: model.to_string(),
            target,
            success_qty,
            fail_qty,
            total_qty,
            oee: None,
        }
    }

    pub fn with_oee(mut self, oee: Option<f64>) -> Self {
        self.oee = oee;
        self
    }

    /// Units that went through test; the quality denominator.
    pub fn processed(&self) -> u64 {
        self.success_qty.saturating_add(self.fail_qty)
    }

    pub fn positive_target(&self) -> Option<f64> {
        self.target.filter(|t| t.is_finite() && *t > 0.0)
    }

    /// Seconds the produced quantity should have taken at the target rate (units/hour).
    pub fn theoretical_seconds(&self) -> Option<f64> {
        self.positive_target()
            .map(|target| self.total_qty as f64 * SECONDS_PER_HOUR / target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourBucket {
    pub hour_start: DateTime<Utc>,
    pub hour_end: DateTime<Utc>,
    pub success_qty: u64,
    pub fail_qty: u64,
    pub total_qty: u64,
    pub performance: Option<f64>,
    pub oee: Option<f64>,
    pub theoretical_qty: Option<f64>,
}

impl HourBucket {
    pub fn processed(&self) -> u64 {
        self.success_qty.saturating_add(self.fail_qty)
    }

    pub fn is_partial(&self) -> bool {
        self.hour_end - self.hour_start < chrono::Duration::hours(1)
    }

    /// Backend figure if present, else throughput over the theoretical quantity.
    pub fn performance(&self) -> Option<f64> {
        self.performance.or_else(|| {
            self.theoretical_qty
                .filter(|q| q.is_finite() && *q > 0.0)
                .map(|q| self.total_qty as f64 / q)
        })
    }
}

/// Unit-level figures some responses carry next to (or instead of) model rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitTotals {
    pub total_success: Option<u64>,
    pub total_fail: Option<u64>,
    pub total_theoretical_qty: Option<f64>,
    pub total_quality: Option<f64>,
    pub total_performance: Option<f64>,
    pub total_oee: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsPayload {
    pub models: Vec<ModelRecord>,
    pub hourly: Vec<HourBucket>,
    pub totals: UnitTotals,
}

impl MetricsPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_models(models: Vec<ModelRecord>) -> Self {
        Self {
            models,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.hourly.is_empty() && self.totals == UnitTotals::default()
    }

    pub fn success(&self) -> u64 {
        if !self.models.is_empty() {
            return self.models.iter().map(|m| m.success_qty).fold(0, u64::saturating_add);
        }
        self.totals
            .total_success
            .unwrap_or_else(|| self.hourly.iter().map(|h| h.success_qty).fold(0, u64::saturating_add))
    }

    pub fn fail(&self) -> u64 {
        if !self.models.is_empty() {
            return self.models.iter().map(|m| m.fail_qty).fold(0, u64::saturating_add);
        }
        self.totals
            .total_fail
            .unwrap_or_else(|| self.hourly.iter().map(|h| h.fail_qty).fold(0, u64::saturating_add))
    }

    /// Throughput; `total_qty` is authoritative here, not success + fail.
    pub fn total_qty(&self) -> u64 {
        if !self.models.is_empty() {
            self.models.iter().map(|m| m.total_qty).fold(0, u64::saturating_add)
        } else {
            self.hourly.iter().map(|h| h.total_qty).fold(0, u64::saturating_add)
        }
    }

    pub fn theoretical_qty(&self) -> Option<f64> {
        self.totals.total_theoretical_qty.or_else(|| {
            let quantities: Vec<f64> = self.hourly.iter().filter_map(|h| h.theoretical_qty).collect();
            if quantities.is_empty() {
                None
            } else {
                Some(quantities.iter().sum())
            }
        })
    }
}
