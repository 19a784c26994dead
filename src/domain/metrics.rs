// Quality, performance and OEE aggregation at model, unit and cross-unit level.
//
// Everything here works in ratio space ([0,1], performance may exceed 1);
// scaling to percent is left to whoever renders the numbers.
use crate::domain::production::{HourBucket, MetricsPayload, ModelRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 { numerator / denominator } else { 0.0 }
}

/// Σ success / Σ (success + fail) over the records.
pub fn quality<'a>(records: impl IntoIterator<Item = &'a ModelRecord>) -> f64 {
    let (success, processed) = records
        .into_iter()
        .fold((0u64, 0u64), |(s, p), r| (s.saturating_add(r.success_qty), p.saturating_add(r.processed())));
    ratio(success as f64, processed as f64)
}

/// Sum of theoretical seconds over models with a positive target; `None` if there are none.
pub fn theoretical_seconds<'a>(records: impl IntoIterator<Item = &'a ModelRecord>) -> Option<f64> {
    records
        .into_iter()
        .filter_map(ModelRecord::theoretical_seconds)
        .fold(None, |acc, t| Some(acc.unwrap_or(0.0) + t))
}

/// Theoretical time over operating time. `None` means no model had a target.
pub fn performance<'a>(
    records: impl IntoIterator<Item = &'a ModelRecord>,
    operating_seconds: f64,
) -> Option<f64> {
    theoretical_seconds(records).map(|theoretical| ratio(theoretical, operating_seconds))
}

/// Mean of `value` weighted by production volume; `None` without any weight.
pub fn production_weighted_mean(pairs: impl IntoIterator<Item = (f64, u64)>) -> Option<f64> {
    let (weighted, weight) = pairs
        .into_iter()
        .filter(|(value, _)| value.is_finite())
        .fold((0.0, 0u64), |(sum, w), (value, weight)| (sum + value * weight as f64, w.saturating_add(weight)));
    if weight > 0 { Some(weighted / weight as f64) } else { None }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if count > 0 { Some(sum / count as f64) } else { None }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub model: String,
    pub target: Option<f64>,
    pub success_qty: u64,
    pub fail_qty: u64,
    pub total_qty: u64,
    pub quality: f64,
    pub performance: Option<f64>,
    pub oee: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourMetrics {
    pub hour_start: DateTime<Utc>,
    pub hour_end: DateTime<Utc>,
    pub success_qty: u64,
    pub fail_qty: u64,
    pub total_qty: u64,
    pub quality: f64,
    pub performance: Option<f64>,
    pub oee: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitMetrics {
    pub success_qty: u64,
    pub fail_qty: u64,
    pub total_qty: u64,
    pub quality: f64,
    pub performance: Option<f64>,
    pub oee: Option<f64>,
    pub models: Vec<ModelMetrics>,
    pub hourly: Vec<HourMetrics>,
}

impl UnitMetrics {
    pub fn processed(&self) -> u64 {
        self.success_qty.saturating_add(self.fail_qty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossUnitMetrics {
    pub units_reporting: usize,
    pub success_qty: u64,
    pub fail_qty: u64,
    pub quality: f64,
    pub performance: Option<f64>,
    pub oee: Option<f64>,
}

fn model_metrics(record: &ModelRecord, operating_seconds: f64) -> ModelMetrics {
    ModelMetrics {
        model: record.model.clone(),
        target: record.positive_target(),
        success_qty: record.success_qty,
        fail_qty: record.fail_qty,
        total_qty: record.total_qty,
        quality: quality(std::iter::once(record)),
        performance: performance(std::iter::once(record), operating_seconds),
        oee: record.oee,
    }
}

fn hour_metrics(bucket: &HourBucket) -> HourMetrics {
    HourMetrics {
        hour_start: bucket.hour_start,
        hour_end: bucket.hour_end,
        success_qty: bucket.success_qty,
        fail_qty: bucket.fail_qty,
        total_qty: bucket.total_qty,
        quality: ratio(bucket.success_qty as f64, bucket.processed() as f64),
        performance: bucket.performance(),
        oee: bucket.oee,
    }
}

/// Reduces one unit's payload, given the operating time of its window.
pub fn unit_metrics(payload: &MetricsPayload, operating_seconds: f64) -> UnitMetrics {
    let success_qty = payload.success();
    let fail_qty = payload.fail();
    let total_qty = payload.total_qty();

    let performance = performance(&payload.models, operating_seconds)
        .or_else(|| {
            payload
                .theoretical_qty()
                .filter(|q| *q > 0.0)
                .map(|q| total_qty as f64 / q)
        })
        .or(payload.totals.total_performance);

    let oee = production_weighted_mean(
        payload
            .models
            .iter()
            .filter_map(|m| m.oee.map(|oee| (oee, m.processed()))),
    )
    .or_else(|| {
        production_weighted_mean(
            payload
                .hourly
                .iter()
                .filter_map(|h| h.oee.map(|oee| (oee, h.processed()))),
        )
    })
    .or(payload.totals.total_oee);

    UnitMetrics {
        success_qty,
        fail_qty,
        total_qty,
        quality: ratio(success_qty as f64, success_qty.saturating_add(fail_qty) as f64),
        performance,
        oee,
        models: payload
            .models
            .iter()
            .map(|m| model_metrics(m, operating_seconds))
            .collect(),
        hourly: payload.hourly.iter().map(hour_metrics).collect(),
    }
}

/// Combines independently computed units. Performance is the mean of unit
/// performances, never re-derived from pooled totals.
pub fn cross_unit_metrics<'a>(units: impl IntoIterator<Item = &'a UnitMetrics>) -> CrossUnitMetrics {
    let units: Vec<&UnitMetrics> = units.into_iter().collect();
    let success_qty = units.iter().map(|u| u.success_qty).fold(0, u64::saturating_add);
    let fail_qty = units.iter().map(|u| u.fail_qty).fold(0, u64::saturating_add);

    CrossUnitMetrics {
        units_reporting: units.iter().filter(|u| u.processed() > 0 || u.total_qty > 0).count(),
        success_qty,
        fail_qty,
        quality: ratio(success_qty as f64, success_qty.saturating_add(fail_qty) as f64),
        performance: mean(units.iter().filter_map(|u| u.performance)),
        oee: production_weighted_mean(
            units
                .iter()
                .filter_map(|u| u.oee.map(|oee| (oee, u.processed()))),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::production::UnitTotals;

    fn record(model: &str, target: Option<f64>, success: u64, fail: u64) -> ModelRecord {
        ModelRecord::new(model, target, success, fail, success)
    }

    #[test]
    fn test_quality_split_and_merge_agree() {
        let split = [record("A", None, 10, 0), record("B", None, 0, 10)];
        let merged = [record("A", None, 10, 10)];
        assert_eq!(quality(&split), 0.5);
        assert_eq!(quality(&merged), 0.5);

        let reversed = [record("B", None, 0, 10), record("A", None, 10, 0)];
        assert_eq!(quality(&reversed), quality(&split));
    }

    #[test]
    fn test_quality_is_production_weighted() {
        // 90/100 and 1/2: weighted 91/102, a simple average would be 0.7
        let records = [record("big", None, 90, 10), record("small", None, 1, 1)];
        let q = quality(&records);
        assert!((q - 91.0 / 102.0).abs() < 1e-12);
        assert!((q - 0.7).abs() > 0.1);
    }

    #[test]
    fn test_quality_zero_denominator() {
        assert_eq!(quality(&[record("A", None, 0, 0)]), 0.0);
        assert_eq!(quality(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_quality_uses_success_plus_fail_not_total() {
        // producer broke total == success + fail
        let r = ModelRecord::new("A", Some(60.0), 8, 2, 5);
        assert_eq!(quality(std::iter::once(&r)), 0.8);
        assert_eq!(r.theoretical_seconds(), Some(300.0));
    }

    #[test]
    fn test_scenario_two_models_performance() {
        let records = [
            ModelRecord::new("A", Some(60.0), 120, 0, 120),
            ModelRecord::new("B", Some(30.0), 30, 0, 30),
        ];
        assert_eq!(theoretical_seconds(&records), Some(10800.0));
        assert_eq!(performance(&records, 3600.0), Some(3.0));
    }

    #[test]
    fn test_models_without_target_are_excluded_not_zeroed() {
        let with = [ModelRecord::new("A", Some(60.0), 60, 0, 60)];
        let mixed = [
            ModelRecord::new("A", Some(60.0), 60, 0, 60),
            ModelRecord::new("B", None, 500, 0, 500),
            ModelRecord::new("C", Some(0.0), 500, 0, 500),
        ];
        assert_eq!(performance(&with, 3600.0), performance(&mixed, 3600.0));
    }

    #[test]
    fn test_no_target_is_distinct_from_zero() {
        let none = [ModelRecord::new("A", None, 10, 0, 10)];
        assert_eq!(performance(&none, 3600.0), None);

        let idle = [ModelRecord::new("A", Some(60.0), 0, 0, 0)];
        assert_eq!(performance(&idle, 3600.0), Some(0.0));

        let no_time = [ModelRecord::new("A", Some(60.0), 10, 0, 10)];
        assert_eq!(performance(&no_time, 0.0), Some(0.0));
    }

    #[test]
    fn test_unit_metrics_from_models() {
        let payload = MetricsPayload::from_models(vec![
            ModelRecord::new("A", Some(60.0), 50, 10, 50).with_oee(Some(0.8)),
            ModelRecord::new("B", None, 10, 30, 10).with_oee(Some(0.2)),
        ]);
        let unit = unit_metrics(&payload, 3600.0);

        assert_eq!(unit.success_qty, 60);
        assert_eq!(unit.fail_qty, 40);
        assert_eq!(unit.total_qty, 60);
        assert_eq!(unit.quality, 0.6);
        assert_eq!(unit.performance, Some(50.0 * 60.0 / 3600.0));
        // weights 60 and 40
        assert!((unit.oee.unwrap() - 0.56).abs() < 1e-12);
        assert_eq!(unit.models.len(), 2);
        assert_eq!(unit.models[1].performance, None);
        assert_eq!(unit.models[1].quality, 0.25);
    }

    #[test]
    fn test_unit_metrics_hourly_payload() {
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap();
        let payload = MetricsPayload {
            hourly: vec![HourBucket {
                hour_start: start,
                hour_end: start + chrono::Duration::hours(1),
                success_qty: 40,
                fail_qty: 10,
                total_qty: 40,
                performance: None,
                oee: Some(0.7),
                theoretical_qty: Some(80.0),
            }],
            totals: UnitTotals {
                total_success: Some(40),
                total_fail: Some(10),
                total_theoretical_qty: Some(80.0),
                ..UnitTotals::default()
            },
            ..MetricsPayload::default()
        };
        let unit = unit_metrics(&payload, 3600.0);

        assert_eq!(unit.quality, 0.8);
        assert_eq!(unit.performance, Some(0.5));
        assert_eq!(unit.oee, Some(0.7));
        assert_eq!(unit.hourly[0].quality, 0.8);
        assert_eq!(unit.hourly[0].performance, Some(0.5));
    }

    #[test]
    fn test_unit_metrics_empty_payload() {
        let unit = unit_metrics(&MetricsPayload::empty(), 3600.0);
        assert_eq!(unit.quality, 0.0);
        assert_eq!(unit.performance, None);
        assert_eq!(unit.oee, None);
    }

    #[test]
    fn test_cross_unit_performance_is_mean_of_units() {
        // A: 1.0 from a fast target; B: 0.5 from a slow one. Pooling would weight A by volume.
        let a = unit_metrics(
            &MetricsPayload::from_models(vec![ModelRecord::new("A", Some(100.0), 100, 0, 100)]),
            3600.0,
        );
        let b = unit_metrics(
            &MetricsPayload::from_models(vec![ModelRecord::new("B", Some(10.0), 5, 0, 5)]),
            3600.0,
        );
        let idle = unit_metrics(&MetricsPayload::empty(), 3600.0);

        let all = cross_unit_metrics([&a, &b, &idle]);
        assert_eq!(all.performance, Some(0.75));
        assert_eq!(all.success_qty, 105);
        assert_eq!(all.units_reporting, 2);
    }

    #[test]
    fn test_cross_unit_quality_and_oee_are_weighted() {
        let a = UnitMetrics {
            success_qty: 90,
            fail_qty: 10,
            oee: Some(0.9),
            ..UnitMetrics::default()
        };
        let b = UnitMetrics {
            success_qty: 0,
            fail_qty: 100,
            oee: Some(0.1),
            ..UnitMetrics::default()
        };
        let all = cross_unit_metrics([&b, &a]);
        assert_eq!(all.quality, 0.45);
        assert!((all.oee.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(all.performance, None);
    }

    #[test]
    fn test_sums_saturate_instead_of_overflowing() {
        let huge = [record("A", None, u64::MAX, u64::MAX), record("B", None, u64::MAX, 1)];
        assert_eq!(quality(&huge), 1.0);

        let unit = unit_metrics(&MetricsPayload::from_models(huge.to_vec()), 3600.0);
        assert_eq!(unit.success_qty, u64::MAX);
        assert_eq!(unit.processed(), u64::MAX);

        let all = cross_unit_metrics([&unit, &unit]);
        assert_eq!(all.success_qty, u64::MAX);
        assert!(all.quality.is_finite());
    }

    #[test]
    fn test_weighted_mean_and_mean_edges() {
        assert_eq!(production_weighted_mean([(0.5, 0)]), None);
        assert_eq!(production_weighted_mean([(1.0, 1), (f64::NAN, 5)]), Some(1.0));
        assert_eq!(mean(std::iter::empty()), None);
        assert_eq!(mean([1.0, 2.0]), Some(1.5));
    }
}
