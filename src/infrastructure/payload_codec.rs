// Normalization of every backend response variant into one canonical payload
use crate::domain::errors::PayloadError;
use crate::domain::production::{HourBucket, MetricsPayload, ModelRecord, UnitTotals};
use crate::domain::schedule::PlantZone;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A decoded backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResponse {
    Metrics(MetricsPayload),
    /// `{ "error": ... }`: the backend answered but could not produce data.
    Failure(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Failure { error: Value },
    Hourly(WireHourly),
    Models(WireModels),
    Rows(Vec<WireModel>),
    Summary(WireTotals),
}

#[derive(Debug, Deserialize)]
struct WireHourly {
    hourly_data: Vec<WireHour>,
    #[serde(flatten)]
    totals: WireTotals,
}

#[derive(Debug, Deserialize)]
struct WireModels {
    models: Vec<WireModel>,
    #[serde(flatten)]
    totals: WireTotals,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    #[serde(default)]
    model: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    target: Option<f64>,
    #[serde(default, deserialize_with = "lenient_count")]
    success_qty: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    fail_qty: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    total_qty: u64,
    #[serde(default, deserialize_with = "lenient_number")]
    oee: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireHour {
    #[serde(default)]
    hour_start: Option<String>,
    #[serde(default)]
    hour_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    success_qty: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    fail_qty: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    total_qty: u64,
    #[serde(default, deserialize_with = "lenient_number")]
    performance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    oee: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    theoretical_qty: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WireTotals {
    #[serde(default, deserialize_with = "lenient_optional_count")]
    total_success: Option<u64>,
    #[serde(default, deserialize_with = "lenient_optional_count")]
    total_fail: Option<u64>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_theoretical_qty: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_quality: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_performance: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_oee: Option<f64>,
}

impl From<WireTotals> for UnitTotals {
    fn from(wire: WireTotals) -> Self {
        UnitTotals {
            total_success: wire.total_success,
            total_fail: wire.total_fail,
            total_theoretical_qty: wire.total_theoretical_qty,
            total_quality: wire.total_quality,
            total_performance: wire.total_performance,
            total_oee: wire.total_oee,
        }
    }
}

impl From<WireModel> for ModelRecord {
    fn from(wire: WireModel) -> Self {
        let name = wire.model.unwrap_or_else(|| "unknown".to_string());
        ModelRecord::new(
            &name,
            wire.target.filter(|t| *t > 0.0),
            wire.success_qty,
            wire.fail_qty,
            wire.total_qty,
        )
        .with_oee(wire.oee)
    }
}

/// Decodes one backend message. Plant-local timestamps without an offset are
/// read in `zone`.
pub fn decode_response(text: &str, zone: PlantZone) -> Result<BackendResponse, PayloadError> {
    let value: Value = serde_json::from_str(text).map_err(|e| PayloadError::NotJson(e.to_string()))?;
    let wire: WireResponse = serde_json::from_value(value).map_err(|_| PayloadError::UnknownShape)?;

    let payload = match wire {
        WireResponse::Failure { error } => {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Ok(BackendResponse::Failure(message));
        }
        WireResponse::Hourly(hourly) => MetricsPayload {
            models: Vec::new(),
            hourly: normalize_hours(hourly.hourly_data, zone),
            totals: hourly.totals.into(),
        },
        WireResponse::Models(wrapped) => MetricsPayload {
            models: wrapped.models.into_iter().map(ModelRecord::from).collect(),
            hourly: Vec::new(),
            totals: wrapped.totals.into(),
        },
        WireResponse::Rows(rows) => MetricsPayload::from_models(rows.into_iter().map(ModelRecord::from).collect()),
        WireResponse::Summary(totals) => {
            let totals = UnitTotals::from(totals);
            if totals == UnitTotals::default() {
                return Err(PayloadError::UnknownShape);
            }
            MetricsPayload {
                totals,
                ..MetricsPayload::default()
            }
        }
    };
    Ok(BackendResponse::Metrics(payload))
}

/// Sorted by start; buckets without parsable or increasing bounds are dropped.
fn normalize_hours(hours: Vec<WireHour>, zone: PlantZone) -> Vec<HourBucket> {
    let received = hours.len();
    let mut buckets: Vec<HourBucket> = hours
        .into_iter()
        .filter_map(|hour| {
            let start = zone.parse_instant(hour.hour_start.as_deref()?)?;
            let end = zone.parse_instant(hour.hour_end.as_deref()?)?;
            (end > start).then(|| HourBucket {
                hour_start: start,
                hour_end: end,
                success_qty: hour.success_qty,
                fail_qty: hour.fail_qty,
                total_qty: hour.total_qty,
                performance: hour.performance,
                oee: hour.oee,
                theoretical_qty: hour.theoretical_qty,
            })
        })
        .collect();

    if buckets.len() != received {
        tracing::warn!("dropped {} of {} hour buckets", received - buckets.len(), received);
    }
    buckets.sort_by_key(|b| b.hour_start);
    buckets
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Quantities above this are clamped; no unit produces four billion pieces in a window.
const MAX_COUNT: f64 = u32::MAX as f64;

fn count(value: &Value) -> Option<u64> {
    number(value).map(|n| if n > 0.0 { n.round().min(MAX_COUNT) as u64 } else { 0 })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number))
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count).unwrap_or(0))
}

fn lenient_optional_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::{cross_unit_metrics, unit_metrics};
    use chrono::{TimeZone, Utc};

    fn zone() -> PlantZone {
        PlantZone::from_offset_minutes(180).unwrap()
    }

    fn metrics(text: &str) -> MetricsPayload {
        match decode_response(text, zone()) {
            Ok(BackendResponse::Metrics(payload)) => payload,
            other => panic!("expected metrics, got {:?}", other),
        }
    }

    #[test]
    fn test_error_object() {
        assert_eq!(
            decode_response(r#"{"error": "db timeout"}"#, zone()),
            Ok(BackendResponse::Failure("db timeout".to_string()))
        );
        assert_eq!(
            decode_response(r#"{"error": {"code": 7}}"#, zone()),
            Ok(BackendResponse::Failure(r#"{"code":7}"#.to_string()))
        );
    }

    #[test]
    fn test_bare_model_array() {
        let payload = metrics(
            r#"[
                {"model": "A", "target": 60, "success_qty": 118, "fail_qty": 2, "total_qty": 120},
                {"model": "B", "target": null, "success_qty": 5, "fail_qty": 0, "total_qty": 5, "oee": null}
            ]"#,
        );
        assert_eq!(payload.models.len(), 2);
        assert_eq!(payload.models[0], ModelRecord::new("A", Some(60.0), 118, 2, 120));
        assert_eq!(payload.models[1].target, None);
    }

    #[test]
    fn test_models_wrapper_with_summary() {
        let payload = metrics(
            r#"{"models": [{"model": "A", "target": "0", "success_qty": "7", "fail_qty": 1.0, "total_qty": 8}],
                "total_success": 7, "total_fail": 1, "total_quality": 0.875, "total_performance": null}"#,
        );
        assert_eq!(payload.models[0].target, None);
        assert_eq!(payload.models[0].success_qty, 7);
        assert_eq!(payload.models[0].fail_qty, 1);
        assert_eq!(payload.totals.total_success, Some(7));
        assert_eq!(payload.totals.total_quality, Some(0.875));
        assert_eq!(payload.totals.total_performance, None);
    }

    #[test]
    fn test_hourly_payload_sorted_and_filtered() {
        let payload = metrics(
            r#"{"unit_name": "Line-A",
                "hourly_data": [
                    {"hour_start": "2026-03-10T09:00:00+03:00", "hour_end": "2026-03-10T09:40:00+03:00",
                     "success_qty": 4, "fail_qty": 0, "total_qty": 4, "quality": 1, "performance": 0, "oee": 0},
                    {"hour_start": "2026-03-10T08:00:00+03:00", "hour_end": "2026-03-10T09:00:00+03:00",
                     "success_qty": 10, "fail_qty": 2, "total_qty": 10, "theoretical_qty": 20},
                    {"hour_end": "2026-03-10T10:00:00+03:00", "success_qty": 99},
                    {"hour_start": "2026-03-10T10:00:00", "hour_end": "2026-03-10T10:00:00"}
                ],
                "total_success": 14, "total_fail": 2, "total_theoretical_qty": 20}"#,
        );
        assert_eq!(payload.hourly.len(), 2);
        assert_eq!(payload.hourly[0].hour_start, Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap());
        assert_eq!(payload.hourly[0].performance(), Some(0.5));
        assert!(payload.hourly[1].is_partial());
        assert_eq!(payload.totals.total_success, Some(14));
        assert_eq!(payload.theoretical_qty(), Some(20.0));
    }

    #[test]
    fn test_summary_only_object() {
        let payload = metrics(r#"{"total_success": 3, "total_fail": 1}"#);
        assert!(payload.models.is_empty());
        assert_eq!(payload.success(), 3);
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(decode_response("not json", zone()), Err(PayloadError::NotJson(_))));
        assert_eq!(decode_response("42", zone()), Err(PayloadError::UnknownShape));
        assert_eq!(decode_response(r#"{"status": "ok"}"#, zone()), Err(PayloadError::UnknownShape));
        assert_eq!(decode_response(r#"{"hourly_data": 3}"#, zone()), Err(PayloadError::UnknownShape));
    }

    #[test]
    fn test_absurd_quantities_are_clamped() {
        let payload = metrics(
            r#"[
                {"model": "A", "target": 60, "success_qty": 1e20, "fail_qty": 1e20, "total_qty": 1e20},
                {"model": "B", "target": 60, "success_qty": "1e20", "fail_qty": 3, "total_qty": 1e20}
            ]"#,
        );
        assert_eq!(payload.models[0].success_qty, u32::MAX as u64);
        assert_eq!(payload.models[1].fail_qty, 3);

        let unit = unit_metrics(&payload, 3600.0);
        assert_eq!(unit.success_qty, 2 * u32::MAX as u64);
        assert!(unit.quality > 0.6 && unit.quality < 0.7);

        let all = cross_unit_metrics([&unit, &unit, &unit]);
        assert_eq!(all.success_qty, 6 * u32::MAX as u64);
    }

    #[test]
    fn test_empty_array_is_empty_payload() {
        assert!(metrics("[]").is_empty());
    }
}
