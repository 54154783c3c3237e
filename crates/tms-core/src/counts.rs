use crate::stream_ipc::FrameEvent;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Vehicle classes the detector reports, in display order.
pub const VEHICLE_TYPES: [&str; 5] = ["car", "truck", "bus", "motorcycle", "bicycle"];

/// Violation classes the detector reports, in display order.
pub const VIOLATION_TYPES: [&str; 6] = [
    "speeding",
    "red_light",
    "wrong_way",
    "illegal_parking",
    "no_helmet",
    "unauthorized_person",
];

pub type CountMap = BTreeMap<String, u64>;

/// Absolute counts from the most recent frame update plus derived totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsSnapshot {
    pub vehicles: CountMap,
    pub violations: CountMap,
    pub total_vehicles: u64,
    pub total_violations: u64,
}

impl CountsSnapshot {
    pub fn from_counts(vehicles: CountMap, violations: CountMap) -> Self {
        let total_vehicles = sum_counts(&vehicles);
        let total_violations = sum_counts(&violations);
        Self {
            vehicles,
            violations,
            total_vehicles,
            total_violations,
        }
    }

    pub fn vehicle(&self, kind: &str) -> u64 {
        self.vehicles.get(kind).copied().unwrap_or(0)
    }

    pub fn violation(&self, kind: &str) -> u64 {
        self.violations.get(kind).copied().unwrap_or(0)
    }

    /// Known vehicle types first (zero when unseen), then any extra keys the server sent.
    pub fn vehicle_rows(&self) -> Vec<(String, u64)> {
        display_rows(&VEHICLE_TYPES, &self.vehicles)
    }

    pub fn violation_rows(&self) -> Vec<(String, u64)> {
        display_rows(&VIOLATION_TYPES, &self.violations)
    }
}

fn sum_counts(counts: &CountMap) -> u64 {
    counts
        .values()
        .copied()
        .fold(0u64, |total, value| total.saturating_add(value))
}

fn display_rows(known: &[&str], counts: &CountMap) -> Vec<(String, u64)> {
    let mut rows: Vec<(String, u64)> = known
        .iter()
        .map(|kind| (kind.to_string(), counts.get(*kind).copied().unwrap_or(0)))
        .collect();
    rows.extend(
        counts
            .iter()
            .filter(|(kind, _)| !known.contains(&kind.as_str()))
            .map(|(kind, value)| (kind.clone(), *value)),
    );
    rows
}

/// Folds frame updates into the snapshot shown on the dashboard.
///
/// Every update carries absolute counts, so `apply` replaces the previous
/// snapshot instead of merging into it.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    current: CountsSnapshot,
    applied: u64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &FrameEvent) -> &CountsSnapshot {
        self.current = CountsSnapshot::from_counts(
            event.vehicle_counts.clone(),
            event.violation_counts.clone(),
        );
        self.applied = self.applied.saturating_add(1);
        &self.current
    }

    /// Edge-triggered: true for every snapshot that carries at least one violation.
    pub fn should_alert(snapshot: &CountsSnapshot) -> bool {
        snapshot.total_violations > 0
    }

    pub fn snapshot(&self) -> &CountsSnapshot {
        &self.current
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }
}

/// Reads a count mapping, treating anything that is not a non-negative number as 0.
pub fn counts_from_value(value: &Value) -> CountMap {
    let Value::Object(map) = value else {
        return CountMap::new();
    };
    map.iter()
        .map(|(kind, raw)| (kind.clone(), count_value(raw)))
        .collect()
}

fn count_value(raw: &Value) -> u64 {
    match raw {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|value| {
                        *value >= 0.0 && *value <= u64::MAX as f64 && value.fract() == 0.0
                    })
                    .map(|value| value as u64)
            })
            .unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn deserialize_counts<'de, D>(deserializer: D) -> Result<CountMap, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(counts_from_value).unwrap_or_default())
}
