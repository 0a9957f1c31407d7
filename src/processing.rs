use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::{coerce_count, POP_CURRENT, POP_DECLARED};
use crate::join::JoinedSet;
use crate::types::{BoundaryRecord, PointRecord, FEMALE_COLUMN, MALE_COLUMN};

/// Demographic sums over a joined point set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DemographicTotals {
    pub male: u64,
    pub female: u64,
    pub total: u64,
}

/// Declared and current population over the selected polygons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PopulationSummary {
    pub declared: u64,
    pub current: u64,
}

/// One (unit, field) cell of the long-form chart data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartRow {
    pub unit_id: String,
    pub field: String,
    pub population: u64,
}

/// Numeric value of `field` on a point; absent or non-numeric counts as zero.
pub fn field_value(point: &PointRecord, field: &str) -> u64 {
    match field {
        MALE_COLUMN => point.male_count.unwrap_or(0),
        FEMALE_COLUMN => point.female_count.unwrap_or(0),
        other => point
            .attributes
            .get(other)
            .and_then(|raw| coerce_count(raw))
            .unwrap_or(0),
    }
}

/// Sum of each requested field over the joined records. Empty input sums to
/// zero; sums saturate at `u64::MAX`.
pub fn sum_fields(joined: &JoinedSet, fields: &[&str]) -> BTreeMap<String, u64> {
    fields
        .iter()
        .map(|&field| {
            let sum = joined
                .records
                .iter()
                .map(|r| field_value(&r.point, field))
                .fold(0u64, u64::saturating_add);
            (field.to_string(), sum)
        })
        .collect()
}

pub fn totals(joined: &JoinedSet) -> DemographicTotals {
    let sums = sum_fields(joined, &[MALE_COLUMN, FEMALE_COLUMN]);
    let male = sums[MALE_COLUMN];
    let female = sums[FEMALE_COLUMN];
    DemographicTotals {
        male,
        female,
        total: male.saturating_add(female),
    }
}

pub fn population_summary(polygons: &[&BoundaryRecord]) -> PopulationSummary {
    polygons
        .iter()
        .fold(PopulationSummary::default(), |acc, p| PopulationSummary {
            declared: acc.declared.saturating_add(p.population_declared),
            current: acc.current.saturating_add(p.population_current),
        })
}

/// Reshapes the polygons from wide to long form: all declared rows first,
/// then all current rows, each labelled from `labels` (raw field name when
/// no label is configured).
pub fn chart_rows(
    polygons: &[&BoundaryRecord],
    labels: &BTreeMap<String, String>,
) -> Vec<ChartRow> {
    let fields: [(&str, fn(&BoundaryRecord) -> u64); 2] = [
        (POP_DECLARED, |p: &BoundaryRecord| p.population_declared),
        (POP_CURRENT, |p: &BoundaryRecord| p.population_current),
    ];

    fields
        .iter()
        .flat_map(|(field, value)| {
            let label = labels
                .get(*field)
                .cloned()
                .unwrap_or_else(|| field.to_string());
            polygons.iter().map(move |p| ChartRow {
                unit_id: p.unit_id.clone(),
                field: label.clone(),
                population: value(p),
            })
        })
        .collect()
}
