use geo::{MultiPolygon, Point};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{PipelineError, PipelineResult};

/// One administrative unit polygon with its hierarchy keys.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    pub region: String,
    pub cercle: String,
    pub commune: String,
    pub unit_id: String, // idse_new
    pub population_declared: u64, // pop_se
    pub population_current: u64,  // pop_se_ct
    pub geometry: MultiPolygon<f64>,
    // Remaining normalized source properties.
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// One concession point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub male_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub female_count: Option<u64>,
    pub attributes: BTreeMap<String, String>,
}

impl PointRecord {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            male_count: None,
            female_count: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Point geometry, always derived from (longitude, latitude).
    pub fn geometry(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Counts reported by a loader for rows or features it had to drop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub kept: usize,
    pub dropped: usize,
}

pub const LAT_COLUMN: &str = "LAT";
pub const LON_COLUMN: &str = "LON";
pub const MALE_COLUMN: &str = "Masculin";
pub const FEMALE_COLUMN: &str = "Feminin";

/// Point records together with the column set of the source they came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCollection {
    pub columns: Vec<String>,
    pub records: Vec<PointRecord>,
}

impl PointCollection {
    /// The valid empty state used when the source has no coordinate columns.
    pub fn empty() -> Self {
        Self {
            columns: vec![LAT_COLUMN.to_string(), LON_COLUMN.to_string()],
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a user-placed point. Only the geographic range is checked.
    pub fn append(&mut self, latitude: f64, longitude: f64) -> PipelineResult<&PointRecord> {
        if !valid_coordinate(latitude, longitude) {
            return Err(PipelineError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        self.records.push(PointRecord::new(latitude, longitude));
        Ok(&self.records[self.records.len() - 1])
    }
}

pub fn valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}
