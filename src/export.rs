//! CSV export of drawn or derived coordinate pairs.

use geojson::GeoJson;
use serde::Serialize;
use std::io::Write;

use crate::error::{PipelineError, PipelineResult};
use crate::geometry::GeometryKind;
use crate::types::PointRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinatePair {
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
}

impl From<&PointRecord> for CoordinatePair {
    fn from(point: &PointRecord) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

/// Coordinates of every drawn shape, in drawing order. Geometries that fail
/// to convert are skipped.
pub fn drawn_coordinates(drawn: GeoJson) -> Vec<CoordinatePair> {
    let geometries: Vec<geojson::Geometry> = match drawn {
        GeoJson::Geometry(g) => vec![g],
        GeoJson::Feature(f) => f.geometry.into_iter().collect(),
        GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .collect(),
    };

    geometries
        .into_iter()
        .filter_map(|g| geo::Geometry::<f64>::try_from(g.value).ok())
        .flat_map(GeometryKind::from_geometry)
        .flat_map(|kind| kind.coordinates())
        .map(|c| CoordinatePair {
            latitude: c.y,
            longitude: c.x,
        })
        .collect()
}

/// Writes a `Latitude,Longitude` CSV. The header is written even when there
/// are no rows.
pub fn write_csv<W: Write>(pairs: &[CoordinatePair], writer: W) -> PipelineResult<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(["Latitude", "Longitude"])?;
    for pair in pairs {
        wtr.serialize(pair)?;
    }
    wtr.flush().map_err(|e| PipelineError::Export(e.to_string()))?;
    Ok(())
}

pub fn to_csv_string(pairs: &[CoordinatePair]) -> PipelineResult<String> {
    let mut buffer = Vec::new();
    write_csv(pairs, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| PipelineError::Export(e.to_string()))
}
