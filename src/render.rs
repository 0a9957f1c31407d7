use geo::algorithm::bounding_rect::BoundingRect;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::Serialize;
use serde_json::Value;
use std::f64::consts::PI;

use crate::data::{CERCLE, COMMUNE, POP_CURRENT, POP_DECLARED, REGION, UNIT_ID};
use crate::types::{BoundaryRecord, PointRecord};

// Constants for Web Mercator
const TILE_SIZE: f64 = 256.0;
const MAX_LATITUDE: f64 = 85.051_128_78;

pub const MAX_ZOOM: u8 = 18;
/// Map widget size the view is fitted to, in pixels (width, height).
pub const VIEWPORT: (f64, f64) = (1024.0, 500.0);

/// Where the map client should look for the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    /// [min_lon, min_lat, max_lon, max_lat]
    pub bounds: [f64; 4],
    /// [lat, lon]
    pub center: [f64; 2],
    pub zoom: u8,
}

impl MapView {
    /// `None` when there is nothing to show.
    pub fn from_boundaries(polygons: &[&BoundaryRecord]) -> Option<MapView> {
        let bounds = polygons
            .iter()
            .filter_map(|p| p.geometry.bounding_rect())
            .fold(None, |acc: Option<[f64; 4]>, r| {
                let [x0, y0, x1, y1] = acc.unwrap_or([r.min().x, r.min().y, r.max().x, r.max().y]);
                Some([
                    x0.min(r.min().x),
                    y0.min(r.min().y),
                    x1.max(r.max().x),
                    y1.max(r.max().y),
                ])
            })?;
        let [min_lon, min_lat, max_lon, max_lat] = bounds;
        Some(MapView {
            bounds,
            center: [(min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0],
            zoom: fit_zoom(bounds, VIEWPORT),
        })
    }
}

/// Highest zoom, capped at `MAX_ZOOM`, at which `bounds` fits `viewport`.
pub fn fit_zoom(bounds: [f64; 4], viewport: (f64, f64)) -> u8 {
    let [min_lon, min_lat, max_lon, max_lat] = bounds;
    (0..=MAX_ZOOM)
        .rev()
        .find(|&zoom| {
            let (x0, y1) = world_pixel(min_lat, min_lon, zoom);
            let (x1, y0) = world_pixel(max_lat, max_lon, zoom);
            (x1 - x0) <= viewport.0 && (y1 - y0) <= viewport.1
        })
        .unwrap_or(0)
}

// Global pixel position of a coordinate in the Web Mercator tile pyramid.
fn world_pixel(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32) * TILE_SIZE;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Polygon layer with the tooltip fields the map shows per unit.
pub fn polygon_layer(polygons: &[&BoundaryRecord]) -> FeatureCollection {
    let features = polygons
        .iter()
        .map(|p| {
            let mut properties = JsonObject::new();
            properties.insert(UNIT_ID.to_string(), Value::from(p.unit_id.clone()));
            properties.insert(POP_DECLARED.to_string(), Value::from(p.population_declared));
            properties.insert(POP_CURRENT.to_string(), Value::from(p.population_current));
            properties.insert(REGION.to_string(), Value::from(p.region.clone()));
            properties.insert(CERCLE.to_string(), Value::from(p.cercle.clone()));
            properties.insert(COMMUNE.to_string(), Value::from(p.commune.clone()));
            feature(Geometry::new(geojson::Value::from(&p.geometry)), properties)
        })
        .collect();
    collection(features)
}

/// Point layer for the concession markers.
pub fn point_layer(points: &[PointRecord]) -> FeatureCollection {
    let features = points
        .iter()
        .map(|p| {
            let mut properties = JsonObject::new();
            if let Some(male) = p.male_count {
                properties.insert("Masculin".to_string(), Value::from(male));
            }
            if let Some(female) = p.female_count {
                properties.insert("Feminin".to_string(), Value::from(female));
            }
            feature(Geometry::new(geojson::Value::from(&p.geometry())), properties)
        })
        .collect();
    collection(features)
}

fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
