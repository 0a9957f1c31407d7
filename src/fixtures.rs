//! Shared test data: a small boundary set, a concession CSV and an in-memory
//! fetcher that counts how often it is hit.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{PipelineError, PipelineResult};
use crate::source::Fetch;

pub const BOUNDARIES_URI: &str = "https://example.org/data/SE.geojson";
pub const POINTS_URI: &str = "https://example.org/data/concession.csv";

// U1 and U2 share the edge x = 1. U3 sits far away under another region.
pub const BOUNDARIES_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    { "type": "Feature",
      "properties": { " LREGION ": "A", "LCERCLE": "X", "lcommune": "M", "IDSE_NEW": "U1",
                      "POP_SE": 100, "pop_se_ct": 120, "Source": "survey" },
      "geometry": { "type": "Polygon",
                    "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]] } },
    { "type": "Feature",
      "properties": { " LREGION ": "A", "LCERCLE": "X", "lcommune": "M", "IDSE_NEW": "U2",
                      "POP_SE": 50, "pop_se_ct": "60", "Source": "survey" },
      "geometry": { "type": "Polygon",
                    "coordinates": [[[1,0],[2,0],[2,1],[1,1],[1,0]]] } },
    { "type": "Feature",
      "properties": { " LREGION ": "B", "LCERCLE": "Y", "lcommune": "N", "IDSE_NEW": 3,
                      "POP_SE": 30, "pop_se_ct": 35, "Source": "census" },
      "geometry": { "type": "MultiPolygon",
                    "coordinates": [[[[10,10],[11,10],[11,11],[10,11],[10,10]]]] } }
  ]
}"#;

pub const POINTS_CSV: &str = "LAT,LON,Masculin,Feminin,NOM\n\
0.5,0.5,5,7,inside-u1\n\
0.5,1.0,1,2,shared-edge\n\
10.5,10.5,3,4,inside-u3\n\
50.0,50.0,9,9,nowhere\n\
x,y,1,1,broken\n";

pub fn square_geometry(x0: f64, y0: f64, size: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]
        ]]
    })
}

/// In-memory `Fetch` that serves fixed bodies and counts requests.
pub struct StaticFetch {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl StaticFetch {
    pub fn new(bodies: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn standard() -> Self {
        Self::new([
            (BOUNDARIES_URI.to_string(), BOUNDARIES_GEOJSON.as_bytes().to_vec()),
            (POINTS_URI.to_string(), POINTS_CSV.as_bytes().to_vec()),
        ])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetch for StaticFetch {
    fn fetch(&self, locator: &str) -> PipelineResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .get(locator)
            .cloned()
            .ok_or_else(|| PipelineError::unavailable(locator, "connection refused"))
    }
}

pub fn boundaries() -> Vec<crate::types::BoundaryRecord> {
    crate::data::parse_boundaries(
        BOUNDARIES_URI,
        BOUNDARIES_GEOJSON.as_bytes(),
        &crate::config::SchemaConfig::default(),
    )
    .expect("fixture boundaries parse")
    .records
}

pub fn points() -> crate::types::PointCollection {
    crate::data::parse_points(POINTS_URI, POINTS_CSV.as_bytes())
        .expect("fixture points parse")
        .to_collection()
}
