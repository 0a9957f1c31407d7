use crate::cache::DatasetCache;
use crate::config::{FieldDefault, SchemaConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::{is_valid_area, Crs, GeometryKind};
use crate::source::Fetch;
use crate::types::{
    BoundaryRecord, LoadReport, PointCollection, PointRecord, FEMALE_COLUMN, LAT_COLUMN,
    LON_COLUMN, MALE_COLUMN,
};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::GeoJson;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const REGION: &str = "region";
pub const CERCLE: &str = "cercle";
pub const COMMUNE: &str = "commune";
pub const UNIT_ID: &str = "idse_new";
pub const POP_DECLARED: &str = "pop_se";
pub const POP_CURRENT: &str = "pop_se_ct";

/// Largest count accepted from a source (2^53, the last exactly representable
/// integer in an f64). Bigger values are treated as absent.
pub const MAX_COUNT: u64 = 1 << 53;

/// Normalized boundary polygons in EPSG:4326.
#[derive(Debug, Clone)]
pub struct BoundaryDataset {
    pub records: Vec<BoundaryRecord>,
    /// Property names after normalization, sorted.
    pub columns: Vec<String>,
    pub report: LoadReport,
}

/// Outcome of loading a point source.
#[derive(Debug, Clone, PartialEq)]
pub enum PointLoad {
    Loaded {
        points: PointCollection,
        report: LoadReport,
    },
    /// The source has no LAT/LON columns at all.
    NoData,
}

impl PointLoad {
    /// A session-owned copy; "no data" becomes an empty collection.
    pub fn to_collection(&self) -> PointCollection {
        match self {
            PointLoad::Loaded { points, .. } => points.clone(),
            PointLoad::NoData => PointCollection::empty(),
        }
    }
}

/// Loads and memoizes the boundary and point datasets.
pub struct Datasets {
    fetcher: Arc<dyn Fetch>,
    schema: SchemaConfig,
    boundaries: DatasetCache<BoundaryDataset>,
    points: DatasetCache<PointLoad>,
}

impl Datasets {
    pub fn new(fetcher: Arc<dyn Fetch>, schema: SchemaConfig) -> Self {
        Self {
            fetcher,
            schema,
            boundaries: DatasetCache::new(),
            points: DatasetCache::new(),
        }
    }

    pub fn load_boundaries(&self, locator: &str) -> PipelineResult<Arc<BoundaryDataset>> {
        self.boundaries.get_or_try_load(locator, || {
            info!("Loading boundaries from {}", locator);
            let bytes = self.fetcher.fetch(locator)?;
            let dataset = parse_boundaries(locator, &bytes, &self.schema)?;
            info!(
                "Loaded {} boundary records ({} dropped)",
                dataset.report.kept, dataset.report.dropped
            );
            Ok(dataset)
        })
    }

    pub fn load_points(&self, locator: &str) -> PipelineResult<Arc<PointLoad>> {
        self.points.get_or_try_load(locator, || {
            info!("Loading points from {}", locator);
            let bytes = self.fetcher.fetch(locator)?;
            let load = parse_points(locator, &bytes)?;
            match &load {
                PointLoad::Loaded { report, .. } => info!(
                    "Loaded {} points ({} rows discarded)",
                    report.kept, report.dropped
                ),
                PointLoad::NoData => info!("Point source {} has no coordinate columns", locator),
            }
            Ok(load)
        })
    }
}

pub fn parse_boundaries(
    locator: &str,
    bytes: &[u8],
    schema: &SchemaConfig,
) -> PipelineResult<BoundaryDataset> {
    let geojson = GeoJson::from_reader(bytes)
        .map_err(|e| PipelineError::unavailable(locator, format!("invalid GeoJSON: {}", e)))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(PipelineError::unavailable(
                locator,
                "GeoJSON must be a FeatureCollection",
            ))
        }
    };

    // Sources without a declared CRS are taken to be EPSG:4326 already.
    let crs = match declared_crs(collection.foreign_members.as_ref()) {
        Some(name) => Crs::parse(&name).map_err(|e| PipelineError::unavailable(locator, e))?,
        None => Crs::Wgs84,
    };

    let total = collection.features.len();
    let raw: Vec<(Option<MultiPolygon<f64>>, BTreeMap<String, Value>)> = collection
        .features
        .into_iter()
        .map(|feature| {
            let area = feature.geometry.and_then(|g| {
                let geometry: geo::Geometry<f64> = g.value.try_into().ok()?;
                areal_part(geometry)
            });
            let mut properties = normalize_properties(feature.properties, &schema.aliases);
            apply_field_defaults(&mut properties, &schema.defaults);
            (area, properties)
        })
        .collect();

    let mut columns: BTreeSet<String> = schema.defaults.keys().cloned().collect();
    for (_, properties) in &raw {
        columns.extend(properties.keys().cloned());
    }

    let records: Vec<BoundaryRecord> = raw
        .into_par_iter()
        .filter_map(|(area, properties)| {
            let area = crs.to_canonical(area?);
            if !is_valid_area(&area) {
                return None;
            }
            Some(boundary_record(area, properties))
        })
        .collect();

    let report = LoadReport {
        kept: records.len(),
        dropped: total - records.len(),
    };
    if report.dropped > 0 {
        debug!(
            "Dropped {} boundary features with missing or invalid geometry",
            report.dropped
        );
    }

    Ok(BoundaryDataset {
        records,
        columns: columns.into_iter().collect(),
        report,
    })
}

fn declared_crs(foreign: Option<&serde_json::Map<String, Value>>) -> Option<String> {
    foreign?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

// Keeps the polygonal members of a geometry, if it has any.
fn areal_part(geometry: geo::Geometry<f64>) -> Option<MultiPolygon<f64>> {
    let polygons: Vec<_> = GeometryKind::from_geometry(geometry)
        .into_iter()
        .filter_map(GeometryKind::into_area)
        .flat_map(|mp| mp.0)
        .collect();
    if polygons.is_empty() {
        None
    } else {
        Some(MultiPolygon::new(polygons))
    }
}

/// Trims and lowercases property names, then renames known aliases.
pub fn normalize_properties(
    properties: Option<serde_json::Map<String, Value>>,
    aliases: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    properties
        .into_iter()
        .flatten()
        .map(|(key, value)| {
            let key = key.trim().to_lowercase();
            let key = aliases.get(&key).cloned().unwrap_or(key);
            (key, value)
        })
        .collect()
}

/// Fills absent or null properties from the defaults table.
pub fn apply_field_defaults(
    properties: &mut BTreeMap<String, Value>,
    defaults: &BTreeMap<String, FieldDefault>,
) {
    for (field, default) in defaults {
        let missing = properties.get(field).map_or(true, Value::is_null);
        if missing {
            let value = match default {
                FieldDefault::Integer(n) => Value::from(*n),
                FieldDefault::Text(s) => Value::from(s.clone()),
            };
            properties.insert(field.clone(), value);
        }
    }
}

fn boundary_record(
    geometry: MultiPolygon<f64>,
    mut properties: BTreeMap<String, Value>,
) -> BoundaryRecord {
    let mut take_text =
        |key: &str| properties.remove(key).map(value_text).unwrap_or_default();
    let region = take_text(REGION);
    let cercle = take_text(CERCLE);
    let commune = take_text(COMMUNE);
    let unit_id = take_text(UNIT_ID);
    let population_declared = properties.remove(POP_DECLARED).map_or(0, |v| value_count(&v));
    let population_current = properties.remove(POP_CURRENT).map_or(0, |v| value_count(&v));

    BoundaryRecord {
        region,
        cercle,
        commune,
        unit_id,
        population_declared,
        population_current,
        geometry,
        attributes: properties,
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|&count| count <= MAX_COUNT)
            .or_else(|| n.as_f64().and_then(non_negative_count))
            .unwrap_or(0),
        Value::String(s) => coerce_count(s).unwrap_or(0),
        _ => 0,
    }
}

fn non_negative_count(x: f64) -> Option<u64> {
    let x = x.round();
    (x.is_finite() && x >= 0.0 && x <= MAX_COUNT as f64).then_some(x as u64)
}

fn coerce_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|x| x.is_finite())
}

pub(crate) fn coerce_count(raw: &str) -> Option<u64> {
    raw.trim().parse::<f64>().ok().and_then(non_negative_count)
}

pub fn parse_points(locator: &str, bytes: &[u8]) -> PipelineResult<PointLoad> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| PipelineError::unavailable(locator, format!("invalid CSV header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let (lat_idx, lon_idx) = match (position(LAT_COLUMN), position(LON_COLUMN)) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Ok(PointLoad::NoData),
    };
    let male_idx = position(MALE_COLUMN);
    let female_idx = position(FEMALE_COLUMN);
    let reserved = [Some(lat_idx), Some(lon_idx), male_idx, female_idx];

    let mut records = Vec::new();
    let mut dropped = 0;

    for result in rdr.records() {
        let Ok(row) = result else {
            dropped += 1;
            continue;
        };
        let latitude = row.get(lat_idx).and_then(coerce_f64);
        let longitude = row.get(lon_idx).and_then(coerce_f64);
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            dropped += 1;
            continue;
        };
        if !crate::types::valid_coordinate(latitude, longitude) {
            dropped += 1;
            continue;
        }

        let attributes = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !reserved.contains(&Some(*i)))
            .filter_map(|(i, name)| row.get(i).map(|v| (name.clone(), v.to_string())))
            .collect();

        records.push(PointRecord {
            latitude,
            longitude,
            male_count: male_idx.and_then(|i| row.get(i)).and_then(coerce_count),
            female_count: female_idx.and_then(|i| row.get(i)).and_then(coerce_count),
            attributes,
        });
    }

    let report = LoadReport {
        kept: records.len(),
        dropped,
    };
    Ok(PointLoad::Loaded {
        points: PointCollection {
            columns: headers,
            records,
        },
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, StaticFetch};
    use serde_json::json;

    fn schema() -> SchemaConfig {
        SchemaConfig::default()
    }

    #[test]
    fn boundaries_are_normalized() {
        let dataset =
            parse_boundaries("se", fixtures::BOUNDARIES_GEOJSON.as_bytes(), &schema()).unwrap();
        assert_eq!(dataset.records.len(), 3);
        let u1 = &dataset.records[0];
        assert_eq!(u1.region, "A");
        assert_eq!(u1.cercle, "X");
        assert_eq!(u1.commune, "M");
        assert_eq!(u1.unit_id, "U1");
        assert_eq!(u1.population_declared, 100);
        assert_eq!(u1.population_current, 120);
        // Trimmed, lowercased, aliased.
        assert!(dataset.columns.contains(&"region".to_string()));
        assert!(!dataset.columns.iter().any(|c| c == "lregion" || c == " LREGION"));
        assert_eq!(u1.attributes.get("source"), Some(&json!("survey")));
    }

    #[test]
    fn missing_columns_take_defaults() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "LREGION": "Kayes" },
                "geometry": fixtures::square_geometry(0.0, 0.0, 1.0)
            }]
        })
        .to_string();
        let dataset = parse_boundaries("se", body.as_bytes(), &schema()).unwrap();
        let record = &dataset.records[0];
        assert_eq!(record.region, "Kayes");
        assert_eq!(record.cercle, "");
        assert_eq!(record.unit_id, "");
        assert_eq!(record.population_declared, 0);
        assert_eq!(record.population_current, 0);
        for column in ["region", "cercle", "commune", "idse_new", "pop_se", "pop_se_ct"] {
            assert!(dataset.columns.iter().any(|c| c == column), "{}", column);
        }
    }

    #[test]
    fn field_defaults_table_fills_absent_and_null() {
        let mut properties = BTreeMap::from([
            ("region".to_string(), json!("A")),
            ("cercle".to_string(), Value::Null),
        ]);
        apply_field_defaults(&mut properties, &schema().defaults);
        assert_eq!(properties["region"], json!("A"));
        assert_eq!(properties["cercle"], json!(""));
        assert_eq!(properties["pop_se"], json!(0));
        assert_eq!(properties.len(), 6);
    }

    #[test]
    fn self_intersecting_polygon_is_dropped() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": { "idse_new": "ok1" },
                  "geometry": fixtures::square_geometry(0.0, 0.0, 1.0) },
                { "type": "Feature", "properties": { "idse_new": "bowtie" },
                  "geometry": { "type": "Polygon",
                                "coordinates": [[[0.0, 0.0], [1.0, 1.0], [1.0, 0.0],
                                                 [0.0, 1.0], [0.0, 0.0]]] } },
                { "type": "Feature", "properties": { "idse_new": "ok2" },
                  "geometry": fixtures::square_geometry(2.0, 0.0, 1.0) }
            ]
        })
        .to_string();
        let dataset = parse_boundaries("se", body.as_bytes(), &schema()).unwrap();
        assert_eq!(dataset.records.len(), 2);
        assert_eq!(dataset.report, LoadReport { kept: 2, dropped: 1 });
        let ids: Vec<_> = dataset.records.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(ids, ["ok1", "ok2"]);
    }

    #[test]
    fn overlapping_parts_and_stray_holes_are_dropped() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": { "idse_new": "overlap", "pop_se": 500 },
                  "geometry": { "type": "MultiPolygon",
                                "coordinates": [
                                    [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]],
                                    [[[1.0, 1.0], [3.0, 1.0], [3.0, 3.0], [1.0, 3.0], [1.0, 1.0]]]
                                ] } },
                { "type": "Feature", "properties": { "idse_new": "stray-hole", "pop_se": 500 },
                  "geometry": { "type": "Polygon",
                                "coordinates": [
                                    [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]],
                                    [[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 6.0], [5.0, 5.0]]
                                ] } },
                { "type": "Feature", "properties": { "idse_new": "ok", "pop_se": 10 },
                  "geometry": fixtures::square_geometry(10.0, 10.0, 1.0) }
            ]
        })
        .to_string();
        let dataset = parse_boundaries("se", body.as_bytes(), &schema()).unwrap();
        assert_eq!(dataset.report, LoadReport { kept: 1, dropped: 2 });
        assert_eq!(dataset.records[0].unit_id, "ok");
        assert_eq!(dataset.records[0].population_declared, 10);
    }

    #[test]
    fn null_and_point_geometries_are_dropped() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {}, "geometry": null },
                { "type": "Feature", "properties": {},
                  "geometry": { "type": "Point", "coordinates": [1.0, 2.0] } },
                { "type": "Feature", "properties": {},
                  "geometry": fixtures::square_geometry(0.0, 0.0, 1.0) }
            ]
        })
        .to_string();
        let dataset = parse_boundaries("se", body.as_bytes(), &schema()).unwrap();
        assert_eq!(dataset.report, LoadReport { kept: 1, dropped: 2 });
    }

    #[test]
    fn web_mercator_source_is_reprojected() {
        let body = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
            "features": [{
                "type": "Feature",
                "properties": { "idse_new": "m" },
                "geometry": fixtures::square_geometry(-900_000.0, 1_400_000.0, 20_000.0)
            }]
        })
        .to_string();
        let dataset = parse_boundaries("se", body.as_bytes(), &schema()).unwrap();
        let bounds = geo::BoundingRect::bounding_rect(&dataset.records[0].geometry).unwrap();
        assert!(bounds.min().x > -8.2 && bounds.max().x < -7.8);
        assert!(bounds.min().y > 12.3 && bounds.max().y < 12.8);
    }

    #[test]
    fn unsupported_crs_is_unavailable() {
        let body = json!({
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:32629" } },
            "features": []
        })
        .to_string();
        let err = parse_boundaries("se", body.as_bytes(), &schema()).unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable { .. }));
    }

    #[test]
    fn unparsable_source_is_unavailable() {
        let err = parse_boundaries("se", b"<html>404</html>", &schema()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DataUnavailable { ref locator, .. } if locator == "se"
        ));

        let point = json!({ "type": "Point", "coordinates": [0.0, 0.0] }).to_string();
        assert!(parse_boundaries("se", point.as_bytes(), &schema()).is_err());
    }

    #[test]
    fn points_discard_non_numeric_rows() {
        let csv = "LAT,LON,Masculin,Feminin,NOM\n\
                   12.5,-8.0,5,7,a\n\
                   abc,-8.0,1,1,b\n\
                   12.6,,1,1,c\n\
                   95.0,-8.0,1,1,d\n\
                   \" 12.7 \",-8.1,5.0,,e\n";
        let PointLoad::Loaded { points, report } = parse_points("pts", csv.as_bytes()).unwrap()
        else {
            panic!("expected points");
        };
        assert_eq!(report, LoadReport { kept: 2, dropped: 3 });
        assert_eq!(points.columns, ["LAT", "LON", "Masculin", "Feminin", "NOM"]);
        assert_eq!(points.records[0].male_count, Some(5));
        assert_eq!(points.records[0].female_count, Some(7));
        assert_eq!(points.records[0].attributes["NOM"], "a");
        assert_eq!(points.records[1].latitude, 12.7);
        assert_eq!(points.records[1].male_count, Some(5));
        assert_eq!(points.records[1].female_count, None);
    }

    #[test]
    fn oversized_counts_are_absent() {
        let csv = "LAT,LON,Masculin,Feminin\n0.5,0.5,1e300,1\n0.5,0.5,9007199254740992,2\n";
        let points = parse_points("pts", csv.as_bytes()).unwrap().to_collection();
        assert_eq!(points.records[0].male_count, None);
        assert_eq!(points.records[0].female_count, Some(1));
        assert_eq!(points.records[1].male_count, Some(MAX_COUNT));

        let huge = json!(u64::MAX);
        assert_eq!(value_count(&huge), 0);
        assert_eq!(value_count(&json!(1e300)), 0);
        assert_eq!(value_count(&json!("12")), 12);
    }

    #[test]
    fn points_without_demographics_have_none() {
        let load = parse_points("pts", b"LAT,LON\n12.5,-8.0\n").unwrap();
        let collection = load.to_collection();
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.records[0].male_count, None);
        assert!(collection.records[0].attributes.is_empty());
    }

    #[test]
    fn points_without_coordinate_columns_are_no_data() {
        let load = parse_points("pts", b"X,Y\n1,2\n").unwrap();
        assert_eq!(load, PointLoad::NoData);
        let collection = load.to_collection();
        assert!(collection.is_empty());
        assert_eq!(collection.columns, ["LAT", "LON"]);
    }

    #[test]
    fn loading_twice_fetches_once() {
        let fetch = Arc::new(StaticFetch::standard());
        let datasets = Datasets::new(fetch.clone(), schema());

        let first = datasets.load_boundaries(fixtures::BOUNDARIES_URI).unwrap();
        let second = datasets.load_boundaries(fixtures::BOUNDARIES_URI).unwrap();
        assert_eq!(first.records.len(), second.records.len());
        assert_eq!(first.columns, second.columns);
        assert!(Arc::ptr_eq(&first, &second));

        let p1 = datasets.load_points(fixtures::POINTS_URI).unwrap();
        let p2 = datasets.load_points(fixtures::POINTS_URI).unwrap();
        assert_eq!(p1, p2);

        assert_eq!(fetch.calls(), 2);
    }

    #[test]
    fn unreachable_source_fails_and_is_retried() {
        let fetch = Arc::new(StaticFetch::standard());
        let datasets = Datasets::new(fetch.clone(), schema());
        assert!(datasets.load_boundaries("https://offline.invalid/SE.geojson").is_err());
        assert!(datasets.load_boundaries("https://offline.invalid/SE.geojson").is_err());
        assert_eq!(fetch.calls(), 2);
    }
}
