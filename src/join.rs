use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::algorithm::intersects::Intersects;
use geo::{MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::data::{CERCLE, COMMUNE, POP_CURRENT, POP_DECLARED, REGION, UNIT_ID};
use crate::types::{BoundaryRecord, PointCollection, PointRecord};

/// Columns a previous join leaves behind; they are never carried into a new join.
pub const JOIN_KEY_COLUMNS: [&str; 2] = ["index_left", "index_right"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPredicate {
    /// Inside the polygon or on its boundary.
    #[default]
    Intersects,
    /// Strictly inside the polygon.
    Within,
}

impl JoinPredicate {
    fn matches(self, area: &MultiPolygon<f64>, point: &Point<f64>) -> bool {
        match self {
            JoinPredicate::Intersects => area.intersects(point),
            JoinPredicate::Within => area.contains(point),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinOptions {
    pub predicate: JoinPredicate,
    /// Keep only the first matching polygon per point.
    pub deduplicate: bool,
}

/// A point paired with one polygon it matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRecord {
    pub point: PointRecord,
    /// Position of the matched polygon in the joined polygon set.
    pub index_right: usize,
    pub region: String,
    pub cercle: String,
    pub commune: String,
    pub unit_id: String,
    pub population_declared: u64,
    pub population_current: u64,
    pub polygon_attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct JoinedSet {
    pub columns: Vec<String>,
    pub records: Vec<JoinedRecord>,
}

impl JoinedSet {
    fn empty(points: &PointCollection) -> Self {
        Self {
            columns: points.columns.clone(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// Bounding box of one polygon, pointing back at its position in the input.
struct PolygonEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Pairs every point with each polygon it satisfies `options.predicate`
/// against, in point order then polygon order. An R-tree over polygon
/// bounding boxes only narrows the candidates; membership is exact.
pub fn join(
    points: &PointCollection,
    polygons: &[&BoundaryRecord],
    options: JoinOptions,
) -> JoinedSet {
    if points.is_empty() || polygons.is_empty() {
        return JoinedSet::empty(points);
    }

    let envelopes: Vec<PolygonEnvelope> = polygons
        .iter()
        .enumerate()
        .filter_map(|(index, polygon)| {
            let rect = polygon.geometry.bounding_rect()?;
            Some(PolygonEnvelope {
                index,
                aabb: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            })
        })
        .collect();
    let tree = RTree::bulk_load(envelopes);

    let attributes: Vec<BTreeMap<String, Value>> = polygons
        .iter()
        .map(|polygon| without_join_keys(&polygon.attributes))
        .collect();

    let mut records = Vec::new();
    for point in &points.records {
        let geometry = point.geometry();
        let mut hits: Vec<usize> = tree
            .locate_in_envelope_intersecting(&AABB::from_point([geometry.x(), geometry.y()]))
            .map(|candidate| candidate.index)
            .filter(|&i| options.predicate.matches(&polygons[i].geometry, &geometry))
            .collect();
        hits.sort_unstable();
        if options.deduplicate {
            hits.truncate(1);
        }

        for i in hits {
            let polygon = polygons[i];
            records.push(JoinedRecord {
                point: point.clone(),
                index_right: i,
                region: polygon.region.clone(),
                cercle: polygon.cercle.clone(),
                commune: polygon.commune.clone(),
                unit_id: polygon.unit_id.clone(),
                population_declared: polygon.population_declared,
                population_current: polygon.population_current,
                polygon_attributes: attributes[i].clone(),
            });
        }
    }

    if records.is_empty() {
        return JoinedSet::empty(points);
    }
    JoinedSet {
        columns: joined_columns(points, &attributes),
        records,
    }
}

fn without_join_keys(attributes: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .filter(|(key, _)| !JOIN_KEY_COLUMNS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

// Point columns, then index_right, then polygon columns; a polygon column
// that clashes with a point column gets a `_right` suffix.
fn joined_columns(
    points: &PointCollection,
    attributes: &[BTreeMap<String, Value>],
) -> Vec<String> {
    let fixed = [REGION, CERCLE, COMMUNE, UNIT_ID, POP_DECLARED, POP_CURRENT];
    let polygon_columns: BTreeSet<&str> = fixed
        .into_iter()
        .chain(attributes.iter().flat_map(|a| a.keys().map(String::as_str)))
        .collect();

    let mut columns = points.columns.clone();
    columns.push("index_right".to_string());
    for column in polygon_columns {
        if points.columns.iter().any(|c| c == column) {
            columns.push(format!("{}_right", column));
        } else {
            columns.push(column.to_string());
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn all(records: &[BoundaryRecord]) -> Vec<&BoundaryRecord> {
        records.iter().collect()
    }

    #[test]
    fn empty_points_give_empty_set_with_point_columns() {
        let boundaries = fixtures::boundaries();
        let mut points = fixtures::points();
        points.records.clear();

        let joined = join(&points, &all(&boundaries), JoinOptions::default());
        assert!(joined.is_empty());
        assert_eq!(joined.len(), 0);
        assert_eq!(joined.columns, points.columns);
    }

    #[test]
    fn empty_polygons_give_empty_set() {
        let points = fixtures::points();
        let joined = join(&points, &[], JoinOptions::default());
        assert!(joined.is_empty());
        assert_eq!(joined.columns, points.columns);
    }

    #[test]
    fn no_match_gives_empty_set() {
        let boundaries = fixtures::boundaries();
        let mut points = PointCollection::empty();
        points.append(-45.0, 100.0).unwrap();
        let joined = join(&points, &all(&boundaries), JoinOptions::default());
        assert!(joined.is_empty());
        assert_eq!(joined.columns, ["LAT", "LON"]);
    }

    #[test]
    fn shared_edge_matches_both_polygons() {
        let boundaries = fixtures::boundaries();
        let points = fixtures::points();
        let joined = join(&points, &all(&boundaries), JoinOptions::default());

        let names: Vec<(&str, &str)> = joined
            .records
            .iter()
            .map(|r| (r.point.attributes["NOM"].as_str(), r.unit_id.as_str()))
            .collect();
        assert_eq!(
            names,
            [
                ("inside-u1", "U1"),
                ("shared-edge", "U1"),
                ("shared-edge", "U2"),
                ("inside-u3", "3"),
            ]
        );
    }

    #[test]
    fn within_excludes_boundary_points() {
        let boundaries = fixtures::boundaries();
        let points = fixtures::points();
        let options = JoinOptions {
            predicate: JoinPredicate::Within,
            deduplicate: false,
        };
        let joined = join(&points, &all(&boundaries), options);
        assert_eq!(joined.len(), 2);
        assert!(joined
            .records
            .iter()
            .all(|r| r.point.attributes["NOM"] != "shared-edge"));
    }

    #[test]
    fn deduplicate_keeps_first_match() {
        let boundaries = fixtures::boundaries();
        let points = fixtures::points();
        let options = JoinOptions {
            predicate: JoinPredicate::Intersects,
            deduplicate: true,
        };
        let joined = join(&points, &all(&boundaries), options);
        assert_eq!(joined.len(), 3);
        let shared: Vec<_> = joined
            .records
            .iter()
            .filter(|r| r.point.attributes["NOM"] == "shared-edge")
            .collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].unit_id, "U1");
    }

    #[test]
    fn leftover_join_keys_are_dropped() {
        let mut boundaries = fixtures::boundaries();
        boundaries[0]
            .attributes
            .insert("index_right".to_string(), Value::from(7));
        boundaries[0]
            .attributes
            .insert("index_left".to_string(), Value::from(3));
        let before = boundaries.clone();
        let points = fixtures::points();

        let joined = join(&points, &all(&boundaries), JoinOptions::default());
        assert_eq!(joined.columns.iter().filter(|c| *c == "index_right").count(), 1);
        assert!(!joined.columns.iter().any(|c| c == "index_left"));
        assert!(joined
            .records
            .iter()
            .all(|r| !r.polygon_attributes.contains_key("index_right")));
        assert_eq!(joined.records[0].index_right, 0);
        assert_eq!(boundaries, before);
    }

    #[test]
    fn columns_combine_both_sides() {
        let boundaries = fixtures::boundaries();
        let points = fixtures::points();
        let joined = join(&points, &all(&boundaries), JoinOptions::default());
        assert_eq!(
            &joined.columns[..6],
            ["LAT", "LON", "Masculin", "Feminin", "NOM", "index_right"]
        );
        for column in ["region", "idse_new", "pop_se", "pop_se_ct", "source"] {
            assert!(joined.columns.iter().any(|c| c == column), "{}", column);
        }
    }

    #[test]
    fn inputs_are_not_mutated() {
        let boundaries = fixtures::boundaries();
        let points = fixtures::points();
        let (b0, p0) = (boundaries.clone(), points.clone());
        let _ = join(&points, &all(&boundaries), JoinOptions::default());
        assert_eq!(boundaries, b0);
        assert_eq!(points, p0);
    }

    #[test]
    fn appended_point_joins_exactly_once() {
        let boundaries = fixtures::boundaries();
        let u3: Vec<&BoundaryRecord> = boundaries.iter().filter(|b| b.unit_id == "3").collect();
        let mut points = fixtures::points();
        points.append(10.25, 10.75).unwrap();

        let joined = join(&points, &u3, JoinOptions::default());
        let appended: Vec<_> = joined
            .records
            .iter()
            .filter(|r| r.point.latitude == 10.25 && r.point.longitude == 10.75)
            .collect();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].unit_id, "3");
    }

    #[test]
    fn index_matches_naive_scan() {
        let boundaries = fixtures::boundaries();
        let polygons = all(&boundaries);
        let mut points = PointCollection::empty();
        for i in 0..=24 {
            for j in 0..=24 {
                points.append(i as f64 * 0.5 - 0.5, j as f64 * 0.5 - 0.5).unwrap();
            }
        }

        let joined = join(&points, &polygons, JoinOptions::default());
        let mut naive = Vec::new();
        for (pi, point) in points.records.iter().enumerate() {
            for (bi, polygon) in polygons.iter().enumerate() {
                if polygon.geometry.intersects(&point.geometry()) {
                    naive.push((pi, bi));
                }
            }
        }
        assert_eq!(joined.len(), naive.len());
        let indexed: Vec<usize> = joined.records.iter().map(|r| r.index_right).collect();
        let expected: Vec<usize> = naive.iter().map(|(_, bi)| *bi).collect();
        assert_eq!(indexed, expected);
    }
}
