//! Geometry kinds, polygon validity and reprojection to the canonical CRS.
//!
//! Everything downstream of the loaders assumes geographic coordinates in
//! EPSG:4326 with `x = longitude` and `y = latitude`.

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{
    Area, BoundingRect, Contains, Coord, Geometry, Intersects, Line, LineString, MapCoords,
    MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use std::f64::consts::PI;

use crate::error::{PipelineError, PipelineResult};

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Geometry variants the pipeline distinguishes. Each variant knows how to
/// list the coordinates it contributes to an export.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryKind {
    Point(Point<f64>),
    MultiPoint(MultiPoint<f64>),
    LineString(LineString<f64>),
    MultiLineString(MultiLineString<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl GeometryKind {
    /// Splits a geometry into kinds; collections are flattened.
    pub fn from_geometry(geometry: Geometry<f64>) -> Vec<GeometryKind> {
        match geometry {
            Geometry::Point(p) => vec![GeometryKind::Point(p)],
            Geometry::MultiPoint(mp) => vec![GeometryKind::MultiPoint(mp)],
            Geometry::Line(l) => {
                vec![GeometryKind::LineString(LineString::new(vec![l.start, l.end]))]
            }
            Geometry::LineString(ls) => vec![GeometryKind::LineString(ls)],
            Geometry::MultiLineString(mls) => vec![GeometryKind::MultiLineString(mls)],
            Geometry::Polygon(p) => vec![GeometryKind::Polygon(p)],
            Geometry::MultiPolygon(mp) => vec![GeometryKind::MultiPolygon(mp)],
            Geometry::Rect(r) => vec![GeometryKind::Polygon(r.to_polygon())],
            Geometry::Triangle(t) => vec![GeometryKind::Polygon(t.to_polygon())],
            Geometry::GeometryCollection(gc) => {
                gc.into_iter().flat_map(GeometryKind::from_geometry).collect()
            }
        }
    }

    /// Coordinates in (x = lon, y = lat) order.
    pub fn coordinates(&self) -> Vec<Coord<f64>> {
        match self {
            GeometryKind::Point(p) => vec![p.0],
            GeometryKind::MultiPoint(mp) => mp.iter().map(|p| p.0).collect(),
            GeometryKind::LineString(ls) => ls.coords().copied().collect(),
            GeometryKind::MultiLineString(mls) => {
                mls.iter().flat_map(|ls| ls.coords().copied()).collect()
            }
            GeometryKind::Polygon(p) => exterior_vertices(p),
            GeometryKind::MultiPolygon(mp) => mp.iter().flat_map(exterior_vertices).collect(),
        }
    }

    /// Areal kinds become a multi-polygon; everything else is not a boundary.
    pub fn into_area(self) -> Option<MultiPolygon<f64>> {
        match self {
            GeometryKind::Polygon(p) => Some(MultiPolygon::new(vec![p])),
            GeometryKind::MultiPolygon(mp) => Some(mp),
            GeometryKind::Point(_)
            | GeometryKind::MultiPoint(_)
            | GeometryKind::LineString(_)
            | GeometryKind::MultiLineString(_) => None,
        }
    }
}

// Exterior ring without the repeated closing vertex.
fn exterior_vertices(polygon: &Polygon<f64>) -> Vec<Coord<f64>> {
    let ring = polygon.exterior();
    let mut coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.len() > 1 && ring.is_closed() {
        coords.pop();
    }
    coords
}

/// A non-empty multi-polygon whose rings are closed, finite, non-degenerate
/// and free of self-intersections, whose holes sit inside their shell
/// without crossing it or each other, and whose parts do not overlap.
pub fn is_valid_area(area: &MultiPolygon<f64>) -> bool {
    if area.0.is_empty() || !area.iter().all(valid_polygon) {
        return false;
    }
    area.0.iter().enumerate().all(|(i, a)| {
        area.0[i + 1..]
            .iter()
            .all(|b| !boxes_meet(a, b) || parts_disjoint(a, b))
    })
}

fn valid_polygon(polygon: &Polygon<f64>) -> bool {
    if polygon.unsigned_area() <= 0.0
        || !std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .all(valid_ring)
    {
        return false;
    }

    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    let holes: Vec<Polygon<f64>> = polygon
        .interiors()
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();
    holes.iter().enumerate().all(|(i, hole)| {
        !rings_cross(shell.exterior(), hole.exterior())
            && ring_samples(hole.exterior()).all(|p| shell.intersects(&p))
            && holes[i + 1..].iter().all(|other| parts_disjoint(hole, other))
    })
}

fn boxes_meet(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

// Interiors share no area: boundaries never cross or run along each other and
// neither polygon holds a sample of the other's shell strictly inside.
fn parts_disjoint(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    let crossing = std::iter::once(a.exterior()).chain(a.interiors()).any(|ra| {
        std::iter::once(b.exterior())
            .chain(b.interiors())
            .any(|rb| rings_cross(ra, rb))
    });
    !crossing
        && !ring_samples(a.exterior()).any(|p| b.contains(&p))
        && !ring_samples(b.exterior()).any(|p| a.contains(&p))
}

fn rings_cross(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    a.lines().any(|la| {
        b.lines().any(|lb| match line_intersection(la, lb) {
            None => false,
            Some(LineIntersection::SinglePoint { is_proper, .. }) => is_proper,
            Some(LineIntersection::Collinear { intersection }) => {
                intersection.start != intersection.end
            }
        })
    })
}

// Vertices and edge midpoints of a ring.
fn ring_samples(ring: &LineString<f64>) -> impl Iterator<Item = Point<f64>> + '_ {
    ring.lines()
        .flat_map(|l| [Point::from(l.start), Point::from((l.start + l.end) / 2.0)])
}

fn valid_ring(ring: &LineString<f64>) -> bool {
    if !ring.is_closed() {
        return false;
    }
    let mut coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return false;
    }
    coords.dedup();
    coords.len() >= 4 && !ring_self_intersects(&coords)
}

fn ring_self_intersects(coords: &[Coord<f64>]) -> bool {
    let segments: Vec<Line<f64>> = coords.windows(2).map(|w| Line::new(w[0], w[1])).collect();
    let n = segments.len();

    // Sweep over segments ordered by their minimum x.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| min_x(&segments[a]).total_cmp(&min_x(&segments[b])));

    for (pos, &i) in order.iter().enumerate() {
        let reach = max_x(&segments[i]);
        for &j in &order[pos + 1..] {
            if min_x(&segments[j]) > reach {
                break;
            }
            let (lo, hi) = if i < j { (i, j) } else { (j, i) };
            let adjacent = hi == lo + 1 || (lo == 0 && hi == n - 1);
            match line_intersection(segments[lo], segments[hi]) {
                None => {}
                Some(LineIntersection::SinglePoint { is_proper, .. }) => {
                    if !adjacent || is_proper {
                        return true;
                    }
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    if !adjacent || intersection.start != intersection.end {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn min_x(line: &Line<f64>) -> f64 {
    line.start.x.min(line.end.x)
}

fn max_x(line: &Line<f64>) -> f64 {
    line.start.x.max(line.end.x)
}

/// Coordinate reference systems a boundary source may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326 / OGC CRS84, the canonical reference.
    Wgs84,
    /// EPSG:3857 spherical Web Mercator, in metres.
    WebMercator,
}

impl Crs {
    /// Parses `EPSG:4326`, `urn:ogc:def:crs:EPSG::3857`, `...:CRS84` and
    /// friends.
    pub fn parse(name: &str) -> PipelineResult<Crs> {
        let code = name.trim().rsplit(':').next().unwrap_or_default().to_uppercase();
        match code.as_str() {
            "4326" | "CRS84" => Ok(Crs::Wgs84),
            "3857" | "900913" | "3785" => Ok(Crs::WebMercator),
            _ => Err(PipelineError::UnsupportedCrs(name.to_string())),
        }
    }

    pub fn to_canonical(self, area: MultiPolygon<f64>) -> MultiPolygon<f64> {
        match self {
            Crs::Wgs84 => area,
            Crs::WebMercator => area.map_coords(mercator_to_wgs84),
        }
    }
}

fn mercator_to_wgs84(c: Coord<f64>) -> Coord<f64> {
    let lon = (c.x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - PI / 2.0).to_degrees();
    Coord { x: lon, y: lat }
}
