//! Filter → join → aggregate for one selection request.

use std::collections::BTreeMap;
use tracing::debug;

use crate::filter::{resolve, Cascade, SelectionRequest};
use crate::join::{join, JoinOptions, JoinedSet};
use crate::processing::{
    chart_rows, population_summary, totals, ChartRow, DemographicTotals, PopulationSummary,
};
use crate::render::MapView;
use crate::types::{BoundaryRecord, PointCollection};

#[derive(Debug, Clone)]
pub struct SelectionReport<'a> {
    pub cascade: Cascade<'a>,
    pub joined: JoinedSet,
    pub totals: DemographicTotals,
    pub population: PopulationSummary,
    pub chart: Vec<ChartRow>,
    pub view: Option<MapView>,
}

impl SelectionReport<'_> {
    /// No polygon survived the cascade; the presentation layer shows "no data".
    pub fn is_empty(&self) -> bool {
        self.cascade.is_empty()
    }
}

pub fn run<'a>(
    boundaries: &'a [BoundaryRecord],
    points: &PointCollection,
    request: &SelectionRequest,
    options: JoinOptions,
    labels: &BTreeMap<String, String>,
) -> SelectionReport<'a> {
    let cascade = resolve(boundaries, request);
    let joined = join(points, &cascade.records, options);
    debug!(
        "Selection {:?}: {} polygons, {} joined points",
        cascade.selection,
        cascade.records.len(),
        joined.len()
    );

    SelectionReport {
        totals: totals(&joined),
        population: population_summary(&cascade.records),
        chart: chart_rows(&cascade.records, labels),
        view: MapView::from_boundaries(&cascade.records),
        joined,
        cascade,
    }
}
