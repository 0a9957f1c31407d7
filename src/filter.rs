//! Region → cercle → commune → unit cascade over the boundary set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::BoundaryRecord;

/// Label the presentation layer shows for `UnitFilter::All`.
pub const NO_FILTER: &str = "No filter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Region,
    Cercle,
    Commune,
    Unit,
}

impl Level {
    pub fn key(self, record: &BoundaryRecord) -> &str {
        match self {
            Level::Region => &record.region,
            Level::Cercle => &record.cercle,
            Level::Commune => &record.commune,
            Level::Unit => &record.unit_id,
        }
    }
}

/// Last level of the cascade: either every unit of the commune or one unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UnitFilter {
    #[default]
    All,
    Unit(String),
}

impl UnitFilter {
    /// `None` and the "No filter" label mean `All`. An empty string is a
    /// unit id: the loader gives it to units with no id.
    pub fn from_choice(choice: Option<&str>) -> Self {
        match choice {
            None | Some(NO_FILTER) => UnitFilter::All,
            Some(unit) => UnitFilter::Unit(unit.to_string()),
        }
    }

    pub fn as_choice(&self) -> &str {
        match self {
            UnitFilter::All => NO_FILTER,
            UnitFilter::Unit(unit) => unit,
        }
    }
}

impl Serialize for UnitFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_choice())
    }
}

/// Keeps the records matching every level; `UnitFilter::All` leaves the
/// commune's units untouched.
pub fn filter<'a>(
    boundaries: &'a [BoundaryRecord],
    region: &str,
    cercle: &str,
    commune: &str,
    unit: &UnitFilter,
) -> Vec<&'a BoundaryRecord> {
    let by_commune = narrow(
        narrow(narrow(boundaries.iter(), Level::Region, region), Level::Cercle, cercle),
        Level::Commune,
        commune,
    );
    match unit {
        UnitFilter::All => by_commune,
        UnitFilter::Unit(id) => narrow(by_commune, Level::Unit, id),
    }
}

fn narrow<'a>(
    records: impl IntoIterator<Item = &'a BoundaryRecord>,
    level: Level,
    value: &str,
) -> Vec<&'a BoundaryRecord> {
    records
        .into_iter()
        .filter(|r| level.key(r) == value)
        .collect()
}

/// Sorted, deduplicated values of `level` among `records`.
pub fn choices<'a>(
    records: impl IntoIterator<Item = &'a BoundaryRecord>,
    level: Level,
) -> Vec<String> {
    records
        .into_iter()
        .map(|r| level.key(r))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// What the user asked for; any level may be missing or stale.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionRequest {
    pub region: Option<String>,
    pub cercle: Option<String>,
    pub commune: Option<String>,
    pub unit: Option<String>,
}

/// A selection in which every level is valid under the level above it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Selection {
    pub region: Option<String>,
    pub cercle: Option<String>,
    pub commune: Option<String>,
    pub unit: UnitFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Choices {
    pub regions: Vec<String>,
    pub cercles: Vec<String>,
    pub communes: Vec<String>,
    pub units: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Cascade<'a> {
    pub selection: Selection,
    pub choices: Choices,
    pub records: Vec<&'a BoundaryRecord>,
}

impl Cascade<'_> {
    /// The "no data" state.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Runs the cascade, recomputing each level's choices from the records left
/// by the level above. A requested value that is not among the current
/// choices falls back to the first choice (or `All` for the unit level).
pub fn resolve<'a>(boundaries: &'a [BoundaryRecord], request: &SelectionRequest) -> Cascade<'a> {
    let regions = choices(boundaries, Level::Region);
    let region = pick(&regions, request.region.as_deref());
    let by_region = narrow_opt(boundaries.iter(), Level::Region, region.as_deref());

    let cercles = choices(by_region.iter().copied(), Level::Cercle);
    let cercle = pick(&cercles, request.cercle.as_deref());
    let by_cercle = narrow_opt(by_region, Level::Cercle, cercle.as_deref());

    let communes = choices(by_cercle.iter().copied(), Level::Commune);
    let commune = pick(&communes, request.commune.as_deref());
    let by_commune = narrow_opt(by_cercle, Level::Commune, commune.as_deref());

    let units = choices(by_commune.iter().copied(), Level::Unit);
    let unit = match UnitFilter::from_choice(request.unit.as_deref()) {
        UnitFilter::Unit(id) if units.contains(&id) => UnitFilter::Unit(id),
        _ => UnitFilter::All,
    };
    let records = match &unit {
        UnitFilter::All => by_commune,
        UnitFilter::Unit(id) => narrow(by_commune, Level::Unit, id),
    };

    Cascade {
        selection: Selection {
            region,
            cercle,
            commune,
            unit,
        },
        choices: Choices {
            regions,
            cercles,
            communes,
            units,
        },
        records,
    }
}

fn pick(choices: &[String], requested: Option<&str>) -> Option<String> {
    requested
        .and_then(|r| choices.iter().find(|c| c.as_str() == r))
        .or_else(|| choices.first())
        .cloned()
}

fn narrow_opt<'a>(
    records: impl IntoIterator<Item = &'a BoundaryRecord>,
    level: Level,
    value: Option<&str>,
) -> Vec<&'a BoundaryRecord> {
    match value {
        Some(value) => narrow(records, level, value),
        None => Vec::new(),
    }
}
