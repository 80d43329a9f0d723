// src/identity.rs
//! Cross-era place identity.
//!
//! Place rows carry a source ID whose numbering changed in 1992 and, only in
//! recent releases, a FIPS place code. Resolution works in two passes:
//!
//! 1. an exact join on `(source ID, state)` against the reference year, where
//!    every row has a FIPS code;
//! 2. a `(name, state)` fallback built from the rows resolved in pass 1, keeping
//!    only pairs that point at a single code.
//!
//! Rows that neither pass resolves are dropped and counted, never guessed.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{BpsError, Result};
use crate::geo::{state_abbr, GeoPath, GeographyKey, GeographyKind, PlaceCode};
use crate::population::{CountyPopulation, PlacePopulation, Population};
use crate::process::record::{PlaceRecord, PlaceType};
use crate::schema::PermitRecord;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Year whose rows carry both source IDs and FIPS codes.
    pub reference_year: i32,
    /// First year of the current source ID numbering.
    pub id_scheme_change_year: i32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            reference_year: 2019,
            id_scheme_change_year: 1992,
        }
    }
}

pub const NEW_YORK_FIPS: u32 = 36;
pub const NYC_PLACE_CODE: u32 = 51000;
pub const NYC_SOURCE_ID: i64 = -1000;
pub const NYC_NAME: &str = "New York City";
const NYC_ALT_NAME: &str = "Manhattan Bronx Brooklyn Queens Staten Island";

/// Borough name → FIPS county code.
pub const NYC_BOROUGHS: [(&str, u32); 5] = [
    ("Manhattan", 61),
    ("Brooklyn", 47),
    ("Bronx", 5),
    ("Queens", 81),
    ("Staten Island", 85),
];

/// FIPS place codes that stand for "no place" (unincorporated balances).
const UNMAPPED_PLACE_CODES: [u32; 2] = [0, 99990];

/// (state, stripped name, designator, display name). The suffix stripper turns
/// these into a different word entirely.
static DISPLAY_NAME_OVERRIDES: &[(u32, &str, PlaceType, &str)] = &[
    (34, "Jersey", PlaceType::City, "Jersey City"),
    (40, "Oklahoma", PlaceType::City, "Oklahoma City"),
    (49, "Salt Lake", PlaceType::City, "Salt Lake City"),
    (32, "Carson", PlaceType::City, "Carson City"),
    (20, "Kansas", PlaceType::City, "Kansas City"),
    (29, "Kansas", PlaceType::City, "Kansas City"),
    (34, "Atlantic", PlaceType::City, "Atlantic City"),
    (19, "Iowa", PlaceType::City, "Iowa City"),
    (46, "Rapid", PlaceType::City, "Rapid City"),
    (34, "Ocean", PlaceType::City, "Ocean City"),
    (24, "Ocean", PlaceType::City, "Ocean City"),
];

fn borough_county(record: &PlaceRecord) -> Option<u32> {
    if record.state_code != NEW_YORK_FIPS {
        return None;
    }
    NYC_BOROUGHS
        .iter()
        .find(|(name, _)| *name == record.place_name)
        .map(|(_, county)| *county)
}

/// One "New York City" row per (year, month), summed from the borough rows.
pub fn synthesize_nyc(places: &[PlaceRecord]) -> Vec<PlaceRecord> {
    let mut sums: BTreeMap<(i32, Option<u32>), PermitRecord> = BTreeMap::new();
    for p in places.iter().filter(|p| borough_county(p).is_some()) {
        sums.entry((p.permits.year, p.permits.month))
            .or_insert_with(|| PermitRecord::zero(p.permits.year, p.permits.month))
            .absorb(&p.permits);
    }

    sums.into_values()
        .map(|permits| PlaceRecord {
            six_digit_id: Some(NYC_SOURCE_ID),
            state_code: NEW_YORK_FIPS,
            county_code: None,
            fips_place_code: Some(NYC_PLACE_CODE),
            place_name: NYC_NAME.to_string(),
            uncleaned_place_name: NYC_NAME.to_string(),
            place_type: None,
            permits,
        })
        .collect()
}

/// Search aliases linking the city and its boroughs.
pub fn alt_name(state_code: u32, place_name: &str) -> Option<&'static str> {
    if state_code != NEW_YORK_FIPS {
        return None;
    }
    if place_name == NYC_NAME {
        Some(NYC_ALT_NAME)
    } else if NYC_BOROUGHS.iter().any(|(b, _)| *b == place_name) {
        Some(NYC_NAME)
    } else {
        None
    }
}

/// Borough population comes from the county table, under the borough's county code.
pub fn add_borough_population(places: &mut PlacePopulation, counties: &CountyPopulation) -> usize {
    let boroughs: Vec<(u32, i32, u64)> = counties
        .iter()
        .filter(|((state, county), _, _)| {
            *state == NEW_YORK_FIPS && NYC_BOROUGHS.iter().any(|(_, c)| c == county)
        })
        .map(|((_, county), year, population)| (*county, year, population))
        .collect();
    for (county, year, population) in &boroughs {
        places.set((NEW_YORK_FIPS, PlaceCode::County(*county)), *year, *population);
    }
    boroughs.len()
}

/// Source ID as joined on; older numbering gets a suffix so the two schemes never collide.
pub fn source_id(record: &PlaceRecord, config: &IdentityConfig) -> Option<String> {
    let id = record.six_digit_id?;
    Some(if record.permits.year < config.id_scheme_change_year {
        format!("{}_pre_{}", id, config.id_scheme_change_year)
    } else {
        id.to_string()
    })
}

fn reference_code(record: &PlaceRecord) -> Option<PlaceCode> {
    let code = match record.fips_place_code {
        Some(c) if !UNMAPPED_PLACE_CODES.contains(&c) => PlaceCode::Place(c),
        _ => PlaceCode::County(record.county_code?),
    };
    // boroughs share the city's place code
    if code == PlaceCode::Place(NYC_PLACE_CODE) {
        if let Some(county) = borough_county(record) {
            return Some(PlaceCode::County(county));
        }
    }
    Some(code)
}

pub type ReferenceMapping = HashMap<(String, u32), PlaceCode>;

/// `(source ID, state) → code` from the reference year's annual release.
pub fn build_reference_mapping(
    places: &[PlaceRecord],
    config: &IdentityConfig,
) -> Result<ReferenceMapping> {
    let mut mapping = ReferenceMapping::new();
    let mut uncoded = 0usize;
    for p in places
        .iter()
        .filter(|p| p.permits.year == config.reference_year && p.permits.month.is_none())
    {
        let Some(id) = source_id(p, config) else {
            uncoded += 1;
            continue;
        };
        let Some(code) = reference_code(p) else {
            uncoded += 1;
            continue;
        };
        if mapping.insert((id.clone(), p.state_code), code).is_some() {
            return Err(BpsError::Consistency(format!(
                "source id {} appears more than once for state {} in {}",
                id, p.state_code, config.reference_year
            )));
        }
    }

    if mapping.is_empty() {
        warn!(year = config.reference_year, "reference year has no place rows");
    }
    debug!(entries = mapping.len(), uncoded, "built reference mapping");
    Ok(mapping)
}

/// `(name, state) → code` from already-resolved rows; ambiguous pairs are left
/// out. Returns the mapping and the number of ambiguous pairs.
fn build_name_mapping(
    resolved: &[(PlaceRecord, PlaceCode)],
) -> (HashMap<(String, u32), PlaceCode>, usize) {
    let mut codes: HashMap<(String, u32), HashSet<PlaceCode>> = HashMap::new();
    for (p, code) in resolved {
        codes
            .entry((p.place_name.clone(), p.state_code))
            .or_default()
            .insert(*code);
    }

    let mut ambiguous = 0usize;
    let mapping = codes
        .into_iter()
        .filter_map(|(key, set)| {
            if set.len() == 1 {
                set.into_iter().next().map(|code| (key, code))
            } else {
                ambiguous += 1;
                None
            }
        })
        .collect();
    (mapping, ambiguous)
}

/// Name shown for a place: overrides first, then the bare name, qualified with
/// its designator when the same name in the same state has several designators.
pub fn display_name(name: &str, state_code: u32, place_type: Option<PlaceType>, qualify: bool) -> String {
    let Some(place_type) = place_type else {
        return name.to_string();
    };
    if let Some((.., fixed)) = DISPLAY_NAME_OVERRIDES
        .iter()
        .find(|(s, n, t, _)| *s == state_code && *n == name && *t == place_type)
    {
        return fixed.to_string();
    }
    if qualify {
        format!("{} {}", name, place_type.as_str())
    } else {
        name.to_string()
    }
}

/// `"{display}, {ST}"`, with county balances marked as unincorporated.
pub fn list_name(display: &str, state_code: u32) -> String {
    let prefix = if display.contains("County") || display.contains("Parish") {
        "Unincorporated "
    } else {
        ""
    };
    format!("{}{}, {}", prefix, display, state_label(state_code))
}

fn state_label(state_code: u32) -> String {
    state_abbr(state_code)
        .map(str::to_string)
        .unwrap_or_else(|| state_code.to_string())
}

pub fn county_key(state_code: u32, county_code: u32, county_name: &str) -> GeographyKey {
    let st = state_label(state_code);
    GeographyKey {
        id: format!("{}/{}", state_code, county_code),
        name: format!("{}, {}", county_name, st),
        kind: GeographyKind::County,
        path: GeoPath::new(Some(&st), county_name),
        alt_name: None,
    }
}

pub fn state_key(state_name: &str) -> GeographyKey {
    GeographyKey {
        id: state_name.to_string(),
        name: state_name.to_string(),
        kind: GeographyKind::State,
        path: GeoPath::new(None, state_name),
        alt_name: None,
    }
}

/// One place-year after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlace {
    pub key: GeographyKey,
    pub state_code: u32,
    pub code: PlaceCode,
    pub place_type: Option<PlaceType>,
    pub permits: PermitRecord,
    pub population: Population,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolutionStats {
    pub total_rows: usize,
    pub direct_matches: usize,
    pub fallback_matches: usize,
    pub ambiguous_names: usize,
    pub unresolved: usize,
    pub merged_duplicates: usize,
    pub with_population: usize,
    pub path_collisions: usize,
}

fn fraction(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}

impl ResolutionStats {
    pub fn direct_fraction(&self) -> f64 {
        fraction(self.direct_matches, self.total_rows)
    }

    /// Share of the rows left after the exact join that the name fallback handled.
    pub fn fallback_fraction(&self) -> f64 {
        fraction(self.fallback_matches, self.total_rows - self.direct_matches)
    }

    pub fn population_fraction(&self) -> f64 {
        fraction(
            self.with_population,
            self.direct_matches + self.fallback_matches - self.merged_duplicates,
        )
    }
}

/// Resolve every place row to a stable `(state, code)` identity and join population.
///
/// The output is unique by `(state, code, year, month)` and sorted by it.
#[tracing::instrument(level = "info", skip_all, fields(rows = places.len()))]
pub fn resolve_places(
    mut places: Vec<PlaceRecord>,
    population: &PlacePopulation,
    config: &IdentityConfig,
) -> Result<(Vec<ResolvedPlace>, ResolutionStats)> {
    // 0) the city row has to exist before the joins
    let nyc = synthesize_nyc(&places);
    debug!(rows = nyc.len(), "synthesized New York City rows");
    places.extend(nyc);

    let mut stats = ResolutionStats {
        total_rows: places.len(),
        ..Default::default()
    };

    // 1) reference mapping
    let mapping = build_reference_mapping(&places, config)?;

    // 2–3) exact join on (id, state)
    let mut resolved: Vec<(PlaceRecord, PlaceCode)> = Vec::with_capacity(places.len());
    let mut pending: Vec<PlaceRecord> = Vec::new();
    for p in places {
        let code = source_id(&p, config).and_then(|id| mapping.get(&(id, p.state_code)).copied());
        match code {
            Some(code) => resolved.push((p, code)),
            None => pending.push(p),
        }
    }
    stats.direct_matches = resolved.len();
    info!(
        "exact id join handled {:.1}% of rows",
        stats.direct_fraction() * 100.0
    );

    // 4) (name, state) fallback
    let (names, ambiguous) = build_name_mapping(&resolved);
    stats.ambiguous_names = ambiguous;
    if ambiguous > 0 {
        warn!(ambiguous, "(name, state) pairs with several codes left out of the name join");
    }
    for p in pending {
        match names.get(&(p.place_name.clone(), p.state_code)) {
            Some(code) => {
                resolved.push((p, *code));
                stats.fallback_matches += 1;
            }
            None => stats.unresolved += 1,
        }
    }
    info!(
        "name join handled {:.1}% of the remaining rows, {} rows unresolved",
        stats.fallback_fraction() * 100.0,
        stats.unresolved
    );

    // 5) one row per (state, code, year, month)
    let mut merged: BTreeMap<(u32, PlaceCode, i32, Option<u32>), PlaceRecord> = BTreeMap::new();
    for (p, code) in resolved {
        let key = (p.state_code, code, p.permits.year, p.permits.month);
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.permits.absorb(&p.permits);
                stats.merged_duplicates += 1;
            }
            None => {
                merged.insert(key, p);
            }
        }
    }
    if stats.merged_duplicates > 0 {
        warn!(
            merged = stats.merged_duplicates,
            "rows sharing a resolved key were summed"
        );
    }

    // 6) display names, taken from each place's most recent row
    let keys = place_keys(&merged, &mut stats);

    let mut out = Vec::with_capacity(merged.len());
    for ((state_code, code, year, _), p) in merged {
        let population = population.get(&(state_code, code), year);
        if population.known().is_some() {
            stats.with_population += 1;
        }
        let Some(key) = keys.get(&(state_code, code)) else {
            continue;
        };
        out.push(ResolvedPlace {
            key: key.clone(),
            state_code,
            code,
            place_type: p.place_type,
            permits: p.permits,
            population,
        });
    }
    info!(
        "{:.1}% of resolved rows have population",
        stats.population_fraction() * 100.0
    );

    Ok((out, stats))
}

fn place_keys(
    merged: &BTreeMap<(u32, PlaceCode, i32, Option<u32>), PlaceRecord>,
    stats: &mut ResolutionStats,
) -> HashMap<(u32, PlaceCode), GeographyKey> {
    // BTreeMap order puts each place's latest row last
    let mut latest: BTreeMap<(u32, PlaceCode), &PlaceRecord> = BTreeMap::new();
    for ((state_code, code, _, _), p) in merged {
        latest.insert((*state_code, *code), p);
    }

    let mut designators: HashMap<(&str, u32), BTreeSet<Option<PlaceType>>> = HashMap::new();
    for p in latest.values() {
        designators
            .entry((p.place_name.as_str(), p.state_code))
            .or_default()
            .insert(p.place_type);
    }

    let mut used_paths: HashSet<GeoPath> = HashSet::new();
    let mut keys = HashMap::with_capacity(latest.len());
    for ((state_code, code), p) in &latest {
        let qualify = designators
            .get(&(p.place_name.as_str(), *state_code))
            .map_or(false, |set| set.len() > 1);
        let shown_name = display_name(&p.place_name, *state_code, p.place_type, qualify);
        let st = state_label(*state_code);

        let mut path = GeoPath::new(Some(&st), &shown_name);
        if !used_paths.insert(path.clone()) {
            stats.path_collisions += 1;
            warn!(name = %shown_name, state = %st, code = %code, "display name already taken, adding code to path");
            path = GeoPath::new(Some(&st), &format!("{} {}", shown_name, code));
            used_paths.insert(path.clone());
        }

        keys.insert(
            (*state_code, *code),
            GeographyKey {
                id: format!("{}/{}", state_code, code),
                name: list_name(&shown_name, *state_code),
                kind: GeographyKind::Place,
                path,
                alt_name: alt_name(*state_code, &p.place_name).map(str::to_string),
            },
        );
    }
    keys
}
