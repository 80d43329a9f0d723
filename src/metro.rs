// src/metro.rs
//! County → metro roll-up through the NBER CBSA/CSA crosswalk.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::aggregate::AggregateRecord;
use crate::error::Result;
use crate::geo::{GeoPath, GeographyKey, GeographyKind, MetroType};
use crate::population::{CountyPopulation, Population};
use crate::process::record::CountyRecord;
use crate::schema::PermitRecord;

#[derive(Debug, Deserialize)]
struct CrosswalkRow {
    #[serde(rename = "fipsstatecode", deserialize_with = "csv::invalid_option")]
    fips_state: Option<u32>,
    #[serde(rename = "fipscountycode", deserialize_with = "csv::invalid_option")]
    fips_county: Option<u32>,
    #[serde(rename = "cbsatitle")]
    cbsa_title: Option<String>,
    #[serde(rename = "csatitle")]
    csa_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosswalkEntry {
    pub fips_state: u32,
    pub fips_county: u32,
    pub cbsa_title: String,
    pub csa_title: Option<String>,
}

/// County membership of every metro.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    entries: Vec<CrosswalkEntry>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Crosswalk {
    /// Rows without a CBSA title or without county codes are dropped.
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut entries = Vec::new();
        for row in rdr.deserialize::<CrosswalkRow>() {
            let row = row?;
            let (Some(fips_state), Some(fips_county), Some(cbsa_title)) =
                (row.fips_state, row.fips_county, non_empty(row.cbsa_title))
            else {
                continue;
            };
            entries.push(CrosswalkEntry {
                fips_state,
                fips_county,
                cbsa_title,
                csa_title: non_empty(row.csa_title),
            });
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening crosswalk {}", path.display()))?;
        let crosswalk = Self::from_reader(io::BufReader::new(file))
            .with_context(|| format!("parsing crosswalk {}", path.display()))?;
        info!(entries = crosswalk.len(), "crosswalk loaded");
        Ok(crosswalk)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metro name → member `(state, county)` codes.
    pub fn members(&self, metro_type: MetroType) -> BTreeMap<&str, BTreeSet<(u32, u32)>> {
        let mut out: BTreeMap<&str, BTreeSet<(u32, u32)>> = BTreeMap::new();
        for e in &self.entries {
            let name = match metro_type {
                MetroType::Msa => Some(e.cbsa_title.as_str()),
                MetroType::Csa => e.csa_title.as_deref(),
            };
            if let Some(name) = name {
                out.entry(name).or_default().insert((e.fips_state, e.fips_county));
            }
        }
        out
    }
}

pub fn metro_key(name: &str, metro_type: MetroType) -> GeographyKey {
    GeographyKey {
        id: format!("{}/{}", metro_type.as_str(), name),
        name: name.to_string(),
        kind: GeographyKind::Metro(metro_type),
        path: GeoPath::new(None, name),
        alt_name: None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetroStats {
    pub emitted: usize,
    /// In-progress metro-years missing at least one member county.
    pub suppressed_incomplete: usize,
    /// Metros none of whose counties appear in the county data.
    pub unmatched: usize,
}

#[derive(Default)]
struct Accumulator {
    permits: Option<PermitRecord>,
    populations: Vec<Population>,
    county_names: Vec<String>,
    counties: BTreeSet<(u32, u32)>,
    imputed: bool,
}

/// Sum county rows into MSA and CSA rows.
///
/// A metro row for `partial_year` is emitted only when every member county
/// reported; earlier years are summed over whatever counties are present.
#[tracing::instrument(level = "info", skip_all, fields(counties = counties.len(), partial_year = partial_year))]
pub fn aggregate_metros(
    counties: &[CountyRecord],
    population: &CountyPopulation,
    crosswalk: &Crosswalk,
    partial_year: i32,
) -> (Vec<AggregateRecord>, MetroStats) {
    let mut by_county: HashMap<(u32, u32), Vec<&CountyRecord>> = HashMap::new();
    for c in counties {
        by_county
            .entry((c.fips_state, c.fips_county))
            .or_default()
            .push(c);
    }

    let mut stats = MetroStats::default();
    let mut out = Vec::new();
    for metro_type in [MetroType::Msa, MetroType::Csa] {
        for (name, members) in crosswalk.members(metro_type) {
            let mut groups: BTreeMap<(i32, Option<u32>), Accumulator> = BTreeMap::new();
            for member in &members {
                for c in by_county.get(member).into_iter().flatten() {
                    let acc = groups
                        .entry((c.permits.year, c.permits.month))
                        .or_default();
                    acc.permits
                        .get_or_insert_with(|| PermitRecord::zero(c.permits.year, c.permits.month))
                        .absorb(&c.permits);
                    acc.populations.push(population.get(member, c.permits.year));
                    if let Some(county_name) = &c.county_name {
                        acc.county_names.push(county_name.clone());
                    }
                    acc.counties.insert(*member);
                    acc.imputed |= c.imputed;
                }
            }

            if groups.is_empty() {
                stats.unmatched += 1;
                debug!(metro = name, kind = metro_type.as_str(), "no member county observed");
                continue;
            }

            for ((year, _), acc) in groups {
                if year == partial_year && acc.counties.len() != members.len() {
                    stats.suppressed_incomplete += 1;
                    debug!(
                        metro = name,
                        observed = acc.counties.len(),
                        expected = members.len(),
                        "incomplete in-progress metro suppressed"
                    );
                    continue;
                }
                let Some(permits) = acc.permits else { continue };
                out.push(AggregateRecord {
                    key: metro_key(name, metro_type),
                    permits,
                    population: Population::sum(acc.populations),
                    imputed: Some(acc.imputed),
                    county_names: Some(acc.county_names),
                });
                stats.emitted += 1;
            }
        }
    }

    info!(
        emitted = stats.emitted,
        suppressed = stats.suppressed_incomplete,
        unmatched = stats.unmatched,
        "metros aggregated"
    );
    (out, stats)
}
