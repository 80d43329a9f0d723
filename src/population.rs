// src/population.rs
//! Population inputs. Each geography level is stitched from several CSV
//! sources, one per historical era.

use anyhow::{Context, Result};
use glob::glob;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::BpsError;
use crate::geo::PlaceCode;

/// Population of one geography in one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Population {
    Known(u64),
    #[default]
    Unknown,
}

impl Population {
    pub fn known(&self) -> Option<u64> {
        match self {
            Population::Known(p) => Some(*p),
            Population::Unknown => None,
        }
    }

    /// A handful of places report zero residents in some years; those divide by one.
    pub fn divisor(&self) -> Option<f64> {
        self.known().map(|p| p.max(1) as f64)
    }

    pub fn per_capita(&self, value: i64) -> Option<f64> {
        self.divisor().map(|d| value as f64 / d)
    }

    /// Sum of the known values; `Unknown` if none is known.
    pub fn sum<I: IntoIterator<Item = Population>>(items: I) -> Population {
        items
            .into_iter()
            .filter_map(|p| p.known())
            .fold(Population::Unknown, |acc, p| match acc {
                Population::Known(a) => Population::Known(a + p),
                Population::Unknown => Population::Known(p),
            })
    }
}

/// Sparse `(key, year) → population` table.
#[derive(Debug, Clone)]
pub struct PopulationTable<K> {
    values: HashMap<(K, i32), u64>,
}

impl<K> Default for PopulationTable<K> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

pub type StatePopulation = PopulationTable<String>;
pub type CountyPopulation = PopulationTable<(u32, u32)>;
pub type PlacePopulation = PopulationTable<(u32, PlaceCode)>;

impl<K: Eq + Hash + Clone + Debug> PopulationTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Insert one value. Re-inserting the same value is a no-op; a different
    /// value for an existing key means two sources disagree.
    pub fn insert(&mut self, key: K, year: i32, population: u64) -> Result<(), BpsError> {
        match self.values.get(&(key.clone(), year)) {
            Some(existing) if *existing != population => Err(BpsError::Consistency(format!(
                "population sources disagree for {:?} in {}: {} vs {}",
                key, year, existing, population
            ))),
            Some(_) => Ok(()),
            None => {
                self.values.insert((key, year), population);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &K, year: i32) -> Population {
        self.values
            .get(&(key.clone(), year))
            .map(|p| Population::Known(*p))
            .unwrap_or(Population::Unknown)
    }

    /// Combine era sources into one table.
    pub fn stitch(sources: Vec<PopulationTable<K>>) -> Result<Self, BpsError> {
        let mut out = Self::new();
        for source in sources {
            for ((key, year), population) in source.values {
                out.insert(key, year, population)?;
            }
        }
        Ok(out)
    }

    /// Copy `from_year` values into `to_year` where `to_year` has none. Used when
    /// estimates for the newest survey year are not yet published.
    pub fn carry_forward(&mut self, from_year: i32, to_year: i32) -> usize {
        let carried: Vec<(K, u64)> = self
            .values
            .iter()
            .filter(|((_, y), _)| *y == from_year)
            .filter(|((k, _), _)| !self.values.contains_key(&(k.clone(), to_year)))
            .map(|((k, _), p)| (k.clone(), *p))
            .collect();
        let n = carried.len();
        for (k, p) in carried {
            self.values.insert((k, to_year), p);
        }
        n
    }

    /// Insert or replace, for inputs that deliberately supersede another source.
    pub fn set(&mut self, key: K, year: i32, population: u64) {
        self.values.insert((key, year), population);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, i32, u64)> + '_ {
        self.values.iter().map(|((k, y), p)| (k, *y, *p))
    }

    /// Most recent year with any data.
    pub fn latest_year(&self) -> Option<i32> {
        self.values.keys().map(|(_, y)| *y).max()
    }
}

/// (region, division, member states) of the Census geographic hierarchy.
static DIVISIONS: &[(&str, &str, &[&str])] = &[
    ("Northeast", "New England", &["Connecticut", "Maine", "Massachusetts", "New Hampshire", "Rhode Island", "Vermont"]),
    ("Northeast", "Middle Atlantic", &["New Jersey", "New York", "Pennsylvania"]),
    ("Midwest", "East North Central", &["Illinois", "Indiana", "Michigan", "Ohio", "Wisconsin"]),
    ("Midwest", "West North Central", &["Iowa", "Kansas", "Minnesota", "Missouri", "Nebraska", "North Dakota", "South Dakota"]),
    ("South", "South Atlantic", &["Delaware", "Florida", "Georgia", "Maryland", "North Carolina", "South Carolina", "Virginia", "District of Columbia", "West Virginia"]),
    ("South", "East South Central", &["Alabama", "Kentucky", "Mississippi", "Tennessee"]),
    ("South", "West South Central", &["Arkansas", "Louisiana", "Oklahoma", "Texas"]),
    ("West", "Mountain", &["Arizona", "Colorado", "Idaho", "Montana", "Nevada", "New Mexico", "Utah", "Wyoming"]),
    ("West", "Pacific", &["Alaska", "California", "Hawaii", "Oregon", "Washington"]),
];

/// State releases also carry division and region rows; give them the sum of
/// their states' populations.
pub fn add_division_and_region_totals(states: &mut StatePopulation) -> Result<usize, BpsError> {
    let mut sums: HashMap<(&'static str, i32), u64> = HashMap::new();
    for (name, year, population) in states.iter() {
        let Some((region, division, _)) = DIVISIONS
            .iter()
            .find(|(_, _, members)| members.contains(&name.as_str()))
        else {
            continue;
        };
        *sums.entry((*division, year)).or_default() += population;
        *sums.entry((*region, year)).or_default() += population;
    }

    let added = sums.len();
    for ((name, year), population) in sums {
        states.insert(name.to_string(), year, population)?;
    }
    Ok(added)
}

#[derive(Debug, Deserialize)]
struct StateRow {
    state_name: String,
    year: i32,
    population: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CountyRow {
    state_code: u32,
    county_code: u32,
    year: i32,
    population: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PlaceRow {
    state_code: u32,
    place_or_county_code: String,
    year: i32,
    population: Option<u64>,
}

/// Read every `*.csv` in `dir` as one source and stitch them.
fn load_sources<R, K>(
    dir: &Path,
    to_entry: impl Fn(R) -> Option<(K, i32, u64)>,
) -> Result<PopulationTable<K>>
where
    R: DeserializeOwned,
    K: Eq + Hash + Clone + Debug,
{
    let pattern = format!("{}/*.csv", dir.display());
    let mut files: Vec<_> = glob(&pattern)
        .with_context(|| format!("invalid glob pattern {}", pattern))?
        .filter_map(|entry| match entry {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("cannot read glob entry: {}", e);
                None
            }
        })
        .collect();
    files.sort();

    if files.is_empty() {
        warn!(dir = %dir.display(), "no population sources found");
    }

    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        let mut rdr = csv::Reader::from_path(&file)
            .with_context(|| format!("opening population source {:?}", file))?;
        let mut table = PopulationTable::new();
        let mut skipped = 0usize;
        for (idx, row) in rdr.deserialize::<R>().enumerate() {
            let row = row.with_context(|| format!("parsing {:?} at record {}", file, idx))?;
            match to_entry(row) {
                Some((key, year, population)) => table
                    .insert(key, year, population)
                    .with_context(|| format!("loading {:?}", file))?,
                None => skipped += 1,
            }
        }
        debug!(file = %file.display(), rows = table.len(), skipped, "loaded population source");
        sources.push(table);
    }

    let stitched = PopulationTable::stitch(sources)
        .with_context(|| format!("stitching population sources in {}", dir.display()))?;
    info!(dir = %dir.display(), rows = stitched.len(), "population loaded");
    Ok(stitched)
}

pub fn load_state_population(dir: &Path) -> Result<StatePopulation> {
    load_sources(dir, |r: StateRow| {
        Some((r.state_name.trim().to_string(), r.year, r.population?))
    })
}

pub fn load_county_population(dir: &Path) -> Result<CountyPopulation> {
    load_sources(dir, |r: CountyRow| {
        Some(((r.state_code, r.county_code), r.year, r.population?))
    })
}

pub fn load_place_population(dir: &Path) -> Result<PlacePopulation> {
    load_sources(dir, |r: PlaceRow| {
        let code = r.place_or_county_code.parse::<PlaceCode>().ok()?;
        Some(((r.state_code, code), r.year, r.population?))
    })
}
