// src/aggregate.rs
//! Output rows shared by every geography level.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::GeographyKey;
use crate::identity::{county_key, state_key, ResolvedPlace};
use crate::population::{CountyPopulation, Population, StatePopulation};
use crate::process::record::{CountyRecord, StateRecord};
use crate::schema::PermitRecord;

/// One geography-year (or year-to-date snapshot) ready for output.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub key: GeographyKey,
    pub permits: PermitRecord,
    pub population: Population,
    /// Set for levels that can contain synthesised rows.
    pub imputed: Option<bool>,
    /// Member counties, for metros.
    pub county_names: Option<Vec<String>>,
}

impl AggregateRecord {
    pub fn new(key: GeographyKey, permits: PermitRecord, population: Population) -> Self {
        Self {
            key,
            permits,
            population,
            imputed: None,
            county_names: None,
        }
    }

    pub fn per_capita(&self, value: i64) -> Option<f64> {
        self.population.per_capita(value)
    }
}

pub fn place_records(places: Vec<ResolvedPlace>) -> Result<Vec<AggregateRecord>> {
    places
        .into_iter()
        .map(|p| {
            p.permits.check_totals()?;
            Ok(AggregateRecord::new(p.key, p.permits, p.population))
        })
        .collect()
}

/// County rows keyed by `(state, county, year, month)`, joined with population.
/// Counties must have harmonised names; nameless rows are skipped.
pub fn county_records(
    counties: &[CountyRecord],
    population: &CountyPopulation,
) -> Result<Vec<AggregateRecord>> {
    let mut rows: BTreeMap<(u32, u32, i32, Option<u32>), AggregateRecord> = BTreeMap::new();
    let mut nameless = 0usize;
    for c in counties {
        c.permits.check_totals()?;
        let Some(name) = &c.county_name else {
            nameless += 1;
            continue;
        };
        let key = (c.fips_state, c.fips_county, c.permits.year, c.permits.month);
        match rows.get_mut(&key) {
            Some(existing) => {
                warn!(id = %existing.key.id, year = c.permits.year, "duplicate county row summed");
                existing.permits.absorb(&c.permits);
                existing.imputed = Some(existing.imputed == Some(true) || c.imputed);
            }
            None => {
                let mut row = AggregateRecord::new(
                    county_key(c.fips_state, c.fips_county, name),
                    c.permits.clone(),
                    population.get(&(c.fips_state, c.fips_county), c.permits.year),
                );
                row.imputed = Some(c.imputed);
                rows.insert(key, row);
            }
        }
    }
    if nameless > 0 {
        warn!(nameless, "county rows without a name skipped");
    }
    debug!(rows = rows.len(), "county records");
    Ok(rows.into_values().collect())
}

/// State, division, region and national rows, joined with population by name.
pub fn state_records(
    states: &[StateRecord],
    population: &StatePopulation,
) -> Result<Vec<AggregateRecord>> {
    states
        .iter()
        .map(|s| {
            s.permits.check_totals()?;
            Ok(AggregateRecord::new(
                state_key(&s.state_name),
                s.permits.clone(),
                population.get(&s.state_name, s.permits.year),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BpsError;
    use crate::process::clean::clean_states;
    use crate::process::parse_release;
    use crate::process::record::StateRowKind;
    use crate::schema::{Metric, PermitCounts, ReleaseKey, Scale, UnitSize};

    fn permits(year: i32, units: i64) -> PermitRecord {
        let mut counts = PermitCounts::default();
        counts.set(UnitSize::Two, Metric::Units, units);
        PermitRecord::new(year, None, counts)
    }

    #[test]
    fn test_county_records() -> anyhow::Result<()> {
        let counties = vec![
            CountyRecord {
                fips_state: 41,
                fips_county: 51,
                county_name: Some("Multnomah County".into()),
                imputed: false,
                permits: permits(2000, 10),
            },
            CountyRecord {
                fips_state: 41,
                fips_county: 51,
                county_name: Some("Multnomah County".into()),
                imputed: true,
                permits: permits(1985, 4),
            },
            CountyRecord {
                fips_state: 41,
                fips_county: 99,
                county_name: None,
                imputed: true,
                permits: permits(1985, 4),
            },
        ];
        let mut population = CountyPopulation::new();
        population.insert((41, 51), 2000, 660_000)?;

        let rows = county_records(&counties, &population)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].permits.year, 1985);
        assert_eq!(rows[0].imputed, Some(true));
        assert_eq!(rows[0].population, Population::Unknown);
        assert_eq!(rows[1].key.name, "Multnomah County, OR");
        assert_eq!(rows[1].key.path.joined(), "OR/Multnomah County");
        assert_eq!(rows[1].population, Population::Known(660_000));
        Ok(())
    }

    #[test]
    fn test_state_population_joins_district_of_columbia() -> anyhow::Result<()> {
        let text = "\
Survey,FIPS,Region,Division,State,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,State,Code,Code,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2019,11,3,5,DISTRICT OF COLUMBIA,2,40,5000,0,0,0,0,0,0,1,300,40000
";
        let release = ReleaseKey::annual(Scale::State, 2019, None);
        let table = parse_release(text, release)?;
        let states = clean_states(&table)?;

        let mut population = StatePopulation::new();
        population.insert("District of Columbia".into(), 2019, 705_000)?;
        let rows = state_records(&states, &population)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.name, "District of Columbia");
        assert_eq!(rows[0].population, Population::Known(705_000));
        Ok(())
    }

    #[test]
    fn test_state_records_check_totals() {
        let mut broken = permits(2001, 5);
        broken.totals.units = 6;
        let states = vec![StateRecord {
            state_name: "Ohio".into(),
            kind: StateRowKind::State,
            fips_state: Some(39),
            region_code: "2".into(),
            division_code: "3".into(),
            permits: broken,
        }];
        assert!(matches!(
            state_records(&states, &StatePopulation::new()),
            Err(BpsError::Consistency(_))
        ));
    }
}
