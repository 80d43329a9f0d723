// src/process/clean/county.rs

use std::collections::HashMap;
use tracing::{debug, warn};

use super::corrections::{DADE_OLD_FIPS, FLORIDA_FIPS, MIAMI_DADE_FIPS, MIAMI_DADE_NAME};
use crate::error::Result;
use crate::process::record::{code_cell, CountyRecord, GridColumns};
use crate::process::RawTable;

pub fn clean_counties(table: &RawTable) -> Result<Vec<CountyRecord>> {
    let name_idx = table.require_column("county_name")?;
    let state_idx = table.require_column("fips_state")?;
    let county_idx = table.require_column("fips_county")?;
    let grid = GridColumns::locate(table)?;

    let mut records = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for row in &table.rows {
        let (Some(fips_state), Some(mut fips_county)) =
            (code_cell(row, Some(state_idx)), code_cell(row, Some(county_idx)))
        else {
            skipped += 1;
            continue;
        };

        let mut county_name = row[name_idx].trim().to_string();
        if fips_state == FLORIDA_FIPS && fips_county == DADE_OLD_FIPS {
            county_name = MIAMI_DADE_NAME.to_string();
            fips_county = MIAMI_DADE_FIPS;
        }

        records.push(CountyRecord {
            fips_state,
            fips_county,
            county_name: Some(county_name).filter(|n| !n.is_empty()),
            imputed: false,
            permits: grid.permits(table, row),
        });
    }

    if skipped > 0 {
        warn!(release = %table.release, skipped, "county rows without FIPS codes");
    }
    debug!(release = %table.release, rows = records.len(), "cleaned county rows");
    Ok(records)
}

/// County names drift between releases. Use the name from the most recent
/// year for every year of a county, and drop rows that end up nameless.
pub fn harmonize_county_names(counties: Vec<CountyRecord>) -> Vec<CountyRecord> {
    let mut latest: HashMap<(u32, u32), (i32, String)> = HashMap::new();
    for c in &counties {
        let Some(name) = &c.county_name else { continue };
        let key = (c.fips_state, c.fips_county);
        let year = c.permits.year;
        match latest.get(&key) {
            Some((y, _)) if *y > year => {}
            _ => {
                latest.insert(key, (year, name.clone()));
            }
        }
    }

    let before = counties.len();
    let harmonized: Vec<CountyRecord> = counties
        .into_iter()
        .filter_map(|mut c| {
            let (_, name) = latest.get(&(c.fips_state, c.fips_county))?;
            c.county_name = Some(name.clone());
            Some(c)
        })
        .collect();

    let dropped = before - harmonized.len();
    if dropped > 0 {
        warn!(dropped, "county rows without any known name");
    }
    harmonized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::parse_release;
    use crate::schema::{PermitRecord, ReleaseKey, Scale};

    const COUNTY_RELEASE: &str = "\
Survey,FIPS,FIPS,Region,Division,County,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,State,County,Code,Code,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2005,12,025,3,5,  Dade County  ,10,10,2000,1,2,300,0,0,0,1,20,2500
2005,12,011,3,5,Broward County,5,5,1000,0,0,0,0,0,0,0,0,0
";

    #[test]
    fn test_clean_counties_renames_dade() -> anyhow::Result<()> {
        let table = parse_release(COUNTY_RELEASE, ReleaseKey::annual(Scale::County, 2005, None))?;
        let counties = clean_counties(&table)?;
        assert_eq!(counties.len(), 2);
        assert_eq!(counties[0].county_name.as_deref(), Some("Miami-Dade County"));
        assert_eq!(counties[0].fips_county, 86);
        assert_eq!(counties[0].permits.totals.units, 32);
        assert_eq!(counties[1].county_name.as_deref(), Some("Broward County"));
        assert_eq!(counties[1].fips_county, 11);
        Ok(())
    }

    fn county(year: i32, name: Option<&str>) -> CountyRecord {
        CountyRecord {
            fips_state: 6,
            fips_county: 1,
            county_name: name.map(str::to_string),
            imputed: name.is_none(),
            permits: PermitRecord::zero(year, None),
        }
    }

    #[test]
    fn test_harmonize_uses_latest_name() {
        let rows = vec![
            county(1985, None),
            county(1995, Some("ALAMEDA COUNTY")),
            county(2010, Some("Alameda County")),
        ];
        let out = harmonize_county_names(rows);
        assert_eq!(out.len(), 3);
        assert!(out
            .iter()
            .all(|c| c.county_name.as_deref() == Some("Alameda County")));

        let orphan = CountyRecord {
            fips_county: 99,
            ..county(1985, None)
        };
        assert!(harmonize_county_names(vec![orphan]).is_empty());
    }
}
