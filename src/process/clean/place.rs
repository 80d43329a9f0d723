// src/process/clean/place.rs

use tracing::{debug, warn};

use super::corrections::{
    NameRules, DADE_OLD_FIPS, FLORIDA_FIPS, LAST_UPPERCASE_PLACE_YEAR, MIAMI_DADE_FIPS,
    MIAMI_DADE_NAME,
};
use crate::error::Result;
use crate::process::record::{GridColumns, PlaceRecord, PlaceType};
use crate::process::utils::{clean_str, parse_number, title_case};
use crate::process::RawTable;

/// Split a trailing legal designator (`" township"`, `" City"`, …) off a name.
pub fn split_place_type(name: &str) -> (String, Option<PlaceType>) {
    for place_type in PlaceType::ALL {
        let lower = format!(" {}", place_type.as_str());
        let title = title_case(&lower);
        for suffix in [&lower, &title] {
            if let Some(stripped) = name.strip_suffix(suffix.as_str()) {
                return (stripped.to_string(), Some(place_type));
            }
        }
    }
    (name.to_string(), None)
}

/// Run the ordered name pipeline on one raw place name.
pub fn clean_place_name(raw: &str, year: i32, rules: &NameRules) -> (String, Option<PlaceType>) {
    let mut name = clean_str(raw);

    // 1) pre-1989 releases are upper case with trailing dots and hashes
    if year <= LAST_UPPERCASE_PLACE_YEAR {
        name = title_case(&name)
            .trim_end_matches(|c| c == '.' || c == '#' || c == ' ')
            .to_string();
    }

    // 2) known misspellings
    if let Some((_, fixed)) = rules.exact.iter().find(|(from, _)| *from == name) {
        name = fixed.to_string();
    }

    // 3) abbreviation variants
    for (from, to) in rules.substrings {
        if name.contains(from) {
            name = name.replace(from, to);
        }
    }

    // 4) legal designator
    split_place_type(name.trim())
}

pub fn clean_places(table: &RawTable, rules: &NameRules) -> Result<Vec<PlaceRecord>> {
    let name_idx = table.require_column("place_name")?;
    let state_idx = table.require_column("state_code")?;
    let id_idx = table.column_index("6_digit_id");
    let county_idx = table.column_index("county_code");
    let fips_place_idx = table.column_index("fips place_code");
    let grid = GridColumns::locate(table)?;
    let year = table.release.year;

    let number = |row: &[String], idx: Option<usize>| {
        idx.and_then(|i| row.get(i)).and_then(|c| parse_number(c))
    };
    let code = |row: &[String], idx: Option<usize>| {
        number(row, idx).and_then(|v| u32::try_from(v).ok())
    };

    let mut records = Vec::with_capacity(table.rows.len());
    let mut removed = 0usize;
    let mut skipped = 0usize;
    for row in &table.rows {
        let uncleaned = row[name_idx].clone();
        let (place_name, place_type) = clean_place_name(&uncleaned, year, rules);
        if place_name.is_empty() || rules.removals.contains(&place_name.as_str()) {
            removed += 1;
            continue;
        }

        let Some(state_code) = code(row, Some(state_idx)) else {
            skipped += 1;
            continue;
        };
        let mut county_code = code(row, county_idx);
        let mut place_name = place_name;

        // Dade County → Miami-Dade County. 1999–2001 releases already carry
        // the new FIPS code but still the old name.
        if state_code == FLORIDA_FIPS
            && place_name == "Dade County"
            && matches!(county_code, Some(DADE_OLD_FIPS) | Some(MIAMI_DADE_FIPS))
        {
            place_name = MIAMI_DADE_NAME.to_string();
            county_code = Some(MIAMI_DADE_FIPS);
        }

        records.push(PlaceRecord {
            six_digit_id: number(row, id_idx),
            state_code,
            county_code,
            fips_place_code: code(row, fips_place_idx),
            place_name,
            uncleaned_place_name: uncleaned,
            place_type,
            permits: grid.permits(table, row),
        });
    }

    if skipped > 0 {
        warn!(release = %table.release, skipped, "place rows without a state code");
    }
    debug!(release = %table.release, rows = records.len(), removed, "cleaned place rows");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::clean::corrections::PLACE_NAME_RULES;
    use crate::process::parse_release;
    use crate::schema::{Region, ReleaseKey, Scale};

    #[test]
    fn test_split_place_type() {
        assert_eq!(
            split_place_type("Union township"),
            ("Union".to_string(), Some(PlaceType::Township))
        );
        assert_eq!(
            split_place_type("Jersey City"),
            ("Jersey".to_string(), Some(PlaceType::City))
        );
        assert_eq!(
            split_place_type("Georgetown"),
            ("Georgetown".to_string(), None)
        );
    }

    #[test]
    fn test_name_pipeline() {
        let rules = &PLACE_NAME_RULES;
        assert_eq!(
            clean_place_name("PRINCE GEORGE'S CO. UNINC. AREA", 1985, rules),
            ("Prince Georges County".to_string(), None)
        );
        assert_eq!(
            clean_place_name("ALLEGANY BAL. OF CO.#", 1984, rules).0,
            "Allegany County"
        );
        assert_eq!(
            clean_place_name("Washington D.C.", 2000, rules).0,
            "Washington"
        );
        assert_eq!(
            clean_place_name("Springfield (N)#", 2001, rules),
            ("Springfield".to_string(), None)
        );
        assert_eq!(
            clean_place_name("Hamilton township", 2010, rules),
            ("Hamilton".to_string(), Some(PlaceType::Township))
        );
    }

    const PLACE_RELEASE: &str = "\
Survey,State,6-Digit,County,Census Place,FIPS Place,FIPS MCD,Pop,CSA,CBSA,Footnote,Central,Zip,Region,Division,Number of,Place,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,Code,ID,Code,Code,Code,Code,,Code,Code,Code,City,Code,Code,Code,Months Rep,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2000,12,  5000,86,,,,,,,,,33101 012,3,5,12,Dade County,10,10,1000,0,0,0,0,0,0,1,30,3000
2000,48,  7710,201,,35000,,,,,,,,3,7,12,Houston (Dummy),1,1,1,0,0,0,0,0,0,0,0,0
2000,48,  7700,201,,35000,,,,,,,77001____,3,7,12,Houston city,100,100,9000,0,0,0,0,0,0,5,500,40000
2000,,  7701,201,,,,,,,,,,3,7,12,Katy city,1,1,1,0,0,0,0,0,0,0,0,0
";

    #[test]
    fn test_clean_places() -> anyhow::Result<()> {
        let release = ReleaseKey::annual(Scale::Place, 2000, Some(Region::South));
        let table = parse_release(PLACE_RELEASE, release)?;
        assert!(table.column_index("fips place_code").is_some());
        assert!(table.column_index("6_digit_id").is_some());

        // the dummy row is removed and the row without a state code is skipped
        let places = clean_places(&table, &PLACE_NAME_RULES)?;
        assert_eq!(places.len(), 2);
        assert!(places.iter().all(|p| p.place_name != "Katy"));

        let dade = &places[0];
        assert_eq!(dade.place_name, "Miami-Dade County");
        assert_eq!(dade.county_code, Some(86));
        assert_eq!(dade.six_digit_id, Some(5000));
        assert_eq!(dade.fips_place_code, None);

        let houston = &places[1];
        assert_eq!(houston.place_name, "Houston");
        assert_eq!(houston.place_type, Some(PlaceType::City));
        assert_eq!(houston.uncleaned_place_name, "Houston city");
        assert_eq!(houston.fips_place_code, Some(35000));
        assert_eq!(houston.permits.totals.units, 600);
        Ok(())
    }
}
