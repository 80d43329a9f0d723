// src/process/clean/state.rs

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::corrections::STATE_ROW_KINDS;
use crate::error::Result;
use crate::geo::{canonical_state_name, state_name};
use crate::process::record::{code_cell, GridColumns, StateRecord, StateRowKind};
use crate::process::utils::{clean_str, title_case};
use crate::process::RawTable;

/// Words the survey appends to region and division rows (sometimes truncated).
static AREA_DESIGNATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Division|Divisi|Region").expect("area designator regex"));

/// `"SOUTH ATLANTIC DIVISION"` → `"South Atlantic"`.
pub fn normalize_state_name(raw: &str) -> String {
    let titled = title_case(&clean_str(raw));
    AREA_DESIGNATORS
        .replace_all(&titled, "")
        .trim_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .to_string()
}

pub fn classify(name: &str, kinds: &[(&str, StateRowKind)]) -> StateRowKind {
    kinds
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, k)| *k)
        .unwrap_or(StateRowKind::State)
}

pub fn clean_states(table: &RawTable) -> Result<Vec<StateRecord>> {
    let name_idx = table.require_column("state_name")?;
    let fips_idx = table.column_index("fips_state");
    let region_idx = table.column_index("region_code");
    let division_idx = table.column_index("division_code");
    let grid = GridColumns::locate(table)?;

    let text = |row: &[String], idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .map(|c| clean_str(c))
            .unwrap_or_default()
    };

    let records: Vec<StateRecord> = table
        .rows
        .iter()
        .map(|row| {
            let fips_state = code_cell(row, fips_idx);
            let normalized = normalize_state_name(&row[name_idx]);
            // states take the state table's spelling ("District of Columbia")
            let name = fips_state
                .and_then(state_name)
                .or_else(|| canonical_state_name(&normalized))
                .map(str::to_string)
                .unwrap_or(normalized);
            StateRecord {
                kind: classify(&name, STATE_ROW_KINDS),
                state_name: name,
                fips_state,
                region_code: text(row, region_idx),
                division_code: text(row, division_idx),
                permits: grid.permits(table, row),
            }
        })
        .collect();

    debug!(release = %table.release, rows = records.len(), "cleaned state rows");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::parse_release;
    use crate::schema::{ReleaseKey, Scale};

    #[test]
    fn test_normalize_state_name() {
        assert_eq!(normalize_state_name("SOUTH ATLANTIC DIVISION"), "South Atlantic");
        assert_eq!(normalize_state_name("Mountain Divisi"), "Mountain");
        assert_eq!(normalize_state_name("NORTHEAST REGION"), "Northeast");
        assert_eq!(normalize_state_name(" new york*"), "New York");
    }

    #[test]
    fn test_clean_states() -> anyhow::Result<()> {
        let text = "\
Survey,FIPS,Region,Division,State,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,State,Code,Code,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2019,01,3,6,ALABAMA,100,100,20000,5,10,1500,2,7,900,3,60,7000
2019,00,0,0,UNITED STATES,1000,1000,300000,50,100,15000,20,70,9000,30,600,70000
2019,,3,5,SOUTH ATLANTIC DIVISION,1,1,1,0,0,0,0,0,0,0,0,0
2019,11,3,5,DISTRICT OF COLUMBIA,2,40,5000,0,0,0,0,0,0,1,300,40000
";
        let table = parse_release(text, ReleaseKey::annual(Scale::State, 2019, None))?;
        let states = clean_states(&table)?;
        assert_eq!(states.len(), 4);

        assert_eq!(states[0].state_name, "Alabama");
        assert_eq!(states[0].kind, StateRowKind::State);
        assert_eq!(states[0].fips_state, Some(1));
        assert_eq!(states[0].region_code, "3");
        assert_eq!(states[0].permits.totals.units, 177);
        assert_eq!(states[0].permits.totals.bldgs, 110);

        assert_eq!(states[1].kind, StateRowKind::Country);
        assert_eq!(states[2].state_name, "South Atlantic");
        assert_eq!(states[2].kind, StateRowKind::Division);
        assert_eq!(states[2].fips_state, None);

        assert_eq!(states[3].state_name, "District of Columbia");
        assert_eq!(states[3].kind, StateRowKind::State);

        for s in &states {
            s.permits.check_totals()?;
        }
        Ok(())
    }
}
