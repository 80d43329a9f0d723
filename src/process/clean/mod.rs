// src/process/clean/mod.rs
//! Scale-specific row normalisation.

pub mod corrections;
pub mod county;
pub mod place;
pub mod state;

use crate::error::{BpsError, Result};
use crate::process::record::{CountyRecord, PlaceRecord, StateRecord};
use crate::process::RawTable;
use crate::schema::Scale;

pub use corrections::{NameRules, PLACE_NAME_RULES};
pub use county::{clean_counties, harmonize_county_names};
pub use place::{clean_place_name, clean_places, split_place_type};
pub use state::clean_states;

/// Output of cleaning one release.
#[derive(Debug, Clone)]
pub enum CleanedTable {
    State(Vec<StateRecord>),
    County(Vec<CountyRecord>),
    Place(Vec<PlaceRecord>),
}

impl CleanedTable {
    pub fn len(&self) -> usize {
        match self {
            CleanedTable::State(v) => v.len(),
            CleanedTable::County(v) => v.len(),
            CleanedTable::Place(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatch on the release's scale. Metro releases are not cleaned: metros are
/// rebuilt from counties instead.
pub fn clean_table(table: &RawTable, rules: &NameRules) -> Result<CleanedTable> {
    match table.release.scale {
        Scale::State => clean_states(table).map(CleanedTable::State),
        Scale::County => clean_counties(table).map(CleanedTable::County),
        Scale::Place => clean_places(table, rules).map(CleanedTable::Place),
        Scale::Metro => Err(BpsError::InvalidRelease(format!(
            "{} is a metro release; metros are aggregated from counties",
            table.release
        ))),
    }
}
