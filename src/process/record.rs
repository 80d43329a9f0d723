// src/process/record.rs
//! Typed rows produced by the cleaners.

use serde::{Deserialize, Serialize};

use super::utils::parse_number;
use super::RawTable;
use crate::error::Result;
use crate::schema::{grid_column, Metric, PermitCounts, PermitRecord, UnitSize};

/// Classification of a row in a state-level release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateRowKind {
    Country,
    Region,
    Division,
    State,
}

impl StateRowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateRowKind::Country => "country",
            StateRowKind::Region => "region",
            StateRowKind::Division => "division",
            StateRowKind::State => "state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub state_name: String,
    pub kind: StateRowKind,
    pub fips_state: Option<u32>,
    pub region_code: String,
    pub division_code: String,
    pub permits: PermitRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountyRecord {
    pub fips_state: u32,
    pub fips_county: u32,
    /// `None` for imputed rows until names are harmonised.
    pub county_name: Option<String>,
    /// Synthesised from place sums rather than read from a county release.
    pub imputed: bool,
    pub permits: PermitRecord,
}

/// Legal designator split off the end of a place name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    Township,
    Town,
    City,
    Village,
    Borough,
}

impl PlaceType {
    /// Checked in this order, so `township` wins over `town`.
    pub const ALL: [PlaceType; 5] = [
        PlaceType::Township,
        PlaceType::Town,
        PlaceType::City,
        PlaceType::Village,
        PlaceType::Borough,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Township => "township",
            PlaceType::Town => "town",
            PlaceType::City => "city",
            PlaceType::Village => "village",
            PlaceType::Borough => "borough",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceRecord {
    /// Source identifier; its numbering changed in 1992.
    pub six_digit_id: Option<i64>,
    pub state_code: u32,
    pub county_code: Option<u32>,
    pub fips_place_code: Option<u32>,
    pub place_name: String,
    pub uncleaned_place_name: String,
    pub place_type: Option<PlaceType>,
    pub permits: PermitRecord,
}

/// Positions of the twelve grid columns in a table.
pub struct GridColumns {
    indices: Vec<(UnitSize, Metric, usize)>,
}

impl GridColumns {
    pub fn locate(table: &RawTable) -> Result<Self> {
        let mut indices = Vec::with_capacity(12);
        for size in UnitSize::ALL {
            for metric in Metric::ALL {
                let idx = table.require_column(&grid_column(size, metric))?;
                indices.push((size, metric, idx));
            }
        }
        Ok(Self { indices })
    }

    /// Blank cells count as zero.
    pub fn read(&self, row: &[String]) -> PermitCounts {
        let mut counts = PermitCounts::default();
        for (size, metric, idx) in &self.indices {
            let v = row.get(*idx).and_then(|c| parse_number(c)).unwrap_or(0);
            counts.set(*size, *metric, v);
        }
        counts
    }

    /// Grid plus derived totals for one row of `table`.
    pub fn permits(&self, table: &RawTable, row: &[String]) -> PermitRecord {
        PermitRecord::new(table.release.year, table.release.month, self.read(row))
    }
}

/// Read an optional numeric cell as a non-negative code.
pub fn code_cell(row: &[String], idx: Option<usize>) -> Option<u32> {
    idx.and_then(|i| row.get(i))
        .and_then(|c| parse_number(c))
        .and_then(|v| u32::try_from(v).ok())
}
