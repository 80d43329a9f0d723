// src/geo.rs
//! Geographic identity shared by every output level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// (FIPS code, postal abbreviation, name) for states, DC and Puerto Rico.
pub static STATES: &[(u32, &str, &str)] = &[
    (1, "AL", "Alabama"),
    (2, "AK", "Alaska"),
    (4, "AZ", "Arizona"),
    (5, "AR", "Arkansas"),
    (6, "CA", "California"),
    (8, "CO", "Colorado"),
    (9, "CT", "Connecticut"),
    (10, "DE", "Delaware"),
    (11, "DC", "District of Columbia"),
    (12, "FL", "Florida"),
    (13, "GA", "Georgia"),
    (15, "HI", "Hawaii"),
    (16, "ID", "Idaho"),
    (17, "IL", "Illinois"),
    (18, "IN", "Indiana"),
    (19, "IA", "Iowa"),
    (20, "KS", "Kansas"),
    (21, "KY", "Kentucky"),
    (22, "LA", "Louisiana"),
    (23, "ME", "Maine"),
    (24, "MD", "Maryland"),
    (25, "MA", "Massachusetts"),
    (26, "MI", "Michigan"),
    (27, "MN", "Minnesota"),
    (28, "MS", "Mississippi"),
    (29, "MO", "Missouri"),
    (30, "MT", "Montana"),
    (31, "NE", "Nebraska"),
    (32, "NV", "Nevada"),
    (33, "NH", "New Hampshire"),
    (34, "NJ", "New Jersey"),
    (35, "NM", "New Mexico"),
    (36, "NY", "New York"),
    (37, "NC", "North Carolina"),
    (38, "ND", "North Dakota"),
    (39, "OH", "Ohio"),
    (40, "OK", "Oklahoma"),
    (41, "OR", "Oregon"),
    (42, "PA", "Pennsylvania"),
    (44, "RI", "Rhode Island"),
    (45, "SC", "South Carolina"),
    (46, "SD", "South Dakota"),
    (47, "TN", "Tennessee"),
    (48, "TX", "Texas"),
    (49, "UT", "Utah"),
    (50, "VT", "Vermont"),
    (51, "VA", "Virginia"),
    (53, "WA", "Washington"),
    (54, "WV", "West Virginia"),
    (55, "WI", "Wisconsin"),
    (56, "WY", "Wyoming"),
    (72, "PR", "Puerto Rico"),
];

pub fn state_abbr(fips: u32) -> Option<&'static str> {
    STATES.iter().find(|(f, _, _)| *f == fips).map(|(_, a, _)| *a)
}

pub fn state_name(fips: u32) -> Option<&'static str> {
    STATES.iter().find(|(f, _, _)| *f == fips).map(|(_, _, n)| *n)
}

/// Spelling of `name` used by the state table, matched case-insensitively.
pub fn canonical_state_name(name: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(_, _, n)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(_, _, n)| *n)
}

/// Stable code of a place: its FIPS place code, or for unincorporated balances
/// (and NYC boroughs) the FIPS code of the county.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaceCode {
    Place(u32),
    County(u32),
}

impl fmt::Display for PlaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceCode::Place(code) => write!(f, "{}", code),
            PlaceCode::County(code) => write!(f, "{}_county", code),
        }
    }
}

impl FromStr for PlaceCode {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_suffix("_county") {
            Some(county) => county.parse().map(PlaceCode::County),
            None => s.parse().map(PlaceCode::Place),
        }
    }
}

/// Replace characters that cannot appear in a path segment.
pub fn path_slug(name: &str) -> String {
    name.replace('/', "-")
}

/// Two-segment address of a geography: optional parent and local slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoPath {
    pub parent: Option<String>,
    pub slug: String,
}

impl GeoPath {
    pub fn new(parent: Option<&str>, name: &str) -> Self {
        Self {
            parent: parent.map(str::to_string),
            slug: path_slug(name),
        }
    }

    pub fn joined(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}/{}", parent, self.slug),
            None => self.slug.clone(),
        }
    }
}

/// The smaller (MSA, keyed by CBSA title) and larger (CSA) metro definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetroType {
    Msa,
    Csa,
}

impl MetroType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetroType::Msa => "msa",
            MetroType::Csa => "csa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyKind {
    State,
    County,
    Place,
    Metro(MetroType),
}

/// Resolved identity of one geography, reused across years.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeographyKey {
    /// Stable identifier, e.g. `36/51000`, `12/86` or `msa/Miami-Fort Lauderdale`.
    pub id: String,
    /// Display name used in lists, e.g. `Jersey City, NJ`.
    pub name: String,
    pub kind: GeographyKind,
    pub path: GeoPath,
    pub alt_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(state_name(11), Some("District of Columbia"));
        assert_eq!(canonical_state_name("District Of Columbia"), Some("District of Columbia"));
        assert_eq!(canonical_state_name("Pacific"), None);
    }

    #[test]
    fn test_place_code_round_trip() {
        assert_eq!("51000".parse::<PlaceCode>().unwrap(), PlaceCode::Place(51000));
        assert_eq!("61_county".parse::<PlaceCode>().unwrap(), PlaceCode::County(61));
        assert_eq!(PlaceCode::County(5).to_string(), "5_county");
        assert!("x_county".parse::<PlaceCode>().is_err());
    }

    #[test]
    fn test_paths() {
        let p = GeoPath::new(Some("NJ"), "Jersey City");
        assert_eq!(p.joined(), "NJ/Jersey City");
        let m = GeoPath::new(None, "Louisville/Jefferson County, KY-IN");
        assert_eq!(m.joined(), "Louisville-Jefferson County, KY-IN");
        assert_eq!(state_abbr(36), Some("NY"));
        assert_eq!(state_abbr(3), None);
    }
}
