// src/schema/header.rs
//! Two-row header handling. Every release opens with two comma-separated header
//! lines whose tokens pair up positionally into one canonical column name each.
//! The pairing rules drifted over the decades; each known shape is a variant of
//! [`HeaderShape`].

use super::types::{Region, Scale};

/// Releases whose second header line has no implicit trailing blank token.
/// Found empirically; there is no rule behind it.
pub const LENGTH_MATCHED_RELEASES: &[(i32, Region)] = &[(1984, Region::West)];

/// County releases in this range use the legacy header.
const LEGACY_COUNTY_YEARS: std::ops::RangeInclusive<i32> = 1990..=1998;

/// Line-1 labels naming a unit-size group, with the suffix they contribute.
const UNIT_GROUP_LABELS: &[(&str, &str, &str)] = &[
    ("1-unit", "1_unit", ""),
    ("2-units", "2_units", ""),
    ("3-4 units", "3_to_4_units", ""),
    ("5+ units", "5_plus_units", ""),
    ("1-unit rep", "1_unit", "reported"),
    ("2-units rep", "2_units", "reported"),
    ("3-4 units rep", "3_to_4_units", "reported"),
    ("5+ units rep", "5_plus_units", "reported"),
];

/// Spelling fixes for the legacy county header.
const LEGACY_COUNTY_REWRITES: &[(&str, &str)] = &[
    ("2_unit_", "2_units_"),
    ("34unit_", "3_to_4_units_"),
    ("5_unit_", "5_plus_units_"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderShape {
    /// Line 2 carries one more token than line 1.
    TrailingBlank,
    /// Both lines have the same number of tokens.
    LengthMatched,
    /// County 1990–1998: line 2 has one token fewer, unit sizes spelled `34unit`.
    LegacyCounty,
}

impl HeaderShape {
    pub fn for_release(scale: Scale, year: i32, region: Option<Region>) -> Self {
        if scale == Scale::County && LEGACY_COUNTY_YEARS.contains(&year) {
            return HeaderShape::LegacyCounty;
        }
        let exception = region
            .map(|r| LENGTH_MATCHED_RELEASES.contains(&(year, r)))
            .unwrap_or(false);
        if exception {
            HeaderShape::LengthMatched
        } else {
            HeaderShape::TrailingBlank
        }
    }

    /// Merge the two header lines into canonical column names.
    /// On a length mismatch returns a description of the problem.
    pub fn column_names(&self, line_1: &[String], line_2: &[String]) -> Result<Vec<String>, String> {
        let mut line_1 = line_1.to_vec();
        match self {
            HeaderShape::TrailingBlank => {
                if line_2.len() != line_1.len() + 1 {
                    return Err(length_error(self, line_1.len(), line_2.len()));
                }
                line_1.push(String::new());
                Ok(merge_column_names(&line_1, line_2))
            }
            HeaderShape::LengthMatched => {
                if line_2.len() != line_1.len() {
                    return Err(length_error(self, line_1.len(), line_2.len()));
                }
                Ok(merge_column_names(&line_1, line_2))
            }
            HeaderShape::LegacyCounty => {
                if line_2.len() + 1 != line_1.len() {
                    return Err(length_error(self, line_1.len(), line_2.len()));
                }
                line_1.pop();
                let columns = merge_column_names(&line_1, line_2)
                    .into_iter()
                    .map(|mut col| {
                        for (from, to) in LEGACY_COUNTY_REWRITES {
                            col = col.replace(from, to);
                        }
                        col
                    })
                    .collect();
                Ok(columns)
            }
        }
    }
}

fn length_error(shape: &HeaderShape, len_1: usize, len_2: usize) -> String {
    format!(
        "header lines have {} and {} tokens, which does not fit {:?}",
        len_1, len_2, shape
    )
}

/// Lowercase, `-` → `_`, trimmed.
pub fn slugify(s: &str) -> String {
    s.to_lowercase().replace('-', "_").trim().to_string()
}

/// Pair equal-length header lines into column names.
///
/// Unit-size labels span three physical columns in the source but are written
/// once; they are copied onto both neighbours before pairing.
pub fn merge_column_names(line_1: &[String], line_2: &[String]) -> Vec<String> {
    let mut spread = line_1.to_vec();
    for (i, label) in line_1.iter().enumerate() {
        if label.contains("unit") {
            if i > 0 {
                spread[i - 1] = label.clone();
            }
            if i + 1 < spread.len() {
                spread[i + 1] = label.clone();
            }
        }
    }

    spread
        .iter()
        .zip(line_2.iter())
        .map(|(top, bottom)| {
            let top = top.trim();
            let bottom = bottom.trim();

            let (top, suffix) = UNIT_GROUP_LABELS
                .iter()
                .find(|(label, _, _)| *label == top)
                .map(|(_, slug, suffix)| (*slug, *suffix))
                .unwrap_or((top, ""));

            // `MSA/` + `CMSA` reads as `msa/cmsa`
            let joiner = if top.ends_with('/') { "" } else { "_" };

            [top, bottom, suffix]
                .iter()
                .filter(|p| !p.trim().is_empty())
                .map(|p| slugify(p))
                .collect::<Vec<_>>()
                .join(joiner)
                .trim()
                .to_string()
        })
        .collect()
}
