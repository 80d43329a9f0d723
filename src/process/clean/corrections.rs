// src/process/clean/corrections.rs
//! Static correction tables. Cleaners take these by reference so tests can
//! substitute their own.

use crate::process::record::StateRowKind;

/// Ordered name-fixing rules for place releases.
#[derive(Debug, Clone, Copy)]
pub struct NameRules {
    /// Whole-name replacements, applied first.
    pub exact: &'static [(&'static str, &'static str)],
    /// Substring replacements, applied in order after `exact`.
    pub substrings: &'static [(&'static str, &'static str)],
    /// Cleaned names whose rows are dropped.
    pub removals: &'static [&'static str],
}

pub static PLACE_NAME_RULES: NameRules = NameRules {
    exact: &[
        ("0Tsego Co. Pt. Uninc. Area", "Otsego Co. Pt. Uninc. Area"),
        ("Otsego Co. Pt Uninc. Area", "Otsego Co. Pt. Uninc. Area"),
        ("Washington Dc", "Washington"),
        ("Washington D.C", "Washington"),
        ("Washington D.C.", "Washington"),
        (".Pike County", "Pike County"),
    ],
    substrings: &[
        (" *", ""),
        (" #", ""),
        (" (N)#", ""),
        (" (N)", ""),
        ("@1", ""),
        ("@2", ""),
        ("@4", ""),
        ("@5", ""),
        ("Unincorporated Area", ""),
        ("Unincoporated Area", ""),
        ("Unincorporared Area", ""),
        ("Unincorported Area", ""),
        ("Unincorporate Area", ""),
        ("Balance Of County", "County"),
        ("Bal. Of Co", "County"),
        ("Bal. Of C0", "County"),
        ("0Tsego Co", "Otsego Co"),
        ("Co. Uninc. Area", "County"),
        ("Co. Uninc Area", "County"),
        ("Co. Pt Uninc. Area", "County Part"),
        ("Co. Pt. Uninc. Area", "County Part"),
        ("Co. Pt Uninc", "County Part"),
        // Prince George'S County, St Mary'S County
        ("'S", "s"),
        ("County Part", "County"),
        ("Parish Uninc. Area", "Parish"),
        ("Parish Pt. Uninc. Area", "Parish"),
        ("Parish Pt Uninc. Area", "Parish"),
        ("County Uninc Area", "County"),
        ("ALLEN TOWN", "Allen town"),
    ],
    removals: &["Houston (Dummy)", "Houston Part 2"],
};

/// Place names before this year are upper case with trailing noise.
pub const LAST_UPPERCASE_PLACE_YEAR: i32 = 1988;

/// Non-state rows of a state release. Anything unlisted is a state.
pub static STATE_ROW_KINDS: &[(&str, StateRowKind)] = &[
    ("United States", StateRowKind::Country),
    ("Northeast", StateRowKind::Region),
    ("Midwest", StateRowKind::Region),
    ("South", StateRowKind::Region),
    ("West", StateRowKind::Region),
    ("South Atlantic", StateRowKind::Division),
    ("West South Central", StateRowKind::Division),
    ("East North Central", StateRowKind::Division),
    ("East South Central", StateRowKind::Division),
    ("West North Central", StateRowKind::Division),
    ("Middle Atlantic", StateRowKind::Division),
    ("New England", StateRowKind::Division),
    ("Pacific", StateRowKind::Division),
    ("Mountain", StateRowKind::Division),
];

/// Dade County became Miami-Dade County in 1997, changing county FIPS 25 → 86.
pub const FLORIDA_FIPS: u32 = 12;
pub const DADE_OLD_FIPS: u32 = 25;
pub const MIAMI_DADE_FIPS: u32 = 86;
pub const MIAMI_DADE_NAME: &str = "Miami-Dade County";
