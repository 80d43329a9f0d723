// src/schema/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

use crate::error::{BpsError, Result};

/// Geographic level a release is published at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    State,
    County,
    Place,
    Metro,
}

impl Scale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::State => "state",
            Scale::County => "county",
            Scale::Place => "place",
            Scale::Metro => "metro",
        }
    }

    /// Top-level directory on the Census server.
    fn dir_name(&self) -> &'static str {
        match self {
            Scale::State => "State",
            Scale::County => "County",
            Scale::Place => "Place",
            Scale::Metro => "Metro",
        }
    }
}

/// Monthly data comes in two flavours: `MonthlyCurrent` gives the permits of that
/// month alone, `MonthlyYearToDate` the cumulative total since January.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScale {
    MonthlyCurrent,
    MonthlyYearToDate,
    Annual,
}

impl TimeScale {
    fn letter(&self) -> char {
        match self {
            TimeScale::MonthlyCurrent => 'c',
            TimeScale::MonthlyYearToDate => 'y',
            TimeScale::Annual => 'a',
        }
    }
}

/// Census region. Place-level releases are split by region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    West,
    Midwest,
    South,
    Northeast,
}

pub const ALL_REGIONS: [Region; 4] = [
    Region::West,
    Region::Midwest,
    Region::South,
    Region::Northeast,
];

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::West => "west",
            Region::Midwest => "midwest",
            Region::South => "south",
            Region::Northeast => "northeast",
        }
    }

    fn file_code(&self) -> &'static str {
        match self {
            Region::West => "we",
            Region::Midwest => "mw",
            Region::South => "so",
            Region::Northeast => "ne",
        }
    }

    fn dir_name(&self) -> &'static str {
        match self {
            Region::West => "West Region",
            Region::Midwest => "Midwest Region",
            Region::South => "South Region",
            Region::Northeast => "Northeast Region",
        }
    }
}

/// Identifies one published text release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseKey {
    pub scale: Scale,
    pub time_scale: TimeScale,
    pub year: i32,
    pub month: Option<u32>,
    pub region: Option<Region>,
}

impl ReleaseKey {
    pub fn annual(scale: Scale, year: i32, region: Option<Region>) -> Self {
        Self {
            scale,
            time_scale: TimeScale::Annual,
            year,
            month: None,
            region,
        }
    }

    pub fn year_to_date(scale: Scale, year: i32, month: u32, region: Option<Region>) -> Self {
        Self {
            scale,
            time_scale: TimeScale::MonthlyYearToDate,
            year,
            month: Some(month),
            region,
        }
    }

    /// Reject combinations that can never name a release.
    pub fn validate(&self) -> Result<()> {
        match (self.scale, self.region) {
            (Scale::Place, None) => {
                return Err(BpsError::InvalidRelease(
                    "place releases require a region".into(),
                ))
            }
            (Scale::Place, Some(_)) | (_, None) => {}
            (scale, Some(_)) => {
                return Err(BpsError::InvalidRelease(format!(
                    "region must be empty for scale {}",
                    scale.as_str()
                )))
            }
        }
        match (self.time_scale, self.month) {
            (TimeScale::Annual, Some(m)) => Err(BpsError::InvalidRelease(format!(
                "annual releases take no month (got {})",
                m
            ))),
            (TimeScale::Annual, None) => Ok(()),
            (_, None) => Err(BpsError::InvalidRelease(
                "monthly releases require a month".into(),
            )),
            (_, Some(m)) if !(1..=12).contains(&m) => Err(BpsError::InvalidMonth(m)),
            (_, Some(_)) => Ok(()),
        }
    }

    /// Path of the release relative to the survey root, e.g.
    /// `Place/West Region/we1984a.txt` or `County/co2304y.txt`.
    pub fn relative_path(&self) -> Result<String> {
        self.validate()?;

        let stem = match self.month {
            Some(month) => format!(
                "{:02}{:02}{}",
                self.year.rem_euclid(100),
                month,
                self.time_scale.letter()
            ),
            None => format!("{:04}a", self.year),
        };

        let path = match (self.scale, self.region) {
            (Scale::Place, Some(region)) => format!(
                "{}/{}/{}{}.txt",
                self.scale.dir_name(),
                region.dir_name(),
                region.file_code(),
                stem
            ),
            (Scale::State, _) => format!("{}/st{}.txt", self.scale.dir_name(), stem),
            (Scale::County, _) => format!("{}/co{}.txt", self.scale.dir_name(), stem),
            (Scale::Metro, _) => format!("{}/ma{}.txt", self.scale.dir_name(), stem),
            (Scale::Place, None) => unreachable!("validated above"),
        };
        Ok(path)
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scale.as_str(), self.year)?;
        if let Some(month) = self.month {
            write!(f, "-{:02}{}", month, self.time_scale.letter())?;
        }
        if let Some(region) = self.region {
            write!(f, "/{}", region.as_str())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitSize {
    One,
    Two,
    ThreeToFour,
    FivePlus,
}

impl UnitSize {
    pub const ALL: [UnitSize; 4] = [
        UnitSize::One,
        UnitSize::Two,
        UnitSize::ThreeToFour,
        UnitSize::FivePlus,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            UnitSize::One => "1_unit",
            UnitSize::Two => "2_units",
            UnitSize::ThreeToFour => "3_to_4_units",
            UnitSize::FivePlus => "5_plus_units",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Bldgs,
    Units,
    Value,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Bldgs, Metric::Units, Metric::Value];

    pub fn slug(&self) -> &'static str {
        match self {
            Metric::Bldgs => "bldgs",
            Metric::Units => "units",
            Metric::Value => "value",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Canonical column name of one grid cell, e.g. `3_to_4_units_value`.
pub fn grid_column(size: UnitSize, metric: Metric) -> String {
    format!("{}_{}", size.slug(), metric.slug())
}

/// One value per metric. Used for `total_*` and `projected_*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTotals {
    pub bldgs: i64,
    pub units: i64,
    pub value: i64,
}

impl MetricTotals {
    pub fn get(&self, metric: Metric) -> i64 {
        match metric {
            Metric::Bldgs => self.bldgs,
            Metric::Units => self.units,
            Metric::Value => self.value,
        }
    }

    pub fn map(&self, f: impl Fn(i64) -> i64) -> Self {
        Self {
            bldgs: f(self.bldgs),
            units: f(self.units),
            value: f(self.value),
        }
    }
}

impl AddAssign for MetricTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.bldgs += rhs.bldgs;
        self.units += rhs.units;
        self.value += rhs.value;
    }
}

/// The unit-size × metric grid of one row. Values are counts, except `value`
/// which is thousands of dollars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermitCounts {
    cells: [[i64; 3]; 4],
}

impl PermitCounts {
    pub fn get(&self, size: UnitSize, metric: Metric) -> i64 {
        self.cells[size.index()][metric.index()]
    }

    pub fn set(&mut self, size: UnitSize, metric: Metric, value: i64) {
        self.cells[size.index()][metric.index()] = value;
    }

    /// Column-wise sum over the unit sizes.
    pub fn totals(&self) -> MetricTotals {
        let sum = |metric: Metric| UnitSize::ALL.iter().map(|s| self.get(*s, metric)).sum();
        MetricTotals {
            bldgs: sum(Metric::Bldgs),
            units: sum(Metric::Units),
            value: sum(Metric::Value),
        }
    }

    /// `units` cells in unit-size order.
    pub fn units(&self) -> [i64; 4] {
        UnitSize::ALL.map(|s| self.get(s, Metric::Units))
    }
}

impl AddAssign for PermitCounts {
    fn add_assign(&mut self, rhs: Self) {
        for (row, other) in self.cells.iter_mut().zip(rhs.cells.iter()) {
            for (cell, v) in row.iter_mut().zip(other.iter()) {
                *cell += v;
            }
        }
    }
}

/// The permit payload shared by every geography level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitRecord {
    pub year: i32,
    /// Set only for year-to-date snapshots.
    pub month: Option<u32>,
    pub counts: PermitCounts,
    pub totals: MetricTotals,
    pub projected: Option<MetricTotals>,
}

impl PermitRecord {
    /// Builds a record and derives its totals from the grid.
    pub fn new(year: i32, month: Option<u32>, counts: PermitCounts) -> Self {
        Self {
            year,
            month,
            totals: counts.totals(),
            counts,
            projected: None,
        }
    }

    /// Totals must equal the column-wise grid sum.
    pub fn check_totals(&self) -> Result<()> {
        let expected = self.counts.totals();
        if expected != self.totals {
            return Err(BpsError::Consistency(format!(
                "unit columns sum to {:?} but totals are {:?} (year {})",
                expected, self.totals, self.year
            )));
        }
        Ok(())
    }

    /// Adds `other` into `self`: grid, totals and projections.
    pub fn absorb(&mut self, other: &PermitRecord) {
        self.counts += other.counts;
        self.totals += other.totals;
        self.projected = match (self.projected, other.projected) {
            (Some(mut a), Some(b)) => {
                a += b;
                Some(a)
            }
            (a, b) => a.or(b),
        };
    }

    /// Empty record to accumulate into.
    pub fn zero(year: i32, month: Option<u32>) -> Self {
        Self::new(year, month, PermitCounts::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_paths() -> anyhow::Result<()> {
        let place = ReleaseKey::annual(Scale::Place, 1984, Some(Region::West));
        assert_eq!(place.relative_path()?, "Place/West Region/we1984a.txt");

        let county = ReleaseKey::year_to_date(Scale::County, 2023, 4, None);
        assert_eq!(county.relative_path()?, "County/co2304y.txt");

        let state = ReleaseKey::annual(Scale::State, 2019, None);
        assert_eq!(state.relative_path()?, "State/st2019a.txt");

        let metro = ReleaseKey::year_to_date(Scale::Metro, 2009, 12, None);
        assert_eq!(metro.relative_path()?, "Metro/ma0912y.txt");
        Ok(())
    }

    #[test]
    fn test_invalid_release_keys() {
        assert!(ReleaseKey::annual(Scale::Place, 2000, None).validate().is_err());
        assert!(ReleaseKey::annual(Scale::County, 2000, Some(Region::South))
            .validate()
            .is_err());
        assert!(matches!(
            ReleaseKey::year_to_date(Scale::State, 2000, 0, None).validate(),
            Err(BpsError::InvalidMonth(0))
        ));
    }

    #[test]
    fn test_totals_follow_grid() {
        let mut counts = PermitCounts::default();
        counts.set(UnitSize::One, Metric::Units, 4);
        counts.set(UnitSize::FivePlus, Metric::Units, 40);
        counts.set(UnitSize::Two, Metric::Bldgs, 1);
        let record = PermitRecord::new(2001, None, counts);
        assert_eq!(record.totals.units, 44);
        assert_eq!(record.totals.bldgs, 1);
        assert!(record.check_totals().is_ok());

        let mut broken = record.clone();
        broken.totals.units = 43;
        assert!(matches!(
            broken.check_totals(),
            Err(BpsError::Consistency(_))
        ));
    }

    #[test]
    fn test_absorb_keeps_projection() {
        let mut a = PermitRecord::zero(2023, Some(4));
        let mut b = PermitRecord::zero(2023, Some(4));
        b.counts.set(UnitSize::One, Metric::Units, 3);
        b.totals = b.counts.totals();
        b.projected = Some(MetricTotals {
            bldgs: 0,
            units: 6,
            value: 0,
        });
        a.absorb(&b);
        assert_eq!(a.totals.units, 3);
        assert_eq!(a.projected.map(|p| p.units), Some(6));
        assert!(a.check_totals().is_ok());
    }
}
