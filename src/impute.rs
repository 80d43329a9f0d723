// src/impute.rs
//! Filling gaps: county rows from before the county series starts, and the
//! in-progress year's remaining months.

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{BpsError, Result};
use crate::process::record::{CountyRecord, PlaceRecord};
use crate::schema::{MetricTotals, PermitRecord, Region, ReleaseKey, Scale, TimeScale};

/// First year with county-level releases.
pub const COUNTY_START_YEAR: i32 = 1990;

/// Build county rows for years before `county_start_year` by summing the place
/// rows of each county. Places without a county code are skipped, and
/// unincorporated area is missing from the sums, so these rows undercount and
/// stay flagged `imputed`.
#[tracing::instrument(level = "info", skip(places), fields(places = places.len()))]
pub fn impute_pre_1990_counties(places: &[PlaceRecord], county_start_year: i32) -> Vec<CountyRecord> {
    let mut sums: BTreeMap<(u32, u32, i32, Option<u32>), PermitRecord> = BTreeMap::new();
    for p in places.iter().filter(|p| p.permits.year < county_start_year) {
        let Some(county) = p.county_code else {
            continue;
        };
        sums.entry((p.state_code, county, p.permits.year, p.permits.month))
            .or_insert_with(|| PermitRecord::zero(p.permits.year, p.permits.month))
            .absorb(&p.permits);
    }

    let imputed: Vec<CountyRecord> = sums
        .into_iter()
        .map(|((fips_state, fips_county, _, _), permits)| CountyRecord {
            fips_state,
            fips_county,
            county_name: None,
            imputed: true,
            permits,
        })
        .collect();
    info!(rows = imputed.len(), "imputed county rows from places");
    imputed
}

/// Straight-line extrapolation of a year-to-date snapshot to the full year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    month: u32,
}

impl Projection {
    /// `month` is the number of observed months; 0 would divide by zero.
    pub fn new(month: u32) -> Result<Self> {
        if month == 0 || month > 12 {
            return Err(BpsError::InvalidMonth(month));
        }
        Ok(Self { month })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Permits expected in the remaining `12 - month` months, truncated.
    pub fn remainder(&self, observed: &MetricTotals) -> MetricTotals {
        let m = i64::from(self.month);
        observed.map(|v| v * (12 - m) / m)
    }

    pub fn apply(&self, record: &mut PermitRecord) {
        record.projected = Some(self.remainder(&record.totals));
    }
}

/// Which releases make up the series, given how far the survey has been published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasePlan {
    latest_year: i32,
    latest_month: u32,
    last_year_annual_released: bool,
}

impl ReleasePlan {
    pub fn new(latest_year: i32, latest_month: u32, last_year_annual_released: bool) -> Result<Self> {
        Projection::new(latest_month)?;
        Ok(Self {
            latest_year,
            latest_month,
            last_year_annual_released,
        })
    }

    /// The in-progress year; only its rows are projected and completeness-checked.
    pub fn partial_year(&self) -> i32 {
        self.latest_year
    }

    pub fn latest_month(&self) -> u32 {
        self.latest_month
    }

    /// Last year read from an annual release.
    pub fn last_full_year(&self) -> i32 {
        if self.last_year_annual_released {
            self.latest_year - 1
        } else {
            self.latest_year - 2
        }
    }

    /// Annual releases from `start_year`, then last December's year-to-date
    /// release if last year's annual one is not out, then the current year to date.
    pub fn releases(&self, scale: Scale, region: Option<Region>, start_year: i32) -> Vec<ReleaseKey> {
        let last_full = self.last_full_year();
        let mut keys: Vec<ReleaseKey> = (start_year..=last_full)
            .map(|year| ReleaseKey::annual(scale, year, region))
            .collect();
        if !self.last_year_annual_released {
            keys.push(ReleaseKey::year_to_date(scale, last_full + 1, 12, region));
        }
        keys.push(ReleaseKey::year_to_date(
            scale,
            self.latest_year,
            self.latest_month,
            region,
        ));
        debug!(scale = scale.as_str(), releases = keys.len(), "planned releases");
        keys
    }

    /// The projection for rows read from `release`, if it is the in-progress one.
    pub fn projection_for(&self, release: &ReleaseKey) -> Result<Option<Projection>> {
        match (release.time_scale, release.month) {
            (TimeScale::MonthlyYearToDate, Some(month)) if release.year == self.latest_year => {
                Projection::new(month).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Metric, PermitCounts, UnitSize};

    fn place(year: i32, county: Option<u32>, units: [i64; 4]) -> PlaceRecord {
        let mut counts = PermitCounts::default();
        for (size, u) in UnitSize::ALL.into_iter().zip(units) {
            counts.set(size, Metric::Units, u);
            counts.set(size, Metric::Bldgs, u.min(1));
        }
        PlaceRecord {
            six_digit_id: None,
            state_code: 6,
            county_code: county,
            fips_place_code: None,
            place_name: "x".into(),
            uncleaned_place_name: "x".into(),
            place_type: None,
            permits: PermitRecord::new(year, None, counts),
        }
    }

    #[test]
    fn test_impute_sums_places_per_county() {
        let places = vec![
            place(1985, Some(37), [1, 2, 3, 4]),
            place(1985, Some(37), [0, 1, 0, 1]),
            place(1985, Some(37), [2, 0, 0, 0]),
            place(1985, None, [9, 9, 9, 9]),
            place(1990, Some(37), [5, 5, 5, 5]),
        ];
        let counties = impute_pre_1990_counties(&places, COUNTY_START_YEAR);
        assert_eq!(counties.len(), 1);
        let c = &counties[0];
        assert_eq!((c.fips_state, c.fips_county), (6, 37));
        assert!(c.imputed);
        assert_eq!(c.county_name, None);
        assert_eq!(c.permits.counts.units(), [3, 3, 3, 5]);
        assert_eq!(c.permits.totals.units, 14);
        assert!(c.permits.check_totals().is_ok());
    }

    #[test]
    fn test_projection() -> anyhow::Result<()> {
        let mut counts = PermitCounts::default();
        counts.set(UnitSize::FivePlus, Metric::Units, 120);
        let mut record = PermitRecord::new(2023, Some(6), counts);
        Projection::new(6)?.apply(&mut record);
        let projected = record.projected.unwrap();
        assert_eq!(projected.units, 120);
        assert_eq!(record.totals.units + projected.units, 240);

        assert_eq!(
            Projection::new(4)?.remainder(&MetricTotals { bldgs: 10, units: 7, value: 0 }),
            MetricTotals { bldgs: 20, units: 14, value: 0 }
        );
        assert_eq!(Projection::new(12)?.remainder(&record.totals).units, 0);
        assert!(matches!(Projection::new(0), Err(BpsError::InvalidMonth(0))));
        assert!(matches!(Projection::new(13), Err(BpsError::InvalidMonth(13))));
        Ok(())
    }

    #[test]
    fn test_release_plan() -> anyhow::Result<()> {
        let plan = ReleasePlan::new(2023, 4, true)?;
        let keys = plan.releases(Scale::County, None, 1990);
        assert_eq!(keys.len(), 34);
        assert_eq!(keys[0], ReleaseKey::annual(Scale::County, 1990, None));
        assert_eq!(keys[32], ReleaseKey::annual(Scale::County, 2022, None));
        assert_eq!(keys[33], ReleaseKey::year_to_date(Scale::County, 2023, 4, None));
        assert_eq!(plan.projection_for(&keys[33])?, Some(Projection::new(4)?));
        assert_eq!(plan.projection_for(&keys[0])?, None);

        let plan = ReleasePlan::new(2023, 4, false)?;
        let keys = plan.releases(Scale::Place, Some(Region::West), 1980);
        assert_eq!(plan.last_full_year(), 2021);
        let december = keys[keys.len() - 2];
        assert_eq!(december, ReleaseKey::year_to_date(Scale::Place, 2022, 12, Some(Region::West)));
        assert_eq!(plan.projection_for(&december)?, None);

        assert!(ReleasePlan::new(2023, 0, true).is_err());
        Ok(())
    }
}
