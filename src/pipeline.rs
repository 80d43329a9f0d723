// src/pipeline.rs
//! One batch run: fetch, parse and clean, resolve, impute, aggregate, write.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::aggregate::{county_records, place_records, state_records};
use crate::config::PipelineConfig;
use crate::error::BpsError;
use crate::fetch::{fetch_releases, FetchReport, FetchSettings, FetchedRelease, ReleaseSource};
use crate::identity::{add_borough_population, resolve_places, ResolutionStats};
use crate::impute::{impute_pre_1990_counties, ReleasePlan};
use crate::metro::{aggregate_metros, Crosswalk, MetroStats};
use crate::output::{write_json, write_level, LevelSummary, OutputLevel};
use crate::population::{
    add_division_and_region_totals, load_county_population, load_place_population,
    load_state_population, PopulationTable,
};
use crate::process::clean::{clean_table, harmonize_county_names, CleanedTable, PLACE_NAME_RULES};
use crate::process::parse_release;
use crate::process::record::{CountyRecord, PlaceRecord, StateRecord};
use crate::schema::{ReleaseKey, Scale, ALL_REGIONS};

/// Summary written next to the outputs as `manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub latest_year: i32,
    pub latest_month: u32,
    pub fetch: FetchReport,
    /// Releases dropped because their layout could not be read.
    pub unreadable_releases: usize,
    pub resolution: ResolutionStats,
    pub metros: MetroStats,
    pub levels: BTreeMap<OutputLevel, LevelSummary>,
}

/// Every release the run needs, across scales and regions.
pub fn planned_releases(config: &PipelineConfig, plan: &ReleasePlan) -> Vec<ReleaseKey> {
    let survey = &config.survey;
    let mut keys = plan.releases(Scale::State, None, survey.start_year);
    keys.extend(plan.releases(Scale::County, None, survey.county_start_year));
    for region in ALL_REGIONS {
        keys.extend(plan.releases(Scale::Place, Some(region), survey.start_year));
    }
    keys
}

/// Parse, clean and (for the in-progress release) project one release.
#[tracing::instrument(level = "debug", skip_all, fields(release = %release.key))]
pub fn process_release(
    release: &FetchedRelease,
    plan: &ReleasePlan,
) -> crate::error::Result<CleanedTable> {
    let mut table = parse_release(&release.text, release.key)?;
    table.drop_unused_columns();
    let mut cleaned = clean_table(&table, &PLACE_NAME_RULES)?;

    if let Some(projection) = plan.projection_for(&release.key)? {
        debug!(month = projection.month(), "projecting partial year");
        match &mut cleaned {
            CleanedTable::State(rows) => rows.iter_mut().for_each(|r| projection.apply(&mut r.permits)),
            CleanedTable::County(rows) => rows.iter_mut().for_each(|r| projection.apply(&mut r.permits)),
            CleanedTable::Place(rows) => rows.iter_mut().for_each(|r| projection.apply(&mut r.permits)),
        }
    }
    Ok(cleaned)
}

#[derive(Debug, Default)]
pub struct CleanedRecords {
    pub states: Vec<StateRecord>,
    pub counties: Vec<CountyRecord>,
    pub places: Vec<PlaceRecord>,
    pub unreadable: usize,
}

/// Clean every fetched release in parallel. A release with an unreadable
/// layout is logged and skipped; any other error ends the run.
pub fn process_releases(fetched: &[FetchedRelease], plan: &ReleasePlan) -> Result<CleanedRecords> {
    let start = Instant::now();
    let results: Vec<(ReleaseKey, crate::error::Result<CleanedTable>)> = fetched
        .par_iter()
        .map(|r| (r.key, process_release(r, plan)))
        .collect();

    let mut out = CleanedRecords::default();
    for (key, result) in results {
        match result {
            Ok(CleanedTable::State(rows)) => out.states.extend(rows),
            Ok(CleanedTable::County(rows)) => out.counties.extend(rows),
            Ok(CleanedTable::Place(rows)) => out.places.extend(rows),
            Err(e @ BpsError::Format { .. }) => {
                error!(release = %key, "skipping release: {}", e);
                out.unreadable += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("processing {}", key)),
        }
    }
    info!(
        states = out.states.len(),
        counties = out.counties.len(),
        places = out.places.len(),
        unreadable = out.unreadable,
        elapsed = ?start.elapsed(),
        "releases cleaned"
    );
    Ok(out)
}

fn carry_to<K: Eq + Hash + Clone + Debug>(table: &mut PopulationTable<K>, last_year: i32, level: &str) {
    let Some(latest) = table.latest_year() else {
        warn!(level, "no population to carry forward");
        return;
    };
    for year in latest + 1..=last_year {
        let n = table.carry_forward(latest, year);
        debug!(level, from = latest, to = year, rows = n, "population carried forward");
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn run(config: &PipelineConfig) -> Result<Manifest> {
    // ─── 1) plan ─────────────────────────────────────────────────────
    let plan = config.survey.plan().context("invalid survey configuration")?;
    let keys = planned_releases(config, &plan);
    info!(
        releases = keys.len(),
        latest_year = plan.partial_year(),
        latest_month = plan.latest_month(),
        "run planned"
    );

    // ─── 2) fetch ────────────────────────────────────────────────────
    let source = ReleaseSource::from_config(&config.source)?;
    let settings = FetchSettings::from(&config.source);
    let (fetched, fetch_report) = fetch_releases(&source, keys, &settings).await;

    // ─── 3) parse & clean on the blocking pool ───────────────────────
    let cleaned = tokio::task::spawn_blocking(move || process_releases(&fetched, &plan))
        .await
        .context("cleaning task panicked")??;
    let CleanedRecords {
        states,
        counties,
        places,
        unreadable,
    } = cleaned;

    // ─── 4) population ───────────────────────────────────────────────
    let population_dir = &config.inputs.population_dir;
    let mut state_pop = load_state_population(&population_dir.join("state"))?;
    let mut county_pop = load_county_population(&population_dir.join("county"))?;
    let mut place_pop = load_place_population(&population_dir.join("place"))?;
    if config.survey.carry_population_forward {
        carry_to(&mut state_pop, plan.partial_year(), "state");
        carry_to(&mut county_pop, plan.partial_year(), "county");
        carry_to(&mut place_pop, plan.partial_year(), "place");
    }
    let added = add_division_and_region_totals(&mut state_pop)?;
    let boroughs = add_borough_population(&mut place_pop, &county_pop);
    debug!(division_rows = added, borough_rows = boroughs, "derived population");

    // ─── 5) impute counties, resolve places ──────────────────────────
    let imputed = impute_pre_1990_counties(&places, config.survey.county_start_year);
    let (resolved, resolution) = resolve_places(places, &place_pop, &config.identity)?;
    let counties = harmonize_county_names(counties.into_iter().chain(imputed).collect());

    // ─── 6) aggregate ────────────────────────────────────────────────
    let crosswalk = Crosswalk::load(&config.inputs.crosswalk)?;
    let (metro_rows, metro_stats) =
        aggregate_metros(&counties, &county_pop, &crosswalk, plan.partial_year());
    let state_rows = state_records(&states, &state_pop)?;
    let county_rows = county_records(&counties, &county_pop)?;
    let place_rows = place_records(resolved)?;

    // ─── 7) write ────────────────────────────────────────────────────
    let out_dir = &config.output_dir;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let mut levels = BTreeMap::new();
    for (level, rows) in [
        (OutputLevel::States, &state_rows),
        (OutputLevel::Counties, &county_rows),
        (OutputLevel::Places, &place_rows),
        (OutputLevel::Metros, &metro_rows),
    ] {
        let summary = write_level(out_dir, level, rows)
            .with_context(|| format!("writing {} outputs", level.as_str()))?;
        levels.insert(level, summary);
    }

    let manifest = Manifest {
        generated_at: Utc::now(),
        latest_year: plan.partial_year(),
        latest_month: plan.latest_month(),
        fetch: fetch_report,
        unreadable_releases: unreadable,
        resolution,
        metros: metro_stats,
        levels,
    };
    write_json(&out_dir.join("manifest.json"), &manifest)?;
    info!(out = %out_dir.display(), "outputs written");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimeScale;

    #[test]
    fn test_planned_releases() -> anyhow::Result<()> {
        let mut config = PipelineConfig::default();
        config.survey.start_year = 2020;
        config.survey.county_start_year = 2021;
        config.survey.latest_year = 2023;
        config.survey.latest_month = 4;
        config.survey.last_year_annual_released = false;
        let plan = config.survey.plan()?;
        let keys = planned_releases(&config, &plan);

        // state: 2020, 2021 annual + 2022-12 + 2023-04
        // county: 2021 annual + 2022-12 + 2023-04
        // place: 4 regions × state's 4
        assert_eq!(keys.len(), 4 + 3 + 16);
        assert!(keys.iter().all(|k| k.validate().is_ok()));
        assert_eq!(
            keys.iter()
                .filter(|k| k.time_scale == TimeScale::MonthlyYearToDate && k.month == Some(4))
                .count(),
            6
        );
        Ok(())
    }

    const STATE_RELEASE: &str = "\
Survey,FIPS,Region,Division,State,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,State,Code,Code,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2019,01,3,6,ALABAMA,100,100,20000,5,10,1500,2,7,900,3,60,7000
";

    #[test]
    fn test_unreadable_release_is_skipped() -> anyhow::Result<()> {
        let plan = ReleasePlan::new(2023, 4, true)?;
        let fetched = vec![
            FetchedRelease {
                key: ReleaseKey::annual(Scale::State, 2019, None),
                text: STATE_RELEASE.to_string(),
            },
            FetchedRelease {
                key: ReleaseKey::annual(Scale::State, 2020, None),
                text: STATE_RELEASE.replacen("\n\n", "\nnot blank\n", 1),
            },
            FetchedRelease {
                key: ReleaseKey::year_to_date(Scale::State, 2023, 4, None),
                text: STATE_RELEASE.to_string(),
            },
        ];

        let cleaned = process_releases(&fetched, &plan)?;
        assert_eq!(cleaned.unreadable, 1);
        assert_eq!(cleaned.states.len(), 2);
        assert!(cleaned.states.iter().all(|s| s.permits.year != 2020));

        let annual = cleaned.states.iter().find(|s| s.permits.year == 2019).unwrap();
        assert_eq!(annual.permits.projected, None);
        // 177 units through April run to 354 more by December
        let partial = cleaned.states.iter().find(|s| s.permits.year == 2023).unwrap();
        assert_eq!(partial.permits.month, Some(4));
        assert_eq!(partial.permits.projected.map(|p| p.units), Some(354));
        Ok(())
    }

    #[test]
    fn test_carry_to_fills_later_years() {
        let mut table: PopulationTable<String> = PopulationTable::new();
        table.set("Ohio".into(), 2021, 10);
        carry_to(&mut table, 2023, "state");
        assert_eq!(table.get(&"Ohio".to_string(), 2023).known(), Some(10));
        assert_eq!(table.get(&"Ohio".to_string(), 2022).known(), Some(10));
    }
}
