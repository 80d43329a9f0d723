// src/output.rs
//! Parquet and JSON writers. Every file goes to a temp file next to its
//! destination and is persisted over it once complete.

use anyhow::{Context, Result};
use arrow::{
    array::{
        ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, ListBuilder, StringArray,
        StringBuilder, UInt32Array, UInt64Array,
    },
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::aggregate::AggregateRecord;
use crate::schema::{grid_column, Metric, PermitRecord, UnitSize};

/// One output table and its directory of per-geography documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLevel {
    States,
    Counties,
    Places,
    Metros,
}

impl OutputLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputLevel::States => "states",
            OutputLevel::Counties => "counties",
            OutputLevel::Places => "places",
            OutputLevel::Metros => "metros",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum NumericColumn {
    Grid(UnitSize, Metric),
    Total(Metric),
    Projected(Metric),
}

impl NumericColumn {
    fn all() -> Vec<Self> {
        let mut cols = Vec::with_capacity(18);
        for size in UnitSize::ALL {
            for metric in Metric::ALL {
                cols.push(NumericColumn::Grid(size, metric));
            }
        }
        cols.extend(Metric::ALL.map(NumericColumn::Total));
        cols.extend(Metric::ALL.map(NumericColumn::Projected));
        cols
    }

    fn name(&self) -> String {
        match self {
            NumericColumn::Grid(size, metric) => grid_column(*size, *metric),
            NumericColumn::Total(metric) => format!("total_{}", metric.slug()),
            NumericColumn::Projected(metric) => format!("projected_{}", metric.slug()),
        }
    }

    fn value(&self, permits: &PermitRecord) -> Option<i64> {
        match self {
            NumericColumn::Grid(size, metric) => Some(permits.counts.get(*size, *metric)),
            NumericColumn::Total(metric) => Some(permits.totals.get(*metric)),
            NumericColumn::Projected(metric) => permits.projected.map(|p| p.get(*metric)),
        }
    }
}

/// Arrow schema shared by every level's parquet table.
pub fn schema() -> Schema {
    let columns = NumericColumn::all();
    let mut fields = vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("id", DataType::Utf8, false),
        Field::new("path_1", DataType::Utf8, true),
        Field::new("path_2", DataType::Utf8, false),
        Field::new("alt_name", DataType::Utf8, true),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, true),
    ];
    for c in &columns {
        let nullable = matches!(c, NumericColumn::Projected(_));
        fields.push(Field::new(c.name(), DataType::Int64, nullable));
    }
    fields.push(Field::new("population", DataType::UInt64, true));
    for c in &columns {
        fields.push(Field::new(
            format!("{}_per_capita", c.name()),
            DataType::Float64,
            true,
        ));
    }
    fields.push(Field::new("imputed", DataType::Boolean, true));
    fields.push(Field::new(
        "county_names",
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
        true,
    ));
    Schema::new(fields)
}

pub fn to_record_batch(rows: &[&AggregateRecord]) -> Result<RecordBatch> {
    let columns = NumericColumn::all();
    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.id.as_str()),
        )),
        Arc::new(
            rows.iter()
                .map(|r| r.key.path.parent.as_deref())
                .collect::<StringArray>(),
        ),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.path.slug.as_str()),
        )),
        Arc::new(
            rows.iter()
                .map(|r| r.key.alt_name.as_deref())
                .collect::<StringArray>(),
        ),
        Arc::new(Int32Array::from_iter_values(
            rows.iter().map(|r| r.permits.year),
        )),
        Arc::new(rows.iter().map(|r| r.permits.month).collect::<UInt32Array>()),
    ];
    for c in &columns {
        arrays.push(Arc::new(
            rows.iter()
                .map(|r| c.value(&r.permits))
                .collect::<Int64Array>(),
        ));
    }
    arrays.push(Arc::new(
        rows.iter()
            .map(|r| r.population.known())
            .collect::<UInt64Array>(),
    ));
    for c in &columns {
        arrays.push(Arc::new(
            rows.iter()
                .map(|r| c.value(&r.permits).and_then(|v| r.per_capita(v)))
                .collect::<Float64Array>(),
        ));
    }
    arrays.push(Arc::new(rows.iter().map(|r| r.imputed).collect::<BooleanArray>()));

    let mut names = ListBuilder::new(StringBuilder::new());
    for r in rows {
        match &r.county_names {
            Some(list) => {
                for n in list {
                    names.values().append_value(n);
                }
                names.append(true);
            }
            None => names.append(false),
        }
    }
    arrays.push(Arc::new(names.finish()));

    RecordBatch::try_new(Arc::new(schema()), arrays).context("building record batch")
}

fn row_json(r: &AggregateRecord) -> Value {
    let mut m = Map::new();
    m.insert("name".into(), json!(r.key.name));
    m.insert("path_1".into(), json!(r.key.path.parent));
    m.insert("path_2".into(), json!(r.key.path.slug));
    m.insert("alt_name".into(), json!(r.key.alt_name));
    m.insert("year".into(), json!(r.permits.year));
    m.insert("month".into(), json!(r.permits.month));
    let columns = NumericColumn::all();
    for c in &columns {
        m.insert(c.name(), json!(c.value(&r.permits)));
    }
    m.insert("population".into(), json!(r.population.known()));
    for c in &columns {
        let per_capita = c.value(&r.permits).and_then(|v| r.per_capita(v));
        m.insert(format!("{}_per_capita", c.name()), json!(per_capita));
    }
    if let Some(imputed) = r.imputed {
        m.insert("imputed".into(), json!(imputed));
    }
    Value::Object(m)
}

/// Write through `write` into a temp file in `path`'s directory, then move it
/// into place.
pub fn write_atomic(path: &Path, write: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    write(tmp.as_file_mut())?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("persisting {}", path.display()))?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |f| {
        let mut w = BufWriter::new(f);
        serde_json::to_writer(&mut w, value)?;
        w.flush()?;
        Ok(())
    })
}

pub fn write_parquet(path: &Path, rows: &[&AggregateRecord]) -> Result<()> {
    let batch = to_record_batch(rows)?;
    write_atomic(path, |f| {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(f, batch.schema(), Some(props))
            .context("creating parquet writer")?;
        writer.write(&batch).context("writing batch")?;
        writer.close().context("closing parquet writer")?;
        Ok(())
    })
}

#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    name: &'a str,
    id: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    county_names: Option<&'a [String]>,
    population: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub rows: usize,
    pub geographies: usize,
}

fn document_path(data_dir: &Path, row: &AggregateRecord) -> PathBuf {
    let mut path = data_dir.to_path_buf();
    if let Some(parent) = &row.key.path.parent {
        path.push(parent);
    }
    path.push(format!("{}.json", row.key.path.slug));
    path
}

/// Write `{level}_annual.parquet`, one JSON document per geography under
/// `{level}_data/` and the `{level}_list.json` index.
#[tracing::instrument(level = "info", skip(rows), fields(rows = rows.len()))]
pub fn write_level(out_dir: &Path, level: OutputLevel, rows: &[AggregateRecord]) -> Result<LevelSummary> {
    let mut sorted: Vec<&AggregateRecord> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.key.id, a.permits.year, a.permits.month).cmp(&(&b.key.id, b.permits.year, b.permits.month))
    });

    // 1) parquet table
    let parquet_path = out_dir.join(format!("{}_annual.parquet", level.as_str()));
    write_parquet(&parquet_path, &sorted)?;
    debug!(path = %parquet_path.display(), "wrote parquet");

    // 2) one document per geography; rows of a geography are contiguous
    let data_dir = out_dir.join(format!("{}_data", level.as_str()));
    let mut entries = Vec::new();
    for group in sorted.chunk_by(|a, b| a.key.id == b.key.id) {
        let first = group[0];
        let doc: Vec<Value> = group.iter().map(|r| row_json(r)).collect();
        write_json(&document_path(&data_dir, first), &doc)?;

        entries.push(ListEntry {
            name: &first.key.name,
            id: &first.key.id,
            path: first.key.path.joined(),
            alt_name: first.key.alt_name.as_deref(),
            county_names: first.county_names.as_deref(),
            population: group.iter().rev().find_map(|r| r.population.known()),
        });
    }

    // 3) list index
    entries.sort_by(|a, b| a.name.cmp(b.name));
    let list_path = out_dir.join(format!("{}_list.json", level.as_str()));
    write_json(&list_path, &entries)?;

    let summary = LevelSummary {
        rows: sorted.len(),
        geographies: entries.len(),
    };
    info!(level = level.as_str(), rows = summary.rows, geographies = summary.geographies, "level written");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPath, GeographyKey, GeographyKind};
    use crate::population::Population;
    use crate::schema::{MetricTotals, PermitCounts};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn row(name: &str, year: i32, units: i64, population: Population) -> AggregateRecord {
        let mut counts = PermitCounts::default();
        counts.set(UnitSize::One, Metric::Units, units);
        AggregateRecord::new(
            GeographyKey {
                id: format!("41/{}", name),
                name: format!("{}, OR", name),
                kind: GeographyKind::Place,
                path: GeoPath::new(Some("OR"), name),
                alt_name: None,
            },
            PermitRecord::new(year, None, counts),
            population,
        )
    }

    #[test]
    fn test_write_level() -> Result<()> {
        let dir = tempdir()?;
        let mut partial = row("Bend", 2023, 30, Population::Known(0));
        partial.permits.month = Some(6);
        partial.permits.projected = Some(MetricTotals { bldgs: 0, units: 30, value: 0 });
        let rows = vec![
            row("Bend", 2022, 50, Population::Known(100_000)),
            partial,
            row("Salem", 2022, 20, Population::Unknown),
        ];

        let summary = write_level(dir.path(), OutputLevel::Places, &rows)?;
        assert_eq!(summary, LevelSummary { rows: 3, geographies: 2 });

        // parquet round trip keeps every row
        let file = File::open(dir.path().join("places_annual.parquet"))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        let mut total = 0;
        for batch in reader {
            let batch = batch?;
            assert_eq!(batch.num_columns(), schema().fields().len());
            total += batch.num_rows();
        }
        assert_eq!(total, 3);

        let doc: Vec<Value> = serde_json::from_str(&fs::read_to_string(
            dir.path().join("places_data/OR/Bend.json"),
        )?)?;
        assert_eq!(doc.len(), 2);
        assert_eq!(doc[0]["total_units"], json!(50));
        assert_eq!(doc[0]["total_units_per_capita"], json!(0.0005));
        assert_eq!(doc[0]["projected_units"], Value::Null);
        // zero population divides by one
        assert_eq!(doc[1]["total_units_per_capita"], json!(30.0));
        assert_eq!(doc[1]["projected_units"], json!(30));
        assert_eq!(doc[1]["month"], json!(6));

        let list: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("places_list.json"))?)?;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], json!("Bend, OR"));
        assert_eq!(list[0]["path"], json!("OR/Bend"));
        assert_eq!(list[0]["population"], json!(0));
        assert_eq!(list[1]["population"], Value::Null);
        Ok(())
    }
}
