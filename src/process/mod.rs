// src/process/mod.rs
use csv::ReaderBuilder;
use tracing::{debug, trace};

use crate::error::{BpsError, Result};
use crate::schema::{HeaderShape, ReleaseKey};

pub mod clean;
pub mod record;
pub mod utils;

/// Body text of the Census "page not found" response.
pub const NOT_AVAILABLE_MARKER: &str =
    "Sorry, the page you requested has either been moved or is no longer available on this server.";

/// Columns no downstream stage reads.
const UNUSED_COLUMNS: &[&str] = &[
    "survey_date",
    "msa/cmsa",
    "pmsa_code",
    "central_city",
    "zip_code",
    "csa_csa",
    "cbsa_code",
    "csa_code",
    "footnote_code",
    "fips mcd_code",
    "census place_code",
    "1_unit_bldgs_reported",
    "1_unit_units_reported",
    "1_unit_value_reported",
    "2_units_bldgs_reported",
    "2_units_units_reported",
    "2_units_value_reported",
    "3_to_4_units_bldgs_reported",
    "3_to_4_units_units_reported",
    "3_to_4_units_value_reported",
    "5_plus_units_bldgs_reported",
    "5_plus_units_units_reported",
    "5_plus_units_value_reported",
    // legacy county spellings
    "5+units rep_bldgs",
    "5+units rep_units",
    "5+units rep_value",
    "34_unit rep_bldgs",
    "34_unit rep_units",
    "34_unit rep_value",
    "5_unit rep_bldgs",
    "5_unit rep_units",
];

/// One release after header canonicalisation.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub release: ReleaseKey,
    /// Canonical column names, one per body cell.
    pub headers: Vec<String>,
    /// Body rows, positionally aligned with `headers`.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Like [`column_index`](Self::column_index) but a missing column is a format error.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            BpsError::format(self.release, format!("missing column `{}`", name))
        })
    }

    /// Remove survey metadata and `*_reported` columns.
    pub fn drop_unused_columns(&mut self) {
        let keep: Vec<bool> = self
            .headers
            .iter()
            .map(|h| !UNUSED_COLUMNS.contains(&h.as_str()))
            .collect();
        if keep.iter().all(|k| *k) {
            return;
        }
        let filter = |cells: &mut Vec<String>| {
            let mut i = 0;
            cells.retain(|_| {
                let k = keep.get(i).copied().unwrap_or(true);
                i += 1;
                k
            });
        };
        filter(&mut self.headers);
        for row in self.rows.iter_mut() {
            filter(row);
        }
    }
}

/// Split off the first line (without its terminator) from `text`.
fn split_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(pos) => (text[..pos].trim_end_matches('\r'), &text[pos + 1..]),
        None => (text.trim_end_matches('\r'), ""),
    }
}

fn header_tokens(line: &str) -> Vec<String> {
    line.trim_end().split(',').map(str::to_string).collect()
}

/// Parse one raw release into a [`RawTable`] with canonical column names.
///
/// Fails with `NotFound` when the text is the server's "not available" page and
/// with `Format` when the header does not fit the shape expected for the release,
/// the separator line is not blank, or a body row is wider than the header.
#[tracing::instrument(level = "debug", skip(text), fields(release = %release))]
pub fn parse_release(text: &str, release: ReleaseKey) -> Result<RawTable> {
    if text.contains(NOT_AVAILABLE_MARKER) {
        return Err(BpsError::not_found(release));
    }

    // Names containing a comma are not quoted in some years.
    let text = text
        .replace("Bristol, VA", "\"Bristol, VA\"")
        .replace("Bristol, TN", "\"Bristol, TN\"");

    // 1) two header lines + mandatory blank separator
    let (line_1, rest) = split_line(&text);
    let (line_2, rest) = split_line(rest);
    let (separator, body) = split_line(rest);
    if !separator.trim().is_empty() {
        return Err(BpsError::format(
            release,
            format!("expected a blank line after the header, found {:?}", separator),
        ));
    }

    // 2) canonical column names
    let shape = HeaderShape::for_release(release.scale, release.year, release.region);
    let headers = shape
        .column_names(&header_tokens(line_1), &header_tokens(line_2))
        .map_err(|reason| BpsError::format(release, reason))?;
    debug!(?shape, columns = headers.len(), "resolved header");

    // 3) body rows, strictly by position
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        let mut row: Vec<String> = record
            .iter()
            .map(|cell| cell.trim_end_matches('\x1a').to_string())
            .collect();

        if row.iter().all(|c| c.trim().is_empty()) {
            trace!(idx, "skipping blank row");
            continue;
        }
        if row.len() > headers.len() {
            return Err(BpsError::format(
                release,
                format!(
                    "row {} has {} cells but the header has {}",
                    idx,
                    row.len(),
                    headers.len()
                ),
            ));
        }
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    Ok(RawTable {
        release,
        headers,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Region, Scale};
    use anyhow::Result;

    pub(crate) const STATE_RELEASE: &str = "\
Survey,FIPS,Region,Division,State,,1-unit,,,2-units,,,3-4 units,,,5+ units,
Date,State,Code,Code,Name,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,Bldgs,Units,Value,

2019,01,3,6,Alabama,100,100,20000,5,10,1500,2,7,900,3,60,7000
2019,00,0,0,United States,1000,1000,300000,50,100,15000,20,70,9000,30,600,70000
";

    #[test]
    fn test_parse_state_release() -> Result<()> {
        let release = ReleaseKey::annual(Scale::State, 2019, None);
        let table = parse_release(STATE_RELEASE, release)?;
        assert_eq!(table.headers.len(), 18);
        assert_eq!(table.headers[4], "state_name");
        assert_eq!(table.headers[17], "");
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][4], "Alabama");
        assert_eq!(table.rows[0].len(), 18);
        let units = table.require_column("5_plus_units_units")?;
        assert_eq!(table.rows[1][units], "600");
        Ok(())
    }

    #[test]
    fn test_separator_must_be_blank() {
        let text = STATE_RELEASE.replacen("\n\n", "\noops\n", 1);
        let release = ReleaseKey::annual(Scale::State, 2019, None);
        assert!(matches!(
            parse_release(&text, release),
            Err(BpsError::Format { .. })
        ));
    }

    #[test]
    fn test_not_available_marker() {
        let text = format!("<html><body>{}</body></html>", NOT_AVAILABLE_MARKER);
        let release = ReleaseKey::annual(Scale::Place, 1979, Some(Region::West));
        let err = parse_release(&text, release).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wide_rows_are_rejected() {
        let text = format!("{}2019,02,4,9,Alaska,1,1,1,0,0,0,0,0,0,0,0,0,,extra\n", STATE_RELEASE);
        let release = ReleaseKey::annual(Scale::State, 2019, None);
        assert!(matches!(
            parse_release(&text, release),
            Err(BpsError::Format { .. })
        ));
    }

    #[test]
    fn test_bristol_is_quoted() -> Result<()> {
        let text = "\
State,Place,,1-unit,
Code,Name,Bldgs,Units,Value,

51,Bristol, VA,1,1,100
";
        let release = ReleaseKey::annual(Scale::Place, 2005, Some(Region::South));
        let table = parse_release(text, release)?;
        assert_eq!(table.rows[0][1], "Bristol, VA");
        assert_eq!(table.rows[0][2], "1");
        Ok(())
    }

    #[test]
    fn test_drop_unused_columns() -> Result<()> {
        let release = ReleaseKey::annual(Scale::State, 2019, None);
        let mut table = parse_release(STATE_RELEASE, release)?;
        table.drop_unused_columns();
        assert_eq!(table.headers[0], "fips_state");
        assert!(table.column_index("survey_date").is_none());
        assert_eq!(table.rows[0][0], "01");
        Ok(())
    }
}
