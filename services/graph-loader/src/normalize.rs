//! Row normalization: tabular files in, one typed record per metric cell out.
//!
//! Identity columns are located once per table through `COLUMN_SYNONYMS`.
//! Every other named column is a metric; wide rows are unpivoted so each
//! non-blank numeric cell becomes its own record.

use calamine::{open_workbook_auto, Data, Range, Reader};
use encoding_rs::WINDOWS_1252;
use std::path::Path;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::identity::clean_text;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xlsx", "xlsm", "xls", "xlsb", "ods"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    State,
    Region,
    County,
    Year,
    Fips,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::State => "state",
            Field::Region => "region",
            Field::County => "county",
            Field::Year => "year",
            Field::Fips => "county fips",
        }
    }
}

/// Accepted header variants, compared after `normalize_header`.
const COLUMN_SYNONYMS: &[(Field, &[&str])] = &[
    (Field::State, &["state", "state name", "st"]),
    (
        Field::Region,
        &[
            "region",
            "region name",
            "edd",
            "edd name",
            "economic development district",
        ],
    ),
    (Field::County, &["county", "county name"]),
    (Field::Year, &["year", "yr", "data year", "fiscal year"]),
    (
        Field::Fips,
        &["county id", "fips", "fips id", "fips code", "county fips"],
    ),
];

fn synonyms(field: Field) -> &'static [&'static str] {
    COLUMN_SYNONYMS
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

fn is_identity_header(normalized: &str) -> bool {
    COLUMN_SYNONYMS
        .iter()
        .any(|(_, names)| names.contains(&normalized))
}

/// Lowercase, treat `_`/`-` as spaces, collapse whitespace.
fn normalize_header(raw: &str) -> String {
    clean_text(&raw.replace(|c: char| c == '_' || c == '-', " ")).to_lowercase()
}

/// One metric observation, before hierarchy is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub state: String,
    pub region: String,
    pub county: String,
    pub fips_id: Option<String>,
    pub year: i64,
    pub metric: String,
    pub value: f64,
    pub location: String, // e.g. "Demographics.csv:line=5"
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::String(s) => Cell::from_text(s),
            other => Cell::from_text(&other.to_string()),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Display form for identity columns. Integral numbers lose the `.0`
    /// spreadsheets add (FIPS 48113 rather than 48113.0).
    fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(f) if f.fract() == 0.0 && f.abs() < 1e15 => {
                Some(format!("{}", *f as i64))
            }
            Cell::Number(f) => Some(f.to_string()),
        }
    }

    /// Numeric value of a metric cell; thousands separators are accepted.
    fn number(&self) -> Option<f64> {
        let value = match self {
            Cell::Empty => return None,
            Cell::Number(f) => *f,
            Cell::Text(s) => s.replace(',', "").trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    fn year(&self) -> Option<i64> {
        match self {
            Cell::Number(f) if f.fract() == 0.0 => Some(*f as i64),
            Cell::Text(s) => s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            _ => None,
        }
    }
}

/// Column positions resolved from a header row.
#[derive(Debug, Clone, PartialEq)]
struct ColumnLayout {
    state: usize,
    region: usize,
    county: usize,
    year: usize,
    fips: Option<usize>,
    metrics: Vec<(usize, String)>,
}

impl ColumnLayout {
    fn resolve(source: &str, headers: &[String]) -> Result<Self, IngestError> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

        let find = |field: Field| {
            let accepted = synonyms(field);
            normalized.iter().position(|h| accepted.contains(&h.as_str()))
        };
        let require = |field: Field| {
            find(field).ok_or_else(|| {
                IngestError::Schema(format!(
                    "{}: missing required column '{}' (accepted headers: {})",
                    source,
                    field.label(),
                    synonyms(field).join(", ")
                ))
            })
        };

        let state = require(Field::State)?;
        let region = require(Field::Region)?;
        let county = require(Field::County)?;
        let year = require(Field::Year)?;
        let fips = find(Field::Fips);

        // Every synonym match is an identity column, even a second one
        // ("Year" and "Fiscal Year"); only the first is read.
        let metrics: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter_map(|(idx, header)| {
                let name = clean_text(header);
                if is_identity_header(&normalized[idx]) {
                    if ![state, region, county, year].contains(&idx) && fips != Some(idx) {
                        debug!(
                            source = %source,
                            header = %name,
                            "ignoring duplicate identity column"
                        );
                    }
                    return None;
                }
                // pandas writes its index as an "Unnamed: 0" column
                if name.is_empty() || normalized[idx].starts_with("unnamed:") {
                    None
                } else {
                    Some((idx, name))
                }
            })
            .collect();

        if metrics.is_empty() {
            return Err(IngestError::Schema(format!(
                "{}: no metric columns besides state/region/county/year",
                source
            )));
        }

        Ok(Self {
            state,
            region,
            county,
            year,
            fips,
            metrics,
        })
    }
}

#[derive(Debug)]
struct RowIdentity {
    state: String,
    region: String,
    county: String,
    year: i64,
    fips_id: Option<String>,
}

/// A loaded sheet (or CSV file) with its column layout resolved.
#[derive(Debug)]
pub struct Table {
    source: String,
    layout: ColumnLayout,
    rows: Vec<Vec<Cell>>,
    /// 1-indexed line (or sheet row) of the header.
    header_line: usize,
}

impl Table {
    pub fn new(
        source: &str,
        headers: &[String],
        rows: Vec<Vec<Cell>>,
    ) -> Result<Self, IngestError> {
        let layout = ColumnLayout::resolve(source, headers)?;
        debug!(
            source = %source,
            metrics = layout.metrics.len(),
            rows = rows.len(),
            "resolved column layout"
        );
        Ok(Self {
            source: source.to_string(),
            layout,
            rows,
            header_line: 1,
        })
    }

    pub fn from_csv(source: &str, content: &str) -> Result<Self, IngestError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| IngestError::Format(format!("{}: unreadable header row: {}", source, e)))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for (line_idx, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                IngestError::Format(format!("{}: line {}: {}", source, line_idx + 2, e))
            })?;
            rows.push(record.iter().map(Cell::from_text).collect());
        }

        Self::new(source, &headers, rows)
    }

    pub fn from_range(source: &str, range: &Range<Data>) -> Result<Self, IngestError> {
        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|header| {
                header
                    .iter()
                    .map(|cell| Cell::from_data(cell).text().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        let body = rows
            .map(|row| row.iter().map(Cell::from_data).collect())
            .collect();
        let mut table = Self::new(source, &headers, body)?;
        // sheets with leading blank rows start lower down
        table.header_line = range.start().map(|(row, _)| row as usize).unwrap_or(0) + 1;
        Ok(table)
    }

    /// Lazily unpivot every data row.
    ///
    /// Fully blank rows are skipped. A row with a blank or unparseable
    /// identity cell yields a `SchemaError`; blank or non-numeric metric
    /// cells are skipped rather than read as zero.
    pub fn records(&self) -> impl Iterator<Item = Result<NormalizedRecord, IngestError>> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.iter().all(Cell::is_blank))
            .flat_map(move |(idx, row)| self.unpivot(self.header_line + 1 + idx, row))
    }

    fn identity(&self, location: &str, row: &[Cell]) -> Result<RowIdentity, IngestError> {
        let cell = |idx: usize| row.get(idx).unwrap_or(&Cell::Empty);
        let required = |idx: usize, what: &str| {
            cell(idx)
                .text()
                .ok_or_else(|| IngestError::Schema(format!("{}: blank {} value", location, what)))
        };

        let year_cell = cell(self.layout.year);
        let year = year_cell.year().ok_or_else(|| {
            IngestError::Schema(format!(
                "{}: unparseable year {:?}",
                location,
                year_cell.text().unwrap_or_default()
            ))
        })?;

        Ok(RowIdentity {
            state: required(self.layout.state, "state")?,
            region: required(self.layout.region, "region")?,
            county: required(self.layout.county, "county")?,
            year,
            fips_id: self.layout.fips.and_then(|idx| cell(idx).text()),
        })
    }

    fn unpivot(&self, line: usize, row: &[Cell]) -> Vec<Result<NormalizedRecord, IngestError>> {
        let location = format!("{}:line={}", self.source, line);
        let identity = match self.identity(&location, row) {
            Ok(identity) => identity,
            Err(e) => return vec![Err(e)],
        };
        let cell = |idx: usize| row.get(idx).unwrap_or(&Cell::Empty);

        self.layout
            .metrics
            .iter()
            .filter_map(|(idx, metric)| {
                let raw = cell(*idx);
                let value = match raw.number() {
                    Some(v) => v,
                    None => {
                        if !raw.is_blank() {
                            debug!(
                                location = %location,
                                metric = %metric,
                                "skipping non-numeric metric cell"
                            );
                        }
                        return None;
                    }
                };
                Some(Ok(NormalizedRecord {
                    state: identity.state.clone(),
                    region: identity.region.clone(),
                    county: identity.county.clone(),
                    fips_id: identity.fips_id.clone(),
                    year: identity.year,
                    metric: metric.clone(),
                    value,
                    location: location.clone(),
                }))
            })
            .collect()
    }
}

/// CSV exports from older spreadsheet tools are often Windows-1252.
fn decode_csv(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let (text, _, _) = WINDOWS_1252.decode(e.as_bytes());
            text.into_owned()
        }
    }
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_workbook(path: &Path, file_name: &str) -> Result<Vec<Table>, IngestError> {
    // calamine auto-detects format: xls, xlsx, xlsb, ods
    let mut workbook: calamine::Sheets<_> = open_workbook_auto(path)
        .map_err(|e| IngestError::Format(format!("{}: cannot open workbook: {}", file_name, e)))?;

    let mut tables = Vec::new();
    for sheet in workbook.sheet_names().to_vec() {
        let range = workbook.worksheet_range(&sheet).map_err(|e| {
            IngestError::Format(format!("{}: cannot read sheet '{}': {}", file_name, sheet, e))
        })?;
        if range.is_empty() {
            debug!(file = %file_name, sheet = %sheet, "skipping empty sheet");
            continue;
        }
        tables.push(Table::from_range(&format!("{}#{}", file_name, sheet), &range)?);
    }

    if tables.is_empty() {
        return Err(IngestError::Format(format!(
            "{}: workbook has no non-empty sheets",
            file_name
        )));
    }
    Ok(tables)
}

/// Open a CSV or workbook. Every non-empty sheet of a workbook is a table.
pub fn load_tables(path: &Path) -> Result<Vec<Table>, IngestError> {
    let file_name = display_name(path);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => {
            let bytes = std::fs::read(path)
                .map_err(|e| IngestError::Format(format!("{}: {}", file_name, e)))?;
            Ok(vec![Table::from_csv(&file_name, &decode_csv(bytes))?])
        }
        ext if SUPPORTED_EXTENSIONS.contains(&ext) => load_workbook(path, &file_name),
        other => Err(IngestError::Format(format!(
            "{}: unsupported file extension '{}' (expected one of: {})",
            file_name,
            other,
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

/// Load a file and drain its records; the first bad row fails the file.
pub fn read_records(path: &Path) -> Result<Vec<NormalizedRecord>, IngestError> {
    let tables = load_tables(path)?;
    let records = tables
        .iter()
        .flat_map(Table::records)
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        file = %display_name(path),
        tables = tables.len(),
        records = records.len(),
        "normalized file"
    );
    Ok(records)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;

    fn parse(csv: &str) -> Result<Vec<NormalizedRecord>, IngestError> {
        Table::from_csv("test.csv", csv)?.records().collect()
    }

    // -------------------------------------------------------------------------
    // UNPIVOT TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_wide_row_unpivots_one_record_per_metric() {
        let csv = "State,Region,County,Year,Population,Employment\n\
                   Texas,North Texas,Dallas,2020,500000,250000\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metric, "Population");
        assert_eq!(records[0].value, 500000.0);
        assert_eq!(records[1].metric, "Employment");
        assert_eq!(records[1].value, 250000.0);
        assert_eq!(records[1].county, "Dallas");
        assert_eq!(records[1].year, 2020);
    }

    #[test]
    fn test_blank_metric_cells_are_skipped_not_zeroed() {
        let csv = "State,Region,County,Year,Population,Employment\n\
                   Texas,North Texas,Dallas,2020,,250000\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "Employment");
    }

    #[test]
    fn test_non_numeric_metric_cells_are_skipped() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,N/A\n";
        assert!(parse(csv).unwrap().is_empty());
    }

    #[test]
    fn test_thousands_separators_are_accepted() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,\"1,234,567.5\"\n";
        assert_eq!(parse(csv).unwrap()[0].value, 1234567.5);
    }

    #[test]
    fn test_zero_is_a_real_value() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,0\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 0.0);
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,1\n\
                   ,,,,\n";
        assert_eq!(parse(csv).unwrap().len(), 1);
    }

    #[test]
    fn test_line_location() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,1\n\
                   Texas,North Texas,Collin,2020,2\n";
        let records = parse(csv).unwrap();
        assert_eq!(records[0].location, "test.csv:line=2");
        assert_eq!(records[1].location, "test.csv:line=3");
    }

    // -------------------------------------------------------------------------
    // COLUMN SYNONYM TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_column_synonyms_and_casing() {
        let csv = "STATE,EDD Name,County Name,year,Population\n\
                   Texas,North Texas,Dallas,2020,1\n";
        let records = parse(csv).unwrap();
        assert_eq!(records[0].region, "North Texas");
        assert_eq!(records[0].county, "Dallas");
    }

    #[test]
    fn test_column_synonyms_with_underscores() {
        let csv = "state_name,economic_development_district,county_name,data_year,Population\n\
                   Texas,North Texas,Dallas,2020,1\n";
        assert_eq!(parse(csv).unwrap().len(), 1);
    }

    #[test]
    fn test_fips_column_is_identity_not_metric() {
        let csv = "State,Region,County,county_id,Year,Population\n\
                   Texas,North Texas,Dallas,48113,2020,1\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fips_id.as_deref(), Some("48113"));
    }

    #[test]
    fn test_second_synonym_column_is_not_a_metric() {
        let csv = "State,Region,County,County Name,Year,Fiscal Year,Population\n\
                   Texas,North Texas,Dallas,Dallas County,2020,2021,1\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "Population");
        assert_eq!(records[0].county, "Dallas");
        assert_eq!(records[0].year, 2020);
    }

    #[test]
    fn test_only_duplicate_identity_columns_fails() {
        let csv = "State,Region,County,Year,Fiscal Year\n\
                   Texas,North Texas,Dallas,2020,2021\n";
        let err = parse(csv).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn test_pandas_index_column_is_ignored() {
        let csv = "Unnamed: 0,State,Region,County,Year,Population\n\
                   0,Texas,North Texas,Dallas,2020,1\n";
        let records = parse(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "Population");
    }

    // -------------------------------------------------------------------------
    // SCHEMA ERROR TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_county_column_fails() {
        let csv = "State,Region,Year,Population\nTexas,North Texas,2020,1\n";
        let err = parse(csv).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
        assert!(err.to_string().contains("county"));
    }

    #[test]
    fn test_missing_year_column_fails() {
        let csv = "State,Region,County,Population\nTexas,North Texas,Dallas,1\n";
        assert_eq!(parse(csv).unwrap_err().kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn test_unparseable_year_fails() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,twenty,1\n";
        let err = parse(csv).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaError);
        assert!(err.to_string().contains("line=2"));
    }

    #[test]
    fn test_decimal_year_text_is_accepted() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020.0,1\n";
        assert_eq!(parse(csv).unwrap()[0].year, 2020);
    }

    #[test]
    fn test_blank_county_cell_fails() {
        let csv = "State,Region,County,Year,Population\n\
                   Texas,North Texas,,2020,1\n";
        assert_eq!(parse(csv).unwrap_err().kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn test_no_metric_columns_fails() {
        let csv = "State,Region,County,Year\nTexas,North Texas,Dallas,2020\n";
        assert_eq!(parse(csv).unwrap_err().kind(), ErrorKind::SchemaError);
    }

    #[test]
    fn test_empty_file_is_schema_error() {
        assert_eq!(parse("").unwrap_err().kind(), ErrorKind::SchemaError);
    }

    // -------------------------------------------------------------------------
    // ENCODING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_bom_is_stripped() {
        let csv = "\u{feff}State,Region,County,Year,Population\n\
                   Texas,North Texas,Dallas,2020,1\n";
        assert_eq!(parse(csv).unwrap().len(), 1);
    }

    #[test]
    fn test_windows_1252_fallback() {
        let mut bytes = b"State,Region,County,Year,Population\nNuevo Le".to_vec();
        bytes.push(0xF3); // 'ó' in Windows-1252
        bytes.extend_from_slice(b"n,Norte,Monterrey,2020,1\n");
        let text = decode_csv(bytes);
        let records = parse(&text).unwrap();
        assert_eq!(records[0].state, "Nuevo León");
    }

    // -------------------------------------------------------------------------
    // SPREADSHEET TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_range_numbers_and_text() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 5));
        let headers = ["State", "Region", "County", "FIPS", "Year", "Population"];
        for (col, header) in headers.iter().enumerate() {
            range.set_value((0, col as u32), Data::String(header.to_string()));
        }
        range.set_value((1, 0), Data::String("Texas".into()));
        range.set_value((1, 1), Data::String("North Texas".into()));
        range.set_value((1, 2), Data::String("Dallas".into()));
        range.set_value((1, 3), Data::Float(48113.0));
        range.set_value((1, 4), Data::Float(2020.0));
        range.set_value((1, 5), Data::Int(500000));
        // row 2 stays empty: trailing blank spreadsheet row

        let table = Table::from_range("Demographics.xlsx#Sheet1", &range).unwrap();
        let records: Vec<_> = table.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].year, 2020);
        assert_eq!(records[0].value, 500000.0);
        assert_eq!(records[0].fips_id.as_deref(), Some("48113"));
        assert_eq!(records[0].location, "Demographics.xlsx#Sheet1:line=2");
    }

    #[test]
    fn test_range_with_leading_blank_rows_keeps_sheet_lines() {
        // data begins on sheet row 4 (1-indexed), header on row 3
        let mut range: Range<Data> = Range::new((2, 0), (4, 4));
        let headers = ["State", "Region", "County", "Year", "Population"];
        for (col, header) in headers.iter().enumerate() {
            range.set_value((2, col as u32), Data::String(header.to_string()));
        }
        let values = ["Texas", "North Texas", "Dallas"];
        for row in [3, 4] {
            for (col, value) in values.iter().enumerate() {
                range.set_value((row, col as u32), Data::String(value.to_string()));
            }
            range.set_value((row, 3), Data::Float(2020.0 + f64::from(row)));
            range.set_value((row, 4), Data::Int(1));
        }

        let table = Table::from_range("Demographics.xlsx#Sheet1", &range).unwrap();
        let records: Vec<_> = table.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records[0].location, "Demographics.xlsx#Sheet1:line=4");
        assert_eq!(records[1].location, "Demographics.xlsx#Sheet1:line=5");
    }

    // -------------------------------------------------------------------------
    // FILE LOADING TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_unsupported_extension_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Agriculture.txt");
        std::fs::write(&path, "State,Region,County,Year,X\n").unwrap();
        let err = read_records(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }

    #[test]
    fn test_unreadable_workbook_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Agriculture.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        assert_eq!(read_records(&path).unwrap_err().kind(), ErrorKind::FormatError);
    }

    #[test]
    fn test_read_records_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Demographics.CSV");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "State,Region,County,Year,Population").unwrap();
        writeln!(file, "Texas,North Texas,Dallas,2020,500000").unwrap();
        drop(file);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].location, "Demographics.CSV:line=2");
    }

    #[test]
    fn test_missing_file_is_format_error() {
        let err = read_records(Path::new("/nonexistent/Demographics.csv")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }
}
