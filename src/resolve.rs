// resolve.rs
//
// Pass 1 over a series-family file: discover, once per platform, which columns
// of the platform annotation table and of the sample tables hold probe ids and
// gene names / expression values, and accumulate missing-value statistics that
// drive the zeros-as-missing decision.

use std::collections::HashMap;
use std::io::BufRead;

use log::{debug, warn};

use crate::error::ParseError;
use crate::scan::{self, LineEvent, TableKind};

/// At most this many rows of a subtable are captured for column discovery. A
/// table that closes earlier is resolved with whatever rows were collected.
pub const DISCOVERY_ROW_LIMIT: usize = 5;

/// Resolved column indices for one subtable family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnPair {
    pub id_col: usize,
    pub value_col: usize,
}

/// Raw answer from a decision source. Negative indices signal cancellation of
/// the whole parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnChoice {
    pub id_col: i64,
    pub value_col: i64,
}

/// The injected column-resolution decision source. Implementations may be a
/// fixed configuration, keyword matching against the header row, or an
/// interactive prompt; the parser core never performs terminal I/O itself.
pub trait ColumnChooser {
    /// Pick the probe-id and gene-name columns of a platform annotation table.
    fn choose_platform_columns(
        &mut self,
        platform_id: &str,
        rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError>;

    /// Pick the probe-id and expression-value columns of the sample tables on
    /// `platform_id`. Invoked for the first sample seen on that platform.
    fn choose_sample_columns(
        &mut self,
        platform_id: &str,
        sample_id: &str,
        rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError>;
}

/// Configured mode: indices supplied up front, no sampling involved.
#[derive(Debug, Clone, Copy)]
pub struct FixedChooser {
    pub platform: ColumnChoice,
    pub sample: ColumnChoice,
}

impl ColumnChooser for FixedChooser {
    fn choose_platform_columns(
        &mut self,
        _platform_id: &str,
        _rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError> {
        Ok(self.platform)
    }

    fn choose_sample_columns(
        &mut self,
        _platform_id: &str,
        _sample_id: &str,
        _rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError> {
        Ok(self.sample)
    }
}

/// Keywords recognized in table header rows, conservative set.
pub const PLATFORM_PROBE_KEYWORDS: &[&str] = &["ID"];
pub const GENE_NAME_KEYWORDS: &[&str] = &[
    "ORF",
    "GB_ACC",
    "GENOME_ACC",
    "RANGE_GB",
    "GB_LIST",
    "Gene Symbol",
    "GENE_SYMBOL",
];
pub const SAMPLE_PROBE_KEYWORDS: &[&str] = &["ID_REF"];
pub const VALUE_KEYWORDS: &[&str] = &["VALUE"];

/// Auto mode: the first captured row of each subtable is its column-header
/// row, so columns can be located by matching header cells against the
/// keyword lists above (in prioritized order for gene names).
#[derive(Debug, Default)]
pub struct KeywordChooser;

fn find_keyword_column(header: &[String], keywords: &[&str]) -> Option<usize> {
    keywords
        .iter()
        .find_map(|kw| header.iter().position(|cell| cell.trim() == *kw))
}

impl ColumnChooser for KeywordChooser {
    fn choose_platform_columns(
        &mut self,
        platform_id: &str,
        rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError> {
        let header = rows.first().map(Vec::as_slice).unwrap_or(&[]);
        let id_col = find_keyword_column(header, PLATFORM_PROBE_KEYWORDS).ok_or_else(|| {
            ParseError::ColumnDetection {
                section: format!("platform {platform_id}"),
                what: "probe id",
            }
        })?;
        let name_col = find_keyword_column(header, GENE_NAME_KEYWORDS).ok_or_else(|| {
            ParseError::ColumnDetection {
                section: format!("platform {platform_id}"),
                what: "gene name",
            }
        })?;
        debug!(
            "platform {}: detected probe id column {} and gene name column {} from header keywords",
            platform_id, id_col, name_col
        );
        Ok(ColumnChoice {
            id_col: id_col as i64,
            value_col: name_col as i64,
        })
    }

    fn choose_sample_columns(
        &mut self,
        platform_id: &str,
        sample_id: &str,
        rows: &[Vec<String>],
    ) -> Result<ColumnChoice, ParseError> {
        let header = rows.first().map(Vec::as_slice).unwrap_or(&[]);
        let section = || format!("sample {sample_id} on platform {platform_id}");
        let id_col = find_keyword_column(header, SAMPLE_PROBE_KEYWORDS).ok_or_else(|| {
            ParseError::ColumnDetection {
                section: section(),
                what: "probe id",
            }
        })?;
        let value_col = find_keyword_column(header, VALUE_KEYWORDS).ok_or_else(|| {
            ParseError::ColumnDetection {
                section: section(),
                what: "expression value",
            }
        })?;
        debug!(
            "platform {}: detected sample probe id column {} and value column {} from header keywords",
            platform_id, id_col, value_col
        );
        Ok(ColumnChoice {
            id_col: id_col as i64,
            value_col: value_col as i64,
        })
    }
}

/// Transposed view of the captured rows, one line per column, used by the
/// interactive chooser. Rows shorter than the widest one are padded with `--`.
pub fn format_column_preview(rows: &[Vec<String>]) -> String {
    let num_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = String::new();
    for col in 0..num_cols {
        out.push_str(&col.to_string());
        for row in rows {
            out.push('\t');
            out.push_str(row.get(col).map(String::as_str).unwrap_or("--"));
        }
        out.push('\n');
    }
    out
}

/// Explicit classification of a sample-table cell; replaces ad-hoc numeric
/// coercion so that non-numeric text is never mistaken for a zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// Empty cell.
    Missing,
    /// Numeric and exactly zero.
    Zero,
    /// Anything else, numeric or not; passed through verbatim at emit time.
    Present,
}

pub fn classify_value(raw: &str) -> ValueClass {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ValueClass::Missing;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v == 0.0 => ValueClass::Zero,
        _ => ValueClass::Present,
    }
}

/// A zero written with a long fractional part ("0.00000") is taken to be a
/// deliberate measurement rather than a placeholder for a missing one.
const PRECISE_ZERO_DECIMALS: usize = 5;

fn zero_is_precise(raw: &str) -> bool {
    raw.trim()
        .split_once('.')
        .is_some_and(|(_, frac)| frac.len() >= PRECISE_ZERO_DECIMALS)
}

/// Running counters over every sample-table data row, advisory input to the
/// zeros-as-missing decision.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MissingValueStats {
    pub missing: u64,
    pub zero: u64,
    pub present: u64,
    /// Zeros in short form ("0", "0.0").
    pub zero_plain: u64,
    /// Zeros with at least five fractional digits.
    pub zero_precise: u64,
}

impl MissingValueStats {
    pub fn record(&mut self, raw: &str) {
        match classify_value(raw) {
            ValueClass::Missing => self.missing += 1,
            ValueClass::Present => self.present += 1,
            ValueClass::Zero => {
                self.zero += 1;
                if zero_is_precise(raw) {
                    self.zero_precise += 1;
                } else {
                    self.zero_plain += 1;
                }
            }
        }
    }

    /// Heuristic for `--zero-policy auto`: short-form zeros outnumbering
    /// precise ones suggest the platform encodes missing values as zero.
    pub fn suggest_zeros_as_missing(&self) -> bool {
        self.zero_plain > self.zero_precise
    }
}

/// Everything pass 1 learns about the file.
#[derive(Debug, Default)]
pub struct FirstPass {
    /// Per platform: columns of the annotation table.
    pub platform_columns: HashMap<String, ColumnPair>,
    /// Per platform: columns shared by every sample table on that platform.
    pub sample_columns: HashMap<String, ColumnPair>,
    pub sample_platform: HashMap<String, String>,
    pub sample_title: HashMap<String, String>,
    pub stats: MissingValueStats,
}

struct OpenTable {
    kind: TableKind,
    begin_line: usize,
    /// Platform id owning the column resolution; `None` when the table has no
    /// usable owner (it is then scanned but contributes nothing).
    key: Option<String>,
    /// Sample id, for chooser context on sample tables.
    sample: Option<String>,
    rows: Vec<Vec<String>>,
    row_lines: Vec<usize>,
}

/// Pass 1 driver. Streams `reader`, resolving columns through `chooser` (at
/// most once per platform per table family) and accumulating
/// `MissingValueStats` over every sample-table row, including the buffered
/// discovery rows once their platform's resolution is known.
pub fn resolve_columns<R: BufRead, C: ColumnChooser + ?Sized>(
    reader: R,
    chooser: &mut C,
) -> Result<FirstPass, ParseError> {
    let mut out = FirstPass::default();
    let mut cur_platform: Option<String> = None;
    let mut cur_sample: Option<String> = None;
    let mut open_table: Option<OpenTable> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        match scan::classify(&line) {
            LineEvent::PlatformHeader(id) => {
                cur_platform = Some(id.to_string());
                cur_sample = None;
            }
            LineEvent::SampleHeader(id) => {
                cur_sample = Some(id.to_string());
            }
            LineEvent::Metadata(meta) => {
                if let Some(sample) = &cur_sample {
                    if let Some(title) = meta.strip_prefix(scan::SAMPLE_TITLE_PREFIX) {
                        out.sample_title.insert(sample.clone(), title.to_string());
                    } else if let Some(plat) = meta.strip_prefix(scan::SAMPLE_PLATFORM_PREFIX) {
                        out.sample_platform.insert(sample.clone(), plat.to_string());
                    }
                }
            }
            LineEvent::TableBegin(kind) => {
                if let Some(open) = &open_table {
                    return Err(ParseError::UnclosedTable {
                        section: open.kind.name().to_string(),
                        begin_line: open.begin_line,
                    });
                }
                let key = match kind {
                    TableKind::Platform => {
                        if cur_platform.is_none() {
                            warn!(
                                "line {}: platform table outside any platform section; ignoring",
                                line_no
                            );
                        }
                        cur_platform.clone()
                    }
                    TableKind::Sample => {
                        let key = cur_sample
                            .as_ref()
                            .and_then(|s| out.sample_platform.get(s))
                            .cloned();
                        if key.is_none() {
                            warn!(
                                "line {}: sample table for {} has no platform reference; skipping resolution and statistics",
                                line_no,
                                cur_sample.as_deref().unwrap_or("<no sample>")
                            );
                        }
                        key
                    }
                };
                open_table = Some(OpenTable {
                    kind,
                    begin_line: line_no,
                    key,
                    sample: cur_sample.clone(),
                    rows: Vec::new(),
                    row_lines: Vec::new(),
                });
            }
            LineEvent::TableEnd(kind) => match open_table.take() {
                Some(table) if table.kind == kind => {
                    finish_table(table, chooser, &mut out)?;
                }
                Some(table) => {
                    return Err(ParseError::UnclosedTable {
                        section: table.kind.name().to_string(),
                        begin_line: table.begin_line,
                    });
                }
                // Stray end marker outside any table: ignore.
                None => {}
            },
            LineEvent::DataRow(row) => {
                if let Some(table) = open_table.as_mut() {
                    handle_row(table, row, line_no, chooser, &mut out)?;
                }
            }
        }
    }

    if let Some(table) = open_table {
        return Err(ParseError::UnclosedTable {
            section: table.kind.name().to_string(),
            begin_line: table.begin_line,
        });
    }
    Ok(out)
}

fn handle_row<C: ColumnChooser + ?Sized>(
    table: &mut OpenTable,
    row: &str,
    line_no: usize,
    chooser: &mut C,
    out: &mut FirstPass,
) -> Result<(), ParseError> {
    let Some(key) = table.key.clone() else {
        return Ok(());
    };
    match table.kind {
        TableKind::Platform => {
            if out.platform_columns.contains_key(&key) {
                return Ok(());
            }
            buffer_row(table, row, line_no);
            if table.rows.len() == DISCOVERY_ROW_LIMIT {
                resolve_platform(table, &key, chooser, out)?;
            }
        }
        TableKind::Sample => {
            if let Some(pair) = out.sample_columns.get(&key) {
                record_stats(&mut out.stats, &scan::split_row(row), *pair, line_no)?;
            } else {
                buffer_row(table, row, line_no);
                if table.rows.len() == DISCOVERY_ROW_LIMIT {
                    resolve_sample(table, &key, chooser, out)?;
                }
            }
        }
    }
    Ok(())
}

fn finish_table<C: ColumnChooser + ?Sized>(
    table: OpenTable,
    chooser: &mut C,
    out: &mut FirstPass,
) -> Result<(), ParseError> {
    let mut table = table;
    let Some(key) = table.key.clone() else {
        return Ok(());
    };
    // The table closed before the discovery limit was reached: resolve with
    // whatever rows were collected. An empty table stays unresolved.
    match table.kind {
        TableKind::Platform => {
            if !out.platform_columns.contains_key(&key) && !table.rows.is_empty() {
                resolve_platform(&mut table, &key, chooser, out)?;
            }
        }
        TableKind::Sample => {
            if !out.sample_columns.contains_key(&key) && !table.rows.is_empty() {
                resolve_sample(&mut table, &key, chooser, out)?;
            }
        }
    }
    Ok(())
}

fn buffer_row(table: &mut OpenTable, row: &str, line_no: usize) {
    table
        .rows
        .push(scan::split_row(row).into_iter().map(str::to_string).collect());
    table.row_lines.push(line_no);
}

fn resolve_platform<C: ColumnChooser + ?Sized>(
    table: &mut OpenTable,
    key: &str,
    chooser: &mut C,
    out: &mut FirstPass,
) -> Result<(), ParseError> {
    let choice = chooser.choose_platform_columns(key, &table.rows)?;
    let pair = validate_choice(choice, &format!("platform {key}"))?;
    debug!(
        "platform {}: probe id column {}, gene name column {}",
        key, pair.id_col, pair.value_col
    );
    out.platform_columns.insert(key.to_string(), pair);
    table.rows.clear();
    table.row_lines.clear();
    Ok(())
}

fn resolve_sample<C: ColumnChooser + ?Sized>(
    table: &mut OpenTable,
    key: &str,
    chooser: &mut C,
    out: &mut FirstPass,
) -> Result<(), ParseError> {
    let sample = table.sample.clone().unwrap_or_default();
    let choice = chooser.choose_sample_columns(key, &sample, &table.rows)?;
    let pair = validate_choice(choice, &format!("sample tables on platform {key}"))?;
    debug!(
        "platform {}: sample probe id column {}, value column {} (resolved at sample {})",
        key, pair.id_col, pair.value_col, sample
    );
    out.sample_columns.insert(key.to_string(), pair);
    // Buffered discovery rows are counted retroactively so the totals match a
    // full-file post-resolution scan.
    for (row, line) in table.rows.iter().zip(&table.row_lines) {
        record_stats(&mut out.stats, row, pair, *line)?;
    }
    table.rows.clear();
    table.row_lines.clear();
    Ok(())
}

fn validate_choice(choice: ColumnChoice, section: &str) -> Result<ColumnPair, ParseError> {
    if choice.id_col < 0 || choice.value_col < 0 {
        return Err(ParseError::Cancelled {
            section: section.to_string(),
        });
    }
    Ok(ColumnPair {
        id_col: choice.id_col as usize,
        value_col: choice.value_col as usize,
    })
}

fn record_stats<S: AsRef<str>>(
    stats: &mut MissingValueStats,
    parts: &[S],
    pair: ColumnPair,
    line: usize,
) -> Result<(), ParseError> {
    let Some(cell) = parts.get(pair.value_col) else {
        return Err(ParseError::ShortRow {
            line,
            section: "sample".to_string(),
            index: pair.value_col,
            found: parts.len(),
        });
    };
    stats.record(cell.as_ref());
    Ok(())
}
