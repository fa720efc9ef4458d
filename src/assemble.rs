// assemble.rs
//
// Pass 2 over a series-family file: rebuild each platform's probe→gene map,
// then flatten every sample table into gene→value records using its
// platform's map, collecting the global gene universe along the way.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::BufRead;

use log::{debug, warn};

use crate::error::ParseError;
use crate::resolve::{ColumnPair, FirstPass};
use crate::scan::{self, LineEvent, TableKind};

/// The assembled sample × gene matrix. Ordered containers so the emitter
/// enumerates samples and genes in lexicographic order regardless of file
/// order.
#[derive(Debug, Default)]
pub struct Matrix {
    /// Per sample: gene name → raw value string, verbatim from the input.
    pub samples: BTreeMap<String, HashMap<String, String>>,
    /// Every non-empty gene name observed across all samples.
    pub genes: BTreeSet<String>,
    /// Sample rows whose probe id had no (or an empty) gene mapping. Expected
    /// for control and absent probes; diagnostic only.
    pub unmapped_rows: u64,
    /// Samples whose values were skipped because their platform was never
    /// declared. Their columns still appear in the output, empty.
    pub skipped_samples: Vec<String>,
}

enum TableCtx {
    /// Building `platform_maps[platform]` with the resolved columns.
    Platform { platform: String, cols: ColumnPair },
    /// Recording values for `sample` through its platform's probe→gene map.
    Sample {
        sample: String,
        platform: String,
        cols: ColumnPair,
        header_skipped: bool,
    },
    /// Rows are consumed but contribute nothing.
    Ignored,
}

struct OpenTable {
    kind: TableKind,
    begin_line: usize,
    ctx: TableCtx,
}

/// Pass 2 driver. `first` supplies the column resolutions, sample→platform
/// references and titles discovered in pass 1.
pub fn assemble<R: BufRead>(reader: R, first: &FirstPass) -> Result<Matrix, ParseError> {
    let mut matrix = Matrix::default();
    let mut platform_maps: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut cur_platform: Option<String> = None;
    let mut cur_sample: Option<String> = None;
    let mut open_table: Option<OpenTable> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        match scan::classify(&line) {
            LineEvent::PlatformHeader(id) => {
                platform_maps.entry(id.to_string()).or_default();
                cur_platform = Some(id.to_string());
                cur_sample = None;
            }
            LineEvent::SampleHeader(id) => {
                // Every declared sample gets an output column, even when its
                // values end up skipped.
                matrix.samples.entry(id.to_string()).or_default();
                cur_sample = Some(id.to_string());
            }
            LineEvent::Metadata(_) => {}
            LineEvent::TableBegin(kind) => {
                if let Some(open) = &open_table {
                    return Err(ParseError::UnclosedTable {
                        section: open.kind.name().to_string(),
                        begin_line: open.begin_line,
                    });
                }
                let ctx = match kind {
                    TableKind::Platform => platform_ctx(&cur_platform, first),
                    TableKind::Sample => sample_ctx(&cur_sample, first, &platform_maps, &mut matrix),
                };
                open_table = Some(OpenTable {
                    kind,
                    begin_line: line_no,
                    ctx,
                });
            }
            LineEvent::TableEnd(kind) => match open_table.take() {
                Some(open) if open.kind == kind => {}
                Some(open) => {
                    return Err(ParseError::UnclosedTable {
                        section: open.kind.name().to_string(),
                        begin_line: open.begin_line,
                    });
                }
                None => {}
            },
            LineEvent::DataRow(row) => {
                if let Some(open) = open_table.as_mut() {
                    handle_row(
                        &mut open.ctx,
                        row,
                        line_no,
                        &mut platform_maps,
                        &mut matrix,
                    )?;
                }
            }
        }
    }

    if let Some(open) = open_table {
        return Err(ParseError::UnclosedTable {
            section: open.kind.name().to_string(),
            begin_line: open.begin_line,
        });
    }

    debug!(
        "assembled {} genes across {} samples ({} unmapped rows)",
        matrix.genes.len(),
        matrix.samples.len(),
        matrix.unmapped_rows
    );
    Ok(matrix)
}

fn platform_ctx(cur_platform: &Option<String>, first: &FirstPass) -> TableCtx {
    let Some(platform) = cur_platform else {
        return TableCtx::Ignored;
    };
    match first.platform_columns.get(platform) {
        Some(cols) => TableCtx::Platform {
            platform: platform.clone(),
            cols: *cols,
        },
        // Unresolved in pass 1 means the table had no rows there; nothing to
        // rebuild either way.
        None => TableCtx::Ignored,
    }
}

fn sample_ctx(
    cur_sample: &Option<String>,
    first: &FirstPass,
    platform_maps: &HashMap<String, HashMap<String, String>>,
    matrix: &mut Matrix,
) -> TableCtx {
    let Some(sample) = cur_sample else {
        return TableCtx::Ignored;
    };
    let Some(platform) = first.sample_platform.get(sample) else {
        warn!("sample {} has no platform reference; skipping its values", sample);
        matrix.skipped_samples.push(sample.clone());
        return TableCtx::Ignored;
    };
    if !platform_maps.contains_key(platform) {
        warn!(
            "sample {} references platform {} which was never declared; skipping its values",
            sample, platform
        );
        matrix.skipped_samples.push(sample.clone());
        return TableCtx::Ignored;
    }
    let Some(cols) = first.sample_columns.get(platform) else {
        warn!(
            "sample {}: no column resolution for platform {}; skipping its values",
            sample, platform
        );
        matrix.skipped_samples.push(sample.clone());
        return TableCtx::Ignored;
    };
    TableCtx::Sample {
        sample: sample.clone(),
        platform: platform.clone(),
        cols: *cols,
        header_skipped: false,
    }
}

fn handle_row(
    ctx: &mut TableCtx,
    row: &str,
    line_no: usize,
    platform_maps: &mut HashMap<String, HashMap<String, String>>,
    matrix: &mut Matrix,
) -> Result<(), ParseError> {
    match ctx {
        TableCtx::Ignored => Ok(()),
        TableCtx::Platform { platform, cols } => {
            let parts = scan::split_row(row);
            let probe = field(&parts, cols.id_col, line_no, "platform")?;
            let gene = field(&parts, cols.value_col, line_no, "platform")?;
            if let Some(map) = platform_maps.get_mut(platform.as_str()) {
                // Duplicate probe ids: last occurrence wins.
                map.insert(probe.to_string(), gene.to_string());
            }
            Ok(())
        }
        TableCtx::Sample {
            sample,
            platform,
            cols,
            header_skipped,
        } => {
            // Exactly one row after table-begin is the column-header row, not
            // data.
            if !*header_skipped {
                *header_skipped = true;
                return Ok(());
            }
            let parts = scan::split_row(row);
            let probe = field(&parts, cols.id_col, line_no, "sample")?;
            let value = field(&parts, cols.value_col, line_no, "sample")?;
            let gene = platform_maps
                .get(platform.as_str())
                .and_then(|map| map.get(probe));
            match gene {
                Some(gene) if !gene.is_empty() => {
                    matrix.genes.insert(gene.clone());
                    if let Some(values) = matrix.samples.get_mut(sample.as_str()) {
                        values.insert(gene.clone(), value.to_string());
                    }
                }
                // No (or an empty) mapping: expected for control/absent
                // probes, silently dropped.
                _ => matrix.unmapped_rows += 1,
            }
            Ok(())
        }
    }
}

fn field<'a>(
    parts: &[&'a str],
    index: usize,
    line: usize,
    section: &str,
) -> Result<&'a str, ParseError> {
    parts.get(index).copied().ok_or_else(|| ParseError::ShortRow {
        line,
        section: section.to_string(),
        index,
        found: parts.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{resolve_columns, ColumnChoice, FixedChooser};
    use std::io::Cursor;

    fn first_pass(input: &str) -> FirstPass {
        let mut chooser = FixedChooser {
            platform: ColumnChoice { id_col: 0, value_col: 1 },
            sample: ColumnChoice { id_col: 0, value_col: 1 },
        };
        resolve_columns(Cursor::new(input), &mut chooser).unwrap()
    }

    const FAMILY: &str = "\
^PLATFORM = GPL1\n\
!platform_table_begin\n\
ID\tORF\n\
A1\tgeneX\n\
A2\tgeneY\n\
A3\t\n\
!platform_table_end\n\
^SAMPLE = GSM1\n\
!Sample_title = first\n\
!Sample_platform_id = GPL1\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
A1\t10\n\
A2\t\n\
A3\t7\n\
CTRL\t3\n\
!sample_table_end\n";

    #[test]
    fn test_assemble_maps_probes_to_genes() {
        let first = first_pass(FAMILY);
        let matrix = assemble(Cursor::new(FAMILY), &first).unwrap();

        assert_eq!(matrix.samples["GSM1"]["geneX"], "10");
        assert_eq!(matrix.samples["GSM1"]["geneY"], "");
        assert!(matrix.genes.contains("geneX"));
        assert!(matrix.genes.contains("geneY"));
    }

    #[test]
    fn test_unmapped_and_empty_gene_rows_are_dropped() {
        let first = first_pass(FAMILY);
        let matrix = assemble(Cursor::new(FAMILY), &first).unwrap();

        // CTRL has no mapping, A3 maps to an empty gene name.
        assert_eq!(matrix.unmapped_rows, 2);
        assert!(!matrix.genes.contains(""));
    }

    #[test]
    fn test_sample_header_row_is_not_data() {
        let first = first_pass(FAMILY);
        let matrix = assemble(Cursor::new(FAMILY), &first).unwrap();

        // "ID_REF" would be an unmapped probe if the header row were read as
        // data; the only unmapped rows are CTRL and A3.
        assert_eq!(matrix.unmapped_rows, 2);
    }

    #[test]
    fn test_duplicate_probe_mapping_last_write_wins() {
        let input = "\
^PLATFORM = GPL1\n\
!platform_table_begin\n\
ID\tORF\n\
A1\tgeneOld\n\
A1\tgeneNew\n\
!platform_table_end\n\
^SAMPLE = GSM1\n\
!Sample_platform_id = GPL1\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
A1\t4\n\
!sample_table_end\n";
        let first = first_pass(input);
        let matrix = assemble(Cursor::new(input), &first).unwrap();

        assert_eq!(matrix.samples["GSM1"]["geneNew"], "4");
        assert!(!matrix.genes.contains("geneOld"));
    }

    #[test]
    fn test_sample_on_undeclared_platform_is_skipped_but_still_a_column() {
        let input = "\
^PLATFORM = GPL1\n\
!platform_table_begin\n\
ID\tORF\n\
A1\tgeneX\n\
!platform_table_end\n\
^SAMPLE = GSM1\n\
!Sample_platform_id = GPL1\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
A1\t1\n\
!sample_table_end\n\
^SAMPLE = GSM2\n\
!Sample_platform_id = GPL404\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
A1\t2\n\
!sample_table_end\n";
        let first = first_pass(input);
        let matrix = assemble(Cursor::new(input), &first).unwrap();

        assert!(matrix.samples.contains_key("GSM2"));
        assert!(matrix.samples["GSM2"].is_empty());
        assert_eq!(matrix.skipped_samples, vec!["GSM2".to_string()]);
        assert_eq!(matrix.samples["GSM1"]["geneX"], "1");
    }

    #[test]
    fn test_short_platform_row_is_malformed() {
        let input = "\
^PLATFORM = GPL1\n\
!platform_table_begin\n\
ID\tORF\n\
A1\n\
!platform_table_end\n";
        let first = first_pass(input);
        let err = assemble(Cursor::new(input), &first).unwrap_err();
        assert!(matches!(err, ParseError::ShortRow { line: 4, .. }));
    }
}
