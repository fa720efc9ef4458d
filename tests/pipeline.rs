// pipeline.rs
//
// End-to-end conversion tests: a synthetic series-family file through both
// parse passes and the emitter.

use std::io::Cursor;

use soft2pcl::assemble::assemble;
use soft2pcl::emit::write_pcl;
use soft2pcl::error::ParseError;
use soft2pcl::resolve::{resolve_columns, ColumnChoice, FixedChooser, KeywordChooser};

const FAMILY: &str = "\
^SERIES = GSE100\n\
!Series_title = synthetic test series\n\
^PLATFORM = GPL5\n\
#ID = probe identifier\n\
!platform_table_begin\n\
ID\tORF\n\
X1\tadh1\n\
X2\tcyc1\n\
X3\ttef2\n\
!platform_table_end\n\
^SAMPLE = GSM2\n\
!Sample_title = heat shock\n\
!Sample_platform_id = GPL5\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
X1\t2.5\n\
X2\t0\n\
X3\t1.0\n\
!sample_table_end\n\
^SAMPLE = GSM1\n\
!Sample_title = control\n\
!Sample_platform_id = GPL5\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
X1\t1.5\n\
X2\t\n\
!sample_table_end\n";

fn fixed_chooser() -> FixedChooser {
    FixedChooser {
        platform: ColumnChoice { id_col: 0, value_col: 1 },
        sample: ColumnChoice { id_col: 0, value_col: 1 },
    }
}

fn convert(input: &str, zeros_as_missing: bool) -> String {
    let mut chooser = fixed_chooser();
    let first = resolve_columns(Cursor::new(input), &mut chooser).unwrap();
    let matrix = assemble(Cursor::new(input), &first).unwrap();
    let mut buf = Vec::new();
    write_pcl(&mut buf, &matrix, &first.sample_title, zeros_as_missing).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn test_family_file_converts_to_expected_pcl() {
    let expected = "\
YORF\tNAME\tGWEIGHT\tcontrol\theat shock\n\
EWEIGHT\t\t\t1\t1\n\
adh1\tadh1\t1\t1.5\t2.5\n\
cyc1\tcyc1\t1\t\t0\n\
tef2\ttef2\t1\t\t1.0\n";
    assert_eq!(convert(FAMILY, false), expected);
}

#[test]
fn test_zeros_as_missing_blanks_zero_cells() {
    let text = convert(FAMILY, true);
    assert!(text.contains("cyc1\tcyc1\t1\t\t\n"));
    // Non-zero values are untouched.
    assert!(text.contains("adh1\tadh1\t1\t1.5\t2.5\n"));
}

#[test]
fn test_sample_columns_are_sorted_by_id_not_file_order() {
    // GSM2 is declared before GSM1 in the input; the header must still list
    // GSM1's title first.
    let text = convert(FAMILY, false);
    let header = text.lines().next().unwrap();
    assert_eq!(header, "YORF\tNAME\tGWEIGHT\tcontrol\theat shock");
}

#[test]
fn test_gene_row_count_matches_gene_universe() {
    let mut chooser = fixed_chooser();
    let first = resolve_columns(Cursor::new(FAMILY), &mut chooser).unwrap();
    let matrix = assemble(Cursor::new(FAMILY), &first).unwrap();
    let text = convert(FAMILY, false);
    assert_eq!(text.lines().count(), 2 + matrix.genes.len());
}

#[test]
fn test_keyword_detection_matches_fixed_configuration() {
    let mut chooser = KeywordChooser;
    let first = resolve_columns(Cursor::new(FAMILY), &mut chooser).unwrap();
    let matrix = assemble(Cursor::new(FAMILY), &first).unwrap();
    let mut buf = Vec::new();
    write_pcl(&mut buf, &matrix, &first.sample_title, false).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), convert(FAMILY, false));
}

#[test]
fn test_unclosed_table_fails_instead_of_truncating() {
    let truncated = &FAMILY[..FAMILY.len() - "!sample_table_end\n".len()];
    let mut chooser = fixed_chooser();
    let err = resolve_columns(Cursor::new(truncated), &mut chooser).unwrap_err();
    assert!(matches!(err, ParseError::UnclosedTable { section, .. } if section == "sample"));
}

#[test]
fn test_negative_config_index_cancels_with_no_output() {
    let mut chooser = FixedChooser {
        platform: ColumnChoice { id_col: -1, value_col: -1 },
        sample: ColumnChoice { id_col: 0, value_col: 1 },
    };
    let err = resolve_columns(Cursor::new(FAMILY), &mut chooser).unwrap_err();
    assert!(matches!(err, ParseError::Cancelled { .. }));
    // The run stops before assembly; there is nothing to emit.
}

#[test]
fn test_value_strings_round_trip_verbatim() {
    // "1.0" must not be reformatted to "1".
    let text = convert(FAMILY, false);
    assert!(text.contains("tef2\ttef2\t1\t\t1.0\n"));
}

#[test]
fn test_plain_zeros_drive_the_auto_policy() {
    let mut chooser = fixed_chooser();
    let first = resolve_columns(Cursor::new(FAMILY), &mut chooser).unwrap();
    // One plain zero ("0"), no precise zeros.
    assert!(first.stats.suggest_zeros_as_missing());
    assert_eq!(first.stats.missing, 1);
    assert_eq!(first.stats.zero, 1);
}
