// scan.rs
//
// Line classifier for the GEO series-family SOFT format. Classification is
// purely prefix/substring matching on the marker tokens; the two parse passes
// each run their own state machine over the resulting events.

/// `^PLATFORM = <id>` introduces a platform section.
pub const PLATFORM_PREFIX: &str = "^PLATFORM = ";
/// `^SAMPLE = <id>` introduces a sample section.
pub const SAMPLE_PREFIX: &str = "^SAMPLE = ";
/// Sample metadata lines with fixed known prefixes.
pub const SAMPLE_TITLE_PREFIX: &str = "!Sample_title = ";
pub const SAMPLE_PLATFORM_PREFIX: &str = "!Sample_platform_id = ";

const PLATFORM_TABLE_BEGIN: &str = "!platform_table_begin";
const PLATFORM_TABLE_END: &str = "!platform_table_end";
const SAMPLE_TABLE_BEGIN: &str = "!sample_table_begin";
const SAMPLE_TABLE_END: &str = "!sample_table_end";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Platform,
    Sample,
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Platform => "platform",
            TableKind::Sample => "sample",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    PlatformHeader(&'a str),
    SampleHeader(&'a str),
    TableBegin(TableKind),
    TableEnd(TableKind),
    Metadata(&'a str),
    DataRow(&'a str),
}

pub fn classify(line: &str) -> LineEvent<'_> {
    if let Some(id) = line.strip_prefix(PLATFORM_PREFIX) {
        return LineEvent::PlatformHeader(id.trim());
    }
    if let Some(id) = line.strip_prefix(SAMPLE_PREFIX) {
        return LineEvent::SampleHeader(id.trim());
    }
    if line.contains(PLATFORM_TABLE_BEGIN) {
        return LineEvent::TableBegin(TableKind::Platform);
    }
    if line.contains(PLATFORM_TABLE_END) {
        return LineEvent::TableEnd(TableKind::Platform);
    }
    if line.contains(SAMPLE_TABLE_BEGIN) {
        return LineEvent::TableBegin(TableKind::Sample);
    }
    if line.contains(SAMPLE_TABLE_END) {
        return LineEvent::TableEnd(TableKind::Sample);
    }
    match line.as_bytes().first() {
        Some(b'^') | Some(b'!') | Some(b'#') => LineEvent::Metadata(line),
        _ => LineEvent::DataRow(line),
    }
}

/// Subtable rows are tab-separated; trailing empty cells are preserved so an
/// empty value column still yields a field.
pub fn split_row(row: &str) -> Vec<&str> {
    row.split('\t').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_platform_header() {
        assert_eq!(
            classify("^PLATFORM = GPL96"),
            LineEvent::PlatformHeader("GPL96")
        );
    }

    #[test]
    fn test_classify_sample_header() {
        assert_eq!(classify("^SAMPLE = GSM101"), LineEvent::SampleHeader("GSM101"));
    }

    #[test]
    fn test_classify_table_markers() {
        assert_eq!(
            classify("!platform_table_begin"),
            LineEvent::TableBegin(TableKind::Platform)
        );
        assert_eq!(
            classify("!platform_table_end"),
            LineEvent::TableEnd(TableKind::Platform)
        );
        assert_eq!(
            classify("!sample_table_begin"),
            LineEvent::TableBegin(TableKind::Sample)
        );
        assert_eq!(
            classify("!sample_table_end"),
            LineEvent::TableEnd(TableKind::Sample)
        );
    }

    #[test]
    fn test_classify_metadata_prefixes() {
        assert_eq!(
            classify("!Sample_title = heat shock 30m"),
            LineEvent::Metadata("!Sample_title = heat shock 30m")
        );
        assert_eq!(classify("^SERIES = GSE2"), LineEvent::Metadata("^SERIES = GSE2"));
        assert_eq!(
            classify("#VALUE = log2 ratio"),
            LineEvent::Metadata("#VALUE = log2 ratio")
        );
    }

    #[test]
    fn test_classify_data_row() {
        assert_eq!(classify("A1\tYAL001C\t0.5"), LineEvent::DataRow("A1\tYAL001C\t0.5"));
    }

    #[test]
    fn test_split_row_keeps_trailing_empty_cell() {
        assert_eq!(split_row("A2\t"), vec!["A2", ""]);
    }
}
