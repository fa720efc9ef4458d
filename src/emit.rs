// emit.rs
//
// PCL emission: one header row of sample titles, one uniform-weight row, then
// one row per gene in lexicographic order. Values are passed through verbatim;
// cells are blank when a sample has no value for a gene or, under the
// zeros-as-missing policy, when the value is exactly zero.

use std::collections::HashMap;
use std::io::Write;

use log::warn;

use crate::assemble::Matrix;
use crate::resolve::{classify_value, ValueClass};

pub fn write_pcl<W: Write>(
    mut out: W,
    matrix: &Matrix,
    titles: &HashMap<String, String>,
    zeros_as_missing: bool,
) -> std::io::Result<()> {
    write!(out, "YORF\tNAME\tGWEIGHT")?;
    for sample in matrix.samples.keys() {
        let title = match titles.get(sample) {
            Some(title) => title.as_str(),
            None => {
                warn!("sample {} has no title; emitting an empty header cell", sample);
                ""
            }
        };
        write!(out, "\t{}", title)?;
    }
    writeln!(out)?;

    write!(out, "EWEIGHT\t\t")?;
    for _ in matrix.samples.keys() {
        write!(out, "\t1")?;
    }
    writeln!(out)?;

    for gene in &matrix.genes {
        write!(out, "{}\t{}\t1", gene, gene)?;
        for values in matrix.samples.values() {
            match values.get(gene) {
                Some(value)
                    if zeros_as_missing && classify_value(value) == ValueClass::Zero =>
                {
                    write!(out, "\t")?;
                }
                Some(value) => write!(out, "\t{}", value)?,
                None => write!(out, "\t")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}
