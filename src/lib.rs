// lib.rs

//! Conversion of NCBI GEO series-family SOFT files into the PCL
//! gene-expression matrix format: a line classifier, a two-pass parser
//! (column resolution + matrix assembly) and a PCL emitter.

pub mod assemble;
pub mod emit;
pub mod error;
pub mod resolve;
pub mod scan;
