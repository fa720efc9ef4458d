// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::{
    fs::{self, File},
    io::{self, BufReader, Write},
    path::Path,
    time::{Duration, Instant},
};

use soft2pcl::resolve::{self, ColumnChooser, FixedChooser, KeywordChooser};
use soft2pcl::{assemble, emit};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting soft2pcl with args: {:?}", cli_args);

    // --- 1. Select the Column-Resolution Decision Source ---
    let config = match &cli_args.config {
        Some(path) => Some(cli::read_config(path)?),
        None => None,
    };
    let explicit = cli_args.explicit_columns()?;
    let interactive = config.is_none() && explicit.is_none() && !cli_args.auto;
    let mut chooser: Box<dyn ColumnChooser> = if let Some(cfg) = &config {
        info!(
            "Using column indices from config file: platform ({}, {}), sample ({}, {})",
            cfg.platform.id_col, cfg.platform.value_col, cfg.sample.id_col, cfg.sample.value_col
        );
        Box::new(FixedChooser {
            platform: cfg.platform,
            sample: cfg.sample,
        })
    } else if let Some((platform, sample)) = explicit {
        Box::new(FixedChooser { platform, sample })
    } else if cli_args.auto {
        info!("Detecting columns from table header keywords.");
        Box::new(KeywordChooser)
    } else {
        info!("No column configuration supplied; running interactive discovery.");
        Box::new(interactive::PromptChooser)
    };

    // --- 2. Pass 1: Resolve Subtable Columns & Collect Value Statistics ---
    let spinner = if interactive {
        None
    } else {
        Some(pass_spinner("pass 1: resolving table columns")?)
    };
    let first = resolve::resolve_columns(open_input(&cli_args.soft_file)?, chooser.as_mut())
        .with_context(|| format!("failed to parse {}", cli_args.soft_file.display()))?;
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    info!(
        "Pass 1 complete: {} platform table resolution(s), {} sample(s); {} missing, {} exactly-zero and {} present values.",
        first.platform_columns.len(),
        first.sample_platform.len(),
        first.stats.missing,
        first.stats.zero,
        first.stats.present
    );

    // --- 3. Decide the Zeros-as-Missing Policy ---
    let zeros_as_missing = decide_zero_policy(&cli_args, config.as_ref(), &first, interactive)?;
    if zeros_as_missing {
        info!("Exact zeros will be treated as missing values.");
    } else {
        info!("Exact zeros will be kept as values.");
    }

    // --- 4. Pass 2: Assemble the Sample x Gene Matrix ---
    let spinner = if interactive {
        None
    } else {
        Some(pass_spinner("pass 2: assembling matrix")?)
    };
    let matrix = assemble::assemble(open_input(&cli_args.soft_file)?, &first)
        .with_context(|| format!("failed to parse {}", cli_args.soft_file.display()))?;
    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    info!(
        "Pass 2 complete: {} gene(s) across {} sample column(s), {} unmapped probe row(s).",
        matrix.genes.len(),
        matrix.samples.len(),
        matrix.unmapped_rows
    );
    if !matrix.skipped_samples.is_empty() {
        warn!(
            "{} sample(s) skipped (no usable platform): {:?}",
            matrix.skipped_samples.len(),
            matrix.skipped_samples
        );
    }

    // --- 5. Emit PCL ---
    // Staged in memory so a failed or cancelled run never leaves a partial
    // output file behind.
    let mut buf = Vec::new();
    emit::write_pcl(&mut buf, &matrix, &first.sample_title, zeros_as_missing)
        .context("failed to render PCL output")?;
    match &cli_args.out {
        Some(path) => {
            fs::write(path, &buf).with_context(|| format!("failed to write {}", path.display()))?;
            info!("Wrote {} bytes to {}.", buf.len(), path.display());
        }
        None => {
            io::stdout()
                .lock()
                .write_all(&buf)
                .context("failed to write PCL output to stdout")?;
        }
    }

    info!(
        "soft2pcl finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

fn open_input(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn pass_spinner(message: &'static str) -> Result<ProgressBar> {
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg} [{elapsed_precise}]")
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?;
    let pb = ProgressBar::new_spinner().with_style(style);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn decide_zero_policy(
    cli_args: &cli::CliArgs,
    config: Option<&cli::ConfigArgs>,
    first: &resolve::FirstPass,
    interactive_mode: bool,
) -> Result<bool> {
    let policy = match cli_args.zero_policy {
        Some(policy) => policy,
        None => match config {
            Some(cfg) => return Ok(cfg.zeros_as_missing),
            None if interactive_mode => cli::ZeroPolicy::Ask,
            None => cli::ZeroPolicy::Auto,
        },
    };
    let zeros = match policy {
        cli::ZeroPolicy::Keep => false,
        cli::ZeroPolicy::Missing => true,
        cli::ZeroPolicy::Auto => {
            let suggested = first.stats.suggest_zeros_as_missing();
            info!(
                "Zero policy heuristic: {} plain vs {} precise zero(s) -> zeros-as-missing = {}.",
                first.stats.zero_plain, first.stats.zero_precise, suggested
            );
            suggested
        }
        cli::ZeroPolicy::Ask => interactive::prompt_zero_policy(&first.stats)?,
    };
    Ok(zeros)
}

// --- Module Implementations ---

mod cli {
    use std::fs;
    use std::path::{Path, PathBuf};

    use anyhow::{anyhow, Context, Result};
    use clap::{Parser, ValueEnum};

    use soft2pcl::resolve::ColumnChoice;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Convert a GEO series-family SOFT file into a PCL expression matrix.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        /// GSE*_family.soft input file.
        pub(crate) soft_file: PathBuf,

        /// Output PCL file (stdout when omitted).
        #[arg(short, long = "out")]
        pub(crate) out: Option<PathBuf>,

        /// Five-line args file: platform probe column, platform gene column,
        /// sample probe column, sample value column, zeros-as-missing (0/1).
        #[arg(
            long,
            conflicts_with_all = ["platform_id_col", "platform_gene_col", "sample_id_col", "sample_value_col", "auto"]
        )]
        pub(crate) config: Option<PathBuf>,

        /// Platform annotation table: probe id column.
        #[arg(long)]
        pub(crate) platform_id_col: Option<i64>,

        /// Platform annotation table: gene name column.
        #[arg(long)]
        pub(crate) platform_gene_col: Option<i64>,

        /// Sample tables: probe id column.
        #[arg(long)]
        pub(crate) sample_id_col: Option<i64>,

        /// Sample tables: expression value column.
        #[arg(long)]
        pub(crate) sample_value_col: Option<i64>,

        /// Detect columns from table header keywords instead of prompting.
        #[arg(long, conflicts_with_all = ["platform_id_col", "platform_gene_col", "sample_id_col", "sample_value_col"])]
        pub(crate) auto: bool,

        /// How to treat exact zeros. Default: the config file's flag; else
        /// ask interactively in discovery mode, else the heuristic.
        #[arg(long, value_enum)]
        pub(crate) zero_policy: Option<ZeroPolicy>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }

    #[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum ZeroPolicy {
        /// Emit zeros verbatim.
        Keep,
        /// Emit zeros as empty cells.
        Missing,
        /// Decide from the zero-form statistics of pass 1.
        Auto,
        /// Prompt, showing the accumulated statistics.
        Ask,
    }

    #[derive(Debug, Clone, Copy)]
    pub(crate) struct ConfigArgs {
        pub(crate) platform: ColumnChoice,
        pub(crate) sample: ColumnChoice,
        pub(crate) zeros_as_missing: bool,
    }

    impl CliArgs {
        /// The four explicit column flags are all-or-nothing.
        pub(crate) fn explicit_columns(&self) -> Result<Option<(ColumnChoice, ColumnChoice)>> {
            let cols = [
                self.platform_id_col,
                self.platform_gene_col,
                self.sample_id_col,
                self.sample_value_col,
            ];
            if cols.iter().all(Option::is_none) {
                return Ok(None);
            }
            let [Some(platform_id), Some(platform_gene), Some(sample_id), Some(sample_value)] =
                cols
            else {
                return Err(anyhow!(
                    "--platform-id-col, --platform-gene-col, --sample-id-col and --sample-value-col must be given together"
                ));
            };
            Ok(Some((
                ColumnChoice {
                    id_col: platform_id,
                    value_col: platform_gene,
                },
                ColumnChoice {
                    id_col: sample_id,
                    value_col: sample_value,
                },
            )))
        }
    }

    pub(crate) fn read_config(path: &Path) -> Result<ConfigArgs> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        parse_config(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub(crate) fn parse_config(text: &str) -> Result<ConfigArgs> {
        let mut values = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse::<i64>()
                    .with_context(|| format!("invalid integer '{}'", line))
            });
        let mut next = |what: &str| -> Result<i64> {
            values
                .next()
                .ok_or_else(|| anyhow!("missing the {} line", what))?
        };
        let platform_id = next("platform probe column")?;
        let platform_gene = next("platform gene column")?;
        let sample_id = next("sample probe column")?;
        let sample_value = next("sample value column")?;
        let zeros = next("zeros-as-missing flag")?;
        Ok(ConfigArgs {
            platform: ColumnChoice {
                id_col: platform_id,
                value_col: platform_gene,
            },
            sample: ColumnChoice {
                id_col: sample_id,
                value_col: sample_value,
            },
            zeros_as_missing: zeros == 1,
        })
    }
}

mod interactive {
    use std::io::{self, BufRead};

    use soft2pcl::error::ParseError;
    use soft2pcl::resolve::{
        format_column_preview, ColumnChoice, ColumnChooser, MissingValueStats,
    };

    /// Interactive discovery mode: the transposed column preview goes to
    /// stderr and indices are read from stdin, once per platform per table
    /// family. This is the only terminal I/O in the whole converter.
    pub(crate) struct PromptChooser;

    fn prompt_index(question: &str) -> Result<i64, ParseError> {
        let stdin = io::stdin();
        loop {
            eprint!("{question} ");
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                return Err(ParseError::Cancelled {
                    section: "interactive input".to_string(),
                });
            }
            match line.trim().parse::<i64>() {
                Ok(index) => return Ok(index),
                Err(_) => eprintln!("Please enter an integer (negative cancels)."),
            }
        }
    }

    impl ColumnChooser for PromptChooser {
        fn choose_platform_columns(
            &mut self,
            platform_id: &str,
            rows: &[Vec<String>],
        ) -> Result<ColumnChoice, ParseError> {
            eprintln!("Columns for platform {platform_id}");
            eprint!("{}", format_column_preview(rows));
            let id_col = prompt_index("Which column contains the probe ID?")?;
            let value_col = prompt_index("Which column contains the gene names?")?;
            Ok(ColumnChoice { id_col, value_col })
        }

        fn choose_sample_columns(
            &mut self,
            platform_id: &str,
            sample_id: &str,
            rows: &[Vec<String>],
        ) -> Result<ColumnChoice, ParseError> {
            eprintln!("Columns for sample {sample_id} using platform {platform_id}");
            eprint!("{}", format_column_preview(rows));
            let id_col = prompt_index("Which column contains the probe ID?")?;
            let value_col = prompt_index("Which column contains the expression values?")?;
            Ok(ColumnChoice { id_col, value_col })
        }
    }

    pub(crate) fn prompt_zero_policy(stats: &MissingValueStats) -> Result<bool, ParseError> {
        eprintln!(
            "\nThere are {} missing values, and {} exactly zero values",
            stats.missing, stats.zero
        );
        let answer = prompt_index("Treat exact zeros as missing values (0=no, 1=yes)?")?;
        if answer < 0 {
            return Err(ParseError::Cancelled {
                section: "zero policy".to_string(),
            });
        }
        Ok(answer == 1)
    }
}
