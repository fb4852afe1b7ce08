use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use rusty_sweep::{CsvSink, NullSink, Pipeline, PipelineConfig, RunReport, Source, SweepError};

/// Drop CSV rows with empty fields and exact duplicate rows, then report the reduction.
#[derive(Parser, Debug)]
#[command(name = "rusty-sweep", version, about)]
struct Cli {
    /// CSV file to process.
    input: PathBuf,

    /// Write the cleaned rows here (same columns and delimiter as the input).
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// JSON config file; flags below override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Field delimiter.
    #[arg(short, long)]
    delimiter: Option<char>,

    /// The first row is data, not column names.
    #[arg(long)]
    no_header: bool,

    /// Stop at the first malformed row.
    #[arg(long)]
    strict: bool,

    /// Keep rows whose fields are empty strings (nulls still drop).
    #[arg(long)]
    keep_empty: bool,

    /// Field text to read as null. Repeatable.
    #[arg(long = "null-marker", value_name = "TEXT")]
    null_markers: Vec<String>,

    /// Only these columns must be filled. Repeatable.
    #[arg(long = "require", value_name = "COLUMN")]
    required: Vec<String>,

    /// Trim whitespace around fields.
    #[arg(long)]
    trim: bool,

    /// Parse on a background thread with this many rows buffered.
    #[arg(long, value_name = "ROWS")]
    read_ahead: Option<usize>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Show parse progress on stderr.
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if self.no_header {
            config.has_header = false;
        }
        if self.strict {
            config.strict_parsing = true;
        }
        if self.keep_empty {
            config.empty_is_missing = false;
        }
        if !self.null_markers.is_empty() {
            config.null_markers = self.null_markers.clone();
        }
        if !self.required.is_empty() {
            config.required_columns = Some(self.required.clone());
        }
        if self.trim {
            config.trim_fields = true;
        }
        if self.read_ahead.is_some() {
            config.read_ahead = self.read_ahead;
        }
        config.validate().context("checking options")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(report) => {
            print_report(&report, cli.json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let cancelled = e
                .downcast_ref::<SweepError>()
                .is_some_and(SweepError::is_cancelled);
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            if cancelled {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<RunReport> {
    let config = cli.pipeline_config()?;
    let delimiter = config.delimiter_byte();
    let source = Source::open(&cli.input)?;

    let mut pipeline = Pipeline::new(config)?;
    if cli.progress {
        pipeline = pipeline.on_progress(|event| match event.percent() {
            Some(pct) => eprint!("\rparsing... {pct:5.1}%"),
            None => eprint!("\rparsing... {} rows", event.records_processed),
        });
    }

    let report = match &cli.output {
        Some(path) => write_output(pipeline, source, path, delimiter),
        None => Ok(pipeline.run(source, &mut NullSink)?),
    };
    if cli.progress {
        eprintln!();
    }
    report
}

/// Run into a CSV file, removing the partial file if the run does not finish.
fn write_output(
    pipeline: Pipeline,
    source: Source,
    path: &Path,
    delimiter: u8,
) -> Result<RunReport> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut sink = CsvSink::new(BufWriter::new(file), delimiter);

    match pipeline.run(source, &mut sink) {
        Ok(report) => {
            log::info!("wrote {} rows to {}", sink.written(), path.display());
            Ok(report)
        }
        Err(e) => {
            drop(sink);
            if let Err(rm) = std::fs::remove_file(path) {
                log::warn!("could not remove partial output {}: {rm}", path.display());
            }
            Err(e.into())
        }
    }
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(e) => log::error!("serialising report: {e}"),
        }
        return;
    }

    let stats = &report.stats;
    if report.is_empty() {
        println!("No records found.");
    }
    println!("Total Records:     {}", stats.total_records());
    println!("Cleaned Records:   {}", stats.cleaned_records());
    println!("Optimization Gain: {:.2}%", stats.optimization_gain_percent());
    println!(
        "  dropped {} incomplete, {} duplicate; skipped {} malformed",
        report.incomplete_dropped, report.duplicates_dropped, report.rejected_rows
    );
    for e in &report.parse_errors {
        println!("  malformed {e}");
    }
}
