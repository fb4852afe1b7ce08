//! Streaming CSV cleaning: drop rows with empty fields, drop exact duplicate
//! rows, and report how much smaller the dataset got.
//!
//! ```no_run
//! use rusty_sweep::{Pipeline, PipelineConfig, Source};
//! use rusty_sweep::data::writer::NullSink;
//!
//! let source = Source::open("input.csv".as_ref())?;
//! let report = Pipeline::new(PipelineConfig::default())?.run(source, &mut NullSink)?;
//! println!("{:.2}% smaller", report.stats.optimization_gain_percent());
//! # Ok::<(), rusty_sweep::SweepError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod state;

pub use config::PipelineConfig;
pub use data::filter::{Cleaner, Deduplicator};
pub use data::loader::{ProgressEvent, RecordReader, Source};
pub use data::model::{CanonicalKey, FieldValue, Header, Record};
pub use data::writer::{CsvSink, NullSink, RecordSink};
pub use error::{ParseError, Result, SweepError};
pub use state::{CancellationToken, Pipeline, PipelineState, ProcessingStats, RunReport};
