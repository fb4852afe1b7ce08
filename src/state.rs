use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::data::filter::{Cleaner, Deduplicator};
use crate::data::loader::{ProgressEvent, RecordReader, Source};
use crate::data::model::{Header, Record};
use crate::data::read_ahead::ReadAhead;
use crate::data::writer::RecordSink;
use crate::error::{ParseError, Result, SweepError};

/// Malformed rows kept verbatim in a [`RunReport`]; the rest are only counted.
const MAX_REPORTED_PARSE_ERRORS: usize = 100;

// ---------------------------------------------------------------------------
// Pipeline state machine
// ---------------------------------------------------------------------------

/// Lifecycle of one run.
///
/// Records stream through all three stages at once, so a state names the
/// most upstream stage that has not finished yet: `Parsing` until the source
/// is exhausted, then `Cleaning` and `Deduplicating` as those stages drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineState {
    Idle,
    Parsing,
    Cleaning,
    Deduplicating,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Forward-only: no state is ever re-entered.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Parsing)
            | (Parsing, Cleaning)
            | (Cleaning, Deduplicating)
            | (Deduplicating, Done) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ProcessingStats / RunReport
// ---------------------------------------------------------------------------

/// Summary of one run: records in, records out, and the reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    total_records: u64,
    cleaned_records: u64,
    optimization_gain_percent: f64,
}

impl ProcessingStats {
    /// `total` is the count after parsing, `cleaned` the count after
    /// cleaning and deduplication. An empty input has a gain of 0.
    pub fn compute(total: u64, cleaned: u64) -> Result<Self> {
        if cleaned > total {
            return Err(SweepError::InvalidCounts { total, cleaned });
        }
        let optimization_gain_percent = if total == 0 {
            0.0
        } else {
            (total - cleaned) as f64 / total as f64 * 100.0
        };
        Ok(Self {
            total_records: total,
            cleaned_records: cleaned,
            optimization_gain_percent,
        })
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }

    pub fn cleaned_records(&self) -> u64 {
        self.cleaned_records
    }

    pub fn optimization_gain_percent(&self) -> f64 {
        self.optimization_gain_percent
    }
}

/// Stats plus the per-stage breakdown of where records went.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: ProcessingStats,
    /// Records dropped by the cleaner.
    pub incomplete_dropped: u64,
    /// Records dropped by the deduplicator.
    pub duplicates_dropped: u64,
    /// Malformed rows skipped in lenient mode. Not part of `totalRecords`.
    pub rejected_rows: u64,
    /// The first few malformed rows, for display.
    pub parse_errors: Vec<ParseError>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// No records came out of the parser.
    pub fn is_empty(&self) -> bool {
        self.stats.total_records == 0
    }
}

#[derive(Debug, Default)]
struct Counts {
    total: u64,
    incomplete: u64,
    duplicates: u64,
    kept: u64,
    rejected: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

type StateFn = Box<dyn FnMut(PipelineState) + Send>;

/// Parser → cleaner → deduplicator → stats, run once.
pub struct Pipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
    progress: Option<Box<dyn FnMut(&ProgressEvent) + Send>>,
    on_state: Option<StateFn>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            progress: None,
            on_state: None,
            state: PipelineState::Idle,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_state_change(mut self, f: impl FnMut(PipelineState) + Send + 'static) -> Self {
        self.on_state = Some(Box::new(f));
        self
    }

    /// Parse `source`, feed survivors to `sink`, and report the counts.
    ///
    /// A cancelled or failed run returns the error and produces no stats;
    /// the reader and the duplicate index are dropped before returning.
    pub fn run<S: RecordSink>(mut self, source: Source, sink: &mut S) -> Result<RunReport> {
        let started = Instant::now();
        self.advance(PipelineState::Parsing);
        let outcome = self.parse_and_drive(source, sink, started);
        self.settle(outcome)
    }

    /// Same as [`run`](Self::run) for records that are already parsed.
    pub fn run_records<I, S>(mut self, records: I, sink: &mut S) -> Result<RunReport>
    where
        I: IntoIterator<Item = Record>,
        S: RecordSink,
    {
        let started = Instant::now();
        self.advance(PipelineState::Parsing);
        let outcome = self.drive(records.into_iter().map(Ok), None, sink, started);
        self.settle(outcome)
    }

    fn parse_and_drive<S: RecordSink>(
        &mut self,
        source: Source,
        sink: &mut S,
        started: Instant,
    ) -> Result<RunReport> {
        log::info!("processing {}", source.name());
        let mut reader = RecordReader::new(source, &self.config)?;
        if let Some(progress) = self.progress.take() {
            reader = reader.with_progress(progress);
        }
        let header = reader.header().cloned();

        match self.config.read_ahead {
            Some(capacity) => {
                let ahead = ReadAhead::spawn(reader, capacity, self.cancel.clone())?;
                self.drive(ahead, header.as_ref(), sink, started)
            }
            None => self.drive(reader, header.as_ref(), sink, started),
        }
    }

    fn drive<I, S>(
        &mut self,
        records: I,
        header: Option<&Header>,
        sink: &mut S,
        started: Instant,
    ) -> Result<RunReport>
    where
        I: Iterator<Item = Result<Record>>,
        S: RecordSink,
    {
        let cleaner = Cleaner::from_config(&self.config);
        let mut dedup = Deduplicator::new();
        let mut counts = Counts::default();
        let mut parse_errors = Vec::new();

        let mut header_checked = false;
        if let Some(header) = header {
            self.check_required(header)?;
            sink.begin(header)?;
            header_checked = true;
        }

        for item in records {
            if self.cancel.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            let record = match item {
                Ok(record) => record,
                Err(SweepError::Parse(e)) if !self.config.strict_parsing => {
                    log::warn!("skipping malformed {e}");
                    counts.rejected += 1;
                    if parse_errors.len() < MAX_REPORTED_PARSE_ERRORS {
                        parse_errors.push(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !header_checked {
                self.check_required(record.header())?;
                header_checked = true;
            }

            counts.total += 1;
            if !cleaner.is_complete(&record) {
                counts.incomplete += 1;
                continue;
            }
            if !dedup.admit(&record) {
                counts.duplicates += 1;
                continue;
            }
            counts.kept += 1;
            sink.accept(record)?;
        }
        if self.cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }

        self.advance(PipelineState::Cleaning);
        log::debug!(
            "cleaning finished: {} incomplete of {}",
            counts.incomplete,
            counts.total
        );
        self.advance(PipelineState::Deduplicating);
        log::debug!(
            "deduplication finished: {} distinct, {} duplicates",
            dedup.distinct(),
            counts.duplicates
        );
        drop(dedup);
        sink.finish()?;

        let stats = ProcessingStats::compute(counts.total, counts.kept)?;
        Ok(RunReport {
            stats,
            incomplete_dropped: counts.incomplete,
            duplicates_dropped: counts.duplicates,
            rejected_rows: counts.rejected,
            parse_errors,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn check_required(&self, header: &Header) -> Result<()> {
        let Some(required) = &self.config.required_columns else {
            return Ok(());
        };
        match required.iter().find(|c| header.index_of(c).is_none()) {
            Some(missing) => Err(SweepError::InvalidConfig(format!(
                "required column '{missing}' is not in the header {:?}",
                header.names()
            ))),
            None => Ok(()),
        }
    }

    fn settle(&mut self, outcome: Result<RunReport>) -> Result<RunReport> {
        match outcome {
            Ok(report) => {
                self.advance(PipelineState::Done);
                log::info!(
                    "{} records in, {} out ({:.2}% reduction; \
                     {} incomplete, {} duplicates, {} malformed)",
                    report.stats.total_records,
                    report.stats.cleaned_records,
                    report.stats.optimization_gain_percent,
                    report.incomplete_dropped,
                    report.duplicates_dropped,
                    report.rejected_rows
                );
                Ok(report)
            }
            Err(SweepError::Cancelled) => {
                self.advance(PipelineState::Cancelled);
                log::info!("run cancelled");
                Err(SweepError::Cancelled)
            }
            Err(e) => {
                self.advance(PipelineState::Failed);
                log::error!("run failed: {e}");
                Err(e)
            }
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(on_state) = self.on_state.as_mut() {
            on_state(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_is_zero_for_empty_input() {
        let stats = ProcessingStats::compute(0, 0).unwrap();
        assert_eq!(stats.optimization_gain_percent(), 0.0);
    }

    #[test]
    fn gain_is_percentage_removed() {
        let stats = ProcessingStats::compute(3, 1).unwrap();
        assert!((stats.optimization_gain_percent() - 66.666_666).abs() < 1e-3);
        assert_eq!(ProcessingStats::compute(4, 4).unwrap().optimization_gain_percent(), 0.0);
        assert_eq!(ProcessingStats::compute(4, 0).unwrap().optimization_gain_percent(), 100.0);
    }

    #[test]
    fn more_cleaned_than_total_is_rejected() {
        assert!(matches!(
            ProcessingStats::compute(1, 2),
            Err(SweepError::InvalidCounts { total: 1, cleaned: 2 })
        ));
    }

    #[test]
    fn stats_serialise_in_camel_case() {
        let json = serde_json::to_value(ProcessingStats::compute(2, 1).unwrap()).unwrap();
        assert_eq!(json["totalRecords"], 2);
        assert_eq!(json["cleanedRecords"], 1);
        assert_eq!(json["optimizationGainPercent"], 50.0);
    }

    #[test]
    fn transitions_only_move_forward() {
        use PipelineState::*;
        assert!(Idle.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Cleaning));
        assert!(Deduplicating.can_transition_to(Done));
        assert!(Cleaning.can_transition_to(Failed));
        assert!(Idle.can_transition_to(Cancelled));

        assert!(!Parsing.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Done));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Parsing));
        assert!(!Cancelled.can_transition_to(Failed));
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn missing_required_column_fails_the_run() {
        let config = PipelineConfig {
            required_columns: Some(vec!["zip".into()]),
            ..Default::default()
        };
        let err = Pipeline::new(config)
            .unwrap()
            .run(Source::from_bytes("t", "a,b\n1,2\n"), &mut Vec::<Record>::new())
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidConfig(_)));
    }
}
