use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::model::{FieldValue, Header, Record};
use crate::config::PipelineConfig;
use crate::error::{ParseError, Result, SweepError};

// ---------------------------------------------------------------------------
// Source – where the delimited text comes from
// ---------------------------------------------------------------------------

/// A readable CSV document. Opening a file is the only place a missing input
/// is detected, so a `Source` always refers to something readable.
pub struct Source {
    name: String,
    reader: Box<dyn Read + Send>,
    total_bytes: Option<u64>,
}

impl Source {
    /// Open a file. Its size is recorded for progress reporting.
    pub fn open(path: &Path) -> Result<Self> {
        let unavailable = |source: io::Error| SweepError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unavailable)?;
        let meta = file.metadata().map_err(unavailable)?;
        if meta.is_dir() {
            return Err(unavailable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }
        Ok(Self {
            name: path.display().to_string(),
            reader: Box::new(file),
            total_bytes: Some(meta.len()),
        })
    }

    /// Wrap any stream. The total size is unknown.
    pub fn from_reader<R: Read + Send + 'static>(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            total_bytes: None,
        }
    }

    /// An in-memory document, mostly for tests and small inputs.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self {
            name: name.into(),
            reader: Box::new(Cursor::new(bytes)),
            total_bytes: Some(len),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// QuoteTracker – notices a quoted field left open at end of input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

impl QuoteState {
    /// Same quoting rules as the csv reader: a quote only opens a quoted
    /// field at the start of the field, and `""` inside one is an escape.
    fn step(self, byte: u8, delimiter: u8) -> Self {
        use QuoteState::*;
        let boundary = byte == delimiter || byte == b'\n' || byte == b'\r';
        match self {
            FieldStart if byte == b'"' => Quoted,
            FieldStart | Unquoted | QuoteInQuoted if boundary => FieldStart,
            FieldStart | Unquoted => Unquoted,
            Quoted if byte == b'"' => QuoteInQuoted,
            Quoted => Quoted,
            QuoteInQuoted if byte == b'"' => Quoted,
            QuoteInQuoted => Unquoted,
        }
    }
}

/// Passes bytes through to the csv reader and raises `open_at_eof` when the
/// input ends inside a quoted field. The csv reader only asks for more input
/// while it is still building a record, so the flag goes up while the last
/// record is being read.
struct QuoteTracker {
    inner: Box<dyn Read + Send>,
    delimiter: u8,
    state: QuoteState,
    offset: u64,
    open_at_eof: Arc<AtomicBool>,
}

const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

impl Read for QuoteTracker {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            if self.state == QuoteState::Quoted {
                self.open_at_eof.store(true, Ordering::Relaxed);
            }
            return Ok(0);
        }
        for &byte in &buf[..n] {
            // the csv reader drops a leading BOM before parsing
            let in_bom = self.offset < 3 && byte == UTF8_BOM[self.offset as usize];
            self.offset += 1;
            if !in_bom {
                self.state = self.state.step(byte, self.delimiter);
            }
        }
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// Advisory progress at the parser boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Rows read so far, malformed ones included.
    pub records_processed: u64,
    pub bytes_processed: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressEvent {
    /// Completion in percent, when the source size is known.
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some((self.bytes_processed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

pub type ProgressFn = Box<dyn FnMut(&ProgressEvent) + Send>;

// ---------------------------------------------------------------------------
// RecordReader – the parser stage
// ---------------------------------------------------------------------------

/// Lazily turns a [`Source`] into [`Record`]s.
///
/// Yields `Err(SweepError::Parse(_))` for a malformed row and keeps going;
/// any other error is fatal and ends the stream. The whole document is never
/// held in memory: rows are pulled from the underlying reader one at a time.
pub struct RecordReader {
    inner: csv::Reader<QuoteTracker>,
    open_quote: Arc<AtomicBool>,
    header: Option<Header>,
    has_header: bool,
    null_markers: Vec<String>,
    buf: csv::ByteRecord,
    rows_seen: u64,
    total_bytes: Option<u64>,
    progress: Option<ProgressFn>,
    progress_interval: u64,
    finished: bool,
}

impl RecordReader {
    /// Build a reader and, if the config says so, consume the header row.
    ///
    /// An empty source is not an error here: the reader simply yields nothing.
    pub fn new(source: Source, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let trim = if config.trim_fields {
            csv::Trim::All
        } else {
            csv::Trim::None
        };
        let open_quote = Arc::new(AtomicBool::new(false));
        let tracker = QuoteTracker {
            inner: source.reader,
            delimiter: config.delimiter_byte(),
            state: QuoteState::FieldStart,
            offset: 0,
            open_at_eof: Arc::clone(&open_quote),
        };
        let inner = csv::ReaderBuilder::new()
            .delimiter(config.delimiter_byte())
            .has_headers(false)
            .flexible(true)
            .trim(trim)
            .from_reader(tracker);

        let mut reader = Self {
            inner,
            open_quote,
            header: None,
            has_header: config.has_header,
            null_markers: config.null_markers.clone(),
            buf: csv::ByteRecord::new(),
            rows_seen: 0,
            total_bytes: source.total_bytes,
            progress: None,
            progress_interval: config.progress_interval,
            finished: false,
        };

        if config.has_header {
            reader.read_header()?;
        }
        log::debug!(
            "opened {} (header: {:?})",
            source.name,
            reader.header.as_ref().map(|h| h.names())
        );
        Ok(reader)
    }

    /// Install a progress callback. It runs on whichever thread drives the reader.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Column names, once known. Without a header row they are synthesised
    /// from the width of the first data row.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    fn read_header(&mut self) -> Result<()> {
        let mut raw = csv::ByteRecord::new();
        if !self.inner.read_byte_record(&mut raw).map_err(into_io)? {
            self.finished = true;
            return Ok(());
        }
        if self.open_quote.load(Ordering::Relaxed) {
            return Err(SweepError::InvalidHeader(
                "unterminated quote in header row".into(),
            ));
        }
        let names = raw
            .iter()
            .enumerate()
            .map(|(i, field)| {
                std::str::from_utf8(field)
                    .map(|s| s.trim_start_matches('\u{feff}').to_string())
                    .map_err(|_| {
                        SweepError::InvalidHeader(format!("column {} is not valid UTF-8", i + 1))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.header = Some(Header::new(names)?);
        Ok(())
    }

    fn decode_row(&mut self) -> std::result::Result<Record, ParseError> {
        let row = self.rows_seen;
        let line = self.buf.position().map_or(0, |p| p.line());
        let malformed = |reason: String| ParseError { row, line, reason };

        if self.open_quote.swap(false, Ordering::Relaxed) {
            return Err(malformed("unterminated quote".into()));
        }

        let header = match self.header.clone() {
            Some(h) => h,
            None => {
                let h = Header::synthesized(self.buf.len());
                self.header = Some(h.clone());
                h
            }
        };

        if self.buf.len() != header.len() {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                header.len(),
                self.buf.len()
            )));
        }

        let mut values = Vec::with_capacity(self.buf.len());
        for (i, field) in self.buf.iter().enumerate() {
            let text = std::str::from_utf8(field).map_err(|_| {
                malformed(format!(
                    "field '{}' is not valid UTF-8",
                    header.names()[i]
                ))
            })?;
            if self.null_markers.iter().any(|m| m == text) {
                values.push(FieldValue::Null);
            } else {
                values.push(FieldValue::Text(text.to_string()));
            }
        }
        Ok(Record::new(header, values, row))
    }

    fn report(&mut self, force: bool) {
        let due = force || self.rows_seen % self.progress_interval == 0;
        if let (true, Some(progress)) = (due, self.progress.as_mut()) {
            let event = ProgressEvent {
                records_processed: self.rows_seen,
                bytes_processed: self.inner.position().byte(),
                total_bytes: self.total_bytes,
            };
            progress(&event);
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.read_byte_record(&mut self.buf) {
            Ok(false) => {
                self.finished = true;
                self.report(true);
                None
            }
            Ok(true) => {
                self.rows_seen += 1;
                let item = self.decode_row().map_err(SweepError::from);
                self.report(false);
                Some(item)
            }
            Err(e) => {
                self.finished = true;
                Some(Err(SweepError::Io(into_io(e))))
            }
        }
    }
}

impl fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordReader")
            .field("header", &self.header)
            .field("has_header", &self.has_header)
            .field("rows_seen", &self.rows_seen)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

fn into_io(e: csv::Error) -> io::Error {
    match e.into_kind() {
        csv::ErrorKind::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn reader(text: &str, config: &PipelineConfig) -> RecordReader {
        RecordReader::new(Source::from_bytes("test", text), config).unwrap()
    }

    fn values(rec: &Record) -> Vec<Option<&str>> {
        rec.values().iter().map(FieldValue::as_str).collect()
    }

    #[test]
    fn reads_header_and_rows() {
        let mut r = reader("a,b\n1,2\n3,4\n", &PipelineConfig::default());
        assert_eq!(r.header().unwrap().names(), ["a", "b"]);

        let first = r.next().unwrap().unwrap();
        assert_eq!(first.get("b"), Some(&FieldValue::from("2")));
        assert_eq!(first.row(), 1);
        let second = r.next().unwrap().unwrap();
        assert_eq!(values(&second), [Some("3"), Some("4")]);
        assert!(r.next().is_none());
        assert!(r.next().is_none());
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_newlines() {
        let text = "name,note\n\"Smith, J\",\"line one\nline two\"\nplain,\"say \"\"hi\"\"\"\n";
        let rows: Vec<Record> = reader(text, &PipelineConfig::default())
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(rows.len(), 2);
        assert_eq!(values(&rows[0]), [Some("Smith, J"), Some("line one\nline two")]);
        assert_eq!(values(&rows[1]), [Some("plain"), Some("say \"hi\"")]);
    }

    #[test]
    fn wrong_field_count_is_a_row_error_and_parsing_continues() {
        let items: Vec<_> =
            reader("a,b\n1,2\n1,2,3\n4,5\n", &PipelineConfig::default()).collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        match &items[1] {
            Err(SweepError::Parse(e)) => {
                assert_eq!(e.row, 2);
                assert_eq!(e.line, 3);
                assert!(e.reason.contains("expected 2 fields, found 3"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(items[2].is_ok());
    }

    #[test]
    fn open_quote_in_last_column_is_a_row_error() {
        let items: Vec<_> = reader("a,b\n1,\"open\n2,3\n", &PipelineConfig::default()).collect();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(SweepError::Parse(e)) => {
                assert_eq!(e.row, 1);
                assert_eq!(e.reason, "unterminated quote");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn closed_quotes_at_end_of_input_are_fine() {
        let text = "a,b\n1,\"x \"\"y\"\"\"\n2,\"last\"";
        let rows: Vec<Record> = reader(text, &PipelineConfig::default())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(values(&rows[1]), [Some("2"), Some("last")]);
    }

    #[test]
    fn stray_quote_inside_unquoted_field_is_literal() {
        let rows: Vec<Record> = reader("a,b\n5\"6,x\n7,y", &PipelineConfig::default())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(values(&rows[0]), [Some("5\"6"), Some("x")]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn open_quote_in_header_is_fatal() {
        let err = RecordReader::new(
            Source::from_bytes("t", "a,\"b\n1,2\n"),
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SweepError::InvalidHeader(_)));
    }

    #[test]
    fn quote_state_follows_csv_rules() {
        use QuoteState::*;
        let run = |bytes: &[u8]| bytes.iter().fold(FieldStart, |s, &b| s.step(b, b','));
        assert_eq!(run(b"\"a,b"), Quoted);
        assert_eq!(run(b"\"a\"\"b"), Quoted);
        assert_eq!(run(b"\"a\","), FieldStart);
        assert_eq!(run(b"a\"b"), Unquoted);
        assert_eq!(run(b"x,\"\n"), Quoted);
    }

    #[test]
    fn unterminated_quote_surfaces_as_row_error() {
        let items: Vec<_> = reader("a,b\n\"open,1\n2,3\n", &PipelineConfig::default()).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(SweepError::Parse(_))));
    }

    #[test]
    fn invalid_utf8_is_a_row_error() {
        let mut bytes = b"a,b\n".to_vec();
        bytes.extend_from_slice(b"\xff\xfe,1\nok,2\n");
        let items: Vec<_> =
            RecordReader::new(Source::from_bytes("t", bytes), &PipelineConfig::default())
                .unwrap()
                .collect();
        assert!(matches!(items[0], Err(SweepError::Parse(_))));
        assert!(items[1].is_ok());
    }

    #[test]
    fn blank_lines_are_skipped() {
        let rows: Vec<_> = reader("a\n1\n\n2\n\n", &PipelineConfig::default()).collect();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn no_header_synthesises_column_names() {
        let config = PipelineConfig {
            has_header: false,
            ..Default::default()
        };
        let mut r = reader("x,y\n1,2\n", &config);
        assert!(r.header().is_none());
        let first = r.next().unwrap().unwrap();
        assert_eq!(first.get("column_1"), Some(&FieldValue::from("x")));
        assert_eq!(r.header().unwrap().names(), ["column_1", "column_2"]);
        assert_eq!(r.count(), 1);
    }

    #[test]
    fn custom_delimiter_trim_and_null_markers() {
        let config = PipelineConfig {
            delimiter: ';',
            trim_fields: true,
            null_markers: vec!["NULL".into()],
            ..Default::default()
        };
        let rec = reader("a ; b\n 1 ;NULL\n", &config).next().unwrap().unwrap();
        assert_eq!(rec.header().names(), ["a", "b"]);
        assert_eq!(rec.get("a"), Some(&FieldValue::from("1")));
        assert_eq!(rec.get("b"), Some(&FieldValue::Null));
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut r = reader("", &PipelineConfig::default());
        assert!(r.header().is_none());
        assert!(r.next().is_none());
    }

    #[test]
    fn duplicate_header_is_fatal() {
        let err = RecordReader::new(
            Source::from_bytes("t", "a,a\n1,2\n"),
            &PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SweepError::InvalidHeader(_)));
    }

    #[test]
    fn byte_order_mark_is_stripped_from_header() {
        let r = reader("\u{feff}id,name\n1,x\n", &PipelineConfig::default());
        assert_eq!(r.header().unwrap().names(), ["id", "name"]);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let err = Source::open(Path::new("/no/such/file.csv")).unwrap_err();
        assert!(matches!(err, SweepError::SourceUnavailable { .. }));
    }

    #[test]
    fn progress_is_reported_per_interval_and_at_end() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let config = PipelineConfig {
            progress_interval: 2,
            ..Default::default()
        };
        let text = "a\n1\n2\n3\n4\n5\n";
        let r = reader(text, &config).with_progress(Box::new(move |e| {
            sink.lock().unwrap().push(*e);
        }));
        assert_eq!(r.count(), 5);

        let events = events.lock().unwrap();
        let counts: Vec<u64> = events.iter().map(|e| e.records_processed).collect();
        assert_eq!(counts, [2, 4, 5]);
        let last = events.last().unwrap();
        assert_eq!(last.total_bytes, Some(text.len() as u64));
        assert!(last.bytes_processed > 0 && last.bytes_processed <= text.len() as u64);
    }
}
