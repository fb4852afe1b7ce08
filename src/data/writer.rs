use std::io::{self, Write};

use super::model::{FieldValue, Header, Record};
use crate::error::{Result, SweepError};

/// Receives the records that survive the pipeline.
pub trait RecordSink {
    /// Called once, before any record, when the input had a header row.
    fn begin(&mut self, _header: &Header) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self, record: Record) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every surviving record in memory.
impl RecordSink for Vec<Record> {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Discards records; used when only the counts matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn accept(&mut self, _record: Record) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CsvSink – "download processed data"
// ---------------------------------------------------------------------------

/// Writes records back out as delimited text in the input column order.
///
/// Records are written in their own header order; all records of one run share
/// the input header, so the output columns match the input exactly. `Null`
/// cells are written as empty fields.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    written: u64,
}

impl<W: Write> CsvSink<W> {
    pub fn new(out: W, delimiter: u8) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(out);
        Self { writer, written: 0 }
    }

    /// Data rows written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| {
            let cause = e.error();
            SweepError::Io(io::Error::new(cause.kind(), cause.to_string()))
        })
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn begin(&mut self, header: &Header) -> Result<()> {
        self.writer.write_record(header.names())?;
        Ok(())
    }

    fn accept(&mut self, record: Record) -> Result<()> {
        self.writer
            .write_record(record.values().iter().map(|v| match v {
                FieldValue::Text(s) => s.as_str(),
                FieldValue::Null => "",
            }))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_then_rows_with_quoting() {
        let header = Header::new(vec!["name".into(), "note".into()]).unwrap();
        let mut sink = CsvSink::new(Vec::new(), b',');
        sink.begin(&header).unwrap();
        sink.accept(Record::new(
            header.clone(),
            vec!["Smith, J".into(), "two\nlines".into()],
            1,
        ))
        .unwrap();
        sink.accept(Record::new(header, vec!["x".into(), FieldValue::Null], 2))
            .unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.written(), 2);

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out, "name,note\n\"Smith, J\",\"two\nlines\"\nx,\n");
    }

    #[test]
    fn honours_delimiter() {
        let header = Header::new(vec!["a".into(), "b".into()]).unwrap();
        let mut sink = CsvSink::new(Vec::new(), b'\t');
        sink.begin(&header).unwrap();
        sink.accept(Record::new(header, vec!["1".into(), "2".into()], 1))
            .unwrap();
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out, "a\tb\n1\t2\n");
    }

    #[test]
    fn vec_sink_collects() {
        let mut sink: Vec<Record> = Vec::new();
        sink.accept(Record::from_pairs([("a", "1")]).unwrap()).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
