use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};

use super::loader::RecordReader;
use super::model::Record;
use crate::error::{Result, SweepError};
use crate::state::CancellationToken;

/// Runs a [`RecordReader`] on its own thread, `capacity` records ahead of
/// the consumer.
///
/// A single producer feeding a FIFO channel keeps records in source order.
/// The bounded channel blocks the reader when the consumer falls behind.
/// Dropping the `ReadAhead` disconnects the channel, which stops the reader
/// at its next send, and then joins the thread.
pub struct ReadAhead {
    rx: Option<Receiver<Result<Record>>>,
    handle: Option<JoinHandle<()>>,
}

impl ReadAhead {
    pub fn spawn(reader: RecordReader, capacity: usize, cancel: CancellationToken) -> Result<Self> {
        let (tx, rx) = bounded(capacity);
        let handle = thread::Builder::new()
            .name("sweep-reader".into())
            .spawn(move || {
                for item in reader {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if tx.send(item).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            rx: Some(rx),
            handle: Some(handle),
        })
    }

    fn join(&mut self) -> Option<SweepError> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(()) => None,
            Err(_) => {
                log::error!("read-ahead thread panicked");
                Some(SweepError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "read-ahead thread panicked",
                )))
            }
        }
    }
}

impl Iterator for ReadAhead {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                self.rx = None;
                self.join().map(Err)
            }
        }
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        self.rx.take();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::data::loader::Source;

    fn numbered_csv(n: usize) -> String {
        let mut text = String::from("n\n");
        for i in 0..n {
            text.push_str(&format!("{i}\n"));
        }
        text
    }

    #[test]
    fn preserves_source_order() {
        let reader = RecordReader::new(
            Source::from_bytes("t", numbered_csv(500)),
            &PipelineConfig::default(),
        )
        .unwrap();
        let ahead = ReadAhead::spawn(reader, 4, CancellationToken::new()).unwrap();

        let seen: Vec<String> = ahead
            .map(|r| r.unwrap().get("n").unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn dropping_early_stops_the_reader() {
        let reader = RecordReader::new(
            Source::from_bytes("t", numbered_csv(10_000)),
            &PipelineConfig::default(),
        )
        .unwrap();
        let mut ahead = ReadAhead::spawn(reader, 2, CancellationToken::new()).unwrap();
        assert!(ahead.next().is_some());
        drop(ahead);
    }

    #[test]
    fn cancelled_token_ends_the_stream() {
        let reader = RecordReader::new(
            Source::from_bytes("t", numbered_csv(10_000)),
            &PipelineConfig::default(),
        )
        .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ahead = ReadAhead::spawn(reader, 2, token).unwrap();
        assert!(ahead.count() <= 2);
    }
}
