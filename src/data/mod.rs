/// Data layer: record types and the three streaming stages.
///
/// Architecture:
/// ```text
///  .csv bytes (file or any io::Read)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse rows → Record   (optionally on a read_ahead thread)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  Cleaner: drop records with missing fields
///   │           │  Deduplicator: drop exact repeats, first wins
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  RecordSink: Vec, CSV, or discard
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod read_ahead;
pub mod writer;
