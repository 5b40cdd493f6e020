//! Market data file loader
//!
//! Reads the delimited event file the replay service is seeded with:
//! a header row naming the columns (`Id`, `Timestamp`, `Event`,
//! `Price1`, `Shares1`, `Xchg1`, `Price2`, `Shares2`, `Xchg2`, case
//! insensitive), then one record per line. The second price/share group
//! may be blank for one-sided records and reads as zero. Runs once at
//! startup; every session replays the same loaded sequence.

use crate::events::{EventSequence, MarketDataEvent, SequenceError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tracing::info;

/// Loader errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read market data file: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing column in header: {0}")]
    MissingColumn(&'static str),

    #[error("line {line}: bad {column} value: {value:?}")]
    BadField {
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error("line {line}: expected {expected} fields, found {found}")]
    BadRecord {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("market data file contains no events")]
    Empty,

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

const COLUMNS: [&str; 9] = [
    "id",
    "timestamp",
    "event",
    "price1",
    "shares1",
    "xchg1",
    "price2",
    "shares2",
    "xchg2",
];

/// Load and validate the event sequence from a delimited file.
pub fn load_events(path: impl AsRef<Path>) -> Result<EventSequence, LoadError> {
    let file = File::open(path.as_ref())?;
    let sequence = read_events(file)?;

    info!(
        "Loaded {} events from {}, first: {}, last: {}",
        sequence.len(),
        path.as_ref().display(),
        sequence.first_timestamp().unwrap_or(0),
        sequence.last_timestamp().unwrap_or(0),
    );
    Ok(sequence)
}

/// Parse events from any reader; split out for tests.
pub fn read_events(reader: impl Read) -> Result<EventSequence, LoadError> {
    let mut lines = BufReader::new(reader).lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Err(LoadError::Empty),
    };
    let layout = parse_header(&header)?;

    let mut events = Vec::new();
    for (offset, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // Header is line 1
        let line_no = offset + 2;
        events.push(parse_record(&line, line_no, &layout)?);
    }

    if events.is_empty() {
        return Err(LoadError::Empty);
    }
    Ok(EventSequence::new(events)?)
}

/// Column positions resolved from the header row
struct HeaderLayout {
    positions: HashMap<&'static str, usize>,
    /// Minimum field count a record needs to cover every known column
    width: usize,
}

fn parse_header(header: &str) -> Result<HeaderLayout, LoadError> {
    // A UTF-8 BOM would otherwise glue itself onto the first column name
    let header = header.strip_prefix('\u{feff}').unwrap_or(header);

    let by_name: HashMap<String, usize> = header
        .split(',')
        .enumerate()
        .map(|(index, name)| (name.trim().to_ascii_lowercase(), index))
        .collect();

    let mut positions = HashMap::new();
    let mut width = 0;
    for name in COLUMNS {
        let index = *by_name.get(name).ok_or(LoadError::MissingColumn(name))?;
        width = width.max(index + 1);
        positions.insert(name, index);
    }
    Ok(HeaderLayout { positions, width })
}

fn parse_record(
    line: &str,
    line_no: usize,
    layout: &HeaderLayout,
) -> Result<MarketDataEvent, LoadError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < layout.width {
        return Err(LoadError::BadRecord {
            line: line_no,
            expected: layout.width,
            found: fields.len(),
        });
    }

    let field = |name: &'static str| fields[layout.positions[name]];

    let id: u32 = parse_field(field("id"), line_no, "id")?;
    if id == 0 {
        return Err(LoadError::BadField {
            line: line_no,
            column: "id",
            value: "0".to_string(),
        });
    }

    Ok(MarketDataEvent {
        id,
        timestamp: parse_field(field("timestamp"), line_no, "timestamp")?,
        event: field("event").to_string(),
        price1: parse_field(field("price1"), line_no, "price1")?,
        shares1: parse_field(field("shares1"), line_no, "shares1")?,
        xchg1: field("xchg1").to_string(),
        // One-sided records leave the second group blank
        price2: parse_optional(field("price2"), line_no, "price2")?,
        shares2: parse_optional(field("shares2"), line_no, "shares2")?,
        xchg2: field("xchg2").to_string(),
    })
}

fn parse_field<T: std::str::FromStr>(
    raw: &str,
    line: usize,
    column: &'static str,
) -> Result<T, LoadError> {
    raw.parse().map_err(|_| LoadError::BadField {
        line,
        column,
        value: raw.to_string(),
    })
}

fn parse_optional<T: std::str::FromStr + Default>(
    raw: &str,
    line: usize,
    column: &'static str,
) -> Result<T, LoadError> {
    if raw.is_empty() {
        return Ok(T::default());
    }
    parse_field(raw, line, column)
}
