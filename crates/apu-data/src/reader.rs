//! CSV / JSONL ingestion of APU sensor exports.
//!
//! Streams [`Reading`]s one record at a time from a file or a directory of
//! files, coerces channel values to numbers, keeps only readings inside the
//! requested window, resolves day/hour in the reference zone and checks
//! that timestamps never go backwards. Any problem ends the stream with an
//! error; nothing is guessed or skipped silently.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use apu_core::error::{ApuError, Result};
use apu_core::models::{Channel, Reading, SensorChannels};
use apu_core::time_utils::{DateRange, TimezoneHandler};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

/// Column / field holding the sample time.
pub const TIMESTAMP_FIELD: &str = "timestamp";

// ── File discovery ────────────────────────────────────────────────────────────

fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("csv" | "jsonl" | "ndjson")
    )
}

/// Resolve `path` to the list of input files.
///
/// A file is returned as-is; a directory is walked recursively for `.csv`,
/// `.jsonl` and `.ndjson` files, sorted by path so that date-partitioned
/// exports are read in chronological order.
pub fn find_input_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(ApuError::DataPathNotFound(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    if files.is_empty() {
        return Err(ApuError::NoDataFiles(path.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

// ── Value coercion ────────────────────────────────────────────────────────────

/// Coerce a text cell to a channel value.
///
/// Empty and `null` mean absent; `true`/`false` map to 1/0. Non-finite
/// values (`NaN`, `inf`) are rejected.
pub fn coerce_str(channel: Channel, raw: &str) -> Result<Option<f64>> {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if s.eq_ignore_ascii_case("true") {
        return Ok(Some(1.0));
    }
    if s.eq_ignore_ascii_case("false") {
        return Ok(Some(0.0));
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(ApuError::InvalidChannel {
            channel: channel.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Coerce a JSON value to a channel value (missing / `null` = absent).
pub fn coerce_json(channel: Channel, value: Option<&Value>) -> Result<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::Bool(b)) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Some(Value::String(s)) => coerce_str(channel, s),
        Some(other) => Err(ApuError::InvalidChannel {
            channel: channel.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Parse a JSON timestamp: string, Unix seconds, or Mongo extended JSON
/// (`{"$date": "..."}` / `{"$date": {"$numberLong": "<ms>"}}`).
fn parse_json_timestamp(value: &Value, source: &TimezoneHandler) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => source.parse_timestamp(s),
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let f = n.as_f64()?;
                let secs = f.trunc() as i64;
                let nanos = (f.fract() * 1_000_000_000.0).round() as u32;
                DateTime::from_timestamp(secs, nanos)
            }
        }
        Value::Object(map) => match map.get("$date")? {
            Value::Object(inner) => {
                let ms = match inner.get("$numberLong")? {
                    Value::String(s) => s.parse::<i64>().ok()?,
                    Value::Number(n) => n.as_i64()?,
                    _ => return None,
                };
                DateTime::from_timestamp_millis(ms)
            }
            Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
            other => parse_json_timestamp(other, source),
        },
        _ => None,
    }
}

/// Attach a record location to parse failures.
fn located(err: ApuError, location: &str) -> ApuError {
    match err {
        ApuError::InvalidChannel { .. }
        | ApuError::TimestampParse(_)
        | ApuError::JsonParse(_) => {
            ApuError::MalformedRecord {
                location: location.to_string(),
                reason: err.to_string(),
            }
        }
        ApuError::MalformedRecord {
            location: unset,
            reason,
        } if unset.is_empty() => ApuError::MalformedRecord {
            location: location.to_string(),
            reason,
        },
        other => other,
    }
}

// ── Record sources ────────────────────────────────────────────────────────────

/// A timestamped record before calendar resolution.
#[derive(Debug, Clone)]
struct RawRecord {
    timestamp: DateTime<Utc>,
    channels: SensorChannels,
}

struct CsvSource {
    path: PathBuf,
    timestamp_col: usize,
    channel_cols: Vec<(usize, Channel)>,
    records: csv::StringRecordsIntoIter<File>,
}

struct JsonlSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

enum RecordSource {
    Csv(CsvSource),
    Jsonl(JsonlSource),
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| ApuError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

impl RecordSource {
    fn open(path: &Path) -> Result<Self> {
        let file = open_file(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Self::open_csv(path, file),
            _ => Ok(RecordSource::Jsonl(JsonlSource {
                path: path.to_path_buf(),
                lines: BufReader::new(file).lines(),
                line_no: 0,
            })),
        }
    }

    fn open_csv(path: &Path, file: File) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let headers = reader.headers()?.clone();

        let timestamp_col = headers
            .iter()
            .position(|h| h == TIMESTAMP_FIELD)
            .ok_or_else(|| ApuError::MalformedRecord {
                location: format!("{}:1", path.display()),
                reason: format!("missing \"{}\" column", TIMESTAMP_FIELD),
            })?;
        let channel_cols: Vec<(usize, Channel)> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| Channel::from_field_name(h).map(|c| (i, c)))
            .collect();
        if channel_cols.len() < Channel::ALL.len() {
            warn!(
                "{}: only {} of {} sensor channels present; missing ones are treated as absent",
                path.display(),
                channel_cols.len(),
                Channel::ALL.len()
            );
        }

        Ok(RecordSource::Csv(CsvSource {
            path: path.to_path_buf(),
            timestamp_col,
            channel_cols,
            records: reader.into_records(),
        }))
    }

    fn next_raw(&mut self, source_tz: &TimezoneHandler) -> Option<Result<RawRecord>> {
        match self {
            RecordSource::Csv(csv) => csv.next_raw(source_tz),
            RecordSource::Jsonl(jsonl) => jsonl.next_raw(source_tz),
        }
    }
}

impl CsvSource {
    fn next_raw(&mut self, source_tz: &TimezoneHandler) -> Option<Result<RawRecord>> {
        let record = match self.records.next()? {
            Ok(r) => r,
            Err(e) => return Some(Err(e.into())),
        };
        let line = record.position().map_or(0, |p| p.line());
        let location = format!("{}:{}", self.path.display(), line);
        Some(self.parse(&record, source_tz).map_err(|e| located(e, &location)))
    }

    fn parse(&self, record: &csv::StringRecord, source_tz: &TimezoneHandler) -> Result<RawRecord> {
        let ts_raw = record.get(self.timestamp_col).unwrap_or_default();
        let timestamp = source_tz
            .parse_timestamp(ts_raw)
            .ok_or_else(|| ApuError::TimestampParse(ts_raw.to_string()))?;

        let mut channels = SensorChannels::default();
        for &(col, channel) in &self.channel_cols {
            let value = coerce_str(channel, record.get(col).unwrap_or_default())?;
            channels.set(channel, value);
        }
        Ok(RawRecord {
            timestamp,
            channels,
        })
    }
}

impl JsonlSource {
    fn next_raw(&mut self, source_tz: &TimezoneHandler) -> Option<Result<RawRecord>> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(source) => {
                    return Some(Err(ApuError::FileRead {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let location = format!("{}:{}", self.path.display(), self.line_no);
            return Some(Self::parse(trimmed, source_tz).map_err(|e| located(e, &location)));
        }
    }

    fn parse(line: &str, source_tz: &TimezoneHandler) -> Result<RawRecord> {
        let data: Value = serde_json::from_str(line)?;
        let obj = data.as_object().ok_or_else(|| ApuError::MalformedRecord {
            location: String::new(),
            reason: "expected a JSON object".to_string(),
        })?;

        let ts_value = obj
            .get(TIMESTAMP_FIELD)
            .ok_or_else(|| ApuError::TimestampParse("missing timestamp".to_string()))?;
        let timestamp = parse_json_timestamp(ts_value, source_tz)
            .ok_or_else(|| ApuError::TimestampParse(ts_value.to_string()))?;

        let mut channels = SensorChannels::default();
        for channel in Channel::ALL {
            channels.set(channel, coerce_json(channel, obj.get(channel.field_name()))?);
        }
        Ok(RawRecord {
            timestamp,
            channels,
        })
    }
}

// ── ReadingStream ─────────────────────────────────────────────────────────────

/// How source records become [`Reading`]s.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    /// Zone used for day/hour attribution.
    pub reference: TimezoneHandler,
    /// Zone assumed for timestamps without an offset.
    pub source: TimezoneHandler,
    /// Only readings inside this window are delivered.
    pub range: DateRange,
}

impl ReaderOptions {
    pub fn new(reference_tz: &str, source_tz: &str, range: DateRange) -> Result<Self> {
        Ok(Self {
            reference: TimezoneHandler::new(reference_tz)?,
            source: TimezoneHandler::new(source_tz)?,
            range,
        })
    }
}

/// Forward-only, non-restartable iterator of readings across input files.
///
/// Yields at most one error, after which it is exhausted.
pub struct ReadingStream {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<RecordSource>,
    options: ReaderOptions,
    last_timestamp: Option<DateTime<Utc>>,
    finished: bool,
    files_opened: usize,
    out_of_range: u64,
}

impl ReadingStream {
    pub fn new(files: Vec<PathBuf>, options: ReaderOptions) -> Self {
        Self {
            files: files.into_iter(),
            current: None,
            options,
            last_timestamp: None,
            finished: false,
            files_opened: 0,
            out_of_range: 0,
        }
    }

    /// Number of input files opened so far.
    pub fn files_opened(&self) -> usize {
        self.files_opened
    }

    /// Records skipped because they fell outside the window.
    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    fn fail(&mut self, err: ApuError) -> Option<Result<Reading>> {
        self.finished = true;
        self.current = None;
        Some(Err(err))
    }
}

impl Iterator for ReadingStream {
    type Item = Result<Reading>;

    fn next(&mut self) -> Option<Result<Reading>> {
        loop {
            if self.finished {
                return None;
            }
            if self.current.is_none() {
                match self.files.next() {
                    Some(path) => match RecordSource::open(&path) {
                        Ok(source) => {
                            debug!("Reading {}", path.display());
                            self.files_opened += 1;
                            self.current = Some(source);
                        }
                        Err(e) => return self.fail(e),
                    },
                    None => {
                        self.finished = true;
                        return None;
                    }
                }
            }

            let next = match self.current.as_mut() {
                Some(source) => source.next_raw(&self.options.source),
                None => continue,
            };
            let raw = match next {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Err(e)) => return self.fail(e),
                Some(Ok(raw)) => raw,
            };

            if !self.options.range.contains(raw.timestamp) {
                self.out_of_range += 1;
                continue;
            }
            if let Some(previous) = self.last_timestamp {
                if raw.timestamp < previous {
                    return self.fail(ApuError::OutOfOrder {
                        previous,
                        current: raw.timestamp,
                    });
                }
            }
            self.last_timestamp = Some(raw.timestamp);

            let (day, hour) = self.options.reference.calendar_slot(raw.timestamp);
            return match Reading::new(raw.timestamp, day, hour, raw.channels) {
                Ok(reading) => Some(Ok(reading)),
                Err(e) => self.fail(e),
            };
        }
    }
}

/// Open every input file under `path` as one ordered reading stream.
pub fn open_readings(path: &Path, options: ReaderOptions) -> Result<ReadingStream> {
    let files = find_input_files(path)?;
    debug!("Found {} input file(s) under {}", files.len(), path.display());
    Ok(ReadingStream::new(files, options))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
