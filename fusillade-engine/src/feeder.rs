// fusillade-engine: Input data feeders
//
// A feeder is a lazy sequence of string-to-string records consumed one
// per attempt for placeholder substitution. The CSV feeder rewinds on EOF
// and never exhausts; the JSON feeder signals exhaustion after the last
// record.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use fusillade_config::FeederConfig;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One record of input data
pub type Record = HashMap<String, String>;

/// Lazy record source, safe for concurrent callers
#[async_trait]
pub trait Feeder: Send + Sync {
    /// Next record in source order
    async fn next(&self) -> EngineResult<Record>;

    /// Static record count of the backing source
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the backing file handle
    async fn close(&self);
}

/// Build a feeder from configuration
pub fn from_config(config: &FeederConfig) -> EngineResult<Arc<dyn Feeder>> {
    match config {
        FeederConfig::Csv { path } => Ok(Arc::new(CsvFeeder::open(path)?)),
        FeederConfig::Json { path } => Ok(Arc::new(JsonFeeder::open(path)?)),
    }
}

struct CsvState {
    reader: csv::Reader<File>,
    headers: csv::StringRecord,
}

/// CSV feeder: first row is the header, rows stream in file order and the
/// reader rewinds to the start on EOF
pub struct CsvFeeder {
    path: PathBuf,
    count: usize,
    state: Mutex<Option<CsvState>>,
}

impl CsvFeeder {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let state = Self::open_reader(path)?;

        // One counting pass up front so len() is static
        let mut counter = Self::reader_for(path)?;
        let mut count = 0;
        for row in counter.records() {
            row.map_err(|e| EngineError::ConfigInvalid(format!("csv {}: {}", path.display(), e)))?;
            count += 1;
        }

        Ok(Self {
            path: path.to_path_buf(),
            count,
            state: Mutex::new(Some(state)),
        })
    }

    fn reader_for(path: &Path) -> EngineResult<csv::Reader<File>> {
        let file = File::open(path)
            .map_err(|e| EngineError::ConfigInvalid(format!("csv {}: {}", path.display(), e)))?;
        Ok(csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file))
    }

    fn open_reader(path: &Path) -> EngineResult<CsvState> {
        let mut reader = Self::reader_for(path)?;
        let headers = reader
            .headers()
            .map_err(|e| EngineError::ConfigInvalid(format!("csv {}: {}", path.display(), e)))?
            .clone();
        Ok(CsvState { reader, headers })
    }

    fn record_from(headers: &csv::StringRecord, row: &csv::StringRecord) -> Record {
        headers
            .iter()
            .zip(row.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[async_trait]
impl Feeder for CsvFeeder {
    async fn next(&self) -> EngineResult<Record> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            // Reopened after close; callers may outlive an early close
            *guard = Some(Self::open_reader(&self.path)?);
        }
        // Present from here: populated above or at construction
        let state = guard
            .as_mut()
            .expect("csv reader state populated before use");

        let mut row = csv::StringRecord::new();
        let read = state
            .reader
            .read_record(&mut row)
            .map_err(|e| EngineError::BuildFailed(format!("csv read: {}", e)))?;
        if read {
            return Ok(Self::record_from(&state.headers, &row));
        }

        // EOF: rewind by reopening and continue round-robin
        *state = Self::open_reader(&self.path)?;
        let read = state
            .reader
            .read_record(&mut row)
            .map_err(|e| EngineError::BuildFailed(format!("csv read: {}", e)))?;
        if read {
            Ok(Self::record_from(&state.headers, &row))
        } else {
            // File holds a header and no data rows
            Err(EngineError::FeederExhausted)
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    async fn close(&self) {
        *self.state.lock().await = None;
    }
}

/// JSON feeder: an eagerly loaded array of flat objects, values coerced
/// to strings; exhausts after the last record
pub struct JsonFeeder {
    records: Vec<Record>,
    cursor: Mutex<usize>,
}

impl JsonFeeder {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::ConfigInvalid(format!("json {}: {}", path.display(), e)))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| EngineError::ConfigInvalid(format!("json {}: {}", path.display(), e)))?;

        let array = value.as_array().ok_or_else(|| {
            EngineError::ConfigInvalid(format!(
                "json {}: expected a top-level array of objects",
                path.display()
            ))
        })?;

        let mut records = Vec::with_capacity(array.len());
        for item in array {
            let object = item.as_object().ok_or_else(|| {
                EngineError::ConfigInvalid(format!(
                    "json {}: expected array elements to be objects",
                    path.display()
                ))
            })?;
            let record = object
                .iter()
                .map(|(k, v)| (k.clone(), coerce(v)))
                .collect();
            records.push(record);
        }

        Ok(Self {
            records,
            cursor: Mutex::new(0),
        })
    }
}

fn coerce(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Feeder for JsonFeeder {
    async fn next(&self) -> EngineResult<Record> {
        let mut cursor = self.cursor.lock().await;
        if *cursor >= self.records.len() {
            return Err(EngineError::FeederExhausted);
        }
        let record = self.records[*cursor].clone();
        *cursor += 1;
        Ok(record)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    async fn close(&self) {}
}
