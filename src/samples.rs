use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A buffer the service answered with a win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningSample {
    pub round: u64,
    pub buffer: Vec<u8>,
    pub hex: String,
    pub found_at: DateTime<Utc>,
}

impl WinningSample {
    pub fn new(round: u64, buffer: &[u8]) -> Self {
        Self {
            round,
            buffer: buffer.to_vec(),
            hex: hex::encode(buffer),
            found_at: Utc::now(),
        }
    }
}

pub trait SampleSink {
    fn save(&mut self, sample: &WinningSample) -> Result<()>;
}

/// Keeps winning samples in memory. Clones share the same list, so a
/// handle kept outside the controller sees what the run saved.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    samples: Arc<Mutex<Vec<WinningSample>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<WinningSample> {
        match self.samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SampleSink for MemorySink {
    fn save(&mut self, sample: &WinningSample) -> Result<()> {
        self.samples
            .lock()
            .map_err(|_| Error::Sample("sample list poisoned".into()))?
            .push(sample.clone());
        Ok(())
    }
}

/// Appends one JSON object per winning sample to a file.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Sample(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for JsonLinesSink {
    fn save(&mut self, sample: &WinningSample) -> Result<()> {
        let line = serde_json::to_string(sample).map_err(|e| Error::Sample(e.to_string()))?;
        // Flushed per sample so a killed run keeps what it found.
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::Sample(format!("{}: {}", self.path.display(), e)))
    }
}
