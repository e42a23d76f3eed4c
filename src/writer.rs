//! Incremental output sinks. Leads are persisted as they complete rather
//! than only at run end; a write failure is retried a bounded number of
//! times and is then fatal for the run. Silent data loss is not tolerated.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::exporter::{lead_to_row, CSV_COLUMNS};
use crate::models::Lead;
use crate::TARGET_PIPELINE;

const WRITE_RETRIES: usize = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Quote a CSV field if it contains a delimiter, quote, or newline.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

struct CsvInner {
    writer: BufWriter<File>,
    count: usize,
}

/// Thread-safe incremental CSV sink. The header is written at open; each row
/// is flushed immediately so a crashed run still leaves usable output.
pub struct LeadCsvWriter {
    path: PathBuf,
    inner: Mutex<CsvInner>,
}

impl LeadCsvWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("creating CSV output at {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_COLUMNS.join(",")).context("writing CSV header")?;
        writer.flush().context("flushing CSV header")?;
        Ok(LeadCsvWriter {
            path: path.to_path_buf(),
            inner: Mutex::new(CsvInner { writer, count: 0 }),
        })
    }

    /// Append one lead. Retries transient I/O failures; an exhausted retry
    /// budget is an error the caller must treat as fatal.
    pub fn write_lead(&self, lead: &Lead) -> Result<()> {
        let line = lead_to_row(lead)
            .iter()
            .map(|field| csv_escape(field))
            .collect::<Vec<_>>()
            .join(",");

        let mut inner = self.inner.lock().expect("csv writer lock poisoned");
        let mut last_error = None;
        for attempt in 0..WRITE_RETRIES {
            let result = match writeln!(inner.writer, "{}", line) {
                Ok(()) => inner.writer.flush(),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    inner.count += 1;
                    return Ok(());
                }
                Err(e) => {
                    warn!(target: TARGET_PIPELINE, "CSV write attempt {}/{} failed for {:?}: {}", attempt + 1, WRITE_RETRIES, self.path, e);
                    last_error = Some(e);
                    std::thread::sleep(WRITE_RETRY_DELAY);
                }
            }
        }
        Err(anyhow!(
            "CSV write to {:?} failed after {} attempts: {}",
            self.path,
            WRITE_RETRIES,
            last_error.expect("retry loop ran")
        ))
    }

    pub fn count(&self) -> usize {
        self.inner.lock().expect("csv writer lock poisoned").count
    }
}

/// Thread-safe JSON sink: items accumulate during the run and materialize as
/// a single array at close (full-fidelity canonical export).
pub struct LeadJsonWriter {
    items: Mutex<Vec<serde_json::Value>>,
}

impl LeadJsonWriter {
    pub fn new() -> Self {
        LeadJsonWriter {
            items: Mutex::new(Vec::new()),
        }
    }

    pub fn write_lead(&self, lead: &Lead) -> Result<()> {
        let value = serde_json::to_value(lead).context("serializing lead")?;
        self.items
            .lock()
            .expect("json writer lock poisoned")
            .push(value);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.items.lock().expect("json writer lock poisoned").len()
    }

    /// Write the collected array. Retries like the CSV sink; failure is fatal.
    pub fn close(&self, path: &Path) -> Result<()> {
        let items = self.items.lock().expect("json writer lock poisoned");
        let json = serde_json::to_string_pretty(&*items).context("serializing lead array")?;

        let mut last_error = None;
        for attempt in 0..WRITE_RETRIES {
            match std::fs::write(path, &json) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(target: TARGET_PIPELINE, "JSON write attempt {}/{} failed for {:?}: {}", attempt + 1, WRITE_RETRIES, path, e);
                    last_error = Some(e);
                    std::thread::sleep(WRITE_RETRY_DELAY);
                }
            }
        }
        Err(anyhow!(
            "JSON write to {:?} failed after {} attempts: {}",
            path,
            WRITE_RETRIES,
            last_error.expect("retry loop ran")
        ))
    }
}

impl Default for LeadJsonWriter {
    fn default() -> Self {
        Self::new()
    }
}
