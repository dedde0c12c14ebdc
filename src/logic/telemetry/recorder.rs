//! Audit Trail Recorder
//!
//! Append-only JSONL writer for protection events. One line per event,
//! flushed immediately, rotated by size.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use crate::logic::response::{AlertDispatcher, NotifyError, StructuredEvent};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum file size before rotation (10 MB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Log file extension
const LOG_EXT: &str = ".jsonl";

// ============================================================================
// RECORDER
// ============================================================================

struct Recorder {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
}

/// Audit trail in a directory of JSONL files
pub struct AuditTrail {
    base_dir: PathBuf,
    max_file_size: u64,
    inner: Mutex<Recorder>,
    files_opened: AtomicU64,
}

impl AuditTrail {
    /// Create the directory (if needed) and open a fresh file
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::with_max_file_size(base_dir, MAX_FILE_SIZE)
    }

    pub fn with_max_file_size(base_dir: impl Into<PathBuf>, max_file_size: u64) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let (current_file, file) = open_new_file(&base_dir, 0)?;

        Ok(Self {
            base_dir,
            max_file_size: max_file_size.max(1),
            inner: Mutex::new(Recorder {
                writer: BufWriter::new(file),
                current_file,
                current_size: 0,
            }),
            files_opened: AtomicU64::new(1),
        })
    }

    /// Append one event
    pub fn record(&self, event: &StructuredEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();
        let mut recorder = self.inner.lock();

        if recorder.current_size > 0
            && recorder.current_size + bytes.len() as u64 + 1 > self.max_file_size
        {
            let sequence = self.files_opened.fetch_add(1, Ordering::Relaxed);
            self.rotate(&mut recorder, sequence)?;
        }

        recorder.writer.write_all(bytes)?;
        recorder.writer.write_all(b"\n")?;
        recorder.writer.flush()?;
        recorder.current_size += bytes.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&self, recorder: &mut Recorder, sequence: u64) -> std::io::Result<()> {
        recorder.writer.flush()?;
        let (new_path, new_file) = open_new_file(&self.base_dir, sequence)?;
        log::info!(
            "Rotated audit log from {} to {}",
            recorder.current_file.display(),
            new_path.display()
        );
        recorder.writer = BufWriter::new(new_file);
        recorder.current_file = new_path;
        recorder.current_size = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn current_file(&self) -> PathBuf {
        self.inner.lock().current_file.clone()
    }
}

impl AlertDispatcher for AuditTrail {
    fn name(&self) -> &str {
        "audit"
    }

    fn try_send(&self, event: &StructuredEvent) -> Result<(), NotifyError> {
        self.record(event).map_err(|e| NotifyError::Unreachable {
            reason: format!("audit log write failed: {}", e),
        })
    }
}

/// `audit_<date>_<time>_<seq>.jsonl`; the sequence keeps rotations within one second apart
fn open_new_file(base_dir: &Path, sequence: u64) -> std::io::Result<(PathBuf, File)> {
    let filename = format!(
        "audit_{}_{:04}{}",
        Utc::now().format("%Y_%m_%d_%H%M%S"),
        sequence,
        LOG_EXT
    );
    let file_path = base_dir.join(filename);
    let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
    log::info!("Opened audit log: {}", file_path.display());
    Ok((file_path, file))
}

// ============================================================================
// QUERY API
// ============================================================================

/// Read every parseable event from a log file
pub fn read_events(file_path: &Path) -> std::io::Result<Vec<StructuredEvent>> {
    let reader = BufReader::new(File::open(file_path)?);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<StructuredEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => log::debug!("Skipping bad audit line in {}: {}", file_path.display(), e),
        }
    }

    Ok(events)
}

/// Audit log files in a directory, oldest first
pub fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "jsonl") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

// ============================================================================
// TESTS
// ============================================================================
