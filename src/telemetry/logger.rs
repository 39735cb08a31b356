//! Rotating JSONL writer

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::ExchangeRecord;
use crate::error::Result;

const FILE_PREFIX: &str = "exchanges_";
const FILE_EXTENSION: &str = "jsonl";

/// Appends exchange records to JSONL files, rotating by record count
#[derive(Debug)]
pub struct TelemetryLogger {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    file_seq: u32,
}

impl TelemetryLogger {
    /// Create the log directory if needed; the first file opens on first write
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Telemetry journal in {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            file_seq: 0,
        })
    }

    /// Append one record as a JSON line
    pub fn log(&mut self, record: &ExchangeRecord) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{}", line)?;
            writer.flush()?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        // Sequence number keeps names unique within the same second
        let name = format!(
            "{}{}_{:04}.{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.file_seq,
            FILE_EXTENSION
        );
        self.file_seq = self.file_seq.wrapping_add(1);

        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry file {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune();
        Ok(())
    }

    /// Delete the oldest files beyond `max_files_to_keep`
    fn prune(&self) {
        let mut files = match self.journal_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot list telemetry directory: {}", e);
                return;
            }
        };

        if files.len() <= self.max_files_to_keep {
            return;
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old telemetry file {}: {}", path.display(), e);
            }
        }
    }

    /// Journal files in the directory, unsorted
    pub fn journal_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_journal = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_EXTENSION));
            if is_journal {
                files.push(path);
            }
        }
        Ok(files)
    }
}
