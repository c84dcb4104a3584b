use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::upload::UploadForwarder;

/// Outcome of one merge pass.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MergeReport {
    merged: usize,
    duplicates: usize,
    upload_failures: usize,
}

impl MergeReport {
    /// Lines newly appended to the confirmed store and handed to the forwarder.
    #[must_use]
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Pending lines skipped because they were already confirmed.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Merged lines whose upload failed.
    #[must_use]
    pub fn upload_failures(&self) -> usize {
        self.upload_failures
    }
}

/// The confirmed and pending session files.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalStore {
    confirmed: PathBuf,
    pending: PathBuf,
}

impl LocalStore {
    /// Creates a store over two file paths. Nothing is touched until first use.
    #[must_use]
    pub fn new(confirmed: impl Into<PathBuf>, pending: impl Into<PathBuf>) -> Self {
        Self {
            confirmed: confirmed.into(),
            pending: pending.into(),
        }
    }

    #[must_use]
    pub fn confirmed_path(&self) -> &Path {
        &self.confirmed
    }

    #[must_use]
    pub fn pending_path(&self) -> &Path {
        &self.pending
    }

    /// Whether a merge pass is owed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.exists()
    }

    /// Appends fetched session lines to the pending file in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created or written.
    #[instrument(skip(self, lines), level = "debug", fields(lines = lines.len()))]
    pub fn append_pending(&self, lines: &[String]) -> Result<(), StoreError> {
        let mut file = open_append(&self.pending)?;
        for line in lines {
            writeln!(file, "{line}").map_err(|source| io_error(&self.pending, source))?;
        }
        file.flush().map_err(|source| io_error(&self.pending, source))
    }

    /// Lines currently in the confirmed store.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read.
    pub fn confirmed_lines(&self) -> Result<Vec<String>, StoreError> {
        read_lines(&self.confirmed)
    }

    /// Merges the pending file into the confirmed store, forwarding every new line.
    ///
    /// Lines already confirmed, or seen earlier in the same pass, are skipped.
    /// The pending file is removed afterwards whatever the upload outcomes.
    ///
    /// # Errors
    ///
    /// Returns an error when either file cannot be read or written. The
    /// pending file is kept in that case.
    #[instrument(skip(self, forwarder), level = "debug")]
    pub async fn merge(&self, forwarder: &UploadForwarder) -> Result<MergeReport, StoreError> {
        if !self.has_pending() {
            debug!("no pending sessions to merge");
            return Ok(MergeReport::default());
        }

        let mut seen: HashSet<String> = read_lines(&self.confirmed)?.into_iter().collect();
        let pending = read_lines(&self.pending)?;
        let mut confirmed = open_append(&self.confirmed)?;
        let mut report = MergeReport::default();

        for line in pending {
            if line.is_empty() {
                continue;
            }
            if !seen.insert(line.clone()) {
                report.duplicates += 1;
                continue;
            }

            writeln!(confirmed, "{line}")
                .and_then(|()| confirmed.flush())
                .map_err(|source| io_error(&self.confirmed, source))?;
            report.merged += 1;

            if !forwarder.forward(&line).await {
                report.upload_failures += 1;
            }
        }
        drop(confirmed);

        fs::remove_file(&self.pending).map_err(|source| io_error(&self.pending, source))?;
        info!(
            uploaded = report.merged,
            duplicates = report.duplicates,
            upload_failures = report.upload_failures,
            "merged pending sessions"
        );
        Ok(report)
    }
}

fn open_append(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| io_error(path, source))
}

fn read_lines(path: &Path) -> Result<Vec<String>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(io_error(path, source)),
    };

    BufReader::new(file)
        .lines()
        .map(|line| line.map(|line| line.trim_end_matches('\r').to_string()))
        .collect::<Result<_, _>>()
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
