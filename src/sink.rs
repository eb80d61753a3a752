use crate::utils::errors::ExperimentError;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

pub const HEADER: &str = "algorithm,inputSize,frequencyMHz,energyJoules,elapsedMs";

/// One measured (non-warmup) invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub algorithm: String,
    pub input_size: usize,
    /// `0` when no sweep is configured.
    pub frequency_mhz: u32,
    /// `NaN` when the meter is unavailable.
    pub energy_joules: f64,
    pub elapsed_ms: f64,
}

impl ResultRecord {
    /// Renders the record as one CSV line, newline included.
    pub fn to_line(&self) -> String {
        let energy = if self.energy_joules.is_nan() {
            "NaN".to_string()
        } else {
            format!("{:.9}", self.energy_joules)
        };
        format!(
            "{},{},{},{},{:.3}\n",
            self.algorithm, self.input_size, self.frequency_mhz, energy, self.elapsed_ms
        )
    }
}

/// Append-only CSV destination shared by every process of a session.
///
/// The file is `<output_dir>/<session_id>.csv`. It is reopened in append mode on each write so
/// that cooperating processes interleave whole lines; each line goes out in a single write.
/// The file only appears with its header already in it: the header is staged next to it and
/// hard-linked into place, so exactly one process wins the creation.
pub struct ResultSink {
    path: PathBuf,
    written: usize,
}

impl ResultSink {
    pub fn new(output_dir: &Path, session_id: &str) -> Self {
        Self {
            path: output_dir.join(format!("{session_id}.csv")),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended by this handle.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Creates the output directory if needed and checks the destination accepts appends.
    /// The result file itself is not created here.
    pub fn check_writable(&self) -> Result<(), ExperimentError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                ExperimentError::SinkWriteFailed(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        if self.path.exists() {
            return self.open().map(|_| ());
        }
        let staging = self.staging_path();
        fs::write(&staging, b"").map_err(|e| {
            ExperimentError::SinkWriteFailed(format!("cannot write to {}: {e}", staging.display()))
        })?;
        let _ = fs::remove_file(&staging);
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(
            ".{file_name}.{}.{}.tmp",
            process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Publishes a header-only file unless the result file already exists.
    fn create_with_header(&self) -> Result<(), ExperimentError> {
        if self.path.exists() {
            return Ok(());
        }
        let staging = self.staging_path();
        fs::write(&staging, format!("{HEADER}\n")).map_err(|e| {
            ExperimentError::SinkWriteFailed(format!("cannot write {}: {e}", staging.display()))
        })?;
        let linked = fs::hard_link(&staging, &self.path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => Ok(()),
            // another process created it first
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(ExperimentError::SinkWriteFailed(format!(
                "cannot create {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn open(&self) -> Result<File, ExperimentError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ExperimentError::SinkWriteFailed(format!("cannot open {}: {e}", self.path.display())))
    }

    pub fn append(&mut self, record: &ResultRecord) -> Result<(), ExperimentError> {
        self.create_with_header()?;
        let mut file = self.open()?;
        // an empty file left by someone else still gets its header
        let is_empty = file
            .metadata()
            .map(|m| m.len() == 0)
            .map_err(|e| ExperimentError::SinkWriteFailed(e.to_string()))?;

        let mut chunk = String::new();
        if is_empty {
            chunk.push_str(HEADER);
            chunk.push('\n');
        }
        chunk.push_str(&record.to_line());
        file.write_all(chunk.as_bytes())
            .map_err(|e| ExperimentError::SinkWriteFailed(format!("{}: {e}", self.path.display())))?;
        self.written += 1;
        Ok(())
    }
}
