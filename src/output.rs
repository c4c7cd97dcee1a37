use crate::measurement::TrialRecord;
use crate::waveform::CalibratedSignal;
use polars::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTPUT_FOLDER: &str = "data";

pub const EVENTS_COLUMN: &str = "events";
pub const FREQUENCY_COLUMN: &str = "frequency";
pub const TIME_COLUMN: &str = "time";
pub const SIGNAL_COLUMN: &str = "signal";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Table error: {0}")]
    Polars(#[from] PolarsError),
}

/// Writes measurement results into one folder without ever replacing a file.
#[derive(Debug, Clone)]
pub struct OutputSink {
    folder: PathBuf,
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_FOLDER)
    }
}

impl OutputSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// First free path for `file_name` in the output folder: the name itself,
    /// then `stem_1.ext`, `stem_2.ext`, and so on.
    pub fn resolve_name(&self, file_name: &str) -> PathBuf {
        let candidate = self.folder.join(file_name);
        if !candidate.exists() {
            return candidate;
        }

        let name = Path::new(file_name);
        let stem = name
            .file_stem()
            .map_or_else(|| file_name.to_string(), |s| s.to_string_lossy().into_owned());
        let extension = name.extension().map(|e| e.to_string_lossy().into_owned());

        (1..)
            .map(|i| match &extension {
                Some(ext) => self.folder.join(format!("{stem}_{i}.{ext}")),
                None => self.folder.join(format!("{stem}_{i}")),
            })
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }

    /// Create a new file under a collision-safe name.
    fn create(&self, file_name: &str) -> Result<(PathBuf, File), OutputError> {
        fs::create_dir_all(&self.folder).map_err(|source| OutputError::Io {
            path: self.folder.clone(),
            source,
        })?;

        let path = self.resolve_name(file_name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| OutputError::Io {
                path: path.clone(),
                source,
            })?;
        Ok((path, file))
    }

    /// Write a table as CSV with a header row.
    pub fn write_frame(&self, frame: &mut DataFrame, file_name: &str) -> Result<PathBuf, OutputError> {
        let (path, mut file) = self.create(file_name)?;
        CsvWriter::new(&mut file).include_header(true).finish(frame)?;
        log::debug!("Wrote {} rows to {}", frame.height(), path.display());
        Ok(path)
    }

    pub fn write_trials(&self, trials: &[TrialRecord], file_name: &str) -> Result<PathBuf, OutputError> {
        self.write_frame(&mut trials_frame(trials)?, file_name)
    }

    pub fn write_signal(&self, signal: &CalibratedSignal, file_name: &str) -> Result<PathBuf, OutputError> {
        self.write_frame(&mut signal_frame(signal)?, file_name)
    }

    pub fn write_bytes(&self, bytes: &[u8], file_name: &str) -> Result<PathBuf, OutputError> {
        let (path, mut file) = self.create(file_name)?;
        file.write_all(bytes).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// `events`/`frequency` table, one row per trial.
pub fn trials_frame(trials: &[TrialRecord]) -> PolarsResult<DataFrame> {
    let events: Vec<u64> = trials.iter().map(|t| t.events).collect();
    let frequency: Vec<f64> = trials.iter().map(|t| t.frequency).collect();
    df!(EVENTS_COLUMN => events, FREQUENCY_COLUMN => frequency)
}

/// `time`/`signal` table of one capture.
pub fn signal_frame(signal: &CalibratedSignal) -> PolarsResult<DataFrame> {
    df!(TIME_COLUMN => signal.time.as_slice(), SIGNAL_COLUMN => signal.signal.as_slice())
}

/// Load a table written by [`OutputSink::write_frame`].
pub fn read_table(path: &Path) -> Result<DataFrame, OutputError> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(frame)
}
