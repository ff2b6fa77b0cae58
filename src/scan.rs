//! Sequential scanning of gzip-compressed, newline-delimited log files.
//!
//! Files are discovered in a data directory by glob pattern, decompressed
//! one at a time and decoded line by line. A line that fails to decode is
//! counted and skipped; only directory- or file-level I/O failures abort
//! the scan.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::accumulator::{LaunchAccumulator, ReviewAccumulator};
use crate::debug_log;
use crate::record::{ParseRecord, ProductRecord, ReviewRecord};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read source directory {}", path.display())]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot read source file {}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid file pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// A family of input files selected by file name, e.g. `reviews*.json.gz`.
#[derive(Debug, Clone)]
pub struct FileFamily {
    pattern: glob::Pattern,
}

impl FileFamily {
    pub fn new(pattern: &str) -> Result<Self, ScanError> {
        glob::Pattern::new(pattern)
            .map(|pattern| Self { pattern })
            .map_err(|source| ScanError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    /// Exactly one file: `<prefix>_<dataset>.json.gz`.
    pub fn dataset(prefix: &str, dataset: &str) -> Result<Self, ScanError> {
        Self::new(&format!(
            "{prefix}_{}.json.gz",
            glob::Pattern::escape(dataset)
        ))
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.matches(file_name)
    }
}

/// Outcome of scanning one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileScanReport {
    pub path: PathBuf,
    /// Lines decoded and handed to the sink.
    pub rows: u64,
    /// Lines that failed to decode.
    pub skipped: u64,
}

/// Per-file reports of one multi-file scan, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: Vec<FileScanReport>,
}

impl ScanSummary {
    pub fn total_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.files.iter().map(|f| f.skipped).sum()
    }

    pub fn extend(&mut self, other: ScanSummary) {
        self.files.extend(other.files);
    }
}

/// Drives records from every matching file into a caller-provided sink.
#[derive(Debug, Clone)]
pub struct ScanDriver {
    data_dir: PathBuf,
    show_progress: bool,
}

impl ScanDriver {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Matching files, sorted by name so repeated runs scan in the same order.
    pub fn discover(&self, family: &FileFamily) -> Result<Vec<PathBuf>, ScanError> {
        let unreadable = |source| ScanError::UnreadableDirectory {
            path: self.data_dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str())
                && family.matches(name)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Scan every file of `family`, feeding each decoded record to `sink`.
    pub fn scan<R, F>(&self, family: &FileFamily, mut sink: F) -> Result<ScanSummary, ScanError>
    where
        R: ParseRecord,
        F: FnMut(R),
    {
        let files = self.discover(family)?;
        debug_log::log(
            "SCAN",
            "START",
            &format!("{} ({} files)", family.pattern(), files.len()),
        );

        let progress = self.progress_bar(files.len() as u64);
        let mut summary = ScanSummary::default();

        for path in files {
            progress.set_message(display_name(&path));
            let report = scan_file(&path, &mut sink)?;

            if report.skipped > 0 {
                progress.suspend(|| {
                    eprintln!(
                        "⚠️  {}: skipped {} rows because of missing or unparsable fields",
                        display_name(&path),
                        report.skipped
                    );
                });
            }
            debug_log::log(
                "SCAN",
                "FILE_DONE",
                &format!(
                    "{} rows={} skipped={}",
                    path.display(),
                    report.rows,
                    report.skipped
                ),
            );

            summary.files.push(report);
            progress.inc(1);
        }

        progress.finish_and_clear();
        Ok(summary)
    }

    /// Fold every review of `family` into `accumulator`.
    pub fn scan_reviews(
        &self,
        family: &FileFamily,
        accumulator: &mut ReviewAccumulator,
    ) -> Result<ScanSummary, ScanError> {
        self.scan(family, |record: ReviewRecord| accumulator.record(&record))
    }

    /// Two-pass launch-date scan.
    ///
    /// Pass one seeds every metadata product accepted by `keep` with the
    /// "not yet launched" sentinel. Pass two lowers each known product's
    /// date to its earliest review.
    pub fn scan_launch_dates<P>(
        &self,
        meta: &FileFamily,
        reviews: &FileFamily,
        keep: P,
    ) -> Result<(LaunchAccumulator, ScanSummary), ScanError>
    where
        P: Fn(&ProductRecord) -> bool,
    {
        let mut launches = LaunchAccumulator::new();

        let mut summary = self.scan(meta, |product: ProductRecord| {
            if keep(&product) {
                launches.seed(&product);
            }
        })?;
        summary.extend(self.scan(reviews, |review: ReviewRecord| {
            launches.observe(&review);
        })?);

        Ok((launches, summary))
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Scan a single gzip file. Decode failures are counted, not returned.
pub fn scan_file<R, F>(path: &Path, sink: &mut F) -> Result<FileScanReport, ScanError>
where
    R: ParseRecord,
    F: FnMut(R),
{
    let unreadable = |source| ScanError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unreadable)?;
    let mut reader = BufReader::with_capacity(64 * 1024, MultiGzDecoder::new(file));
    let mut report = FileScanReport {
        path: path.to_path_buf(),
        ..Default::default()
    };
    let mut line = Vec::with_capacity(4096);

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).map_err(unreadable)? == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match R::parse(&mut line) {
            Ok(record) => {
                report.rows += 1;
                sink(record);
            }
            Err(_) => report.skipped += 1,
        }
    }

    Ok(report)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
