use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use flate2::read::MultiGzDecoder;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_line, normalize, truncate_for_log, QueryResponse};
use crate::error::{PromError, PromResult};
use crate::push::worker::PushWorker;

const LOG_LINE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// One series per line, legacy or columnar shape
    #[default]
    Ndjson,
    /// A saved `/api/v1/query_range` response body
    #[value(alias = "amp")]
    QueryResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub records: usize,
    pub skipped: usize,
    pub ignored: bool,
}

impl FileReport {
    pub fn absorb(&mut self, other: FileReport) {
        self.records += other.records;
        self.skipped += other.skipped;
    }
}

/// Expands the input path: a file stands for itself, a directory for its
/// regular files in name order.
pub fn resolve_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::metadata(path)
        .with_context(|| format!("failed to get file info for {}", path.display()))?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read directory {}", path.display()))?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    if files.is_empty() {
        bail!("no input files found in {}", path.display());
    }
    Ok(files)
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Opens an input file, decompressing `.gz` files. Progress is tracked on the
/// bytes read from disk, before decompression.
pub fn open_input(path: &Path, pb: &ProgressBar) -> PromResult<Box<dyn Read>> {
    let file = File::open(path)?;
    let reader = pb.wrap_read(file);
    if is_gzip(path) {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

pub async fn push_file(
    path: &Path,
    format: InputFormat,
    worker: &PushWorker,
    ignore_invalid_files: bool,
    pb: &ProgressBar,
) -> PromResult<FileReport> {
    let reader = open_input(path, pb)?;
    let label = path.display().to_string();
    match format {
        InputFormat::Ndjson => push_ndjson(BufReader::new(reader), worker, &label).await,
        InputFormat::QueryResponse => {
            push_query_response(reader, worker, &label, ignore_invalid_files).await
        }
    }
}

/// Decodes one record per line and queues it. Records with non-finite values
/// or no samples are skipped; any other decode failure stops the file.
pub async fn push_ndjson<R: BufRead>(
    reader: R,
    worker: &PushWorker,
    label: &str,
) -> PromResult<FileReport> {
    let mut report = FileReport::default();
    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match decode_line(&line) {
            Ok(record) => {
                worker.push(record).await?;
                report.records += 1;
            }
            Err(err) if err.is_recoverable() => {
                warn!(
                    file = label,
                    line = line_no,
                    error = %err,
                    record = %truncate_for_log(&line, LOG_LINE_LIMIT),
                    "skipping record"
                );
                report.skipped += 1;
            }
            Err(PromError::Decode { message, .. }) => {
                return Err(PromError::decode(format!("{label}:{line_no}"), message));
            }
            Err(err) => return Err(err),
        }
    }
    debug!(file = label, records = report.records, skipped = report.skipped, "file queued");
    Ok(report)
}

/// Queues every series of a saved query-response envelope.
pub async fn push_query_response<R: Read>(
    mut reader: R,
    worker: &PushWorker,
    label: &str,
    ignore_invalid_files: bool,
) -> PromResult<FileReport> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let response = match QueryResponse::parse(&bytes) {
        Ok(response) => response,
        Err(err) if ignore_invalid_files => {
            warn!(file = label, error = %err, "ignoring invalid file");
            return Ok(FileReport {
                ignored: true,
                ..FileReport::default()
            });
        }
        Err(err) => return Err(PromError::decode(label, err)),
    };

    let mut report = FileReport::default();
    for (index, stream) in response.into_matrix()?.into_iter().enumerate() {
        match normalize(stream) {
            Ok(record) => {
                worker.push(record).await?;
                report.records += 1;
            }
            Err(err) if err.is_recoverable() => {
                warn!(file = label, series = index, error = %err, "skipping series");
                report.skipped += 1;
            }
            Err(PromError::Decode { message, .. }) => {
                return Err(PromError::decode(format!("{label} series {index}"), message));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(report)
}
