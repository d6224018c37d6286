use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::write_series;
use crate::dump::partition::partition;
use crate::dump::selector::select_queries;
use crate::dump::DumpOptions;
use crate::error::{PromError, PromResult};
use crate::http::{QuerySource, SampleStream};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub queries: usize,
    pub ranges: usize,
    pub series: usize,
    pub samples: usize,
}

impl DumpSummary {
    pub fn absorb(&mut self, other: DumpSummary) {
        self.queries = self.queries.max(other.queries);
        self.ranges += other.ranges;
        self.series += other.series;
        self.samples += other.samples;
    }
}

/// Runs every selected query over every sub-range, one request at a time, and
/// hands each sub-range's matrix to `sink` along with the overall progress.
///
/// Progress is `(query_index + (range_index + 1) / ranges) / queries`, which
/// climbs monotonically and ends at exactly 1.0.
pub async fn dump<F>(
    source: &impl QuerySource,
    opts: &DumpOptions,
    cancel: &CancellationToken,
    mut sink: F,
) -> PromResult<DumpSummary>
where
    F: FnMut(&str, &[SampleStream], f32) -> io::Result<()>,
{
    opts.validate()?;
    if cancel.is_cancelled() {
        return Err(PromError::Cancelled);
    }

    let queries = select_queries(source, opts, cancel).await?;
    let ranges = partition(opts.start, opts.end, opts.step, opts.memory_ratio);
    debug!(
        queries = queries.len(),
        ranges = ranges.len(),
        start = %opts.start,
        end = %opts.end,
        "starting dump"
    );

    let mut summary = DumpSummary {
        queries: queries.len(),
        ranges: ranges.len(),
        ..DumpSummary::default()
    };
    let total_queries = queries.len() as f32;
    let total_ranges = ranges.len() as f32;
    let mut issued = 0usize;

    for (qi, query) in queries.iter().enumerate() {
        for (ri, range) in ranges.iter().enumerate() {
            if issued > 0 && !opts.query_interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PromError::Cancelled),
                    _ = tokio::time::sleep(opts.query_interval) => {}
                }
            }
            issued += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PromError::Cancelled),
                result = source.query_range(query, *range, opts.step) => result,
            };
            let matrix = result?.into_strict()?;

            summary.series += matrix.len();
            summary.samples += matrix.iter().map(|s| s.values.len()).sum::<usize>();
            let progress = (qi as f32 + (ri + 1) as f32 / total_ranges) / total_queries;
            sink(query, &matrix, progress)?;
        }
    }

    info!(
        queries = summary.queries,
        series = summary.series,
        samples = summary.samples,
        "dump finished"
    );
    Ok(summary)
}

enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    fn new(inner: W, gzip: bool) -> Self {
        if gzip {
            Encoder::Gzip(GzEncoder::new(inner, Compression::default()))
        } else {
            Encoder::Plain(inner)
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Encoder::Gzip(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Plain(inner) => inner.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Plain(inner) => inner.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Streams the dump into `out` as NDJSON, gzip-wrapped when the options ask
/// for it. Returns the writer once the encoder has been finished.
pub async fn dump_to_writer<W: Write>(
    source: &impl QuerySource,
    opts: &DumpOptions,
    cancel: &CancellationToken,
    out: W,
    mut on_progress: impl FnMut(f32),
) -> PromResult<(DumpSummary, W)> {
    let mut encoder = Encoder::new(out, opts.gzip);
    let summary = dump(source, opts, cancel, |_query, matrix, progress| {
        write_series(&mut encoder, matrix)?;
        on_progress(progress);
        Ok(())
    })
    .await?;
    let out = encoder.finish()?;
    Ok((summary, out))
}

/// Writes the dump to `path`. Data goes to a sibling `.tmp` file first and is
/// renamed into place only once complete, so a file under its final name is
/// never partial.
pub async fn dump_to_file(
    source: &impl QuerySource,
    opts: &DumpOptions,
    cancel: &CancellationToken,
    path: &Path,
    on_progress: impl FnMut(f32),
) -> PromResult<DumpSummary> {
    let tmp = partial_path(path);
    let file = File::create(&tmp)?;

    let (summary, writer) =
        match dump_to_writer(source, opts, cancel, BufWriter::new(file), on_progress).await {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                return Err(err);
            }
        };

    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "published dump file");
    Ok(summary)
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
