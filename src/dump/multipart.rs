use std::fs;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dump::orchestrator::{dump_to_file, DumpSummary};
use crate::dump::DumpOptions;
use crate::error::{PromError, PromResult};
use crate::http::QuerySource;
use crate::utils::format_go_duration;

/// Output directory value that asks for a content-addressed directory under
/// the working directory.
pub const CURRENT_DIR_SENTINEL: &str = ".";
const SINGLE_PART_STEM: &str = "promdump";
const PART_SUFFIX: &str = ".ndjson";
const GZIP_SUFFIX: &str = ".gz";

#[derive(Debug, Clone)]
pub struct MultipartConfig {
    pub options: DumpOptions,
    pub parts: usize,
    pub output_dir: PathBuf,
}

impl MultipartConfig {
    pub fn new(options: DumpOptions, parts: usize, out: &Path) -> PromResult<Self> {
        if parts == 0 {
            return Err(PromError::config("parts must be greater than 0"));
        }
        if i32::try_from(parts).is_err() {
            return Err(PromError::config(format!("parts must be at most {}", i32::MAX)));
        }
        options.validate()?;
        let output_dir = resolve_output_dir(out, &options, parts)?;
        Ok(Self {
            options,
            parts,
            output_dir,
        })
    }

    /// Options for the `index`-th equal-width slice of the window. The last
    /// slice runs to the configured end so no remainder is lost.
    pub fn part_options(&self, index: usize) -> PromResult<DumpOptions> {
        let out_of_range = || {
            PromError::config(format!("part {index} is out of range for {} parts", self.parts))
        };
        let parts = i32::try_from(self.parts).map_err(|_| out_of_range())?;
        let offset = i32::try_from(index)
            .ok()
            .filter(|offset| *offset < parts)
            .ok_or_else(out_of_range)?;

        let width = (self.options.end - self.options.start)
            .checked_div(parts)
            .ok_or_else(out_of_range)?;
        let start = self.options.start + width.checked_mul(offset).ok_or_else(out_of_range)?;
        let end = if index + 1 >= self.parts {
            self.options.end
        } else {
            start + width
        };
        Ok(DumpOptions {
            start,
            end,
            ..self.options.clone()
        })
    }

    pub fn part_path(&self, index: usize) -> PathBuf {
        let stem = if self.parts == 1 {
            SINGLE_PART_STEM.to_string()
        } else {
            index.to_string()
        };
        let mut name = format!("{stem}{PART_SUFFIX}");
        if self.options.gzip {
            name.push_str(GZIP_SUFFIX);
        }
        self.output_dir.join(name)
    }
}

/// Resolves where part files go. The sentinel `.` becomes
/// `./promdump_<hash>`, keyed on every option that shapes the output, so the
/// same command always lands in (and resumes from) the same directory.
pub fn resolve_output_dir(out: &Path, options: &DumpOptions, parts: usize) -> PromResult<PathBuf> {
    if out.as_os_str().is_empty() {
        return Err(PromError::config("out is required"));
    }
    if out == Path::new(CURRENT_DIR_SENTINEL) {
        let cwd = std::env::current_dir()?;
        return Ok(cwd.join(format!("promdump_{}", options_digest(options, parts))));
    }
    if out.is_absolute() {
        Ok(out.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(out))
    }
}

fn options_digest(options: &DumpOptions, parts: usize) -> String {
    let key = format!(
        "{}-{}-{}-{}-{}-{}-{}",
        options.endpoint,
        options.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        options.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        format_go_duration(options.step),
        options.query.as_deref().unwrap_or_default(),
        options.gzip,
        parts,
    );
    let digest = Sha256::digest(key.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Highest part index with a published file in `dir`, if any.
pub fn completed_parts(dir: &Path) -> PromResult<Option<usize>> {
    let mut max_part = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let stem = name.strip_suffix(GZIP_SUFFIX).unwrap_or(name);
        let stem = stem.strip_suffix(PART_SUFFIX).unwrap_or(stem);
        if let Ok(part) = stem.parse::<usize>() {
            max_part = max_part.max(Some(part));
        }
    }
    Ok(max_part)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MultipartOutcome {
    pub output_dir: PathBuf,
    pub written: Vec<PathBuf>,
    pub skipped: usize,
    pub summary: DumpSummary,
}

/// Dumps every part that is not already on disk, in order.
///
/// `on_progress(current_part, total_parts, fraction)` fires after every
/// sub-range; `current_part` is one-based. A failing part aborts the run and
/// leaves earlier parts in place for the next attempt.
pub async fn run(
    source: &impl QuerySource,
    cfg: &MultipartConfig,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(usize, usize, f32),
) -> PromResult<MultipartOutcome> {
    fs::create_dir_all(&cfg.output_dir)?;
    let mut outcome = MultipartOutcome {
        output_dir: cfg.output_dir.clone(),
        ..MultipartOutcome::default()
    };

    if cfg.parts == 1 {
        let path = cfg.part_path(0);
        outcome.summary = dump_to_file(source, &cfg.options, cancel, &path, |fraction| {
            on_progress(1, 1, fraction)
        })
        .await?;
        info!(path = %path.display(), "dumped single part");
        outcome.written.push(path);
        return Ok(outcome);
    }

    let resume_from = completed_parts(&cfg.output_dir)?.map_or(0, |max| max + 1);
    if resume_from > 0 {
        info!(
            dir = %cfg.output_dir.display(),
            resume_from,
            parts = cfg.parts,
            "resuming multipart dump"
        );
    }

    for index in 0..cfg.parts {
        if index < resume_from {
            debug!(part = index, "part already dumped, skipping");
            outcome.skipped += 1;
            continue;
        }
        let options = cfg.part_options(index)?;
        let path = cfg.part_path(index);
        info!(
            part = index,
            start = %options.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            end = %options.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            path = %path.display(),
            "dumping part"
        );
        let summary = dump_to_file(source, &options, cancel, &path, |fraction| {
            on_progress(index + 1, cfg.parts, fraction)
        })
        .await?;
        outcome.summary.absorb(summary);
        outcome.written.push(path);
    }
    Ok(outcome)
}
