use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::args::BaseArgs;
use crate::error::{PromError, PromResult};
use crate::http::PromClient;
use crate::shutdown::cancel_on_ctrl_c;
use crate::ui::{self, print_command_status, CommandStatus};
use crate::utils::{
    format_elapsed, format_go_duration, format_usize_commas, parse_duration, parse_rfc3339,
    pluralize,
};

pub mod multipart;
pub mod orchestrator;
pub mod partition;
pub mod selector;
#[cfg(test)]
pub(crate) mod testing;

use multipart::MultipartConfig;
use partition::max_span;

const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Everything one dump invocation needs, already parsed and typed.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpOptions {
    pub endpoint: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
    /// Used verbatim when set; takes precedence over `metric_names`.
    pub query: Option<String>,
    pub metric_names: Vec<String>,
    pub gzip: bool,
    /// Fraction of the per-query point budget to use, in `(0, 1]`.
    pub memory_ratio: f64,
    /// Pause between consecutive range queries.
    pub query_interval: std::time::Duration,
}

impl DumpOptions {
    pub fn validate(&self) -> PromResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(PromError::config("endpoint must be provided"));
        }
        if self.start > self.end {
            return Err(PromError::config("start time must be before end time"));
        }
        if self.step <= Duration::zero() {
            return Err(PromError::config("step must be greater than 0"));
        }
        if !(self.memory_ratio > 0.0 && self.memory_ratio <= 1.0) {
            return Err(PromError::config(format!(
                "memory ratio must be in (0, 1], got {}",
                self.memory_ratio
            )));
        }
        match max_span(self.step, self.memory_ratio) {
            Some(span) if span > Duration::zero() => Ok(()),
            Some(_) => Err(PromError::config(format!(
                "step {} with memory ratio {} leaves no room for a single point",
                format_go_duration(self.step),
                self.memory_ratio
            ))),
            None => Err(PromError::config(format!(
                "step {} is too large",
                format_go_duration(self.step)
            ))),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DumpArgs {
    /// Prometheus endpoint URL
    #[arg(short = 'e', long, env = "PROMDUMP_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Output directory. "." writes into ./promdump_<hash> derived from the options
    #[arg(short = 'o', long, env = "PROMDUMP_OUT", default_value = ".")]
    pub out: PathBuf,

    /// Start time (RFC 3339). Defaults to 7 days before --end
    #[arg(long, value_parser = parse_rfc3339)]
    pub start: Option<DateTime<Utc>>,

    /// End time (RFC 3339). Defaults to now
    #[arg(long, value_parser = parse_rfc3339)]
    pub end: Option<DateTime<Utc>>,

    /// Query resolution, e.g. 1s, 15s, 1m, 1h, 1d
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub step: Duration,

    /// PromQL query to dump instead of every metric, e.g. '{cluster="default"}'
    #[arg(short = 'q', long)]
    pub query: Option<String>,

    /// File with one metric name per line to dump instead of every metric
    #[arg(long, value_name = "FILE")]
    pub metrics_names: Option<PathBuf>,

    /// Gzip the NDJSON output
    #[arg(long)]
    pub gzip: bool,

    /// Fraction (0, 1] of the per-query point budget; lower it if Prometheus runs out of memory
    #[arg(long, default_value_t = 1.0)]
    pub memory_ratio: f64,

    /// Deprecated alias of --memory-ratio; wins when positive
    #[arg(long, default_value_t = 0.0, hide = true)]
    pub query_ratio: f64,

    /// Split the window into this many files; interrupted runs resume after the last finished part
    #[arg(short = 'p', long, default_value_t = 1)]
    pub parts: usize,

    /// Pause between consecutive queries
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    pub query_interval: Duration,
}

impl DumpArgs {
    pub fn to_options(&self) -> Result<DumpOptions> {
        let endpoint = self
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| anyhow!("prometheus endpoint is required (--endpoint or PROMDUMP_ENDPOINT)"))?
            .to_string();

        let end = self.end.unwrap_or_else(Utc::now);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(DEFAULT_LOOKBACK_DAYS));

        let metric_names = match &self.metrics_names {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read metrics names file {}", path.display()))?
                .lines()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        let memory_ratio = if self.query_ratio > 0.0 {
            tracing::warn!("--query-ratio is deprecated, use --memory-ratio");
            self.query_ratio
        } else {
            self.memory_ratio
        };

        let query_interval = self
            .query_interval
            .to_std()
            .context("query interval must not be negative")?;

        let options = DumpOptions {
            endpoint,
            start,
            end,
            step: self.step,
            query: self.query.clone().filter(|q| !q.trim().is_empty()),
            metric_names,
            gzip: self.gzip,
            memory_ratio,
            query_interval,
        };
        options.validate()?;
        Ok(options)
    }
}

pub async fn run(base: BaseArgs, args: DumpArgs) -> Result<()> {
    let options = args.to_options()?;
    let cfg = MultipartConfig::new(options, args.parts, &args.out)?;
    let client = PromClient::new(&cfg.options.endpoint)?;

    if !base.json {
        eprintln!(
            "Dumping Prometheus data from {} to {}",
            cfg.options.endpoint,
            cfg.output_dir.display()
        );
        eprintln!(
            "Time range: {} to {} with step {}",
            cfg.options.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            cfg.options.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            format_go_duration(cfg.options.step)
        );
    }

    let cancel = CancellationToken::new();
    let ctrlc_task = cancel_on_ctrl_c(cancel.clone());
    let pb = ui::fraction_bar("Dumping");
    let started = Instant::now();

    let result = multipart::run(&client, &cfg, &cancel, |current, total, fraction| {
        if total > 1 {
            pb.set_prefix(format!("Part {current}/{total}"));
        }
        ui::set_fraction(&pb, fraction);
    })
    .await;
    ctrlc_task.abort();
    pb.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(PromError::Cancelled) => {
            if base.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": "interrupted",
                        "output_dir": cfg.output_dir,
                        "message": "rerun the same command to resume from the last finished part"
                    }))?
                );
            } else {
                print_command_status(CommandStatus::Error, "Dump interrupted");
                if cfg.parts > 1 {
                    eprintln!("  Resume: rerun the same command");
                }
            }
            return Ok(());
        }
        Err(err) => return Err(err).context("failed to dump prometheus data"),
    };

    if base.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "status": "completed",
                "output_dir": outcome.output_dir,
                "files": outcome.written,
                "skipped_parts": outcome.skipped,
                "queries": outcome.summary.queries,
                "series": outcome.summary.series,
                "samples": outcome.summary.samples,
            }))?
        );
        return Ok(());
    }

    if outcome.skipped > 0 {
        print_command_status(
            CommandStatus::Skipped,
            &format!(
                "{} already on disk",
                pluralize(outcome.skipped, "part", None)
            ),
        );
    }
    print_command_status(CommandStatus::Success, "Dump complete");
    println!("  Output: {}", outcome.output_dir.display());
    println!("  Files: {}", format_usize_commas(outcome.written.len()));
    println!("  Series: {}", format_usize_commas(outcome.summary.series));
    println!("  Samples: {}", format_usize_commas(outcome.summary.samples));
    println!("  Time: {}", format_elapsed(started.elapsed().as_secs()));
    Ok(())
}
