use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::args::BaseArgs;
use crate::error::PromError;
use crate::shutdown::cancel_on_ctrl_c;
use crate::ui::{self, print_command_status, CommandStatus};
use crate::utils::{format_bytes, format_elapsed, format_usize_commas, pluralize};

pub mod source;
pub mod worker;

use source::{push_file, resolve_inputs, FileReport, InputFormat};
use worker::{FlushTarget, PushWorker};

#[derive(Debug, Clone, Args)]
pub struct PushArgs {
    /// Input file, or a directory whose files are pushed in name order
    #[arg(short = 'p', long)]
    pub path: PathBuf,

    /// VictoriaMetrics endpoint URL
    #[arg(short = 'e', long, env = "PROMDUMP_VM_ENDPOINT")]
    pub vm_endpoint: Option<String>,

    /// Records per import request
    #[arg(short = 'b', long, env = "PROMDUMP_BATCH_SIZE", default_value_t = 1000)]
    pub batch_size: usize,

    /// Decode and validate everything but send nothing
    #[arg(long)]
    pub noop: bool,

    /// Input format
    #[arg(long, value_enum, default_value_t = InputFormat::Ndjson)]
    pub format: InputFormat,

    /// Same as --format query-response
    #[arg(long, hide = true)]
    pub amp: bool,

    /// Skip files that do not parse as a query response instead of failing
    #[arg(long)]
    pub ignore_invalid_files: bool,
}

impl PushArgs {
    fn target(&self) -> Result<FlushTarget> {
        if self.noop {
            return Ok(FlushTarget::Discard);
        }
        let endpoint = self
            .vm_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| anyhow!("vm-endpoint is required unless --noop is set"))?;
        Ok(FlushTarget::import(endpoint)?)
    }

    fn input_format(&self) -> InputFormat {
        if self.amp {
            InputFormat::QueryResponse
        } else {
            self.format
        }
    }
}

pub async fn run(base: BaseArgs, args: PushArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("batch-size must be greater than 0");
    }
    let target = args.target()?;
    let files = resolve_inputs(&args.path)?;
    let format = args.input_format();

    let cancel = CancellationToken::new();
    let ctrlc_task = cancel_on_ctrl_c(cancel.clone());
    let worker = PushWorker::new(target, args.batch_size, cancel.clone());
    let started = Instant::now();

    let mut totals = FileReport::default();
    let mut ignored_files = 0usize;
    let mut failure = None;
    for (index, path) in files.iter().enumerate() {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let pb = ui::byte_bar(size, &format!("[{}/{}]", index + 1, files.len()));
        pb.set_message(path.display().to_string());

        let result = push_file(path, format, &worker, args.ignore_invalid_files, &pb).await;
        pb.finish_and_clear();
        match result {
            Ok(report) if report.ignored => {
                ignored_files += 1;
                if !base.json {
                    print_command_status(
                        CommandStatus::Skipped,
                        &format!("{}: not a valid query response", path.display()),
                    );
                }
            }
            Ok(report) => {
                if !base.json {
                    print_command_status(
                        CommandStatus::Success,
                        &format!(
                            "{}: {} queued, {} skipped",
                            path.display(),
                            pluralize(report.records, "record", None),
                            format_usize_commas(report.skipped)
                        ),
                    );
                }
                totals.absorb(report);
            }
            Err(err) => {
                failure = Some((path.clone(), err));
                break;
            }
        }
    }

    let interrupted = cancel.is_cancelled()
        || matches!(failure, Some((_, PromError::Cancelled)));
    let flushed = if failure.is_none() && !interrupted {
        worker.flush().await
    } else {
        Ok(())
    };
    let stats = worker.close().await;
    ctrlc_task.abort();

    if interrupted {
        if base.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "status": "interrupted",
                    "records_pushed": stats.records,
                    "batches": stats.batches,
                }))?
            );
        } else {
            print_command_status(CommandStatus::Error, "Push interrupted");
            println!(
                "  Pushed so far: {} in {}",
                pluralize(stats.records as usize, "record", None),
                pluralize(stats.batches as usize, "batch", Some("batches"))
            );
        }
        return Ok(());
    }
    if let Some((path, err)) = failure {
        return Err(err).with_context(|| format!("failed to push {}", path.display()));
    }
    flushed.context("failed to push data")?;

    if base.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "status": "completed",
                "files": files.len(),
                "ignored_files": ignored_files,
                "records_pushed": stats.records,
                "records_skipped": totals.skipped,
                "batches": stats.batches,
                "bytes_sent": stats.bytes,
                "noop": args.noop,
            }))?
        );
        return Ok(());
    }

    let headline = if args.noop {
        "Push complete (noop, nothing sent)"
    } else {
        "Push complete"
    };
    print_command_status(CommandStatus::Success, headline);
    println!("  Files: {}", format_usize_commas(files.len()));
    if ignored_files > 0 {
        println!("  Ignored files: {}", format_usize_commas(ignored_files));
    }
    println!("  Records: {}", format_usize_commas(stats.records as usize));
    println!("  Skipped records: {}", format_usize_commas(totals.skipped));
    println!("  Batches: {}", format_usize_commas(stats.batches as usize));
    println!("  Data: {}", format_bytes(stats.bytes as f64));
    println!("  Time: {}", format_elapsed(started.elapsed().as_secs()));
    Ok(())
}
