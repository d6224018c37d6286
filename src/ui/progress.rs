use std::future::Future;
use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const FRACTION_SCALE: u64 = 1_000;
const TICK: Duration = Duration::from_millis(80);

/// Bar driven by a completion fraction in `[0, 1]`. Hidden when stderr is
/// not a terminal.
pub fn fraction_bar(prefix: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(FRACTION_SCALE);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix} [{bar:40.cyan/blue}] {percent:>3}% | {elapsed_precise} {msg}",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(TICK);
    pb
}

pub fn set_fraction(pb: &ProgressBar, fraction: f32) {
    let position = (fraction.clamp(0.0, 1.0) * FRACTION_SCALE as f32).round() as u64;
    pb.set_position(position);
}

/// Bar measured in input bytes, for wrapping a file reader.
pub fn byte_bar(total: u64, prefix: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent:>3}%) | {msg}",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(TICK);
    pb
}

pub async fn with_spinner<T, F: Future<Output = T>>(message: &str, fut: F) -> T {
    if !std::io::stderr().is_terminal() {
        return fut.await;
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(TICK);
    let result = fut.await;
    spinner.finish_and_clear();
    result
}
