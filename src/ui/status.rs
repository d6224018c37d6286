use dialoguer::console::style;

pub enum CommandStatus {
    Success,
    Skipped,
    Error,
}

/// One-line outcome for a file or part, written to stderr so stdout stays
/// reserved for data and JSON summaries.
pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match status {
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Skipped => style("-").dim(),
        CommandStatus::Error => style("✗").red(),
    };
    eprintln!("{indicator} {message}");
}
