mod progress;
mod status;

pub use progress::{byte_bar, fraction_bar, set_fraction, with_spinner};

pub use status::{print_command_status, CommandStatus};
