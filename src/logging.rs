use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "PROMDUMP_LOG";
const DEFAULT_LEVEL: &str = "warn";

/// Installs the stderr subscriber. `PROMDUMP_LOG` sets this crate's level and
/// `RUST_LOG` directives override it.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(false)
            .init();
    });
}

fn env_filter() -> EnvFilter {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let level = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
    build_filter(&rust_log, &level)
}

fn build_filter(rust_log: &str, level: &str) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse_lossy(rust_log);

    let crate_name = env!("CARGO_CRATE_NAME");
    if !rust_log.contains(&format!("{crate_name}=")) {
        match format!("{crate_name}={level}").parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(err) => eprintln!("ignoring invalid {LOG_ENV_VAR} value {level:?}: {err}"),
        }
    }
    filter
}
