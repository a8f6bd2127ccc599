pub mod fake_smtp;
pub mod fake_turnstile;
pub mod localstack;

use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

/// Sends `log` output, including bridged `tracing` events, to the terminal.
///
/// Safe to call from several tests; only the first call installs the logger.
pub fn setup_logging() {
    let _ = TermLogger::init(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
}
