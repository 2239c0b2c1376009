use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};

pub mod fake_hcaptcha;
pub mod fake_sendgrid;
pub mod fake_smtp;
pub mod multipart;

/// Routes `log` and `tracing` output to the terminal. Safe to call from every
/// test; only the first call installs the logger.
pub fn setup_logging() {
    let _ = CombinedLogger::init(vec![TermLogger::new(
        LevelFilter::Debug,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
