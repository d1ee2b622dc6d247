use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Install the global logger.
///
/// Records go to stderr, or are appended to `log_file` when one is given,
/// one per line as `<timestamp> - <LEVEL> - <message>`.
pub fn init(level: log::LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    // A logger may already be installed when running under a test harness
    let _ = builder.try_init();
    Ok(())
}
