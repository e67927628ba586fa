use connector::config::LoggingSettings;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::Path;

pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger(logging: &LoggingSettings) -> Result<(), log::SetLoggerError> {
    let colors = ColoredLevelConfig::new()
        .trace(Color::BrightBlack)
        .debug(Color::BrightBlue)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red);

    let base_config = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level_filter(&logging.level))
        // rumqttc logs every packet at debug
        .level_for("rumqttc", LevelFilter::Info);

    match open_log_file(&logging.file) {
        Ok(file) => base_config.chain(file).apply()?,
        Err(e) => {
            eprintln!(
                "Warning: Failed to open log file '{}': {}",
                logging.file, e
            );
            eprintln!("Logging to stderr instead.");
            base_config.chain(std::io::stderr()).apply()?;
        }
    }

    log::info!("Logger initialized with level: {}", logging.level);
    Ok(())
}

fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}
