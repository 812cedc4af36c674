use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::Instant;

static BOOT_TIME: OnceLock<Instant> = OnceLock::new();

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Serial logger: colored level, time since boot, trimmed module name
struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = BOOT_TIME.get_or_init(Instant::now).elapsed();
        let seconds = elapsed.as_secs();
        let millis = elapsed.subsec_millis();
        let ts_compact = if seconds < 60 {
            format!("{:>3}.{:03}s", seconds, millis)
        } else if seconds < 3600 {
            format!("{:>2}m{:02}s", seconds / 60, seconds % 60)
        } else {
            format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
        };

        let (color, level_char) = match record.level() {
            Level::Error => (colors::BRIGHT_RED, 'E'),
            Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
            Level::Info => (colors::BRIGHT_GREEN, 'I'),
            Level::Debug => (colors::BRIGHT_BLUE, 'D'),
            Level::Trace => (colors::GRAY, 'T'),
        };
        let module = record
            .module_path()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or("unknown");
        let module_display = module.get(..12).unwrap_or(module);

        println!(
            "{}{} [{}] {:>12} | {}{}",
            color,
            ts_compact,
            level_char,
            module_display,
            record.args(),
            colors::RESET
        );
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial logger at the given level
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(Instant::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);

    println!("{}┌─────────────────────────────────────────┐{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}│        Bus Display LED Firmware         │{}", colors::BRIGHT_GREEN, colors::RESET);
    println!("{}└─────────────────────────────────────────┘{}", colors::BRIGHT_GREEN, colors::RESET);
    Ok(())
}

/// Parse a level name from the device configuration
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    let lf = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return None,
    };
    Some(lf)
}

/// Change log level at runtime once the configuration is loaded
pub fn set_max_level_from_str(level: &str) -> bool {
    match parse_level(level) {
        Some(lf) => {
            log::set_max_level(lf);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("INFO"), Some(LevelFilter::Info));
        assert_eq!(parse_level("warning"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("verbose"), None);
    }
}
