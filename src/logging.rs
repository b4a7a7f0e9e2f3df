use log::{Level, LevelFilter, Metadata, Record};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

static BOOT_TIME: OnceLock<SystemTime> = OnceLock::new();

mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_BLUE: &str = "\x1b[94m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Serial logger that prints colored lines stamped with time since boot
struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let boot_time = BOOT_TIME.get_or_init(SystemTime::now);
        let uptime = SystemTime::now()
            .duration_since(*boot_time)
            .unwrap_or_default();

        // Level, color and module
        let (color, level_char) = level_style(record.level());
        let module = record
            .module_path()
            .unwrap_or("unknown")
            .split("::")
            .last()
            .unwrap_or("unknown");
        let module_display = module.get(..12).unwrap_or(module);

        println!(
            "{}{} [{}] {:>12} | {}{}",
            color, uptime_stamp(uptime), level_char, module_display, record.args(), colors::RESET
        );
    }

    fn flush(&self) {}
}

/// Fixed-width uptime: `  5.042s`, ` 3m07s`, ` 2h15m`.
fn uptime_stamp(uptime: Duration) -> String {
    let seconds = uptime.as_secs();
    match seconds {
        0..=59 => format!("{:>3}.{:03}s", seconds, uptime.subsec_millis()),
        60..=3599 => format!("{:>2}m{:02}s", seconds / 60, seconds % 60),
        _ => format!("{:>2}h{:02}m", seconds / 3600, (seconds % 3600) / 60),
    }
}

fn level_style(level: Level) -> (&'static str, char) {
    match level {
        Level::Error => (colors::BRIGHT_RED, 'E'),
        Level::Warn => (colors::BRIGHT_YELLOW, 'W'),
        Level::Info => (colors::BRIGHT_GREEN, 'I'),
        Level::Debug => (colors::BRIGHT_BLUE, 'D'),
        Level::Trace => (colors::GRAY, 'T'),
    }
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial logger at debug level
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    let _ = BOOT_TIME.set(SystemTime::now());
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Debug);

    println!(
        "{}{} logger ready (E/W/I/D/T){}",
        colors::BRIGHT_GREEN,
        crate::version::APP_NAME,
        colors::RESET
    );
    Ok(())
}

/// Apply a level name from config; false if the name is unknown
pub fn set_max_level_from_str(level: &str) -> bool {
    let lf = match level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => return false,
    };
    log::set_max_level(lf);
    true
}
